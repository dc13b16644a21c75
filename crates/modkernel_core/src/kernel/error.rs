use super::adapter::KernelAdapterError;
use super::event::ActionKind;
use super::module::ModuleError;
use super::policy::PolicyError;
use crate::identity::{Address, IdentityError, Keycode, Role};
use std::fmt::{Display, Formatter};
use thiserror::Error;

/// Policy hook the kernel was running when a policy failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyHook {
    ConfigureDependencies,
    RequestPermissions,
}

impl Display for PolicyHook {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConfigureDependencies => f.write_str("configure_dependencies"),
            Self::RequestPermissions => f.write_str("request_permissions"),
        }
    }
}

/// Kernel registry errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KernelError {
    #[error("caller {0} is not the executor")]
    OnlyExecutor(Address),
    #[error("caller {0} is not the admin")]
    OnlyAdmin(Address),
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error("module already installed: {0}")]
    ModuleAlreadyInstalled(Keycode),
    #[error("invalid module upgrade: {0}")]
    InvalidModuleUpgrade(Keycode),
    #[error("policy already activated: {0}")]
    PolicyAlreadyActivated(Address),
    #[error("policy not activated: {0}")]
    PolicyNotActivated(Address),
    #[error("address {addr} already has role {role}")]
    AddressAlreadyHasRole { addr: Address, role: Role },
    #[error("address {addr} does not have role {role}")]
    AddressDoesNotHaveRole { addr: Address, role: Role },
    #[error("role does not exist: {0}")]
    RoleDoesNotExist(Role),
    #[error("{0} rejects the zero address")]
    ZeroAddress(ActionKind),
    #[error("kernel mutation already in progress")]
    MutationInProgress,
    #[error("init of module {keycode} failed: {source}")]
    ModuleInit {
        keycode: Keycode,
        #[source]
        source: ModuleError,
    },
    #[error("{hook} of policy {policy} failed: {source}")]
    PolicyHook {
        hook: PolicyHook,
        policy: Address,
        #[source]
        source: PolicyError,
    },
    #[error("kernel adapter call on {target} failed: {source}")]
    KernelAdapter {
        target: Address,
        #[source]
        source: KernelAdapterError,
    },
}
