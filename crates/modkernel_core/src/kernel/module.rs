//! Module capability: identity, version, lifecycle hook, permission guard.

use super::adapter::{KernelAdapter, KernelAdapterError};
use super::Kernel;
use crate::call::Revert;
use crate::identity::{Address, IdentityError, Keycode, Selector, SubKeycode};
use crate::submodule::SubmoduleError;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use thiserror::Error;

/// Module and submodule errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModuleError {
    #[error("caller {0} is not permitted")]
    PolicyNotPermitted(Address),
    #[error(transparent)]
    KernelAdapter(#[from] KernelAdapterError),
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error("submodule parent {actual} does not match module {expected}")]
    InvalidSubmodule { expected: Keycode, actual: Keycode },
    #[error("submodule already installed: {0}")]
    SubmoduleAlreadyInstalled(SubKeycode),
    #[error("invalid submodule upgrade: {0}")]
    InvalidSubmoduleUpgrade(SubKeycode),
    #[error("submodule not installed: {0}")]
    SubmoduleNotInstalled(SubKeycode),
    #[error("submodule {sub_keycode} init failed: {source}")]
    SubmoduleInit {
        sub_keycode: SubKeycode,
        #[source]
        source: SubmoduleError,
    },
    #[error("submodule {sub_keycode} execution reverted: 0x{}", hex::encode(.payload))]
    SubmoduleExecutionReverted {
        sub_keycode: SubKeycode,
        payload: Vec<u8>,
    },
    #[error("submodule registry mutation already in progress")]
    MutationInProgress,
    #[error(transparent)]
    Reverted(#[from] Revert),
}

/// Major/minor module version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleVersion {
    pub major: u8,
    pub minor: u8,
}

impl ModuleVersion {
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }
}

impl Display for ModuleVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Stateful, permission-gated component registered under a keycode.
///
/// Implementations keep their own state behind interior mutability; every
/// state-mutating entry point calls [`Module::permissioned`] first with the
/// caller address and the entry point's selector.
pub trait Module: Send + Sync {
    fn address(&self) -> Address;

    fn keycode(&self) -> Keycode;

    fn version(&self) -> ModuleVersion;

    fn adapter(&self) -> &KernelAdapter;

    fn as_any(&self) -> &dyn Any;

    /// Install/upgrade setup. Runs after the kernel registered the module.
    fn on_init(&self) -> Result<(), ModuleError> {
        Ok(())
    }

    /// Lifecycle hook, callable only by the owning kernel.
    fn init(&self, caller: Address) -> Result<(), ModuleError> {
        self.adapter().only_kernel(caller)?;
        self.on_init()
    }

    /// Passes only when the kernel granted `selector` on this module to `caller`.
    fn permissioned(&self, caller: Address, selector: Selector) -> Result<(), ModuleError> {
        let kernel = self.adapter().kernel()?;
        if kernel.module_permissions(self.keycode(), caller, selector) {
            return Ok(());
        }
        Err(ModuleError::PolicyNotPermitted(caller))
    }

    fn change_kernel(
        &self,
        caller: Address,
        new_kernel: &Arc<Kernel>,
    ) -> Result<(), KernelAdapterError> {
        self.adapter().change_kernel(caller, new_kernel)
    }
}

/// Downcasts a registered module to its concrete type.
pub fn downcast_module<T: Module + 'static>(module: &dyn Module) -> Option<&T> {
    module.as_any().downcast_ref::<T>()
}
