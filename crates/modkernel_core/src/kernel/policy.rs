//! Policy capability: activation flag, role guard, dependency and
//! permission declarations.

use super::adapter::{KernelAdapter, KernelAdapterError};
use super::module::{Module, ModuleError};
use super::Kernel;
use crate::call::Revert;
use crate::identity::{Address, Keycode, Role, Selector};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Policy-side errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("caller lacks role {0}")]
    OnlyRole(Role),
    #[error("module does not exist: {0}")]
    ModuleDoesNotExist(Keycode),
    #[error(transparent)]
    KernelAdapter(#[from] KernelAdapterError),
    #[error(transparent)]
    Module(#[from] ModuleError),
    #[error(transparent)]
    Reverted(#[from] Revert),
}

/// One requested grant: `selector` on the module registered under `keycode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Permission {
    pub keycode: Keycode,
    pub selector: Selector,
}

impl Permission {
    pub const fn new(keycode: Keycode, selector: Selector) -> Self {
        Self { keycode, selector }
    }
}

/// Kernel reference and activation flag shared by every policy.
#[derive(Debug)]
pub struct PolicyState {
    adapter: KernelAdapter,
    active: AtomicBool,
}

impl PolicyState {
    pub fn new(kernel: &Arc<Kernel>) -> Self {
        Self {
            adapter: KernelAdapter::new(kernel),
            active: AtomicBool::new(false),
        }
    }

    pub fn adapter(&self) -> &KernelAdapter {
        &self.adapter
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn set_active(&self, caller: Address, active: bool) -> Result<(), KernelAdapterError> {
        self.adapter.only_kernel(caller)?;
        self.active.store(active, Ordering::SeqCst);
        Ok(())
    }
}

/// Application logic consuming permissioned module functions.
///
/// `configure_dependencies` and `request_permissions` receive the kernel
/// invoking them. They may read the kernel but never mutate it.
pub trait Policy: Send + Sync {
    fn address(&self) -> Address;

    fn state(&self) -> &PolicyState;

    /// Keycodes this policy depends on. Called at activation, deactivation
    /// and whenever one of the listed modules is upgraded, so cached module
    /// handles can be refreshed here.
    fn configure_dependencies(&self, _kernel: &Kernel) -> Result<Vec<Keycode>, PolicyError> {
        Ok(Vec::new())
    }

    /// Grants this policy needs. Called at activation and deactivation.
    fn request_permissions(&self, _kernel: &Kernel) -> Result<Vec<Permission>, PolicyError> {
        Ok(Vec::new())
    }

    fn is_active(&self) -> bool {
        self.state().is_active()
    }

    fn set_active_status(&self, caller: Address, active: bool) -> Result<(), KernelAdapterError> {
        self.state().set_active(caller, active)
    }

    /// Passes only when the kernel records `role` for `caller`.
    fn only_role(&self, caller: Address, role: Role) -> Result<(), PolicyError> {
        let kernel = self.state().adapter().kernel()?;
        if kernel.has_role(caller, role) {
            return Ok(());
        }
        Err(PolicyError::OnlyRole(role))
    }

    fn change_kernel(
        &self,
        caller: Address,
        new_kernel: &Arc<Kernel>,
    ) -> Result<(), KernelAdapterError> {
        self.state().adapter().change_kernel(caller, new_kernel)
    }
}

/// Resolves the module installed under `keycode`, failing when absent.
pub fn module_for_keycode(
    kernel: &Kernel,
    keycode: Keycode,
) -> Result<Arc<dyn Module>, PolicyError> {
    kernel
        .module_for_keycode(keycode)
        .ok_or(PolicyError::ModuleDoesNotExist(keycode))
}
