use crate::call::{Calldata, Revert};
use crate::identity::{Address, Keycode, SubKeycode};
use crate::kernel::{Module, ModuleVersion};
use std::any::Any;
use thiserror::Error;

/// Submodule-side errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmoduleError {
    #[error("caller {0} is not the parent module")]
    OnlyParent(Address),
    #[error("parent module {actual} does not match declared parent {expected}")]
    InvalidParent { expected: Keycode, actual: Keycode },
    #[error(transparent)]
    Reverted(#[from] Revert),
}

/// Parent reference fixed when a submodule is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmoduleBase {
    parent: Address,
    parent_keycode: Keycode,
}

impl SubmoduleBase {
    /// Binds to `parent`, which must be registered under `declared_parent`.
    pub fn new(parent: &dyn Module, declared_parent: Keycode) -> Result<Self, SubmoduleError> {
        let actual = parent.keycode();
        if actual != declared_parent {
            return Err(SubmoduleError::InvalidParent {
                expected: declared_parent,
                actual,
            });
        }
        Ok(Self {
            parent: parent.address(),
            parent_keycode: declared_parent,
        })
    }

    pub fn parent(&self) -> Address {
        self.parent
    }

    pub fn parent_keycode(&self) -> Keycode {
        self.parent_keycode
    }

    pub fn only_parent(&self, caller: Address) -> Result<(), SubmoduleError> {
        if caller != self.parent {
            return Err(SubmoduleError::OnlyParent(caller));
        }
        Ok(())
    }
}

/// Second-level component owned by exactly one module.
pub trait Submodule: Send + Sync {
    fn address(&self) -> Address;

    fn sub_keycode(&self) -> SubKeycode;

    fn version(&self) -> ModuleVersion;

    fn base(&self) -> &SubmoduleBase;

    fn as_any(&self) -> &dyn Any;

    fn parent_keycode(&self) -> Keycode {
        self.base().parent_keycode()
    }

    fn on_init(&self) -> Result<(), Revert> {
        Ok(())
    }

    /// Lifecycle hook, callable only by the parent module.
    fn init(&self, caller: Address) -> Result<(), SubmoduleError> {
        self.base().only_parent(caller)?;
        self.on_init()?;
        Ok(())
    }

    /// Entry points reachable through the parent's forwarding call.
    fn handle(&self, calldata: &Calldata) -> Result<Vec<u8>, Revert> {
        Err(Revert::message(format!(
            "unknown selector {}",
            calldata.selector
        )))
    }

    /// Parent-gated dispatch into [`Submodule::handle`].
    fn call(&self, caller: Address, calldata: &Calldata) -> Result<Vec<u8>, Revert> {
        self.base()
            .only_parent(caller)
            .map_err(|err| Revert::message(err.to_string()))?;
        self.handle(calldata)
    }
}

/// Downcasts an installed submodule to its concrete type.
pub fn downcast_submodule<T: Submodule + 'static>(submodule: &dyn Submodule) -> Option<&T> {
    submodule.as_any().downcast_ref::<T>()
}
