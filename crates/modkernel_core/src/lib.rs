//! Permissioned module kernel.
//!
//! A kernel registers stateful modules under keycodes, activates policies
//! that consume permissioned module functions, and records every registry
//! change as a structured event.

pub mod call;
pub mod db;
pub mod identity;
pub mod journal;
pub mod kernel;
pub mod logging;
pub mod submodule;

pub use call::{CallError, Calldata, Revert};
pub use identity::{Address, IdentityError, Keycode, Role, Selector, SubKeycode};
pub use journal::{EventJournal, JournalError, RegistryView, SqliteEventJournal};
pub use kernel::{
    Action, ActionKind, EventRecord, Kernel, KernelAdapter, KernelConfig, KernelError,
    KernelEvent, Module, ModuleError, ModuleVersion, Permission, Policy, PolicyError,
    PolicyState,
};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use submodule::{ModuleWithSubmodules, Submodule, SubmoduleBase, SubmoduleError};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
