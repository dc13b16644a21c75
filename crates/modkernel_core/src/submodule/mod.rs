//! Module-owned second-level registry.
//!
//! # Responsibility
//! - Let a module install, upgrade and forward calls to submodules keyed by
//!   SubKeycode.
//!
//! # Invariants
//! - A submodule's SubKeycode starts with its parent module's keycode.
//! - Only the parent module may initialize or call into a submodule.
//! - A failed install or upgrade leaves the table unchanged.

mod base;
mod registry;

pub use base::{downcast_submodule, Submodule, SubmoduleBase, SubmoduleError};
pub use registry::{
    ModuleWithSubmodules, SubmoduleRegistry, EXEC_ON_SUBMODULE, INSTALL_SUBMODULE,
    UPGRADE_SUBMODULE,
};
