//! Structured kernel events.
//!
//! Off-chain observers rebuild registry state from these records alone, so
//! variant field order is part of the contract.

use crate::identity::{Address, Keycode, Role, Selector};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Kind of registry action submitted by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    InstallModule,
    UpgradeModule,
    ActivatePolicy,
    DeactivatePolicy,
    ChangeExecutor,
    ChangeAdmin,
    MigrateKernel,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InstallModule => "install_module",
            Self::UpgradeModule => "upgrade_module",
            Self::ActivatePolicy => "activate_policy",
            Self::DeactivatePolicy => "deactivate_policy",
            Self::ChangeExecutor => "change_executor",
            Self::ChangeAdmin => "change_admin",
            Self::MigrateKernel => "migrate_kernel",
        }
    }
}

impl Display for ActionKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event emitted by a committed kernel mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum KernelEvent {
    PermissionsUpdated {
        keycode: Keycode,
        policy: Address,
        selector: Selector,
        granted: bool,
    },
    RoleGranted {
        role: Role,
        addr: Address,
    },
    RoleRevoked {
        role: Role,
        addr: Address,
    },
    ActionExecuted {
        action: ActionKind,
        target: Address,
    },
}

impl KernelEvent {
    /// Stable event name used for journal indexing and log lines.
    pub fn name(&self) -> &'static str {
        match self {
            Self::PermissionsUpdated { .. } => "permissions_updated",
            Self::RoleGranted { .. } => "role_granted",
            Self::RoleRevoked { .. } => "role_revoked",
            Self::ActionExecuted { .. } => "action_executed",
        }
    }
}

/// One committed event with its position in the kernel's log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub kernel: Address,
    /// Zero-based, gap-free per kernel.
    pub sequence: u64,
    pub event: KernelEvent,
}
