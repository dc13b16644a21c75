use crate::identity::{Address, Keycode, Role, Selector};
use crate::kernel::{ActionKind, EventRecord, KernelEvent, SlotList};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplayError {
    #[error("record of kernel {found} replayed into view of {expected}")]
    ForeignRecord { expected: Address, found: Address },
    #[error("expected sequence {expected}, found {found}")]
    SequenceGap { expected: u64, found: u64 },
}

/// One install or upgrade seen in the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModuleChange {
    pub sequence: u64,
    pub action: ActionKind,
    pub target: Address,
}

/// Registry state rebuilt from a kernel's events alone.
///
/// Events carry no keycodes for modules, so modules appear as an ordered
/// install/upgrade history rather than a keycode table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryView {
    pub kernel: Address,
    /// `None` until the executor is reassigned away from the deployer.
    pub executor: Option<Address>,
    /// `None` until the admin is reassigned away from the deployer.
    pub admin: Option<Address>,
    pub modules: Vec<ModuleChange>,
    pub active_policies: SlotList<Address>,
    pub permissions: BTreeMap<Keycode, BTreeMap<Address, BTreeSet<Selector>>>,
    /// Every role ever granted, with its current holders.
    pub roles: BTreeMap<Role, BTreeSet<Address>>,
    pub migrated_to: Option<Address>,
    pub next_sequence: u64,
}

impl RegistryView {
    pub fn new(kernel: Address) -> Self {
        Self {
            kernel,
            executor: None,
            admin: None,
            modules: Vec::new(),
            active_policies: SlotList::new(),
            permissions: BTreeMap::new(),
            roles: BTreeMap::new(),
            migrated_to: None,
            next_sequence: 0,
        }
    }

    /// Folds `records`, which must start at sequence 0 and have no gaps.
    pub fn replay(kernel: Address, records: &[EventRecord]) -> Result<Self, ReplayError> {
        let mut view = Self::new(kernel);
        for record in records {
            view.apply(record)?;
        }
        Ok(view)
    }

    pub fn apply(&mut self, record: &EventRecord) -> Result<(), ReplayError> {
        if record.kernel != self.kernel {
            return Err(ReplayError::ForeignRecord {
                expected: self.kernel,
                found: record.kernel,
            });
        }
        if record.sequence != self.next_sequence {
            return Err(ReplayError::SequenceGap {
                expected: self.next_sequence,
                found: record.sequence,
            });
        }

        match &record.event {
            KernelEvent::PermissionsUpdated {
                keycode,
                policy,
                selector,
                granted,
            } => {
                let selectors = self
                    .permissions
                    .entry(*keycode)
                    .or_default()
                    .entry(*policy)
                    .or_default();
                if *granted {
                    selectors.insert(*selector);
                } else {
                    selectors.remove(selector);
                }
            }
            KernelEvent::RoleGranted { role, addr } => {
                self.roles.entry(*role).or_default().insert(*addr);
            }
            KernelEvent::RoleRevoked { role, addr } => {
                if let Some(holders) = self.roles.get_mut(role) {
                    holders.remove(addr);
                }
            }
            KernelEvent::ActionExecuted { action, target } => {
                self.apply_action(record.sequence, *action, *target)
            }
        }

        self.next_sequence += 1;
        Ok(())
    }

    pub fn is_permitted(&self, keycode: Keycode, policy: Address, selector: Selector) -> bool {
        self.permissions
            .get(&keycode)
            .and_then(|by_policy| by_policy.get(&policy))
            .is_some_and(|selectors| selectors.contains(&selector))
    }

    pub fn has_role(&self, addr: Address, role: Role) -> bool {
        self.roles
            .get(&role)
            .is_some_and(|holders| holders.contains(&addr))
    }

    pub fn is_role(&self, role: Role) -> bool {
        self.roles.contains_key(&role)
    }

    fn apply_action(&mut self, sequence: u64, action: ActionKind, target: Address) {
        match action {
            ActionKind::InstallModule | ActionKind::UpgradeModule => {
                self.modules.push(ModuleChange {
                    sequence,
                    action,
                    target,
                });
            }
            ActionKind::ActivatePolicy => {
                self.active_policies.push(target);
            }
            ActionKind::DeactivatePolicy => {
                self.active_policies.swap_remove(&target);
            }
            ActionKind::ChangeExecutor => self.executor = Some(target),
            ActionKind::ChangeAdmin => self.admin = Some(target),
            ActionKind::MigrateKernel => self.migrated_to = Some(target),
        }
    }
}
