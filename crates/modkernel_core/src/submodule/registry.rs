use super::base::Submodule;
use crate::call::{Calldata, Revert};
use crate::identity::{
    ensure_contract, ensure_valid_sub_keycode, Address, Keycode, Selector, SubKeycode,
};
use crate::kernel::{read_lock, write_lock, Module, ModuleError, MutationLock};
use log::{info, warn};
use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// Permission selector guarding [`ModuleWithSubmodules::install_submodule`].
pub static INSTALL_SUBMODULE: Lazy<Selector> =
    Lazy::new(|| Selector::from_signature("installSubmodule(address)"));
/// Permission selector guarding [`ModuleWithSubmodules::upgrade_submodule`].
pub static UPGRADE_SUBMODULE: Lazy<Selector> =
    Lazy::new(|| Selector::from_signature("upgradeSubmodule(address)"));
/// Permission selector guarding [`ModuleWithSubmodules::exec_on_submodule`].
pub static EXEC_ON_SUBMODULE: Lazy<Selector> =
    Lazy::new(|| Selector::from_signature("execOnSubmodule(bytes20,bytes)"));

#[derive(Clone, Default)]
struct SubmoduleTable {
    by_keycode: BTreeMap<SubKeycode, Arc<dyn Submodule>>,
    installed: Vec<SubKeycode>,
}

/// SubKeycode→submodule table embedded in a module that owns submodules.
#[derive(Default)]
pub struct SubmoduleRegistry {
    table: RwLock<SubmoduleTable>,
    mutation: MutationLock,
}

impl std::fmt::Debug for SubmoduleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmoduleRegistry")
            .field("installed", &read_lock(&self.table).installed)
            .finish()
    }
}

impl SubmoduleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `sub` under its SubKeycode and runs its `init` as `parent`.
    pub fn install(
        &self,
        parent: Address,
        parent_keycode: Keycode,
        sub: Arc<dyn Submodule>,
    ) -> Result<(), ModuleError> {
        let Some(_guard) = self.mutation.acquire() else {
            return Err(ModuleError::MutationInProgress);
        };
        let sub_keycode = validate_submodule(parent_keycode, sub.as_ref())?;

        let snapshot = read_lock(&self.table).clone();
        {
            let mut table = write_lock(&self.table);
            if table.by_keycode.contains_key(&sub_keycode) {
                return Err(ModuleError::SubmoduleAlreadyInstalled(sub_keycode));
            }
            table.by_keycode.insert(sub_keycode, Arc::clone(&sub));
            table.installed.push(sub_keycode);
        }

        self.init_or_restore(parent, sub.as_ref(), snapshot)?;
        info!(
            "event=install_submodule module=submodule status=ok parent={} sub_keycode={} address={}",
            parent_keycode,
            sub_keycode,
            sub.address()
        );
        Ok(())
    }

    /// Replaces the submodule under `sub`'s SubKeycode and runs its `init`.
    pub fn upgrade(
        &self,
        parent: Address,
        parent_keycode: Keycode,
        sub: Arc<dyn Submodule>,
    ) -> Result<(), ModuleError> {
        let Some(_guard) = self.mutation.acquire() else {
            return Err(ModuleError::MutationInProgress);
        };
        let sub_keycode = validate_submodule(parent_keycode, sub.as_ref())?;

        let snapshot = read_lock(&self.table).clone();
        {
            let mut table = write_lock(&self.table);
            match table.by_keycode.get(&sub_keycode) {
                Some(old) if old.address() != sub.address() => {}
                _ => return Err(ModuleError::InvalidSubmoduleUpgrade(sub_keycode)),
            }
            table.by_keycode.insert(sub_keycode, Arc::clone(&sub));
        }

        self.init_or_restore(parent, sub.as_ref(), snapshot)?;
        info!(
            "event=upgrade_submodule module=submodule status=ok parent={} sub_keycode={} address={}",
            parent_keycode,
            sub_keycode,
            sub.address()
        );
        Ok(())
    }

    /// Forwards `payload` to the submodule as `parent` and returns its
    /// result bytes verbatim.
    pub fn execute(
        &self,
        parent: Address,
        sub_keycode: SubKeycode,
        payload: &[u8],
    ) -> Result<Vec<u8>, ModuleError> {
        let sub = self
            .get(sub_keycode)
            .ok_or(ModuleError::SubmoduleNotInstalled(sub_keycode))?;

        let result = match Calldata::from_bytes(payload) {
            Ok(calldata) => sub.call(parent, &calldata),
            // Too short to carry a selector: reverts without data.
            Err(_) => Err(Revert::default()),
        };
        result.map_err(|revert| {
            warn!(
                "event=exec_on_submodule module=submodule status=error sub_keycode={} error={}",
                sub_keycode, revert
            );
            ModuleError::SubmoduleExecutionReverted {
                sub_keycode,
                payload: revert.into_payload(),
            }
        })
    }

    pub fn get(&self, sub_keycode: SubKeycode) -> Option<Arc<dyn Submodule>> {
        read_lock(&self.table).by_keycode.get(&sub_keycode).cloned()
    }

    pub fn contains(&self, sub_keycode: SubKeycode) -> bool {
        read_lock(&self.table).by_keycode.contains_key(&sub_keycode)
    }

    /// Installed SubKeycodes in install order.
    pub fn installed(&self) -> Vec<SubKeycode> {
        read_lock(&self.table).installed.clone()
    }

    fn init_or_restore(
        &self,
        parent: Address,
        sub: &dyn Submodule,
        snapshot: SubmoduleTable,
    ) -> Result<(), ModuleError> {
        if let Err(source) = sub.init(parent) {
            *write_lock(&self.table) = snapshot;
            let sub_keycode = sub.sub_keycode();
            warn!(
                "event=init_submodule module=submodule status=error sub_keycode={} error={}",
                sub_keycode, source
            );
            return Err(ModuleError::SubmoduleInit {
                sub_keycode,
                source,
            });
        }
        Ok(())
    }
}

fn validate_submodule(
    parent_keycode: Keycode,
    sub: &dyn Submodule,
) -> Result<SubKeycode, ModuleError> {
    ensure_contract(sub.address())?;
    let declared = sub.parent_keycode();
    if declared != parent_keycode {
        return Err(ModuleError::InvalidSubmodule {
            expected: parent_keycode,
            actual: declared,
        });
    }
    let sub_keycode = sub.sub_keycode();
    ensure_valid_sub_keycode(sub_keycode, parent_keycode)?;
    Ok(sub_keycode)
}

/// Module that owns a second-level registry of submodules.
///
/// Install, upgrade and forwarding are permissioned on the owning module
/// like any other mutating entry point.
pub trait ModuleWithSubmodules: Module {
    fn submodule_registry(&self) -> &SubmoduleRegistry;

    fn install_submodule(&self, caller: Address, sub: Arc<dyn Submodule>) -> Result<(), ModuleError> {
        self.permissioned(caller, *INSTALL_SUBMODULE)?;
        self.submodule_registry()
            .install(self.address(), self.keycode(), sub)
    }

    fn upgrade_submodule(&self, caller: Address, sub: Arc<dyn Submodule>) -> Result<(), ModuleError> {
        self.permissioned(caller, *UPGRADE_SUBMODULE)?;
        self.submodule_registry()
            .upgrade(self.address(), self.keycode(), sub)
    }

    fn exec_on_submodule(
        &self,
        caller: Address,
        sub_keycode: SubKeycode,
        payload: &[u8],
    ) -> Result<Vec<u8>, ModuleError> {
        self.permissioned(caller, *EXEC_ON_SUBMODULE)?;
        self.submodule_registry()
            .execute(self.address(), sub_keycode, payload)
    }

    fn submodules(&self) -> Vec<SubKeycode> {
        self.submodule_registry().installed()
    }

    fn submodule_for_keycode(&self, sub_keycode: SubKeycode) -> Option<Arc<dyn Submodule>> {
        self.submodule_registry().get(sub_keycode)
    }

    fn submodule_is_installed(&self, sub_keycode: SubKeycode) -> bool {
        self.submodule_registry().contains(sub_keycode)
    }
}
