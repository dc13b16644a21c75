//! Demo components and the scripted kernel lifecycle behind `modkernel demo`.

use anyhow::{anyhow, Context};
use log::info;
use modkernel_core::identity::{Address, Keycode, Role, Selector, SubKeycode};
use modkernel_core::kernel::{
    downcast_module, module_for_keycode, Action, EventRecord, Kernel, KernelAdapter,
    KernelConfig, Module, ModuleError, ModuleVersion, Permission, Policy, PolicyError,
    PolicyState,
};
use modkernel_core::submodule::{
    ModuleWithSubmodules, Submodule, SubmoduleBase, SubmoduleError, SubmoduleRegistry,
    EXEC_ON_SUBMODULE, INSTALL_SUBMODULE,
};
use modkernel_core::{Calldata, Revert};
use once_cell::sync::Lazy;
use std::any::Any;
use std::sync::{Arc, Mutex, PoisonError};

static TRSRY: Lazy<Keycode> = Lazy::new(|| Keycode::new(*b"TRSRY"));
static LEDGER: Lazy<SubKeycode> = Lazy::new(|| {
    let mut bytes = [0u8; 20];
    bytes[..12].copy_from_slice(b"TRSRY.LEDGER");
    SubKeycode::new(bytes)
});
static CUSTODIAN: Lazy<Role> = Lazy::new(|| {
    let mut bytes = [0u8; 32];
    bytes[..9].copy_from_slice(b"custodian");
    Role::new(bytes)
});
static ADD_ASSET: Lazy<Selector> = Lazy::new(|| Selector::from_signature("addAsset(address)"));
static RECORD: Lazy<Selector> = Lazy::new(|| Selector::from_signature("record(string)"));

/// Events committed by both kernels of the demo, in commit order per kernel.
pub struct DemoOutcome {
    pub kernel: Arc<Kernel>,
    pub successor: Arc<Kernel>,
}

impl DemoOutcome {
    pub fn events(&self) -> Vec<EventRecord> {
        let mut events = self.kernel.events();
        events.extend(self.successor.events());
        events
    }
}

/// Install, activate, operate, upgrade, then migrate to a second kernel.
pub fn run() -> anyhow::Result<DemoOutcome> {
    let deployer = Address::from_seed("modkernel.demo.deployer");
    let operator = Address::from_seed("modkernel.demo.operator");
    let kernel = Kernel::new(KernelConfig::new(
        Address::from_seed("modkernel.demo.kernel.v1"),
        deployer,
    ));

    let treasury = Treasury::new(&kernel, "modkernel.demo.trsry.v1");
    kernel
        .execute_action(deployer, Action::InstallModule(treasury.clone()))
        .context("install TRSRY")?;

    let custodian = Custodian::new(&kernel, "modkernel.demo.custodian");
    kernel
        .execute_action(deployer, Action::ActivatePolicy(custodian.clone()))
        .context("activate custodian policy")?;
    kernel
        .grant_role(deployer, *CUSTODIAN, operator)
        .context("grant custodian role")?;

    custodian
        .add_asset(operator, Address::from_seed("modkernel.demo.asset.dai"))
        .context("add asset through custodian")?;

    let ledger = Ledger::new(treasury.as_ref(), "modkernel.demo.ledger")
        .context("bind ledger to TRSRY")?;
    custodian
        .with_treasury(|treasury| treasury.install_submodule(custodian.address(), ledger))
        .context("install TRSRY.LEDGER")?;
    let receipt = custodian
        .record(operator, "dai listed")
        .context("record through TRSRY.LEDGER")?;
    info!(
        "event=demo_record module=cli status=ok sub_keycode={} receipt={}",
        *LEDGER,
        String::from_utf8_lossy(&receipt)
    );

    let upgraded = Treasury::new(&kernel, "modkernel.demo.trsry.v2");
    kernel
        .execute_action(deployer, Action::UpgradeModule(upgraded))
        .context("upgrade TRSRY")?;

    let successor = Kernel::new(KernelConfig::new(
        Address::from_seed("modkernel.demo.kernel.v2"),
        deployer,
    ));
    kernel
        .execute_action(deployer, Action::MigrateKernel(successor.clone()))
        .context("migrate to successor kernel")?;

    // The upgraded treasury now answers to the successor; register it there
    // and bring the custodian back online.
    let current = module_for_keycode(&kernel, *TRSRY).context("resolve upgraded TRSRY")?;
    successor
        .execute_action(deployer, Action::InstallModule(current))
        .context("install TRSRY on successor")?;
    successor
        .execute_action(deployer, Action::ActivatePolicy(custodian.clone()))
        .context("reactivate custodian on successor")?;

    Ok(DemoOutcome { kernel, successor })
}

struct Treasury {
    address: Address,
    adapter: KernelAdapter,
    submodules: SubmoduleRegistry,
    assets: Mutex<Vec<Address>>,
}

impl Treasury {
    fn new(kernel: &Arc<Kernel>, seed: &str) -> Arc<Self> {
        Arc::new(Self {
            address: Address::from_seed(seed),
            adapter: KernelAdapter::new(kernel),
            submodules: SubmoduleRegistry::new(),
            assets: Mutex::new(Vec::new()),
        })
    }

    fn add_asset(&self, caller: Address, asset: Address) -> Result<(), ModuleError> {
        self.permissioned(caller, *ADD_ASSET)?;
        self.assets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(asset);
        Ok(())
    }
}

impl Module for Treasury {
    fn address(&self) -> Address {
        self.address
    }

    fn keycode(&self) -> Keycode {
        *TRSRY
    }

    fn version(&self) -> ModuleVersion {
        ModuleVersion::new(1, 0)
    }

    fn adapter(&self) -> &KernelAdapter {
        &self.adapter
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl ModuleWithSubmodules for Treasury {
    fn submodule_registry(&self) -> &SubmoduleRegistry {
        &self.submodules
    }
}

struct Ledger {
    address: Address,
    base: SubmoduleBase,
    entries: Mutex<Vec<String>>,
}

impl Ledger {
    fn new(parent: &dyn Module, seed: &str) -> Result<Arc<Self>, SubmoduleError> {
        Ok(Arc::new(Self {
            address: Address::from_seed(seed),
            base: SubmoduleBase::new(parent, *TRSRY)?,
            entries: Mutex::new(Vec::new()),
        }))
    }
}

impl Submodule for Ledger {
    fn address(&self) -> Address {
        self.address
    }

    fn sub_keycode(&self) -> SubKeycode {
        *LEDGER
    }

    fn version(&self) -> ModuleVersion {
        ModuleVersion::new(1, 0)
    }

    fn base(&self) -> &SubmoduleBase {
        &self.base
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn handle(&self, calldata: &Calldata) -> Result<Vec<u8>, Revert> {
        if calldata.selector != *RECORD {
            return Err(Revert::message(format!(
                "unknown selector {}",
                calldata.selector
            )));
        }
        let (label,): (String,) = calldata.decode_args()?;
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.push(label);
        serde_json::to_vec(&entries.len()).map_err(|err| Revert::message(err.to_string()))
    }
}

struct Custodian {
    address: Address,
    state: PolicyState,
    treasury: Mutex<Option<Arc<dyn Module>>>,
}

impl Custodian {
    fn new(kernel: &Arc<Kernel>, seed: &str) -> Arc<Self> {
        Arc::new(Self {
            address: Address::from_seed(seed),
            state: PolicyState::new(kernel),
            treasury: Mutex::new(None),
        })
    }

    fn with_treasury<T>(
        &self,
        apply: impl FnOnce(&Treasury) -> Result<T, ModuleError>,
    ) -> Result<T, PolicyError> {
        let module = self
            .treasury
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(PolicyError::ModuleDoesNotExist(*TRSRY))?;
        let treasury = downcast_module::<Treasury>(module.as_ref())
            .ok_or(PolicyError::ModuleDoesNotExist(*TRSRY))?;
        Ok(apply(treasury)?)
    }

    fn add_asset(&self, caller: Address, asset: Address) -> Result<(), PolicyError> {
        self.only_role(caller, *CUSTODIAN)?;
        self.with_treasury(|treasury| treasury.add_asset(self.address, asset))
    }

    fn record(&self, caller: Address, label: &str) -> anyhow::Result<Vec<u8>> {
        self.only_role(caller, *CUSTODIAN)?;
        let call = Calldata::encode("record(string)", &(label,))?;
        let receipt = self.with_treasury(|treasury| {
            treasury.exec_on_submodule(self.address, *LEDGER, &call.to_bytes())
        })?;
        Ok(receipt)
    }
}

impl Policy for Custodian {
    fn address(&self) -> Address {
        self.address
    }

    fn state(&self) -> &PolicyState {
        &self.state
    }

    fn configure_dependencies(&self, kernel: &Kernel) -> Result<Vec<Keycode>, PolicyError> {
        let treasury = module_for_keycode(kernel, *TRSRY)?;
        *self.treasury.lock().unwrap_or_else(PoisonError::into_inner) = Some(treasury);
        Ok(vec![*TRSRY])
    }

    fn request_permissions(&self, _kernel: &Kernel) -> Result<Vec<Permission>, PolicyError> {
        Ok(vec![
            Permission::new(*TRSRY, *ADD_ASSET),
            Permission::new(*TRSRY, *INSTALL_SUBMODULE),
            Permission::new(*TRSRY, *EXEC_ON_SUBMODULE),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::run;
    use modkernel_core::kernel::{ActionKind, KernelEvent};

    #[test]
    fn demo_runs_full_lifecycle() {
        let outcome = run().expect("demo scenario");
        let actions: Vec<ActionKind> = outcome
            .kernel
            .events()
            .into_iter()
            .filter_map(|record| match record.event {
                KernelEvent::ActionExecuted { action, .. } => Some(action),
                _ => None,
            })
            .collect();
        assert_eq!(
            actions,
            vec![
                ActionKind::InstallModule,
                ActionKind::ActivatePolicy,
                ActionKind::UpgradeModule,
                ActionKind::MigrateKernel,
            ]
        );
        assert_eq!(outcome.successor.active_policies().len(), 1);
        assert!(outcome.events().len() > outcome.kernel.events().len());
    }
}
