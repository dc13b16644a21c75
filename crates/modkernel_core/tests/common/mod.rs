#![allow(dead_code)]

use modkernel_core::identity::{Address, Keycode, Role, Selector, SubKeycode};
use modkernel_core::kernel::{
    downcast_module, module_for_keycode, Kernel, KernelAdapter, KernelConfig, KernelError,
    Module, ModuleError, ModuleVersion, Permission, Policy, PolicyError, PolicyState,
};
use modkernel_core::submodule::{
    ModuleWithSubmodules, Submodule, SubmoduleBase, SubmoduleError, SubmoduleRegistry,
    EXEC_ON_SUBMODULE, INSTALL_SUBMODULE, UPGRADE_SUBMODULE,
};
use modkernel_core::{Action, Calldata, Revert};
use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub fn deployer() -> Address {
    Address::from_seed("deployer")
}

pub fn new_kernel(seed: &str) -> Arc<Kernel> {
    Kernel::new(KernelConfig::new(Address::from_seed(seed), deployer()))
}

pub fn keycode(text: &str) -> Keycode {
    text.parse().expect("keycode text")
}

pub fn sub_keycode(text: &str) -> SubKeycode {
    text.parse().expect("subkeycode text")
}

pub fn role(text: &str) -> Role {
    text.parse().expect("role text")
}

pub fn add_asset_selector() -> Selector {
    Selector::from_signature("addAsset(address)")
}

pub fn execute(kernel: &Kernel, action: Action) {
    kernel
        .execute_action(deployer(), action)
        .expect("executor action should succeed");
}

/// TRSRY module: tracks assets behind a permissioned entry point.
pub struct Treasury {
    address: Address,
    adapter: KernelAdapter,
    submodules: SubmoduleRegistry,
    assets: Mutex<Vec<Address>>,
    init_count: AtomicUsize,
    fail_init: AtomicBool,
}

impl Treasury {
    pub fn new(kernel: &Arc<Kernel>, seed: &str) -> Arc<Self> {
        Arc::new(Self {
            address: Address::from_seed(seed),
            adapter: KernelAdapter::new(kernel),
            submodules: SubmoduleRegistry::new(),
            assets: Mutex::new(Vec::new()),
            init_count: AtomicUsize::new(0),
            fail_init: AtomicBool::new(false),
        })
    }

    pub fn add_asset(&self, caller: Address, asset: Address) -> Result<(), ModuleError> {
        self.permissioned(caller, add_asset_selector())?;
        self.assets.lock().unwrap().push(asset);
        Ok(())
    }

    pub fn assets(&self) -> Vec<Address> {
        self.assets.lock().unwrap().clone()
    }

    pub fn init_count(&self) -> usize {
        self.init_count.load(Ordering::SeqCst)
    }

    pub fn fail_next_init(&self) {
        self.fail_init.store(true, Ordering::SeqCst);
    }
}

impl Module for Treasury {
    fn address(&self) -> Address {
        self.address
    }

    fn keycode(&self) -> Keycode {
        keycode("TRSRY")
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

    fn on_init(&self) -> Result<(), ModuleError> {
        if self.fail_init.swap(false, Ordering::SeqCst) {
            return Err(Revert::message("treasury init failed").into());
        }
        self.init_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl ModuleWithSubmodules for Treasury {
    fn submodule_registry(&self) -> &SubmoduleRegistry {
        &self.submodules
    }
}

/// Module without custom behavior, for keycode bookkeeping tests.
pub struct Plain {
    address: Address,
    keycode: Keycode,
    adapter: KernelAdapter,
}

impl Plain {
    pub fn new(kernel: &Arc<Kernel>, seed: &str, code: &str) -> Arc<Self> {
        Arc::new(Self {
            address: Address::from_seed(seed),
            keycode: keycode(code),
            adapter: KernelAdapter::new(kernel),
        })
    }
}

impl Module for Plain {
    fn address(&self) -> Address {
        self.address
    }

    fn keycode(&self) -> Keycode {
        self.keycode
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

/// Policy depending on TRSRY with adjustable permission requests.
pub struct Custodian {
    address: Address,
    state: PolicyState,
    dependencies: Mutex<Vec<Keycode>>,
    requests: Mutex<Vec<Permission>>,
    configure_calls: AtomicUsize,
    fail_configure_on: Mutex<Option<usize>>,
    treasury: Mutex<Option<Arc<dyn Module>>>,
}

impl Custodian {
    pub fn new(kernel: &Arc<Kernel>, seed: &str) -> Arc<Self> {
        let trsry = keycode("TRSRY");
        Arc::new(Self {
            address: Address::from_seed(seed),
            state: PolicyState::new(kernel),
            dependencies: Mutex::new(vec![trsry]),
            requests: Mutex::new(vec![
                Permission::new(trsry, add_asset_selector()),
                Permission::new(trsry, *INSTALL_SUBMODULE),
                Permission::new(trsry, *UPGRADE_SUBMODULE),
                Permission::new(trsry, *EXEC_ON_SUBMODULE),
            ]),
            configure_calls: AtomicUsize::new(0),
            fail_configure_on: Mutex::new(None),
            treasury: Mutex::new(None),
        })
    }

    pub fn with_requests(kernel: &Arc<Kernel>, seed: &str, requests: Vec<Permission>) -> Arc<Self> {
        let policy = Self::new(kernel, seed);
        policy.set_requests(requests);
        policy
    }

    pub fn set_requests(&self, requests: Vec<Permission>) {
        *self.requests.lock().unwrap() = requests;
    }

    pub fn set_dependencies(&self, dependencies: Vec<Keycode>) {
        *self.dependencies.lock().unwrap() = dependencies;
    }

    /// Makes the `call`-th `configure_dependencies` invocation fail.
    pub fn fail_configure_on_call(&self, call: usize) {
        *self.fail_configure_on.lock().unwrap() = Some(call);
    }

    pub fn configure_calls(&self) -> usize {
        self.configure_calls.load(Ordering::SeqCst)
    }

    /// Address of the treasury resolved at the last configuration.
    pub fn cached_treasury(&self) -> Option<Address> {
        self.treasury
            .lock()
            .unwrap()
            .as_ref()
            .map(|module| module.address())
    }

    /// Role-gated entry point forwarding to TRSRY.
    pub fn add_asset(&self, caller: Address, asset: Address) -> Result<(), PolicyError> {
        self.only_role(caller, role("custodian"))?;
        let treasury = self
            .treasury
            .lock()
            .unwrap()
            .clone()
            .ok_or(PolicyError::ModuleDoesNotExist(keycode("TRSRY")))?;
        let treasury = downcast_module::<Treasury>(treasury.as_ref())
            .ok_or(PolicyError::ModuleDoesNotExist(keycode("TRSRY")))?;
        treasury.add_asset(self.address, asset)?;
        Ok(())
    }

    pub fn install_ledger(&self, ledger: Arc<dyn Submodule>) -> Result<(), PolicyError> {
        let treasury = self.treasury.lock().unwrap().clone();
        let treasury = treasury.ok_or(PolicyError::ModuleDoesNotExist(keycode("TRSRY")))?;
        let treasury = downcast_module::<Treasury>(treasury.as_ref())
            .ok_or(PolicyError::ModuleDoesNotExist(keycode("TRSRY")))?;
        treasury.install_submodule(self.address, ledger)?;
        Ok(())
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
        let call = self.configure_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if *self.fail_configure_on.lock().unwrap() == Some(call) {
            return Err(Revert::message("dependencies unavailable").into());
        }
        let dependencies = self.dependencies.lock().unwrap().clone();
        if dependencies.contains(&keycode("TRSRY")) {
            let treasury = module_for_keycode(kernel, keycode("TRSRY"))?;
            *self.treasury.lock().unwrap() = Some(treasury);
        }
        Ok(dependencies)
    }

    fn request_permissions(&self, _kernel: &Kernel) -> Result<Vec<Permission>, PolicyError> {
        Ok(self.requests.lock().unwrap().clone())
    }
}

/// Policy whose dependency hook tries to mutate the kernel that called it.
pub struct Reentrant {
    address: Address,
    state: PolicyState,
    observed: Mutex<Option<KernelError>>,
}

impl Reentrant {
    pub fn new(kernel: &Arc<Kernel>, seed: &str) -> Arc<Self> {
        Arc::new(Self {
            address: Address::from_seed(seed),
            state: PolicyState::new(kernel),
            observed: Mutex::new(None),
        })
    }

    pub fn observed(&self) -> Option<KernelError> {
        self.observed.lock().unwrap().clone()
    }
}

impl Policy for Reentrant {
    fn address(&self) -> Address {
        self.address
    }

    fn state(&self) -> &PolicyState {
        &self.state
    }

    fn configure_dependencies(&self, kernel: &Kernel) -> Result<Vec<Keycode>, PolicyError> {
        let nested = kernel.execute_action(
            deployer(),
            Action::ChangeExecutor(Address::from_seed("hijacker")),
        );
        *self.observed.lock().unwrap() = nested.err();
        Ok(Vec::new())
    }
}

/// Policy whose permission hook always fails.
pub struct Broken {
    address: Address,
    state: PolicyState,
}

impl Broken {
    pub fn new(kernel: &Arc<Kernel>, seed: &str) -> Arc<Self> {
        Arc::new(Self {
            address: Address::from_seed(seed),
            state: PolicyState::new(kernel),
        })
    }
}

impl Policy for Broken {
    fn address(&self) -> Address {
        self.address
    }

    fn state(&self) -> &PolicyState {
        &self.state
    }

    fn configure_dependencies(&self, _kernel: &Kernel) -> Result<Vec<Keycode>, PolicyError> {
        Ok(vec![keycode("TRSRY")])
    }

    fn request_permissions(&self, _kernel: &Kernel) -> Result<Vec<Permission>, PolicyError> {
        Err(Revert::message("permissions unavailable").into())
    }
}

/// TRSRY.LEDGER submodule: records labels forwarded by its parent.
pub struct Ledger {
    address: Address,
    sub_keycode: SubKeycode,
    base: SubmoduleBase,
    entries: Mutex<Vec<String>>,
    init_count: AtomicUsize,
}

impl Ledger {
    pub fn new(parent: &dyn Module, seed: &str, code: &str) -> Result<Arc<Self>, SubmoduleError> {
        Self::with_parent_keycode(parent, seed, code, keycode("TRSRY"))
    }

    pub fn with_parent_keycode(
        parent: &dyn Module,
        seed: &str,
        code: &str,
        declared_parent: Keycode,
    ) -> Result<Arc<Self>, SubmoduleError> {
        Ok(Arc::new(Self {
            address: Address::from_seed(seed),
            sub_keycode: sub_keycode(code),
            base: SubmoduleBase::new(parent, declared_parent)?,
            entries: Mutex::new(Vec::new()),
            init_count: AtomicUsize::new(0),
        }))
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }

    pub fn init_count(&self) -> usize {
        self.init_count.load(Ordering::SeqCst)
    }
}

impl Submodule for Ledger {
    fn address(&self) -> Address {
        self.address
    }

    fn sub_keycode(&self) -> SubKeycode {
        self.sub_keycode
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

    fn on_init(&self) -> Result<(), Revert> {
        self.init_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn handle(&self, calldata: &Calldata) -> Result<Vec<u8>, Revert> {
        if calldata.selector == Selector::from_signature("record(string)") {
            let (label,): (String,) = calldata.decode_args()?;
            let mut entries = self.entries.lock().unwrap();
            entries.push(label);
            return serde_json::to_vec(&entries.len())
                .map_err(|err| Revert::message(err.to_string()));
        }
        if calldata.selector == Selector::from_signature("fail()") {
            return Err(Revert::new(vec![0xde, 0xad, 0xbe, 0xef]));
        }
        Err(Revert::message("unknown selector"))
    }
}
