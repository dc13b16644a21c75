//! Kernel registry and executor action state machine.

use super::error::{KernelError, PolicyHook};
use super::event::{ActionKind, EventRecord, KernelEvent};
use super::module::Module;
use super::policy::{Permission, Policy};
use super::slots::SlotList;
use super::{read_lock, write_lock, MutationLock};
use crate::identity::{
    ensure_contract, ensure_valid_keycode, ensure_valid_role, Address, Keycode, Role, Selector,
};
use log::{debug, info, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Debug, Formatter};
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// Kernel construction parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelConfig {
    pub address: Address,
    pub executor: Address,
    pub admin: Address,
    /// Reject `ChangeExecutor`/`ChangeAdmin` targeting the zero address.
    pub reject_zero_address: bool,
}

impl KernelConfig {
    /// The deployer starts as both executor and admin.
    pub fn new(address: Address, deployer: Address) -> Self {
        Self {
            address,
            executor: deployer,
            admin: deployer,
            reject_zero_address: false,
        }
    }

    pub fn with_executor(mut self, executor: Address) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_admin(mut self, admin: Address) -> Self {
        self.admin = admin;
        self
    }

    pub fn reject_zero_address(mut self, reject: bool) -> Self {
        self.reject_zero_address = reject;
        self
    }
}

/// Registry action submitted by the executor.
#[derive(Clone)]
pub enum Action {
    InstallModule(Arc<dyn Module>),
    UpgradeModule(Arc<dyn Module>),
    ActivatePolicy(Arc<dyn Policy>),
    DeactivatePolicy(Arc<dyn Policy>),
    ChangeExecutor(Address),
    ChangeAdmin(Address),
    MigrateKernel(Arc<Kernel>),
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::InstallModule(_) => ActionKind::InstallModule,
            Self::UpgradeModule(_) => ActionKind::UpgradeModule,
            Self::ActivatePolicy(_) => ActionKind::ActivatePolicy,
            Self::DeactivatePolicy(_) => ActionKind::DeactivatePolicy,
            Self::ChangeExecutor(_) => ActionKind::ChangeExecutor,
            Self::ChangeAdmin(_) => ActionKind::ChangeAdmin,
            Self::MigrateKernel(_) => ActionKind::MigrateKernel,
        }
    }

    pub fn target(&self) -> Address {
        match self {
            Self::InstallModule(module) | Self::UpgradeModule(module) => module.address(),
            Self::ActivatePolicy(policy) | Self::DeactivatePolicy(policy) => policy.address(),
            Self::ChangeExecutor(address) | Self::ChangeAdmin(address) => *address,
            Self::MigrateKernel(kernel) => kernel.address(),
        }
    }
}

impl Debug for Action {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Action({} -> {})", self.kind(), self.target())
    }
}

#[derive(Clone)]
struct Registry {
    executor: Address,
    admin: Address,
    modules: BTreeMap<Keycode, Arc<dyn Module>>,
    keycode_for_module: BTreeMap<Address, Keycode>,
    all_keycodes: Vec<Keycode>,
    active_policies: SlotList<Address>,
    // Active policies plus any deactivated one a dependents list still names.
    policies: BTreeMap<Address, Arc<dyn Policy>>,
    module_dependents: BTreeMap<Keycode, SlotList<Address>>,
    permissions: BTreeMap<Keycode, BTreeMap<Address, BTreeSet<Selector>>>,
    roles: BTreeSet<Role>,
    role_members: BTreeMap<Address, BTreeSet<Role>>,
}

impl Registry {
    fn new(executor: Address, admin: Address) -> Self {
        Self {
            executor,
            admin,
            modules: BTreeMap::new(),
            keycode_for_module: BTreeMap::new(),
            all_keycodes: Vec::new(),
            active_policies: SlotList::new(),
            policies: BTreeMap::new(),
            module_dependents: BTreeMap::new(),
            permissions: BTreeMap::new(),
            roles: BTreeSet::new(),
            role_members: BTreeMap::new(),
        }
    }

    fn has_role(&self, addr: Address, role: Role) -> bool {
        self.role_members
            .get(&addr)
            .is_some_and(|roles| roles.contains(&role))
    }
}

/// Central authority over modules, policies, permissions and roles.
///
/// Mutating entry points take the kernel's mutation lock. Callers on other
/// threads wait their turn; a component hook that calls back into a
/// mutating entry point on the same thread fails with
/// [`KernelError::MutationInProgress`]. Reads stay available to hooks.
pub struct Kernel {
    address: Address,
    reject_zero_address: bool,
    registry: RwLock<Registry>,
    mutation: MutationLock,
    journal: RwLock<Vec<EventRecord>>,
}

impl Debug for Kernel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl Kernel {
    pub fn new(config: KernelConfig) -> Arc<Self> {
        info!(
            "event=kernel_new module=kernel status=ok kernel={} executor={} admin={}",
            config.address, config.executor, config.admin
        );
        Arc::new(Self {
            address: config.address,
            reject_zero_address: config.reject_zero_address,
            registry: RwLock::new(Registry::new(config.executor, config.admin)),
            mutation: MutationLock::default(),
            journal: RwLock::new(Vec::new()),
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Runs one executor action as a single all-or-nothing mutation.
    ///
    /// # Errors
    /// - `OnlyExecutor` when `caller` is not the current executor.
    /// - Registry-state, identity and forwarded hook errors per action.
    /// - `MutationInProgress` when called from inside another mutation.
    pub fn execute_action(&self, caller: Address, action: Action) -> Result<(), KernelError> {
        let started_at = Instant::now();
        let kind = action.kind();
        let target = action.target();

        let result = self.transact(|kernel, events| {
            kernel.only_executor(caller)?;
            match action {
                Action::InstallModule(module) => kernel.install_module(module)?,
                Action::UpgradeModule(module) => kernel.upgrade_module(module)?,
                Action::ActivatePolicy(policy) => kernel.activate_policy(policy, events)?,
                Action::DeactivatePolicy(policy) => kernel.deactivate_policy(policy, events)?,
                Action::ChangeExecutor(executor) => {
                    kernel.ensure_assignable(kind, executor)?;
                    write_lock(&kernel.registry).executor = executor;
                }
                Action::ChangeAdmin(admin) => {
                    kernel.ensure_assignable(kind, admin)?;
                    write_lock(&kernel.registry).admin = admin;
                }
                Action::MigrateKernel(new_kernel) => kernel.migrate_kernel(&new_kernel)?,
            }
            events.push(KernelEvent::ActionExecuted {
                action: kind,
                target,
            });
            Ok(())
        });

        match &result {
            Ok(()) => info!(
                "event=execute_action module=kernel status=ok kernel={} action={} target={} duration_ms={}",
                self.address,
                kind,
                target,
                started_at.elapsed().as_millis()
            ),
            Err(err) => warn!(
                "event=execute_action module=kernel status=error kernel={} action={} target={} duration_ms={} error={}",
                self.address,
                kind,
                target,
                started_at.elapsed().as_millis(),
                err
            ),
        }
        result
    }

    /// Grants `role` to `addr`. Admin only.
    pub fn grant_role(&self, caller: Address, role: Role, addr: Address) -> Result<(), KernelError> {
        let result = self.transact(|kernel, events| {
            let mut registry = write_lock(&kernel.registry);
            if caller != registry.admin {
                return Err(KernelError::OnlyAdmin(caller));
            }
            if registry.has_role(addr, role) {
                return Err(KernelError::AddressAlreadyHasRole { addr, role });
            }
            ensure_valid_role(role)?;

            registry.roles.insert(role);
            registry.role_members.entry(addr).or_default().insert(role);
            events.push(KernelEvent::RoleGranted { role, addr });
            Ok(())
        });
        self.log_role_change("grant_role", role, addr, &result);
        result
    }

    /// Revokes `role` from `addr`. Admin only.
    pub fn revoke_role(&self, caller: Address, role: Role, addr: Address) -> Result<(), KernelError> {
        let result = self.transact(|kernel, events| {
            let mut registry = write_lock(&kernel.registry);
            if caller != registry.admin {
                return Err(KernelError::OnlyAdmin(caller));
            }
            if !registry.roles.contains(&role) {
                return Err(KernelError::RoleDoesNotExist(role));
            }
            if !registry.has_role(addr, role) {
                return Err(KernelError::AddressDoesNotHaveRole { addr, role });
            }

            if let Some(roles) = registry.role_members.get_mut(&addr) {
                roles.remove(&role);
            }
            events.push(KernelEvent::RoleRevoked { role, addr });
            Ok(())
        });
        self.log_role_change("revoke_role", role, addr, &result);
        result
    }

    pub fn executor(&self) -> Address {
        read_lock(&self.registry).executor
    }

    pub fn admin(&self) -> Address {
        read_lock(&self.registry).admin
    }

    pub fn module_for_keycode(&self, keycode: Keycode) -> Option<Arc<dyn Module>> {
        read_lock(&self.registry).modules.get(&keycode).cloned()
    }

    pub fn keycode_for_module(&self, module: Address) -> Option<Keycode> {
        read_lock(&self.registry)
            .keycode_for_module
            .get(&module)
            .copied()
    }

    pub fn all_keycodes(&self) -> Vec<Keycode> {
        read_lock(&self.registry).all_keycodes.clone()
    }

    pub fn active_policies(&self) -> Vec<Address> {
        read_lock(&self.registry).active_policies.as_slice().to_vec()
    }

    pub fn policy_index(&self, policy: Address) -> Option<usize> {
        read_lock(&self.registry).active_policies.index_of(&policy)
    }

    pub fn module_dependents(&self, keycode: Keycode) -> Vec<Address> {
        read_lock(&self.registry)
            .module_dependents
            .get(&keycode)
            .map(|list| list.as_slice().to_vec())
            .unwrap_or_default()
    }

    pub fn dependent_index(&self, keycode: Keycode, policy: Address) -> Option<usize> {
        read_lock(&self.registry)
            .module_dependents
            .get(&keycode)
            .and_then(|list| list.index_of(&policy))
    }

    /// Whether `policy` may call `selector` on the module under `keycode`.
    pub fn module_permissions(&self, keycode: Keycode, policy: Address, selector: Selector) -> bool {
        read_lock(&self.registry)
            .permissions
            .get(&keycode)
            .and_then(|by_policy| by_policy.get(&policy))
            .is_some_and(|selectors| selectors.contains(&selector))
    }

    pub fn has_role(&self, addr: Address, role: Role) -> bool {
        read_lock(&self.registry).has_role(addr, role)
    }

    /// Whether `role` was ever granted.
    pub fn is_role(&self, role: Role) -> bool {
        read_lock(&self.registry).roles.contains(&role)
    }

    /// Every committed event, oldest first.
    pub fn events(&self) -> Vec<EventRecord> {
        read_lock(&self.journal).clone()
    }

    /// Committed events with `sequence >= from`.
    pub fn events_since(&self, from: u64) -> Vec<EventRecord> {
        read_lock(&self.journal)
            .iter()
            .filter(|record| record.sequence >= from)
            .cloned()
            .collect()
    }

    fn transact<F>(&self, apply: F) -> Result<(), KernelError>
    where
        F: FnOnce(&Self, &mut Vec<KernelEvent>) -> Result<(), KernelError>,
    {
        let Some(_guard) = self.mutation.acquire() else {
            return Err(KernelError::MutationInProgress);
        };

        let snapshot = read_lock(&self.registry).clone();
        let mut pending = Vec::new();
        match apply(self, &mut pending) {
            Ok(()) => {
                self.publish(pending);
                Ok(())
            }
            Err(err) => {
                *write_lock(&self.registry) = snapshot;
                Err(err)
            }
        }
    }

    fn publish(&self, events: Vec<KernelEvent>) {
        let mut journal = write_lock(&self.journal);
        for event in events {
            let sequence = journal.len() as u64;
            debug!(
                "event=kernel_event module=kernel kernel={} sequence={} name={}",
                self.address,
                sequence,
                event.name()
            );
            journal.push(EventRecord {
                kernel: self.address,
                sequence,
                event,
            });
        }
    }

    fn only_executor(&self, caller: Address) -> Result<(), KernelError> {
        if caller != self.executor() {
            return Err(KernelError::OnlyExecutor(caller));
        }
        Ok(())
    }

    fn ensure_assignable(&self, kind: ActionKind, target: Address) -> Result<(), KernelError> {
        if self.reject_zero_address && target.is_zero() {
            return Err(KernelError::ZeroAddress(kind));
        }
        Ok(())
    }

    fn install_module(&self, module: Arc<dyn Module>) -> Result<(), KernelError> {
        ensure_contract(module.address())?;
        let keycode = module.keycode();
        ensure_valid_keycode(keycode)?;
        self.ensure_owned(module.address(), module.adapter().only_kernel_instance(self))?;

        {
            let mut registry = write_lock(&self.registry);
            if registry.modules.contains_key(&keycode) {
                return Err(KernelError::ModuleAlreadyInstalled(keycode));
            }
            registry
                .keycode_for_module
                .insert(module.address(), keycode);
            registry.modules.insert(keycode, Arc::clone(&module));
            registry.all_keycodes.push(keycode);
        }

        module
            .init(self.address)
            .map_err(|source| KernelError::ModuleInit { keycode, source })
    }

    fn upgrade_module(&self, module: Arc<dyn Module>) -> Result<(), KernelError> {
        ensure_contract(module.address())?;
        let keycode = module.keycode();
        ensure_valid_keycode(keycode)?;
        self.ensure_owned(module.address(), module.adapter().only_kernel_instance(self))?;

        let before = read_lock(&self.registry).clone();
        {
            let mut registry = write_lock(&self.registry);
            let old_address = match registry.modules.get(&keycode) {
                Some(old) if old.address() != module.address() => old.address(),
                _ => return Err(KernelError::InvalidModuleUpgrade(keycode)),
            };
            // The old module keeps its own state; only the reverse mapping goes.
            registry.keycode_for_module.remove(&old_address);
            registry
                .keycode_for_module
                .insert(module.address(), keycode);
            registry.modules.insert(keycode, Arc::clone(&module));
        }

        module
            .init(self.address)
            .map_err(|source| KernelError::ModuleInit { keycode, source })?;

        let dependents = self.dependents_of(keycode);
        for (done, policy) in dependents.iter().enumerate() {
            if let Err(source) = policy.configure_dependencies(self) {
                // Dependents refreshed so far re-resolve the previous module.
                *write_lock(&self.registry) = before;
                self.restore_dependents(keycode, &dependents[..done]);
                return Err(KernelError::PolicyHook {
                    hook: PolicyHook::ConfigureDependencies,
                    policy: policy.address(),
                    source,
                });
            }
        }
        Ok(())
    }

    fn dependents_of(&self, keycode: Keycode) -> Vec<Arc<dyn Policy>> {
        let registry = read_lock(&self.registry);
        registry
            .module_dependents
            .get(&keycode)
            .map(|list| {
                list.iter()
                    .filter_map(|address| registry.policies.get(address).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn restore_dependents(&self, keycode: Keycode, policies: &[Arc<dyn Policy>]) {
        for policy in policies {
            if let Err(err) = policy.configure_dependencies(self) {
                warn!(
                    "event=upgrade_rollback module=kernel status=error kernel={} keycode={} policy={} error={}",
                    self.address,
                    keycode,
                    policy.address(),
                    err
                );
            }
        }
    }

    fn activate_policy(
        &self,
        policy: Arc<dyn Policy>,
        events: &mut Vec<KernelEvent>,
    ) -> Result<(), KernelError> {
        let address = policy.address();
        ensure_contract(address)?;
        if policy.is_active() {
            return Err(KernelError::PolicyAlreadyActivated(address));
        }
        self.ensure_owned(address, policy.state().adapter().only_kernel_instance(self))?;

        {
            let mut registry = write_lock(&self.registry);
            registry.active_policies.push(address);
            registry.policies.insert(address, Arc::clone(&policy));
        }

        let dependencies = self.policy_dependencies(policy.as_ref())?;
        {
            let mut registry = write_lock(&self.registry);
            for keycode in dependencies {
                registry
                    .module_dependents
                    .entry(keycode)
                    .or_default()
                    .push(address);
            }
        }

        let requests = self.policy_requests(policy.as_ref())?;
        self.set_policy_permissions(address, &requests, true, events);

        policy
            .set_active_status(self.address, true)
            .map_err(|source| KernelError::KernelAdapter {
                target: address,
                source,
            })
    }

    fn deactivate_policy(
        &self,
        policy: Arc<dyn Policy>,
        events: &mut Vec<KernelEvent>,
    ) -> Result<(), KernelError> {
        let address = policy.address();
        ensure_contract(address)?;
        if !policy.is_active() {
            return Err(KernelError::PolicyNotActivated(address));
        }

        // Recomputed live: grants requested at activation but no longer
        // listed stay in place.
        let requests = self.policy_requests(policy.as_ref())?;
        self.set_policy_permissions(address, &requests, false, events);

        write_lock(&self.registry).active_policies.swap_remove(&address);

        let dependencies = self.policy_dependencies(policy.as_ref())?;
        {
            let mut registry = write_lock(&self.registry);
            for keycode in dependencies {
                if let Some(dependents) = registry.module_dependents.get_mut(&keycode) {
                    dependents.swap_remove(&address);
                }
            }
            // Kept only while a dependents list still names it.
            let still_listed = registry
                .module_dependents
                .values()
                .any(|dependents| dependents.contains(&address));
            if !still_listed {
                registry.policies.remove(&address);
            }
        }

        policy
            .set_active_status(self.address, false)
            .map_err(|source| KernelError::KernelAdapter {
                target: address,
                source,
            })
    }

    fn migrate_kernel(&self, new_kernel: &Arc<Kernel>) -> Result<(), KernelError> {
        ensure_contract(new_kernel.address())?;

        let (modules, policies): (Vec<Arc<dyn Module>>, Vec<Arc<dyn Policy>>) = {
            let registry = read_lock(&self.registry);
            (
                registry
                    .all_keycodes
                    .iter()
                    .filter_map(|keycode| registry.modules.get(keycode).cloned())
                    .collect(),
                registry
                    .active_policies
                    .iter()
                    .filter_map(|address| registry.policies.get(address).cloned())
                    .collect(),
            )
        };

        // Every component must still answer to this kernel before any moves.
        for module in &modules {
            self.ensure_owned(module.address(), module.adapter().only_kernel_instance(self))?;
        }
        for policy in &policies {
            self.ensure_owned(
                policy.address(),
                policy.state().adapter().only_kernel_instance(self),
            )?;
        }

        for module in &modules {
            self.ensure_owned(
                module.address(),
                module.change_kernel(self.address, new_kernel),
            )?;
        }
        for policy in &policies {
            self.ensure_owned(
                policy.address(),
                policy.set_active_status(self.address, false),
            )?;
            self.ensure_owned(
                policy.address(),
                policy.change_kernel(self.address, new_kernel),
            )?;
        }

        info!(
            "event=migrate_kernel module=kernel status=ok from={} to={} modules={} policies={}",
            self.address,
            new_kernel.address(),
            modules.len(),
            policies.len()
        );
        Ok(())
    }

    fn ensure_owned(
        &self,
        target: Address,
        result: Result<(), super::adapter::KernelAdapterError>,
    ) -> Result<(), KernelError> {
        result.map_err(|source| KernelError::KernelAdapter { target, source })
    }

    fn policy_dependencies(&self, policy: &dyn Policy) -> Result<Vec<Keycode>, KernelError> {
        policy
            .configure_dependencies(self)
            .map_err(|source| KernelError::PolicyHook {
                hook: PolicyHook::ConfigureDependencies,
                policy: policy.address(),
                source,
            })
    }

    fn policy_requests(&self, policy: &dyn Policy) -> Result<Vec<Permission>, KernelError> {
        policy
            .request_permissions(self)
            .map_err(|source| KernelError::PolicyHook {
                hook: PolicyHook::RequestPermissions,
                policy: policy.address(),
                source,
            })
    }

    fn set_policy_permissions(
        &self,
        policy: Address,
        requests: &[Permission],
        granted: bool,
        events: &mut Vec<KernelEvent>,
    ) {
        let mut registry = write_lock(&self.registry);
        for request in requests {
            let selectors = registry
                .permissions
                .entry(request.keycode)
                .or_default()
                .entry(policy)
                .or_default();
            if granted {
                selectors.insert(request.selector);
            } else {
                selectors.remove(&request.selector);
            }
            events.push(KernelEvent::PermissionsUpdated {
                keycode: request.keycode,
                policy,
                selector: request.selector,
                granted,
            });
        }
    }

    fn log_role_change(
        &self,
        operation: &str,
        role: Role,
        addr: Address,
        result: &Result<(), KernelError>,
    ) {
        match result {
            Ok(()) => info!(
                "event={} module=kernel status=ok kernel={} role={} addr={}",
                operation, self.address, role, addr
            ),
            Err(err) => warn!(
                "event={} module=kernel status=error kernel={} role={} addr={} error={}",
                operation, self.address, role, addr, err
            ),
        }
    }
}
