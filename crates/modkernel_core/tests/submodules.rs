mod common;

use common::{execute, keycode, new_kernel, sub_keycode, Custodian, Ledger, Plain, Treasury};
use modkernel_core::identity::{Address, IdentityError, SubKeycode};
use modkernel_core::kernel::{Action, Kernel, Module, ModuleVersion, Policy};
use modkernel_core::submodule::{
    downcast_submodule, ModuleWithSubmodules, Submodule, SubmoduleBase, SubmoduleError,
};
use modkernel_core::{Calldata, ModuleError, Revert};
use std::any::Any;
use std::sync::{Arc, Mutex};

struct Fixture {
    kernel: Arc<Kernel>,
    treasury: Arc<Treasury>,
    policy: Arc<Custodian>,
}

fn fixture() -> Fixture {
    let kernel = new_kernel("kernel");
    let treasury = Treasury::new(&kernel, "trsry");
    execute(&kernel, Action::InstallModule(treasury.clone()));
    let policy = Custodian::new(&kernel, "policy.custodian");
    execute(&kernel, Action::ActivatePolicy(policy.clone()));
    Fixture {
        kernel,
        treasury,
        policy,
    }
}

#[test]
fn install_registers_and_initializes_submodule() {
    let fx = fixture();
    let ledger = Ledger::new(fx.treasury.as_ref(), "ledger.v1", "TRSRY.LEDGER").unwrap();

    fx.policy
        .install_ledger(ledger.clone())
        .expect("permitted policy installs submodule");

    assert_eq!(fx.treasury.submodules(), vec![sub_keycode("TRSRY.LEDGER")]);
    assert!(fx.treasury.submodule_is_installed(sub_keycode("TRSRY.LEDGER")));
    assert_eq!(ledger.init_count(), 1);
    let installed = fx
        .treasury
        .submodule_for_keycode(sub_keycode("TRSRY.LEDGER"))
        .unwrap();
    assert!(downcast_submodule::<Ledger>(installed.as_ref()).is_some());
    assert_eq!(fx.kernel.all_keycodes(), vec![keycode("TRSRY")]);
}

#[test]
fn install_requires_module_permission() {
    let fx = fixture();
    let ledger = Ledger::new(fx.treasury.as_ref(), "ledger.v1", "TRSRY.LEDGER").unwrap();
    let stranger = Address::from_seed("stranger");

    let err = fx
        .treasury
        .install_submodule(stranger, ledger)
        .unwrap_err();
    assert_eq!(err, ModuleError::PolicyNotPermitted(stranger));
    assert!(fx.treasury.submodules().is_empty());
}

#[test]
fn install_rejects_duplicates_and_bad_keycodes() {
    let fx = fixture();
    let caller = fx.policy.address();
    let ledger = Ledger::new(fx.treasury.as_ref(), "ledger.v1", "TRSRY.LEDGER").unwrap();
    fx.treasury.install_submodule(caller, ledger).unwrap();

    let twin = Ledger::new(fx.treasury.as_ref(), "ledger.twin", "TRSRY.LEDGER").unwrap();
    assert_eq!(
        fx.treasury.install_submodule(caller, twin).unwrap_err(),
        ModuleError::SubmoduleAlreadyInstalled(sub_keycode("TRSRY.LEDGER"))
    );

    let short = Ledger::new(fx.treasury.as_ref(), "ledger.short", "TRSRY.LG").unwrap();
    assert_eq!(
        fx.treasury.install_submodule(caller, short).unwrap_err(),
        ModuleError::Identity(IdentityError::InvalidSubKeycode(sub_keycode("TRSRY.LG")))
    );

    let lower = Ledger::new(fx.treasury.as_ref(), "ledger.lower", "TRSRY.ledger").unwrap();
    assert!(matches!(
        fx.treasury.install_submodule(caller, lower),
        Err(ModuleError::Identity(IdentityError::InvalidSubKeycode(_)))
    ));

    assert_eq!(fx.treasury.submodules(), vec![sub_keycode("TRSRY.LEDGER")]);
}

#[test]
fn submodule_parent_is_checked_at_construction() {
    let kernel = new_kernel("kernel");
    let votes = Plain::new(&kernel, "votes", "VOTES");

    let err = Ledger::new(votes.as_ref(), "ledger", "TRSRY.LEDGER").err().unwrap();
    assert_eq!(
        err,
        SubmoduleError::InvalidParent {
            expected: keycode("TRSRY"),
            actual: keycode("VOTES"),
        }
    );
}

#[test]
fn install_rejects_submodule_declaring_another_parent() {
    let fx = fixture();
    let votes = Plain::new(&fx.kernel, "votes", "VOTES");
    let foreign =
        Ledger::with_parent_keycode(votes.as_ref(), "ledger.votes", "VOTES.LEDGER", keycode("VOTES"))
            .unwrap();

    let err = fx
        .treasury
        .install_submodule(fx.policy.address(), foreign)
        .unwrap_err();
    assert_eq!(
        err,
        ModuleError::InvalidSubmodule {
            expected: keycode("TRSRY"),
            actual: keycode("VOTES"),
        }
    );
}

#[test]
fn init_by_foreign_parent_rolls_back_install() {
    let fx = fixture();
    // Bound to a different TRSRY instance, so the installing module is not
    // its parent.
    let other = Treasury::new(&fx.kernel, "trsry.other");
    let orphan = Ledger::new(other.as_ref(), "ledger.orphan", "TRSRY.LEDGER").unwrap();

    let err = fx
        .treasury
        .install_submodule(fx.policy.address(), orphan)
        .unwrap_err();
    assert_eq!(
        err,
        ModuleError::SubmoduleInit {
            sub_keycode: sub_keycode("TRSRY.LEDGER"),
            source: SubmoduleError::OnlyParent(fx.treasury.address()),
        }
    );
    assert!(fx.treasury.submodules().is_empty());
}

#[test]
fn upgrade_replaces_submodule() {
    let fx = fixture();
    let caller = fx.policy.address();
    let v1 = Ledger::new(fx.treasury.as_ref(), "ledger.v1", "TRSRY.LEDGER").unwrap();
    let v2 = Ledger::new(fx.treasury.as_ref(), "ledger.v2", "TRSRY.LEDGER").unwrap();

    assert_eq!(
        fx.treasury.upgrade_submodule(caller, v1.clone()).unwrap_err(),
        ModuleError::InvalidSubmoduleUpgrade(sub_keycode("TRSRY.LEDGER"))
    );

    fx.treasury.install_submodule(caller, v1.clone()).unwrap();
    assert_eq!(
        fx.treasury.upgrade_submodule(caller, v1.clone()).unwrap_err(),
        ModuleError::InvalidSubmoduleUpgrade(sub_keycode("TRSRY.LEDGER"))
    );

    fx.treasury.upgrade_submodule(caller, v2.clone()).unwrap();
    let installed = fx
        .treasury
        .submodule_for_keycode(sub_keycode("TRSRY.LEDGER"))
        .unwrap();
    assert_eq!(installed.address(), v2.address());
    assert_eq!(v2.init_count(), 1);
    assert_eq!(fx.treasury.submodules(), vec![sub_keycode("TRSRY.LEDGER")]);
}

#[test]
fn exec_forwards_result_bytes_verbatim() {
    let fx = fixture();
    let caller = fx.policy.address();
    let ledger = Ledger::new(fx.treasury.as_ref(), "ledger.v1", "TRSRY.LEDGER").unwrap();
    fx.treasury.install_submodule(caller, ledger.clone()).unwrap();

    let call = Calldata::encode("record(string)", &("audit-1",)).unwrap();
    let result = fx
        .treasury
        .exec_on_submodule(caller, sub_keycode("TRSRY.LEDGER"), &call.to_bytes())
        .unwrap();
    assert_eq!(result, b"1".to_vec());
    assert_eq!(ledger.entries(), vec!["audit-1".to_string()]);
}

#[test]
fn exec_surfaces_revert_payload_unchanged() {
    let fx = fixture();
    let caller = fx.policy.address();
    let ledger = Ledger::new(fx.treasury.as_ref(), "ledger.v1", "TRSRY.LEDGER").unwrap();
    fx.treasury.install_submodule(caller, ledger).unwrap();
    let target = sub_keycode("TRSRY.LEDGER");

    let call = Calldata::encode("fail()", &()).unwrap();
    assert_eq!(
        fx.treasury
            .exec_on_submodule(caller, target, &call.to_bytes())
            .unwrap_err(),
        ModuleError::SubmoduleExecutionReverted {
            sub_keycode: target,
            payload: vec![0xde, 0xad, 0xbe, 0xef],
        }
    );

    assert_eq!(
        fx.treasury
            .exec_on_submodule(caller, target, &[0x01, 0x02])
            .unwrap_err(),
        ModuleError::SubmoduleExecutionReverted {
            sub_keycode: target,
            payload: Vec::new(),
        }
    );
}

#[test]
fn exec_checks_permission_and_installation() {
    let fx = fixture();
    let stranger = Address::from_seed("stranger");
    let call = Calldata::encode("record(string)", &("x",)).unwrap().to_bytes();

    assert_eq!(
        fx.treasury
            .exec_on_submodule(stranger, sub_keycode("TRSRY.LEDGER"), &call)
            .unwrap_err(),
        ModuleError::PolicyNotPermitted(stranger)
    );
    assert_eq!(
        fx.treasury
            .exec_on_submodule(fx.policy.address(), sub_keycode("TRSRY.LEDGER"), &call)
            .unwrap_err(),
        ModuleError::SubmoduleNotInstalled(sub_keycode("TRSRY.LEDGER"))
    );
}

#[test]
fn submodule_rejects_direct_calls() {
    let fx = fixture();
    let ledger = Ledger::new(fx.treasury.as_ref(), "ledger.v1", "TRSRY.LEDGER").unwrap();
    let call = Calldata::encode("record(string)", &("direct",)).unwrap();

    let err = ledger
        .call(Address::from_seed("stranger"), &call)
        .unwrap_err();
    assert!(err.reason().unwrap().contains("not the parent"));
    assert!(ledger.entries().is_empty());
}

/// Submodule whose init tries to install another submodule on its parent.
struct Nested {
    address: Address,
    base: SubmoduleBase,
    parent: Arc<Treasury>,
    caller: Address,
    inner: Arc<Ledger>,
    observed: Mutex<Option<ModuleError>>,
}

impl Submodule for Nested {
    fn address(&self) -> Address {
        self.address
    }

    fn sub_keycode(&self) -> SubKeycode {
        sub_keycode("TRSRY.NESTED")
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
        let nested = self
            .parent
            .install_submodule(self.caller, self.inner.clone());
        *self.observed.lock().unwrap() = nested.err();
        Ok(())
    }
}

#[test]
fn submodule_init_cannot_mutate_parent_table() {
    let fx = fixture();
    let inner = Ledger::new(fx.treasury.as_ref(), "ledger.inner", "TRSRY.LEDGER").unwrap();
    let outer = Arc::new(Nested {
        address: Address::from_seed("nested"),
        base: SubmoduleBase::new(fx.treasury.as_ref(), keycode("TRSRY")).unwrap(),
        parent: fx.treasury.clone(),
        caller: fx.policy.address(),
        inner: inner.clone(),
        observed: Mutex::new(None),
    });

    fx.treasury
        .install_submodule(fx.policy.address(), outer.clone())
        .unwrap();

    assert_eq!(
        *outer.observed.lock().unwrap(),
        Some(ModuleError::MutationInProgress)
    );
    assert_eq!(fx.treasury.submodules(), vec![sub_keycode("TRSRY.NESTED")]);
    assert_eq!(inner.init_count(), 0);
}
