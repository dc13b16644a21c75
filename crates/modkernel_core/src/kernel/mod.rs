//! Kernel registry and the base capabilities of the components it manages.
//!
//! # Responsibility
//! - Own keycode→module mapping, active policies, permission and role grants.
//! - Drive module/policy lifecycle hooks from executor-submitted actions.
//!
//! # Invariants
//! - At most one module per keycode.
//! - Index maps stay in sync with their lists after every removal.
//! - A failed mutation leaves registries and the event log untouched.
//!
//! # See also
//! - `crate::submodule` for the module-owned second-level registry.

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::{self, ThreadId};

mod adapter;
mod error;
mod event;
mod module;
mod policy;
mod registry;
mod slots;

pub use adapter::{KernelAdapter, KernelAdapterError};
pub use error::{KernelError, PolicyHook};
pub use event::{ActionKind, EventRecord, KernelEvent};
pub use module::{downcast_module, Module, ModuleError, ModuleVersion};
pub use policy::{module_for_keycode, Permission, Policy, PolicyError, PolicyState};
pub use registry::{Action, Kernel, KernelConfig};
pub use slots::SlotList;

pub(crate) fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Serializes mutations of one registry across threads.
///
/// Other threads queue on the lock; a second acquisition from the thread
/// already holding it is refused instead of deadlocking.
#[derive(Debug, Default)]
pub(crate) struct MutationLock {
    lock: Mutex<()>,
    owner: Mutex<Option<ThreadId>>,
}

impl MutationLock {
    /// `None` means the calling thread is already inside a mutation of this
    /// registry, further up its own call stack.
    pub(crate) fn acquire(&self) -> Option<MutationGuard<'_>> {
        let current = thread::current().id();
        if *self.owner_slot() == Some(current) {
            return None;
        }
        let guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        *self.owner_slot() = Some(current);
        Some(MutationGuard {
            owner: &self.owner,
            _guard: guard,
        })
    }

    fn owner_slot(&self) -> MutexGuard<'_, Option<ThreadId>> {
        self.owner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Held for the duration of one mutation.
pub(crate) struct MutationGuard<'a> {
    owner: &'a Mutex<Option<ThreadId>>,
    _guard: MutexGuard<'a, ()>,
}

impl Drop for MutationGuard<'_> {
    fn drop(&mut self) {
        // Cleared before `_guard` releases the lock.
        *self.owner.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

#[cfg(test)]
mod tests {
    use super::MutationLock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn same_thread_reacquire_is_refused() {
        let lock = MutationLock::default();
        let outer = lock.acquire().expect("first acquisition");
        assert!(lock.acquire().is_none());
        drop(outer);
        assert!(lock.acquire().is_some());
    }

    #[test]
    fn other_threads_wait_instead_of_failing() {
        let lock = MutationLock::default();
        let acquired = AtomicUsize::new(0);
        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..100 {
                        let guard = lock.acquire().expect("queued acquisition");
                        acquired.fetch_add(1, Ordering::SeqCst);
                        drop(guard);
                    }
                });
            }
        });
        assert_eq!(acquired.load(Ordering::SeqCst), 400);
    }
}
