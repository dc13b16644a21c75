//! Back-reference from a component to the kernel that owns it.

use super::{read_lock, write_lock, Kernel};
use crate::identity::Address;
use log::info;
use std::sync::{Arc, RwLock, Weak};
use thiserror::Error;

/// Kernel back-reference errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KernelAdapterError {
    #[error("caller {0} is not the kernel")]
    OnlyKernel(Address),
    #[error("kernel {0} is no longer available")]
    KernelUnavailable(Address),
}

#[derive(Debug)]
struct KernelLink {
    address: Address,
    kernel: Weak<Kernel>,
}

/// Retargetable kernel reference embedded in every module and policy.
///
/// Holds a weak handle so a kernel owning its components does not keep
/// itself alive through them.
#[derive(Debug)]
pub struct KernelAdapter {
    link: RwLock<KernelLink>,
}

impl KernelAdapter {
    pub fn new(kernel: &Arc<Kernel>) -> Self {
        Self {
            link: RwLock::new(KernelLink {
                address: kernel.address(),
                kernel: Arc::downgrade(kernel),
            }),
        }
    }

    pub fn kernel_address(&self) -> Address {
        read_lock(&self.link).address
    }

    /// Resolves the current kernel.
    pub fn kernel(&self) -> Result<Arc<Kernel>, KernelAdapterError> {
        let link = read_lock(&self.link);
        link.kernel
            .upgrade()
            .ok_or(KernelAdapterError::KernelUnavailable(link.address))
    }

    /// Address check used by lifecycle hooks, which only see the caller's
    /// address.
    pub fn only_kernel(&self, caller: Address) -> Result<(), KernelAdapterError> {
        if caller != self.kernel_address() {
            return Err(KernelAdapterError::OnlyKernel(caller));
        }
        Ok(())
    }

    /// Passes only when this adapter links to `kernel` itself. Two kernels
    /// sharing an address do not own each other's components.
    pub fn only_kernel_instance(&self, kernel: &Kernel) -> Result<(), KernelAdapterError> {
        let link = read_lock(&self.link);
        if link.address != kernel.address() || !std::ptr::eq(link.kernel.as_ptr(), kernel) {
            return Err(KernelAdapterError::OnlyKernel(kernel.address()));
        }
        Ok(())
    }

    /// Points this component at `new_kernel`. Only the current kernel may
    /// call this.
    pub fn change_kernel(
        &self,
        caller: Address,
        new_kernel: &Arc<Kernel>,
    ) -> Result<(), KernelAdapterError> {
        let mut link = write_lock(&self.link);
        if caller != link.address {
            return Err(KernelAdapterError::OnlyKernel(caller));
        }
        info!(
            "event=change_kernel module=adapter status=ok from={} to={}",
            link.address,
            new_kernel.address()
        );
        link.address = new_kernel.address();
        link.kernel = Arc::downgrade(new_kernel);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{KernelAdapter, KernelAdapterError};
    use crate::identity::Address;
    use crate::kernel::{Kernel, KernelConfig};
    use std::sync::Arc;

    fn kernel(seed: &str) -> Arc<Kernel> {
        Kernel::new(KernelConfig::new(
            Address::from_seed(seed),
            Address::from_seed("deployer"),
        ))
    }

    #[test]
    fn only_current_kernel_may_retarget() {
        let first = kernel("kernel.one");
        let second = kernel("kernel.two");
        let adapter = KernelAdapter::new(&first);

        let stranger = Address::from_seed("stranger");
        assert_eq!(
            adapter.change_kernel(stranger, &second),
            Err(KernelAdapterError::OnlyKernel(stranger))
        );
        assert_eq!(adapter.kernel_address(), first.address());

        adapter
            .change_kernel(first.address(), &second)
            .expect("current kernel may retarget");
        assert_eq!(adapter.kernel_address(), second.address());
        assert!(adapter.only_kernel(second.address()).is_ok());
        assert!(adapter.only_kernel(first.address()).is_err());
    }

    #[test]
    fn kernel_instance_check_tells_same_address_kernels_apart() {
        let owner = kernel("kernel.shared");
        let twin = kernel("kernel.shared");
        let adapter = KernelAdapter::new(&owner);

        assert!(adapter.only_kernel_instance(&owner).is_ok());
        assert_eq!(
            adapter.only_kernel_instance(&twin),
            Err(KernelAdapterError::OnlyKernel(twin.address()))
        );
    }

    #[test]
    fn dropped_kernel_is_reported_unavailable() {
        let transient = kernel("kernel.transient");
        let address = transient.address();
        let adapter = KernelAdapter::new(&transient);
        drop(transient);

        assert_eq!(
            adapter.kernel().unwrap_err(),
            KernelAdapterError::KernelUnavailable(address)
        );
    }
}
