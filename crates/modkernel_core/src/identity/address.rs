use super::{decode_hex, hex_serde, IdentityError};
use sha2::{Digest, Sha256};
use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;

/// 20-byte account identifier for kernels, modules, policies, submodules and
/// privileged operators.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address([u8; 20]);

impl Address {
    /// The null address. Never names a component.
    pub const ZERO: Address = Address([0u8; 20]);

    pub const fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Derives a deterministic address from a label.
    ///
    /// Used by fixtures and demos that need stable, distinct addresses.
    pub fn from_seed(seed: &str) -> Self {
        let digest = Sha256::digest(seed.as_bytes());
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&digest[..20]);
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub const fn into_bytes(self) -> [u8; 20] {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl Debug for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Address({self})")
    }
}

impl FromStr for Address {
    type Err = IdentityError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        decode_hex::<20>(value, "address").map(Self)
    }
}

hex_serde!(Address, 20, "address");

/// Rejects targets that cannot host a component.
pub fn ensure_contract(target: Address) -> Result<(), IdentityError> {
    if target.is_zero() {
        return Err(IdentityError::TargetNotAContract(target));
    }
    Ok(())
}
