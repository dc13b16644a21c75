use super::{decode_hex, hex_serde, IdentityError};
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;

static SIGNATURE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*\(([A-Za-z0-9_\[\]]+(,[A-Za-z0-9_\[\]]+)*)?\)$")
        .expect("valid signature regex")
});

/// 4-byte function selector naming one permissioned entry point.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Selector([u8; 4]);

impl Selector {
    pub const fn new(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }

    pub const fn into_bytes(self) -> [u8; 4] {
        self.0
    }

    /// Derives the selector for a canonical signature such as
    /// `addAsset(address)`: the first four bytes of its SHA-256 digest.
    ///
    /// The signature is not validated; use [`Selector::parse_signature`]
    /// for operator-supplied text.
    pub fn from_signature(signature: &str) -> Self {
        let digest = Sha256::digest(signature.as_bytes());
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&digest[..4]);
        Self(bytes)
    }

    /// Validates `name(type,...)` shape, then derives the selector.
    pub fn parse_signature(signature: &str) -> Result<Self, IdentityError> {
        let trimmed = signature.trim();
        if !SIGNATURE_RE.is_match(trimmed) {
            return Err(IdentityError::Malformed {
                kind: "signature",
                value: trimmed.to_string(),
            });
        }
        Ok(Self::from_signature(trimmed))
    }
}

impl Display for Selector {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl Debug for Selector {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Selector({self})")
    }
}

impl FromStr for Selector {
    type Err = IdentityError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        decode_hex::<4>(value, "selector").map(Self)
    }
}

hex_serde!(Selector, 4, "selector");

#[cfg(test)]
mod tests {
    use super::Selector;
    use crate::identity::IdentityError;

    #[test]
    fn from_signature_is_stable_and_distinct() {
        let add = Selector::from_signature("addAsset(address)");
        assert_eq!(add, Selector::from_signature("addAsset(address)"));
        assert_ne!(add, Selector::from_signature("removeAsset(address)"));
    }

    #[test]
    fn parse_signature_accepts_canonical_shapes() {
        for signature in [
            "addAsset(address)",
            "setPrice(uint256,bytes32)",
            "execOnSubmodule(bytes20,bytes)",
            "ping()",
            "batch(address[])",
        ] {
            let parsed = Selector::parse_signature(signature).unwrap();
            assert_eq!(parsed, Selector::from_signature(signature));
        }
    }

    #[test]
    fn parse_signature_rejects_malformed_text() {
        for signature in ["addAsset", "addAsset(address", "1add()", "add(a, b)", ""] {
            let err = Selector::parse_signature(signature).unwrap_err();
            assert!(matches!(err, IdentityError::Malformed { kind: "signature", .. }));
        }
    }

    #[test]
    fn display_round_trips_through_from_str() {
        let selector = Selector::from_signature("addAsset(address)");
        assert_eq!(selector.to_string().parse::<Selector>().unwrap(), selector);
    }
}
