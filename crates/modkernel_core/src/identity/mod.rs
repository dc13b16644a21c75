//! Fixed-width identifiers and their validators.
//!
//! # Responsibility
//! - Define the semantic identifier types shared by kernel, modules,
//!   policies and submodules.
//! - Validate identifier shape before anything is registered under it.
//!
//! # Invariants
//! - Wrapping raw bytes and unwrapping them again is lossless for every type.
//! - Serialized forms are `0x`-prefixed hex so journal records never lose bytes.

use thiserror::Error;

mod address;
mod codes;
mod selector;

pub use address::{ensure_contract, Address};
pub use codes::{
    ensure_valid_keycode, ensure_valid_role, ensure_valid_sub_keycode, Keycode, Role, SubKeycode,
    KEYCODE_LEN, ROLE_LEN, SUB_KEYCODE_LEN, SUB_KEYCODE_MIN_NAME_LEN, SUB_KEYCODE_SEPARATOR,
};
pub use selector::Selector;

/// Identity and format errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("invalid keycode: {0}")]
    InvalidKeycode(Keycode),
    #[error("invalid subkeycode: {0}")]
    InvalidSubKeycode(SubKeycode),
    #[error("invalid role: {0}")]
    InvalidRole(Role),
    #[error("target is not a contract: {0}")]
    TargetNotAContract(Address),
    #[error("{kind} `{value}` exceeds {max} bytes")]
    TooLong {
        kind: &'static str,
        value: String,
        max: usize,
    },
    #[error("malformed {kind}: `{value}`")]
    Malformed { kind: &'static str, value: String },
}

/// Implements lossless `0x` hex serde for a fixed-width byte newtype.
macro_rules! hex_serde {
    ($ty:ty, $len:expr, $kind:literal) => {
        impl serde::Serialize for $ty {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&format!("0x{}", hex::encode(self.as_bytes())))
            }
        }

        impl<'de> serde::Deserialize<'de> for $ty {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = <String as serde::Deserialize>::deserialize(deserializer)?;
                let bytes = $crate::identity::decode_hex::<$len>(&raw, $kind)
                    .map_err(serde::de::Error::custom)?;
                Ok(Self::new(bytes))
            }
        }
    };
}

pub(crate) use hex_serde;

/// Decodes `0x`-prefixed (or bare) hex into exactly `N` bytes.
pub(crate) fn decode_hex<const N: usize>(
    value: &str,
    kind: &'static str,
) -> Result<[u8; N], IdentityError> {
    let trimmed = value.trim();
    let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    let malformed = || IdentityError::Malformed {
        kind,
        value: trimmed.to_string(),
    };
    let decoded = hex::decode(digits).map_err(|_| malformed())?;
    <[u8; N]>::try_from(decoded.as_slice()).map_err(|_| malformed())
}

/// Copies `value` into a blank-padded fixed buffer.
pub(crate) fn pad_ascii<const N: usize>(
    value: &str,
    kind: &'static str,
) -> Result<[u8; N], IdentityError> {
    let bytes = value.as_bytes();
    if bytes.len() > N {
        return Err(IdentityError::TooLong {
            kind,
            value: value.to_string(),
            max: N,
        });
    }
    let mut out = [0u8; N];
    out[..bytes.len()].copy_from_slice(bytes);
    Ok(out)
}

/// Renders blank-padded identifier bytes as text, escaping non-printables.
pub(crate) fn display_ascii(bytes: &[u8]) -> String {
    let end = bytes
        .iter()
        .rposition(|byte| *byte != 0)
        .map_or(0, |index| index + 1);
    bytes[..end].escape_ascii().to_string()
}
