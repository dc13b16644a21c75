use super::{display_ascii, hex_serde, pad_ascii, IdentityError};
use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;

/// Width of a module keycode.
pub const KEYCODE_LEN: usize = 5;
/// Width of a submodule keycode.
pub const SUB_KEYCODE_LEN: usize = 20;
/// Width of a role label.
pub const ROLE_LEN: usize = 32;
/// Byte separating the parent keycode from the submodule name.
pub const SUB_KEYCODE_SEPARATOR: u8 = b'.';
/// Minimum non-blank characters after the separator.
pub const SUB_KEYCODE_MIN_NAME_LEN: usize = 3;

/// Module identifier, e.g. `TRSRY`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Keycode([u8; KEYCODE_LEN]);

impl Keycode {
    pub const fn new(bytes: [u8; KEYCODE_LEN]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; KEYCODE_LEN] {
        &self.0
    }

    pub const fn into_bytes(self) -> [u8; KEYCODE_LEN] {
        self.0
    }
}

impl Display for Keycode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&display_ascii(&self.0))
    }
}

impl Debug for Keycode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Keycode({self})")
    }
}

impl FromStr for Keycode {
    type Err = IdentityError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        pad_ascii::<KEYCODE_LEN>(value, "keycode").map(Self)
    }
}

hex_serde!(Keycode, KEYCODE_LEN, "keycode");

/// Submodule identifier, e.g. `TRSRY.LEDGER`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubKeycode([u8; SUB_KEYCODE_LEN]);

impl SubKeycode {
    pub const fn new(bytes: [u8; SUB_KEYCODE_LEN]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; SUB_KEYCODE_LEN] {
        &self.0
    }

    pub const fn into_bytes(self) -> [u8; SUB_KEYCODE_LEN] {
        self.0
    }

    /// Leading keycode-width bytes. Equals the parent keycode when valid.
    pub fn prefix(&self) -> Keycode {
        let mut bytes = [0u8; KEYCODE_LEN];
        bytes.copy_from_slice(&self.0[..KEYCODE_LEN]);
        Keycode(bytes)
    }
}

impl Display for SubKeycode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&display_ascii(&self.0))
    }
}

impl Debug for SubKeycode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "SubKeycode({self})")
    }
}

impl FromStr for SubKeycode {
    type Err = IdentityError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        pad_ascii::<SUB_KEYCODE_LEN>(value, "subkeycode").map(Self)
    }
}

hex_serde!(SubKeycode, SUB_KEYCODE_LEN, "subkeycode");

/// Opaque capability label checked by policy guards.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Role([u8; ROLE_LEN]);

impl Role {
    pub const fn new(bytes: [u8; ROLE_LEN]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; ROLE_LEN] {
        &self.0
    }

    pub const fn into_bytes(self) -> [u8; ROLE_LEN] {
        self.0
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&display_ascii(&self.0))
    }
}

impl Debug for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Role({self})")
    }
}

impl FromStr for Role {
    type Err = IdentityError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        pad_ascii::<ROLE_LEN>(value, "role").map(Self)
    }
}

hex_serde!(Role, ROLE_LEN, "role");

/// Validates a module keycode: every byte must be `A`-`Z`.
pub fn ensure_valid_keycode(keycode: Keycode) -> Result<(), IdentityError> {
    if keycode.0.iter().all(u8::is_ascii_uppercase) {
        return Ok(());
    }
    Err(IdentityError::InvalidKeycode(keycode))
}

/// Validates a submodule keycode against its parent's keycode.
///
/// Layout: parent keycode, separator, at least
/// [`SUB_KEYCODE_MIN_NAME_LEN`] name characters, then name characters or
/// blanks up to the full width.
pub fn ensure_valid_sub_keycode(sub: SubKeycode, parent: Keycode) -> Result<(), IdentityError> {
    let name_start = KEYCODE_LEN + 1;
    let required_end = name_start + SUB_KEYCODE_MIN_NAME_LEN;

    for (index, byte) in sub.0.iter().copied().enumerate() {
        let valid = if index < KEYCODE_LEN {
            parent.0[index] == byte
        } else if index == KEYCODE_LEN {
            byte == SUB_KEYCODE_SEPARATOR
        } else if index < required_end {
            is_name_char(byte)
        } else {
            is_name_char(byte) || byte == 0
        };
        if !valid {
            return Err(IdentityError::InvalidSubKeycode(sub));
        }
    }
    Ok(())
}

/// Validates a role label: lowercase letters, `_` and trailing blanks.
pub fn ensure_valid_role(role: Role) -> Result<(), IdentityError> {
    if role
        .0
        .iter()
        .all(|byte| byte.is_ascii_lowercase() || *byte == b'_' || *byte == 0)
    {
        return Ok(());
    }
    Err(IdentityError::InvalidRole(role))
}

fn is_name_char(byte: u8) -> bool {
    byte.is_ascii_uppercase() || byte.is_ascii_digit() || byte == b'_'
}
