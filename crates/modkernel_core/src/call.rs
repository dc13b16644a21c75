//! Forwarded call payloads and failure payloads.
//!
//! # Responsibility
//! - Frame a call as a 4-byte selector followed by argument bytes.
//! - Carry a callee's failure payload unchanged through forwarding layers.
//!
//! # Invariants
//! - `Calldata::from_bytes(c.to_bytes()) == c` for every payload.
//! - A `Revert` never rewrites the bytes it was created with.

use crate::identity::Selector;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::{Display, Formatter};
use thiserror::Error;

/// Payload framing and argument codec errors.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("calldata is {0} bytes; a selector needs 4")]
    ShortCalldata(usize),
    #[error("argument codec failed: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Selector plus argument bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Calldata {
    pub selector: Selector,
    pub data: Vec<u8>,
}

impl Calldata {
    pub fn new(selector: Selector, data: Vec<u8>) -> Self {
        Self { selector, data }
    }

    /// Encodes `args` as JSON behind the selector derived from `signature`.
    pub fn encode<T: Serialize + ?Sized>(signature: &str, args: &T) -> Result<Self, CallError> {
        Ok(Self {
            selector: Selector::from_signature(signature),
            data: serde_json::to_vec(args)?,
        })
    }

    pub fn decode_args<T: DeserializeOwned>(&self) -> Result<T, CallError> {
        Ok(serde_json::from_slice(&self.data)?)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(4 + self.data.len());
        bytes.extend_from_slice(self.selector.as_bytes());
        bytes.extend_from_slice(&self.data);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CallError> {
        if bytes.len() < 4 {
            return Err(CallError::ShortCalldata(bytes.len()));
        }
        let (head, data) = bytes.split_at(4);
        let mut selector = [0u8; 4];
        selector.copy_from_slice(head);
        Ok(Self {
            selector: Selector::new(selector),
            data: data.to_vec(),
        })
    }
}

/// Failure payload raised by a called component.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Revert {
    payload: Vec<u8>,
}

impl Revert {
    pub fn new(payload: Vec<u8>) -> Self {
        Self { payload }
    }

    /// Revert carrying a UTF-8 reason string.
    pub fn message(reason: impl Into<String>) -> Self {
        Self {
            payload: reason.into().into_bytes(),
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Reason string when the payload is UTF-8.
    pub fn reason(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

impl Display for Revert {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.reason() {
            Some(reason) if !reason.is_empty() => write!(f, "reverted: {reason}"),
            Some(_) => write!(f, "reverted without reason"),
            None => write!(f, "reverted: 0x{}", hex::encode(&self.payload)),
        }
    }
}

impl std::error::Error for Revert {}

impl From<CallError> for Revert {
    fn from(value: CallError) -> Self {
        Self::message(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::{CallError, Calldata, Revert};
    use crate::identity::Selector;

    #[test]
    fn bytes_keep_selector_prefix() {
        let call = Calldata::encode("record(string)", &("audit",)).unwrap();
        let bytes = call.to_bytes();
        assert_eq!(&bytes[..4], Selector::from_signature("record(string)").as_bytes());
        assert_eq!(Calldata::from_bytes(&bytes).unwrap(), call);
        let (note,): (String,) = call.decode_args().unwrap();
        assert_eq!(note, "audit");
    }

    #[test]
    fn short_payload_is_rejected() {
        let err = Calldata::from_bytes(&[1, 2]).unwrap_err();
        assert!(matches!(err, CallError::ShortCalldata(2)));
    }

    #[test]
    fn revert_keeps_payload_verbatim() {
        let raw = vec![0xde, 0xad, 0xbe, 0xef];
        let revert = Revert::new(raw.clone());
        assert_eq!(revert.payload(), raw.as_slice());
        assert_eq!(revert.to_string(), "reverted: 0xdeadbeef");
        assert_eq!(Revert::message("nope").reason(), Some("nope"));
        assert_eq!(Revert::default().to_string(), "reverted without reason");
    }
}
