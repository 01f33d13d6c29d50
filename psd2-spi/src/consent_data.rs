//! Opaque, bank-owned consent data.
//!
//! The engine never looks inside a [`ConsentData`] value. It is moved into each
//! SPI call and the call hands back the next version, which the caller stores
//! before issuing any other call for the same authorisation.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Opaque byte blob attached to an authorisation record.
///
/// Serialized as a base64 string. `Debug` prints only the length so bank
/// session material does not leak into logs.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct ConsentData(Vec<u8>);

impl ConsentData {
    /// Wrap raw bytes produced by a bank integration.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// An empty blob, used before the bank has seeded anything.
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Borrow the raw bytes. Only bank integrations should interpret them.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Base64 form, as stored and transmitted.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.0)
    }

    /// Decode the base64 form.
    pub fn from_base64(encoded: &str) -> Result<Self, base64::DecodeError> {
        STANDARD.decode(encoded).map(Self)
    }
}

impl fmt::Debug for ConsentData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConsentData({} bytes)", self.0.len())
    }
}

impl From<Vec<u8>> for ConsentData {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for ConsentData {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl Serialize for ConsentData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for ConsentData {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        Self::from_base64(&encoded).map_err(serde::de::Error::custom)
    }
}
