//! Peer identity: ADNL address (directory key) and the peer's public key.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::address::{self, AddressError};

/// Peer public key (32 bytes, Ed25519). Returned by the directory alongside endpoints.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct PublicKey(#[serde(with = "bytes_32")] [u8; 32]);

mod bytes_32 {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    pub fn serialize<S: Serializer>(v: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        v.as_slice().serialize(serializer)
    }
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let buf: Vec<u8> = Deserialize::deserialize(d)?;
        buf.try_into()
            .map_err(|_| serde::de::Error::custom("expected 32 bytes"))
    }
}

impl PublicKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        PublicKey(bytes)
    }
}

/// ADNL address: the 32-byte key a site is published under in the directory.
/// Displays as its 55-character literal form (without the `.adnl` suffix).
#[derive(Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct AdnlId(#[serde(with = "bytes_32")] [u8; 32]);

impl AdnlId {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        AdnlId(bytes)
    }

    /// Lowercase hex, for log fields where the literal form is too long.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl fmt::Display for AdnlId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&address::encode(&self.0))
    }
}

impl fmt::Debug for AdnlId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AdnlId({})", self.to_hex())
    }
}

impl FromStr for AdnlId {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        address::decode(s).map(AdnlId)
    }
}
