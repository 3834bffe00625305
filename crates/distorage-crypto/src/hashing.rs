//! Keccak-256 hashing and address derivation
//!
//! The same digest serves as chunk/file content identity and as the basis of
//! node and client addresses. This is the original Keccak padding (as used by
//! Ethereum), not NIST SHA3-256.

use serde::{Deserialize, Serialize};
use sha3::{Digest as _, Keccak256};
use std::fmt;
use std::str::FromStr;

use crate::{CryptoError, ADDRESS_SIZE, DIGEST_SIZE};

/// A Keccak-256 digest
pub type Digest = [u8; DIGEST_SIZE];

/// Hash a byte slice with Keccak-256.
pub fn hash(data: &[u8]) -> Digest {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    let mut out = [0u8; DIGEST_SIZE];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Derive the 20-byte address of a public key: `keccak256(pk)[12..32]`.
pub fn derive_address(public_key_bytes: &[u8]) -> Address {
    let digest = hash(public_key_bytes);
    let mut bytes = [0u8; ADDRESS_SIZE];
    bytes.copy_from_slice(&digest[DIGEST_SIZE - ADDRESS_SIZE..]);
    Address(bytes)
}

/// Identity of a node or client, displayed as 40 lowercase hex chars.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; ADDRESS_SIZE]);

impl Address {
    pub fn from_bytes(bytes: [u8; ADDRESS_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; ADDRESS_SIZE] = bytes.try_into().ok()?;
        Some(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_hex())
    }
}

impl FromStr for Address {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = hex::decode(s)
            .map_err(|e| CryptoError::MalformedKey(format!("invalid address hex '{s}': {e}")))?;
        Address::from_slice(&raw).ok_or_else(|| {
            CryptoError::MalformedKey(format!(
                "address must be {ADDRESS_SIZE} bytes, got {}",
                raw.len()
            ))
        })
    }
}

impl Serialize for Address {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
