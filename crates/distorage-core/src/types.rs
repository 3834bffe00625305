use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use distorage_crypto::{Address, Digest, DIGEST_SIZE};

use crate::error::DistorageError;

/// Hex-encoded Keccak-256 digest naming one chunk on a node.
///
/// Always 64 lowercase hex characters, so it is safe to use as a single path
/// component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChunkId(String);

impl ChunkId {
    pub const HEX_LEN: usize = DIGEST_SIZE * 2;

    pub fn parse(raw: &str) -> Result<Self, DistorageError> {
        if raw.len() != Self::HEX_LEN {
            return Err(DistorageError::BadIdentifier(format!(
                "chunk id must be {} hex characters, got {}",
                Self::HEX_LEN,
                raw.len()
            )));
        }
        if !raw.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(DistorageError::BadIdentifier(format!(
                "chunk id is not hex: {raw}"
            )));
        }
        Ok(Self(raw.to_ascii_lowercase()))
    }

    pub fn from_digest(digest: &Digest) -> Self {
        Self(hex::encode(digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ChunkId {
    type Err = DistorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ChunkId {
    type Error = DistorageError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<ChunkId> for String {
    fn from(id: ChunkId) -> Self {
        id.0
    }
}

/// The three node operations. Each is one connection: preamble, then one
/// request and one response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Store,
    Fetch,
    Delete,
}

impl Operation {
    /// URL path segment: `/store/{id}`, `/get/{id}`, `/delete/{id}`
    pub fn path_segment(self) -> &'static str {
        match self {
            Operation::Store => "store",
            Operation::Fetch => "get",
            Operation::Delete => "delete",
        }
    }

    pub fn from_path_segment(segment: &str) -> Option<Self> {
        match segment {
            "store" => Some(Operation::Store),
            "get" => Some(Operation::Fetch),
            "delete" => Some(Operation::Delete),
            _ => None,
        }
    }

    /// Status sent on success. Fetch answers with the payload instead.
    pub fn success_status(self) -> Option<Status> {
        match self {
            Operation::Store => Some(Status::Stored),
            Operation::Fetch => None,
            Operation::Delete => Some(Status::Deleted),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Store => "store",
            Operation::Fetch => "fetch",
            Operation::Delete => "delete",
        })
    }
}

/// Wire status codes. The byte values are fixed for interop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Stored,
    Deleted,
    BadIdentifier,
    Forbidden,
    NotFound,
    Internal,
}

impl Status {
    pub const ALL: [Status; 6] = [
        Status::Stored,
        Status::Deleted,
        Status::BadIdentifier,
        Status::Forbidden,
        Status::NotFound,
        Status::Internal,
    ];

    pub fn as_bytes(self) -> &'static [u8] {
        match self {
            Status::Stored => &[0xc8],
            Status::Deleted => &[0xcc],
            Status::BadIdentifier => &[0x01, 0x90],
            Status::Forbidden => &[0x01, 0x93],
            Status::NotFound => &[0x01, 0x94],
            Status::Internal => &[0x01, 0xf4],
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_bytes() == bytes)
    }

    /// Error a client reports when a node answers with this status for `chunk`.
    /// `None` for the success codes.
    pub fn into_error(self, chunk: &ChunkId) -> Option<DistorageError> {
        match self {
            Status::Stored | Status::Deleted => None,
            Status::BadIdentifier => Some(DistorageError::BadIdentifier(chunk.to_string())),
            Status::Forbidden => Some(DistorageError::NotAuthorized(format!(
                "node refused access to chunk {chunk}"
            ))),
            Status::NotFound => Some(DistorageError::NotFound(format!(
                "chunk {chunk} not found on node"
            ))),
            Status::Internal => Some(DistorageError::Integrity(format!(
                "node failed to serve chunk {chunk}"
            ))),
        }
    }
}

/// One chunk of a stored file and where its replicas live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkDescriptor {
    /// Zero-based position in the ciphertext
    pub number: u64,
    /// Keccak-256 of the chunk bytes, 64 hex
    pub hash: ChunkId,
    pub nodes: Vec<Address>,
}

/// Registry entry for one uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub name: String,
    /// Keccak-256 of the plaintext, 64 hex
    pub hash: String,
    pub available: bool,
    /// Plaintext length in bytes
    pub size: u64,
    pub chunks: Vec<ChunkDescriptor>,
}

impl FileDescriptor {
    pub fn replica_count(&self) -> usize {
        self.chunks.iter().map(|c| c.nodes.len()).sum()
    }
}
