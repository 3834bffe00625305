//! Chunk records on disk
//!
//! Record format (binary):
//! ```text
//! [2 bytes: magic d1 57][20 bytes: owner address][N bytes: payload][4 bytes: crc32 LE]
//! ```
//!
//! The CRC covers everything before it. The owner is fixed by the first
//! writer; only that address may read, overwrite, or delete the record.
//!
//! Two backends share the ownership logic through the provided methods of
//! [`ChunkStore`]: `FsChunkStore` (one file per chunk, written via
//! temp+rename) and `MemoryChunkStore` for tests.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;

use distorage_core::{ChunkId, DistorageError};
use distorage_crypto::{Address, ADDRESS_SIZE};

pub const MAGIC: [u8; 2] = [0xd1, 0x57];
const CRC_SIZE: usize = 4;
const HEADER_SIZE: usize = MAGIC.len() + ADDRESS_SIZE;

/// Smallest valid record: header and CRC around an empty payload
pub const MIN_RECORD_SIZE: usize = HEADER_SIZE + CRC_SIZE;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("record too short: {0} bytes")]
    TooShort(usize),

    #[error("bad record magic")]
    BadMagic,

    #[error("record owned by {found}, not {expected}")]
    AddressMismatch { expected: Address, found: Address },

    #[error("record checksum mismatch: stored {stored:08x}, computed {computed:08x}")]
    ChecksumMismatch { stored: u32, computed: u32 },

    #[error("no record for chunk {0}")]
    Missing(ChunkId),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<RecordError> for DistorageError {
    fn from(e: RecordError) -> Self {
        match e {
            RecordError::AddressMismatch { .. } => DistorageError::NotAuthorized(e.to_string()),
            RecordError::Missing(_) => DistorageError::NotFound(e.to_string()),
            RecordError::Io(io) => DistorageError::Io(io),
            other => DistorageError::Integrity(other.to_string()),
        }
    }
}

/// Build `magic || owner || payload || crc32`.
pub fn encode_record(owner: &Address, payload: &[u8]) -> Vec<u8> {
    let mut record = Vec::with_capacity(MIN_RECORD_SIZE + payload.len());
    record.extend_from_slice(&MAGIC);
    record.extend_from_slice(owner.as_bytes());
    record.extend_from_slice(payload);
    let crc = crc32fast::hash(&record);
    record.extend_from_slice(&crc.to_le_bytes());
    record
}

/// Check length, magic, owner, and checksum, in that order.
pub fn verify_record(record: &[u8], expected: &Address) -> Result<(), RecordError> {
    if record.len() < MIN_RECORD_SIZE {
        return Err(RecordError::TooShort(record.len()));
    }
    if record[..MAGIC.len()] != MAGIC {
        return Err(RecordError::BadMagic);
    }
    let found = Address::from_slice(&record[MAGIC.len()..HEADER_SIZE])
        .ok_or(RecordError::TooShort(record.len()))?;
    if found != *expected {
        return Err(RecordError::AddressMismatch {
            expected: *expected,
            found,
        });
    }

    let (body, trailer) = record.split_at(record.len() - CRC_SIZE);
    let mut stored = [0u8; CRC_SIZE];
    stored.copy_from_slice(trailer);
    let stored = u32::from_le_bytes(stored);
    let computed = crc32fast::hash(body);
    if stored != computed {
        return Err(RecordError::ChecksumMismatch { stored, computed });
    }
    Ok(())
}

/// Payload slice of a record that already passed [`verify_record`].
fn record_payload(record: &[u8]) -> &[u8] {
    &record[HEADER_SIZE..record.len() - CRC_SIZE]
}

/// Raw record persistence plus the ownership rules layered on top.
///
/// Implementations are blocking; async callers go through `spawn_blocking`.
pub trait ChunkStore: Send + Sync {
    /// Raw record bytes, `None` if absent.
    fn load(&self, id: &ChunkId) -> std::io::Result<Option<Vec<u8>>>;

    /// Replace the record atomically.
    fn save(&self, id: &ChunkId, record: &[u8]) -> std::io::Result<()>;

    /// Remove the record; `false` if it was already gone.
    fn remove(&self, id: &ChunkId) -> std::io::Result<bool>;

    fn exists(&self, id: &ChunkId) -> bool;

    /// Write `payload` owned by `owner`. Overwrites unconditionally; callers
    /// check [`ChunkStore::can_be_stored`] first.
    fn store(&self, id: &ChunkId, owner: &Address, payload: &[u8]) -> Result<(), RecordError> {
        self.save(id, &encode_record(owner, payload))?;
        Ok(())
    }

    /// True if there is no record, or the existing record verifies for `owner`.
    fn can_be_stored(&self, id: &ChunkId, owner: &Address) -> bool {
        match self.load(id) {
            Ok(None) => true,
            Ok(Some(record)) => verify_record(&record, owner).is_ok(),
            Err(_) => false,
        }
    }

    fn read(&self, id: &ChunkId, owner: &Address) -> Result<Vec<u8>, RecordError> {
        let record = self
            .load(id)?
            .ok_or_else(|| RecordError::Missing(id.clone()))?;
        verify_record(&record, owner)?;
        Ok(record_payload(&record).to_vec())
    }

    fn delete(&self, id: &ChunkId, owner: &Address) -> Result<(), RecordError> {
        self.read(id, owner)?;
        if !self.remove(id)? {
            return Err(RecordError::Missing(id.clone()));
        }
        Ok(())
    }
}

/// One file per chunk under a root directory, named by the chunk id.
#[derive(Debug, Clone)]
pub struct FsChunkStore {
    root: PathBuf,
}

impl FsChunkStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, id: &ChunkId) -> PathBuf {
        self.root.join(id.as_str())
    }
}

impl ChunkStore for FsChunkStore {
    fn load(&self, id: &ChunkId) -> std::io::Result<Option<Vec<u8>>> {
        match std::fs::read(self.path(id)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn save(&self, id: &ChunkId, record: &[u8]) -> std::io::Result<()> {
        // Unique temp name so concurrent writers of one id never share a file
        let tmp = self
            .root
            .join(format!(".{}.{}.tmp", id, uuid::Uuid::new_v4().simple()));
        std::fs::write(&tmp, record)?;
        if let Err(e) = std::fs::rename(&tmp, self.path(id)) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e);
        }
        Ok(())
    }

    fn remove(&self, id: &ChunkId) -> std::io::Result<bool> {
        match std::fs::remove_file(self.path(id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn exists(&self, id: &ChunkId) -> bool {
        self.path(id).is_file()
    }
}

/// Records held in a map
#[derive(Debug, Default)]
pub struct MemoryChunkStore {
    records: Mutex<HashMap<ChunkId, Vec<u8>>>,
}

impl MemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ChunkId, Vec<u8>>> {
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ChunkStore for MemoryChunkStore {
    fn load(&self, id: &ChunkId) -> std::io::Result<Option<Vec<u8>>> {
        Ok(self.lock().get(id).cloned())
    }

    fn save(&self, id: &ChunkId, record: &[u8]) -> std::io::Result<()> {
        self.lock().insert(id.clone(), record.to_vec());
        Ok(())
    }

    fn remove(&self, id: &ChunkId) -> std::io::Result<bool> {
        Ok(self.lock().remove(id).is_some())
    }

    fn exists(&self, id: &ChunkId) -> bool {
        self.lock().contains_key(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use distorage_crypto::{derive_address, hash};
    use proptest::prelude::*;

    fn owner() -> Address {
        derive_address(b"owner key")
    }

    fn other() -> Address {
        derive_address(b"other key")
    }

    fn id(tag: &[u8]) -> ChunkId {
        ChunkId::from_digest(&hash(tag))
    }

    #[test]
    fn test_record_layout() {
        let record = encode_record(&owner(), b"abc");
        assert_eq!(record.len(), MIN_RECORD_SIZE + 3);
        assert_eq!(&record[..2], &[0xd1, 0x57]);
        assert_eq!(&record[2..22], owner().as_bytes());
        assert_eq!(&record[22..25], b"abc");
        let crc = crc32fast::hash(&record[..25]);
        assert_eq!(&record[25..], &crc.to_le_bytes());
    }

    #[test]
    fn test_verify_rejects_short_and_bad_magic() {
        assert!(matches!(
            verify_record(&[0xd1, 0x57], &owner()),
            Err(RecordError::TooShort(2))
        ));

        let mut record = encode_record(&owner(), b"x");
        record[0] = 0;
        assert!(matches!(
            verify_record(&record, &owner()),
            Err(RecordError::BadMagic)
        ));
    }

    #[test]
    fn test_verify_rejects_other_owner() {
        let record = encode_record(&owner(), b"payload");
        assert!(matches!(
            verify_record(&record, &other()),
            Err(RecordError::AddressMismatch { .. })
        ));
    }

    #[test]
    fn test_fs_store_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsChunkStore::open(&dir.path().join("chunks")).unwrap();
        let chunk = id(b"c1");

        assert!(!store.exists(&chunk));
        store.store(&chunk, &owner(), b"ciphertext").unwrap();
        assert!(store.exists(&chunk));
        assert_eq!(store.read(&chunk, &owner()).unwrap(), b"ciphertext");

        // Only the record file remains; temp files are renamed away
        let names: Vec<_> = std::fs::read_dir(store.root())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from(chunk.as_str())]);
    }

    #[test]
    fn test_can_be_stored_policy() {
        let store = MemoryChunkStore::new();
        let chunk = id(b"c2");

        assert!(store.can_be_stored(&chunk, &owner()));
        store.store(&chunk, &owner(), b"v1").unwrap();
        assert!(store.can_be_stored(&chunk, &owner()));
        assert!(!store.can_be_stored(&chunk, &other()));
    }

    #[test]
    fn test_corrupt_record_cannot_be_overwritten() {
        let store = MemoryChunkStore::new();
        let chunk = id(b"c3");
        let mut record = encode_record(&owner(), b"data");
        record[23] ^= 0xff;
        store.save(&chunk, &record).unwrap();

        assert!(!store.can_be_stored(&chunk, &owner()));
        assert!(matches!(
            store.read(&chunk, &owner()),
            Err(RecordError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_delete_requires_owner() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsChunkStore::open(dir.path()).unwrap();
        let chunk = id(b"c4");
        store.store(&chunk, &owner(), b"data").unwrap();

        assert!(matches!(
            store.delete(&chunk, &other()),
            Err(RecordError::AddressMismatch { .. })
        ));
        assert!(store.exists(&chunk));

        store.delete(&chunk, &owner()).unwrap();
        assert!(!store.exists(&chunk));
        assert!(matches!(
            store.delete(&chunk, &owner()),
            Err(RecordError::Missing(_))
        ));
    }

    #[test]
    fn test_record_errors_map_to_error_kinds() {
        let e: DistorageError = RecordError::AddressMismatch {
            expected: owner(),
            found: other(),
        }
        .into();
        assert!(matches!(e, DistorageError::NotAuthorized(_)));

        let e: DistorageError = RecordError::ChecksumMismatch {
            stored: 1,
            computed: 2,
        }
        .into();
        assert!(matches!(e, DistorageError::Integrity(_)));
    }

    proptest! {
        #[test]
        fn owner_reads_back_exact_payload(payload in proptest::collection::vec(any::<u8>(), 0..=4096)) {
            let record = encode_record(&owner(), &payload);
            prop_assert!(verify_record(&record, &owner()).is_ok());
            prop_assert_eq!(record_payload(&record), payload.as_slice());
        }

        #[test]
        fn any_payload_byte_flip_breaks_checksum(
            payload in proptest::collection::vec(any::<u8>(), 1..=512),
            pos in any::<prop::sample::Index>(),
            bit in 0u8..8,
        ) {
            let mut record = encode_record(&owner(), &payload);
            let i = HEADER_SIZE + pos.index(payload.len());
            record[i] ^= 1 << bit;
            let is_checksum_mismatch = matches!(
                verify_record(&record, &owner()),
                Err(RecordError::ChecksumMismatch { .. })
            );
            prop_assert!(is_checksum_mismatch);
        }

        #[test]
        fn foreign_address_always_mismatches(seed in any::<u64>()) {
            let stranger = derive_address(&seed.to_le_bytes());
            prop_assume!(stranger != owner());
            let record = encode_record(&owner(), b"payload");
            let is_mismatch = matches!(
                verify_record(&record, &stranger),
                Err(RecordError::AddressMismatch { .. })
            );
            prop_assert!(is_mismatch);
        }
    }
}
