//! Local file registry: every uploaded file, keyed by a generated UUID.
//!
//! Held in memory and written back to one JSON file after each mutation,
//! atomically via temp+rename. A missing file is an empty registry.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use distorage_core::{DistorageError, DistorageResult, FileDescriptor};

pub struct FileRegistry {
    path: PathBuf,
    entries: BTreeMap<Uuid, FileDescriptor>,
}

impl FileRegistry {
    pub fn open(path: &Path) -> DistorageResult<Self> {
        let entries = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| {
                DistorageError::Registry(format!("reading {}: {e}", path.display()))
            })?;
            serde_json::from_str(&content).map_err(|e| {
                DistorageError::Registry(format!("parsing {}: {e}", path.display()))
            })?
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read_all(&self) -> &BTreeMap<Uuid, FileDescriptor> {
        &self.entries
    }

    pub fn write_all(&mut self, entries: BTreeMap<Uuid, FileDescriptor>) -> DistorageResult<()> {
        self.entries = entries;
        self.flush()
    }

    pub fn get(&self, id: &Uuid) -> DistorageResult<&FileDescriptor> {
        self.entries
            .get(id)
            .ok_or_else(|| DistorageError::NotFound(format!("file {id} not found")))
    }

    /// Insert under a fresh UUID and persist.
    pub fn append(&mut self, descriptor: FileDescriptor) -> DistorageResult<Uuid> {
        let id = Uuid::new_v4();
        self.entries.insert(id, descriptor);
        self.flush()?;
        Ok(id)
    }

    pub fn update(&mut self, id: &Uuid, descriptor: FileDescriptor) -> DistorageResult<()> {
        let slot = self
            .entries
            .get_mut(id)
            .ok_or_else(|| DistorageError::NotFound(format!("file {id} not found")))?;
        *slot = descriptor;
        self.flush()
    }

    pub fn delete(&mut self, id: &Uuid) -> DistorageResult<()> {
        if self.entries.remove(id).is_none() {
            return Err(DistorageError::NotFound(format!("file {id} not found")));
        }
        self.flush()
    }

    fn flush(&self) -> DistorageResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    DistorageError::Registry(format!("creating {}: {e}", parent.display()))
                })?;
            }
        }
        let json = serde_json::to_string_pretty(&self.entries)
            .map_err(|e| DistorageError::Registry(format!("serializing registry: {e}")))?;

        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, &json).map_err(|e| {
            DistorageError::Registry(format!("writing {}: {e}", tmp_path.display()))
        })?;
        std::fs::rename(&tmp_path, &self.path).map_err(|e| {
            DistorageError::Registry(format!("renaming {}: {e}", self.path.display()))
        })?;
        Ok(())
    }
}
