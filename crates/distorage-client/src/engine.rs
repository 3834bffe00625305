//! Upload, download, and delete orchestration
//!
//! Upload:   read → keccak(plaintext) → AES-GCM(file key) → fixed-size chunks
//!           → per chunk, store on up to `replication_count` nodes
//! Download: per chunk, first recorded replica whose bytes hash correctly
//!           → concat → decrypt → check size and hash → atomic write
//! Delete:   soft delete, then delete every replica; whatever could not be
//!           removed stays in the registry for the cleanup sweep
//!
//! Chunks run concurrently (bounded by `parallelism`, results kept in chunk
//! order). Replica attempts within one chunk are sequential, so which nodes a
//! chunk lands on depends only on the directory snapshot.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use distorage_core::config::ClientConfig;
use distorage_core::{
    ChunkDescriptor, ChunkId, DistorageError, DistorageResult, FileDescriptor,
};
use distorage_crypto::{decrypt, encrypt, hash, Address, ClientKeys, FileKey};

use crate::connector::NodeConnector;
use crate::directory::{Directory, NodeMap};
use crate::registry::FileRegistry;
use crate::remote::NodeClient;

/// Progress callback type (done, total, message)
pub type ProgressFn = Box<dyn Fn(u64, u64, &str) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub replication_count: usize,
    pub chunk_size: usize,
    pub parallelism: usize,
    pub request_timeout: Duration,
}

impl EngineSettings {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            replication_count: config.replication_count.max(1),
            chunk_size: config.chunk_size.max(1),
            parallelism: config.parallelism.max(1),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&ClientConfig::default())
    }
}

/// Result of uploading one file
#[derive(Debug, Clone)]
pub struct UploadReport {
    pub file_id: Uuid,
    pub name: String,
    pub size: u64,
    pub chunks: usize,
    /// Chunks stored on fewer nodes than requested: (chunk number, replicas)
    pub degraded: Vec<(u64, usize)>,
}

#[derive(Debug, Clone)]
pub struct DownloadReport {
    pub file_id: Uuid,
    pub path: PathBuf,
    pub bytes: u64,
}

#[derive(Debug, Clone)]
pub struct DeleteReport {
    pub file_id: Uuid,
    /// The registry entry is gone; every replica was confirmed deleted.
    pub removed: bool,
    pub remaining_replicas: usize,
}

pub struct Engine<D, C> {
    directory: D,
    nodes: NodeClient<C>,
    file_key: FileKey,
    settings: EngineSettings,
}

impl<D: Directory, C: NodeConnector> Engine<D, C> {
    pub fn new(directory: D, connector: C, keys: ClientKeys, settings: EngineSettings) -> Self {
        Self {
            directory,
            nodes: NodeClient::new(connector, keys.identity, settings.request_timeout),
            file_key: keys.file_key,
            settings,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub async fn upload(
        &self,
        path: &Path,
        registry: &mut FileRegistry,
        progress: Option<&ProgressFn>,
    ) -> DistorageResult<UploadReport> {
        let plaintext = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                DistorageError::NotFound(format!("{} is not a file", path.display()))
            })?;
        let size = plaintext.len() as u64;
        let file_hash = hex::encode(hash(&plaintext));
        let ciphertext = encrypt(self.file_key.as_bytes(), &plaintext)?;
        drop(plaintext);

        let nodes = self.directory.list_nodes().await?;
        let total = ciphertext.len().div_ceil(self.settings.chunk_size) as u64;
        info!(file = %name, size, chunks = total, nodes = nodes.len(), "uploading");

        let done = std::sync::atomic::AtomicU64::new(0);
        let chunks: Vec<ChunkDescriptor> = stream::iter(
            ciphertext
                .chunks(self.settings.chunk_size)
                .enumerate()
                .map(|(i, data)| (i as u64, data)),
        )
        .map(|(number, data)| {
            let nodes = &nodes;
            let done = &done;
            async move {
                let descriptor = self.replicate(number, data, nodes).await?;
                if let Some(report) = progress {
                    let n = done.fetch_add(1, std::sync::atomic::Ordering::Relaxed) + 1;
                    report(n, total, &format!("chunk {number}"));
                }
                Ok::<_, DistorageError>(descriptor)
            }
        })
        .buffered(self.settings.parallelism)
        .try_collect()
        .await?;

        let degraded: Vec<(u64, usize)> = chunks
            .iter()
            .filter(|c| c.nodes.len() < self.settings.replication_count)
            .map(|c| (c.number, c.nodes.len()))
            .collect();

        let chunk_count = chunks.len();
        let file_id = registry.append(FileDescriptor {
            name: name.clone(),
            hash: file_hash,
            available: true,
            size,
            chunks,
        })?;
        info!(file_id = %file_id, file = %name, degraded = degraded.len(), "upload complete");

        Ok(UploadReport {
            file_id,
            name,
            size,
            chunks: chunk_count,
            degraded,
        })
    }

    /// Store one chunk on up to `replication_count` nodes, starting at a
    /// per-chunk offset into the address-ordered node list.
    async fn replicate(
        &self,
        number: u64,
        data: &[u8],
        nodes: &NodeMap,
    ) -> DistorageResult<ChunkDescriptor> {
        let id = ChunkId::from_digest(&hash(data));
        let mut stored: Vec<Address> = Vec::with_capacity(self.settings.replication_count);

        for (address, endpoint) in rotated(nodes, number) {
            if stored.len() >= self.settings.replication_count {
                break;
            }
            match self.nodes.store_chunk(endpoint, &id, data).await {
                Ok(()) => {
                    debug!(chunk = number, node = %address, "replica stored");
                    stored.push(*address);
                }
                Err(e) => debug!(chunk = number, node = %address, "replica rejected: {e}"),
            }
        }

        if stored.is_empty() {
            return Err(DistorageError::upload_exhausted(number));
        }
        if stored.len() < self.settings.replication_count {
            warn!(
                chunk = number,
                replicas = stored.len(),
                wanted = self.settings.replication_count,
                "chunk under-replicated"
            );
        }
        Ok(ChunkDescriptor {
            number,
            hash: id,
            nodes: stored,
        })
    }

    pub async fn download(
        &self,
        file_id: &Uuid,
        registry: &FileRegistry,
        dest_dir: &Path,
        progress: Option<&ProgressFn>,
    ) -> DistorageResult<DownloadReport> {
        let descriptor = registry.get(file_id)?.clone();
        if !descriptor.available {
            return Err(DistorageError::NotFound(format!(
                "file {file_id} has been deleted"
            )));
        }

        let nodes = self.directory.list_nodes().await?;
        let total = descriptor.chunks.len() as u64;
        let done = std::sync::atomic::AtomicU64::new(0);

        let pieces: Vec<Vec<u8>> = stream::iter(descriptor.chunks.iter())
            .map(|chunk| {
                let nodes = &nodes;
                let done = &done;
                async move {
                    let data = self.fetch_any(chunk, nodes).await?;
                    if let Some(report) = progress {
                        let n = done.fetch_add(1, std::sync::atomic::Ordering::Relaxed) + 1;
                        report(n, total, &format!("chunk {}", chunk.number));
                    }
                    Ok::<_, DistorageError>(data)
                }
            })
            .buffered(self.settings.parallelism)
            .try_collect()
            .await?;

        let ciphertext = pieces.concat();
        let plaintext = decrypt(self.file_key.as_bytes(), &ciphertext).map_err(|e| {
            DistorageError::Integrity(format!("decrypting file {file_id}: {e}"))
        })?;

        if plaintext.len() as u64 != descriptor.size {
            return Err(DistorageError::Integrity(format!(
                "file {file_id} is {} bytes, expected {}",
                plaintext.len(),
                descriptor.size
            )));
        }
        if hex::encode(hash(&plaintext)) != descriptor.hash {
            return Err(DistorageError::Integrity(format!(
                "file {file_id} does not match its recorded hash"
            )));
        }

        let path = write_atomic(dest_dir, &descriptor.name, &plaintext).await?;
        info!(file_id = %file_id, path = %path.display(), "download complete");
        Ok(DownloadReport {
            file_id: *file_id,
            path,
            bytes: descriptor.size,
        })
    }

    /// First recorded replica, in stored order, that returns bytes matching
    /// the chunk hash. Nodes missing from the snapshot are skipped.
    async fn fetch_any(&self, chunk: &ChunkDescriptor, nodes: &NodeMap) -> DistorageResult<Vec<u8>> {
        for address in &chunk.nodes {
            let Some(endpoint) = nodes.get(address) else {
                debug!(chunk = chunk.number, node = %address, "replica node offline");
                continue;
            };
            match self.nodes.fetch_chunk(endpoint, &chunk.hash).await {
                Ok(data) => return Ok(data),
                Err(e) => debug!(chunk = chunk.number, node = %address, "replica unusable: {e}"),
            }
        }
        Err(DistorageError::download_exhausted(chunk.number))
    }

    pub async fn delete(
        &self,
        file_id: &Uuid,
        registry: &mut FileRegistry,
    ) -> DistorageResult<DeleteReport> {
        let mut descriptor = registry.get(file_id)?.clone();
        descriptor.available = false;
        registry.update(file_id, descriptor.clone())?;

        let nodes = self.directory.list_nodes().await?;
        let removed = self.settle(file_id, descriptor, &nodes, registry).await?;
        let remaining_replicas = if removed {
            0
        } else {
            registry.get(file_id)?.replica_count()
        };
        info!(file_id = %file_id, removed, remaining_replicas, "delete finished");
        Ok(DeleteReport {
            file_id: *file_id,
            removed,
            remaining_replicas,
        })
    }

    /// Purge what can be purged, then drop the entry or store what is left.
    /// Returns whether the entry was removed.
    pub(crate) async fn settle(
        &self,
        file_id: &Uuid,
        mut descriptor: FileDescriptor,
        nodes: &NodeMap,
        registry: &mut FileRegistry,
    ) -> DistorageResult<bool> {
        descriptor.chunks = self.purge(descriptor.chunks, nodes).await;
        if descriptor.chunks.is_empty() {
            registry.delete(file_id)?;
            Ok(true)
        } else {
            registry.update(file_id, descriptor)?;
            Ok(false)
        }
    }

    /// Delete every replica that can be reached. Returns the chunks that still
    /// have replicas, each narrowed to the nodes that kept them.
    async fn purge(&self, chunks: Vec<ChunkDescriptor>, nodes: &NodeMap) -> Vec<ChunkDescriptor> {
        stream::iter(chunks)
            .map(|chunk| self.purge_chunk(chunk, nodes))
            .buffered(self.settings.parallelism)
            .filter(|chunk| std::future::ready(!chunk.nodes.is_empty()))
            .collect()
            .await
    }

    async fn purge_chunk(&self, mut chunk: ChunkDescriptor, nodes: &NodeMap) -> ChunkDescriptor {
        let mut kept = Vec::new();
        for address in chunk.nodes {
            let Some(endpoint) = nodes.get(&address) else {
                kept.push(address);
                continue;
            };
            match self.nodes.delete_chunk(endpoint, &chunk.hash).await {
                // Already gone counts as deleted
                Ok(()) | Err(DistorageError::NotFound(_)) => {
                    debug!(chunk = chunk.number, node = %address, "replica deleted");
                }
                Err(e) => {
                    debug!(chunk = chunk.number, node = %address, "replica kept: {e}");
                    kept.push(address);
                }
            }
        }
        chunk.nodes = kept;
        chunk
    }

    pub(crate) async fn snapshot(&self) -> DistorageResult<NodeMap> {
        self.directory.list_nodes().await
    }
}

/// Nodes in address order, starting at `number mod len` and wrapping.
fn rotated(nodes: &NodeMap, number: u64) -> impl Iterator<Item = (&Address, &String)> {
    let len = nodes.len().max(1);
    let start = (number % len as u64) as usize;
    nodes.iter().skip(start).chain(nodes.iter().take(start))
}

/// Write `<dir>/<name>` via a temp file in the same directory. Only the final
/// path component of `name` is used.
async fn write_atomic(dir: &Path, name: &str, data: &[u8]) -> DistorageResult<PathBuf> {
    let file_name = Path::new(name)
        .file_name()
        .ok_or_else(|| DistorageError::Integrity(format!("unusable file name {name:?}")))?;
    tokio::fs::create_dir_all(dir).await?;
    let dest = dir.join(file_name);
    let tmp = dir.join(format!(
        ".{}.{}.part",
        file_name.to_string_lossy(),
        Uuid::new_v4().simple()
    ));
    tokio::fs::write(&tmp, data).await?;
    if let Err(e) = tokio::fs::rename(&tmp, &dest).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(dest)
}
