//! Simulated node cluster: real `NodeService`s behind in-memory channels.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use distorage_client::{
    Engine, EngineSettings, FileRegistry, NodeConnector, NodeMap, StaticDirectory,
};
use distorage_core::{ChunkId, DistorageError, DistorageResult, Operation};
use distorage_crypto::{Address, ClientKeys, SigningIdentity};
use distorage_node::{MemoryChunkStore, NodeMetrics, NodeService};
use distorage_session::{FrameChannel, MemoryChannel};

pub const MIB: usize = 1024 * 1024;

pub struct SimNode {
    pub address: Address,
    pub endpoint: String,
    pub store: Arc<MemoryChunkStore>,
    pub service: Arc<NodeService>,
}

/// Shared view of the cluster; clones see the same up/down state.
#[derive(Clone)]
pub struct Cluster {
    nodes: Arc<Vec<SimNode>>,
    down: Arc<Mutex<HashSet<Address>>>,
}

impl Cluster {
    pub fn new(count: usize) -> Self {
        let mut nodes: Vec<SimNode> = (0..count)
            .map(|i| {
                let store = Arc::new(MemoryChunkStore::new());
                SimNode {
                    address: SigningIdentity::generate().unwrap().address(),
                    endpoint: format!("node-{i}.test:53591"),
                    service: Arc::new(
                        NodeService::new(store.clone(), NodeMetrics::default())
                            .with_timeout(Duration::from_secs(5)),
                    ),
                    store,
                }
            })
            .collect();
        // Same order the engine walks them in
        nodes.sort_by_key(|n| n.address);
        Self {
            nodes: Arc::new(nodes),
            down: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn nodes(&self) -> &[SimNode] {
        &self.nodes
    }

    pub fn node(&self, address: &Address) -> &SimNode {
        self.nodes.iter().find(|n| n.address == *address).unwrap()
    }

    pub fn directory(&self) -> StaticDirectory {
        StaticDirectory::new(self.node_map())
    }

    pub fn node_map(&self) -> NodeMap {
        self.nodes
            .iter()
            .map(|n| (n.address, n.endpoint.clone()))
            .collect()
    }

    pub fn set_down(&self, address: Address) {
        self.down.lock().unwrap().insert(address);
    }

    pub fn set_up(&self, address: &Address) {
        self.down.lock().unwrap().remove(address);
    }

    pub fn total_records(&self) -> usize {
        self.nodes.iter().map(|n| n.store.len()).sum()
    }
}

#[async_trait]
impl NodeConnector for Cluster {
    async fn connect(
        &self,
        endpoint: &str,
        op: Operation,
        id: &ChunkId,
    ) -> DistorageResult<Box<dyn FrameChannel>> {
        let node = self
            .nodes
            .iter()
            .find(|n| n.endpoint == endpoint)
            .ok_or_else(|| DistorageError::ConnectionFailure(format!("{endpoint}: no route")))?;
        if self.down.lock().unwrap().contains(&node.address) {
            return Err(DistorageError::ConnectionFailure(format!(
                "{endpoint}: connection refused"
            )));
        }

        let (mut node_end, client_end) = MemoryChannel::pair();
        let service = node.service.clone();
        let raw_id = id.to_string();
        tokio::spawn(async move {
            service.serve(&mut node_end, op, &raw_id).await;
        });
        Ok(Box::new(client_end))
    }
}

pub fn settings(replication_count: usize, chunk_size: usize) -> EngineSettings {
    EngineSettings {
        replication_count,
        chunk_size,
        parallelism: 3,
        request_timeout: Duration::from_secs(5),
    }
}

pub fn engine(cluster: &Cluster, keys: ClientKeys, settings: EngineSettings) -> Engine<StaticDirectory, Cluster> {
    Engine::new(cluster.directory(), cluster.clone(), keys, settings)
}

/// Deterministic, non-repeating-looking content.
pub fn sample_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

pub struct Workspace {
    pub dir: tempfile::TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn write_file(&self, name: &str, data: &[u8]) -> std::path::PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    pub fn registry(&self) -> FileRegistry {
        FileRegistry::open(&self.registry_path()).unwrap()
    }

    pub fn registry_path(&self) -> std::path::PathBuf {
        self.dir.path().join("registry.json")
    }

    pub fn out_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("out")
    }
}
