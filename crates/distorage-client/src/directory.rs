//! Directory service client
//!
//! `GET http://{directory}/nodes` returns `{ "<40-hex address>": "<host>" }`.
//! Snapshots are taken once per client operation and never cached.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use distorage_core::{DistorageError, DistorageResult};
use distorage_crypto::Address;

/// Available nodes by address, each with a dialable `host:port`.
pub type NodeMap = BTreeMap<Address, String>;

#[async_trait]
pub trait Directory: Send + Sync {
    async fn list_nodes(&self) -> DistorageResult<NodeMap>;
}

pub struct HttpDirectory {
    client: reqwest::Client,
    url: String,
    node_port: u16,
}

impl HttpDirectory {
    pub fn new(directory_url: &str, node_port: u16, timeout: Duration) -> DistorageResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DistorageError::Directory(format!("building HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: format!("http://{directory_url}/nodes"),
            node_port,
        })
    }
}

#[async_trait]
impl Directory for HttpDirectory {
    async fn list_nodes(&self) -> DistorageResult<NodeMap> {
        let raw: HashMap<String, String> = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| DistorageError::Directory(format!("GET {}: {e}", self.url)))?
            .json()
            .await
            .map_err(|e| DistorageError::Directory(format!("decoding node list: {e}")))?;

        let nodes = parse_node_list(raw, self.node_port);
        debug!(count = nodes.len(), "directory snapshot");
        Ok(nodes)
    }
}

/// Fixed node set
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    nodes: NodeMap,
}

impl StaticDirectory {
    pub fn new(nodes: NodeMap) -> Self {
        Self { nodes }
    }
}

#[async_trait]
impl Directory for StaticDirectory {
    async fn list_nodes(&self) -> DistorageResult<NodeMap> {
        Ok(self.nodes.clone())
    }
}

fn parse_node_list(raw: HashMap<String, String>, node_port: u16) -> NodeMap {
    raw.into_iter()
        .filter_map(|(addr, host)| match addr.parse::<Address>() {
            Ok(address) => Some((address, with_default_port(&host, node_port))),
            Err(e) => {
                warn!(entry = %addr, "ignoring directory entry: {e}");
                None
            }
        })
        .collect()
}

/// Append `:port` unless `host` already names one.
pub fn with_default_port(host: &str, port: u16) -> String {
    if let Some(rest) = host.strip_prefix('[') {
        // [v6] or [v6]:port
        return match rest.split_once(']') {
            Some((_, tail)) if tail.starts_with(':') => host.to_string(),
            _ => format!("{host}:{port}"),
        };
    }
    match host.matches(':').count() {
        0 => format!("{host}:{port}"),
        1 => host.to_string(),
        _ => format!("[{host}]:{port}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use distorage_crypto::derive_address;

    #[test]
    fn test_default_port() {
        assert_eq!(with_default_port("10.0.0.5", 53591), "10.0.0.5:53591");
        assert_eq!(with_default_port("node.local:6000", 53591), "node.local:6000");
        assert_eq!(with_default_port("::1", 53591), "[::1]:53591");
        assert_eq!(with_default_port("[::1]", 53591), "[::1]:53591");
        assert_eq!(with_default_port("[::1]:7000", 53591), "[::1]:7000");
    }

    #[test]
    fn test_parse_skips_bad_addresses() {
        let good = derive_address(b"node");
        let mut raw = HashMap::new();
        raw.insert(good.to_hex(), "10.0.0.1".to_string());
        raw.insert("zz".to_string(), "10.0.0.2".to_string());

        let nodes = parse_node_list(raw, 53591);
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[&good], "10.0.0.1:53591");
    }

    #[tokio::test]
    async fn test_static_directory() {
        let mut nodes = NodeMap::new();
        nodes.insert(derive_address(b"a"), "127.0.0.1:1".into());
        let dir = StaticDirectory::new(nodes.clone());
        assert_eq!(dir.list_nodes().await.unwrap(), nodes);
    }
}
