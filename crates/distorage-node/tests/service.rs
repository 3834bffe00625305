//! Node handlers driven through the real preamble over an in-memory channel.

use std::sync::Arc;
use std::time::Duration;

use distorage_core::{ChunkId, Operation, Status};
use distorage_crypto::{hash, SigningIdentity};
use distorage_node::store::encode_record;
use distorage_node::{ChunkStore, MemoryChunkStore, NodeMetrics, NodeService, Outcome};
use distorage_session::{initiate, FrameChannel, MemoryChannel, Opening};

struct Harness {
    store: Arc<MemoryChunkStore>,
    service: Arc<NodeService>,
}

impl Harness {
    fn new() -> Self {
        let store = Arc::new(MemoryChunkStore::new());
        let service = Arc::new(NodeService::new(store.clone(), NodeMetrics::default()));
        Self { store, service }
    }

    async fn request(
        &self,
        identity: &SigningIdentity,
        op: Operation,
        id: &str,
        body: &[u8],
    ) -> (Option<Vec<u8>>, Outcome) {
        request(&self.service, identity, op, id, body).await
    }
}

/// Run one request; returns the node's response frame (or `None` if the node
/// closed without answering) and the outcome.
async fn request(
    service: &Arc<NodeService>,
    identity: &SigningIdentity,
    op: Operation,
    id: &str,
    body: &[u8],
) -> (Option<Vec<u8>>, Outcome) {
    let (mut node_end, mut client_end) = MemoryChannel::pair();
    let service = service.clone();
    let id = id.to_string();
    let node = tokio::spawn(async move { service.serve(&mut node_end, op, &id).await });

    let response = match initiate(&mut client_end, identity, body.to_vec()).await {
        Ok(Opening::Refused(status)) => Some(status.as_bytes().to_vec()),
        Ok(Opening::Established(_)) => client_end.recv_binary().await.ok(),
        Err(_) => None,
    };
    (response, node.await.unwrap())
}

/// Memory store whose reads lag, widening the gap between an ownership check
/// and the write after it.
struct SlowStore {
    inner: MemoryChunkStore,
    delay: Duration,
}

impl ChunkStore for SlowStore {
    fn load(&self, id: &ChunkId) -> std::io::Result<Option<Vec<u8>>> {
        let record = self.inner.load(id);
        std::thread::sleep(self.delay);
        record
    }

    fn save(&self, id: &ChunkId, record: &[u8]) -> std::io::Result<()> {
        self.inner.save(id, record)
    }

    fn remove(&self, id: &ChunkId) -> std::io::Result<bool> {
        self.inner.remove(id)
    }

    fn exists(&self, id: &ChunkId) -> bool {
        self.inner.exists(id)
    }
}

fn chunk_id(data: &[u8]) -> String {
    ChunkId::from_digest(&hash(data)).to_string()
}

#[tokio::test]
async fn test_store_fetch_delete_cycle() {
    let h = Harness::new();
    let owner = SigningIdentity::generate().unwrap();
    let id = chunk_id(b"ciphertext");

    let (resp, outcome) = h.request(&owner, Operation::Store, &id, b"ciphertext").await;
    assert_eq!(resp.as_deref(), Some(Status::Stored.as_bytes()));
    assert_eq!(outcome, Outcome::Ok);

    let (resp, _) = h.request(&owner, Operation::Fetch, &id, b"").await;
    assert_eq!(resp.as_deref(), Some(&b"ciphertext"[..]));

    let (resp, _) = h.request(&owner, Operation::Delete, &id, b"").await;
    assert_eq!(resp.as_deref(), Some(Status::Deleted.as_bytes()));
    assert!(h.store.is_empty());

    assert_eq!(
        h.service.metrics().requests(Operation::Store, Outcome::Ok),
        1
    );
}

#[tokio::test]
async fn test_owner_may_restore_but_others_may_not() {
    let h = Harness::new();
    let owner = SigningIdentity::generate().unwrap();
    let intruder = SigningIdentity::generate().unwrap();
    let id = chunk_id(b"v1");

    h.request(&owner, Operation::Store, &id, b"v1").await;

    let (resp, outcome) = h.request(&intruder, Operation::Store, &id, b"evil").await;
    assert_eq!(resp.as_deref(), Some(Status::Forbidden.as_bytes()));
    assert_eq!(outcome, Outcome::Forbidden);

    let (resp, _) = h.request(&owner, Operation::Store, &id, b"v1").await;
    assert_eq!(resp.as_deref(), Some(Status::Stored.as_bytes()));

    let (resp, _) = h.request(&owner, Operation::Fetch, &id, b"").await;
    assert_eq!(resp.as_deref(), Some(&b"v1"[..]));
}

#[tokio::test]
async fn test_non_owner_cannot_fetch_or_delete() {
    let h = Harness::new();
    let owner = SigningIdentity::generate().unwrap();
    let intruder = SigningIdentity::generate().unwrap();
    let id = chunk_id(b"secret");
    h.request(&owner, Operation::Store, &id, b"secret").await;

    let (resp, _) = h.request(&intruder, Operation::Fetch, &id, b"").await;
    assert_eq!(resp.as_deref(), Some(Status::Forbidden.as_bytes()));

    let (resp, _) = h.request(&intruder, Operation::Delete, &id, b"").await;
    assert_eq!(resp.as_deref(), Some(Status::Forbidden.as_bytes()));
    assert_eq!(h.store.len(), 1);
}

#[tokio::test]
async fn test_bad_identifier_rejected_before_handshake() {
    let h = Harness::new();
    let owner = SigningIdentity::generate().unwrap();

    let ids = vec!["../../etc/passwd".to_string(), "abcd".to_string(), "a".repeat(32)];
    for id in &ids {
        let (resp, outcome) = h.request(&owner, Operation::Store, id, b"x").await;
        assert_eq!(resp.as_deref(), Some(Status::BadIdentifier.as_bytes()));
        assert_eq!(outcome, Outcome::BadIdentifier);
    }
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn test_missing_chunk_is_not_found() {
    let h = Harness::new();
    let owner = SigningIdentity::generate().unwrap();
    let id = chunk_id(b"never stored");

    let (resp, outcome) = h.request(&owner, Operation::Fetch, &id, b"").await;
    assert_eq!(resp.as_deref(), Some(Status::NotFound.as_bytes()));
    assert_eq!(outcome, Outcome::NotFound);

    let (resp, _) = h.request(&owner, Operation::Delete, &id, b"").await;
    assert_eq!(resp.as_deref(), Some(Status::NotFound.as_bytes()));
}

#[tokio::test]
async fn test_corrupt_record_is_internal_error() {
    let h = Harness::new();
    let owner = SigningIdentity::generate().unwrap();
    let id = ChunkId::from_digest(&hash(b"data"));

    let mut record = encode_record(&owner.address(), b"data");
    let last = record.len() - 1;
    record[last] ^= 0x01;
    h.store.save(&id, &record).unwrap();

    let (resp, outcome) = h.request(&owner, Operation::Fetch, id.as_str(), b"").await;
    assert_eq!(resp.as_deref(), Some(Status::Internal.as_bytes()));
    assert_eq!(outcome, Outcome::Internal);

    // Unverifiable records are not overwritable, even by their owner
    let (resp, _) = h.request(&owner, Operation::Store, id.as_str(), b"data").await;
    assert_eq!(resp.as_deref(), Some(Status::Forbidden.as_bytes()));
}

#[tokio::test]
async fn test_silent_client_times_out() {
    let store = Arc::new(MemoryChunkStore::new());
    let service = NodeService::new(store, NodeMetrics::default())
        .with_timeout(Duration::from_millis(50));
    let (mut node_end, _client_end) = MemoryChannel::pair();

    let outcome = service
        .serve(&mut node_end, Operation::Store, &chunk_id(b"x"))
        .await;
    assert_eq!(outcome, Outcome::TimedOut);
}

#[tokio::test]
async fn test_failed_handshake_gets_no_response() {
    let h = Harness::new();
    let (mut node_end, mut client_end) = MemoryChannel::pair();
    let service = h.service.clone();
    let id = chunk_id(b"y");
    let node = tokio::spawn(async move { service.serve(&mut node_end, Operation::Store, &id).await });

    client_end.recv_binary().await.unwrap();
    client_end.send_binary(b"not a key".to_vec()).await.unwrap();
    client_end.send_binary(b"not a key".to_vec()).await.unwrap();

    assert_eq!(node.await.unwrap(), Outcome::HandshakeFailed);
    assert!(client_end.recv_binary().await.is_err());
    assert!(h.store.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_stores_first_owner_wins() {
    let store = Arc::new(SlowStore {
        inner: MemoryChunkStore::new(),
        delay: Duration::from_millis(300),
    });
    let service = Arc::new(NodeService::new(store.clone(), NodeMetrics::default()));
    let alice = SigningIdentity::generate().unwrap();
    let bob = SigningIdentity::generate().unwrap();
    let id = chunk_id(b"contested");

    let ((a_resp, _), (b_resp, _)) = tokio::join!(
        request(&service, &alice, Operation::Store, &id, b"contested"),
        request(&service, &bob, Operation::Store, &id, b"contested"),
    );

    let stored = Some(Status::Stored.as_bytes().to_vec());
    let forbidden = Some(Status::Forbidden.as_bytes().to_vec());
    let (winner, loser) = if a_resp == stored {
        assert_eq!(b_resp, forbidden);
        (&alice, &bob)
    } else {
        assert_eq!(a_resp, forbidden);
        assert_eq!(b_resp, stored);
        (&bob, &alice)
    };

    let (resp, _) = request(&service, winner, Operation::Fetch, &id, b"").await;
    assert_eq!(resp.as_deref(), Some(&b"contested"[..]));
    let (resp, _) = request(&service, loser, Operation::Fetch, &id, b"").await;
    assert_eq!(resp, forbidden);
}
