//! Store / fetch / delete handlers
//!
//! One call to [`NodeService::serve`] handles one connection:
//!   1. validate the chunk id (`01 90` on failure)
//!   2. fetch/delete: `01 94` if the chunk is absent, before any handshake
//!   3. preamble; a failed handshake closes without a response
//!   4. run the operation as the verified address and send one response frame

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::{debug, info, warn};

use distorage_core::{ChunkId, Operation, Status};
use distorage_crypto::Address;
use distorage_session::{accept, FrameChannel};

use crate::metrics::NodeMetrics;
use crate::store::{ChunkStore, RecordError};

/// How a connection ended, for metrics and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    BadIdentifier,
    NotFound,
    Forbidden,
    Internal,
    HandshakeFailed,
    TimedOut,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Ok => "ok",
            Outcome::BadIdentifier => "bad_identifier",
            Outcome::NotFound => "not_found",
            Outcome::Forbidden => "forbidden",
            Outcome::Internal => "internal",
            Outcome::HandshakeFailed => "handshake_failed",
            Outcome::TimedOut => "timed_out",
        }
    }
}

enum Response {
    Status(Status),
    Payload(Vec<u8>),
}

impl Response {
    fn outcome(&self) -> Outcome {
        match self {
            Response::Payload(_) => Outcome::Ok,
            Response::Status(Status::Stored | Status::Deleted) => Outcome::Ok,
            Response::Status(Status::BadIdentifier) => Outcome::BadIdentifier,
            Response::Status(Status::NotFound) => Outcome::NotFound,
            Response::Status(Status::Forbidden) => Outcome::Forbidden,
            Response::Status(Status::Internal) => Outcome::Internal,
        }
    }

    fn into_bytes(self) -> Vec<u8> {
        match self {
            Response::Status(s) => s.as_bytes().to_vec(),
            Response::Payload(p) => p,
        }
    }
}

/// Number of lock stripes serialising writes by chunk id
const WRITE_STRIPES: usize = 64;

/// Striped locks held across an ownership check and the write that follows,
/// so the first writer of a chunk keeps it.
struct WriteLocks(Vec<Mutex<()>>);

impl WriteLocks {
    fn new() -> Self {
        Self((0..WRITE_STRIPES).map(|_| Mutex::new(())).collect())
    }

    fn lock(&self, id: &ChunkId) -> MutexGuard<'_, ()> {
        let stripe = crc32fast::hash(id.as_str().as_bytes()) as usize % self.0.len();
        self.0[stripe]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct NodeService {
    store: Arc<dyn ChunkStore>,
    metrics: NodeMetrics,
    timeout: Duration,
    writes: Arc<WriteLocks>,
}

impl NodeService {
    pub fn new(store: Arc<dyn ChunkStore>, metrics: NodeMetrics) -> Self {
        Self {
            store,
            metrics,
            timeout: Duration::from_secs(30),
            writes: Arc::new(WriteLocks::new()),
        }
    }

    /// Bound on the whole exchange, handshake included.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn metrics(&self) -> &NodeMetrics {
        &self.metrics
    }

    /// Handle one connection for `op` on `raw_id`. Never panics on hostile
    /// input; the worst case is an early close.
    pub async fn serve<C>(&self, channel: &mut C, op: Operation, raw_id: &str) -> Outcome
    where
        C: FrameChannel + ?Sized,
    {
        let outcome = match tokio::time::timeout(self.timeout, self.exchange(channel, op, raw_id))
            .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(%op, chunk = %raw_id, timeout = ?self.timeout, "request timed out");
                Outcome::TimedOut
            }
        };
        let _ = channel.close().await;
        self.metrics.record(op, outcome);
        outcome
    }

    async fn exchange<C>(&self, channel: &mut C, op: Operation, raw_id: &str) -> Outcome
    where
        C: FrameChannel + ?Sized,
    {
        let id = match ChunkId::parse(raw_id) {
            Ok(id) => id,
            Err(e) => {
                debug!(%op, "rejecting request: {e}");
                return respond(channel, Response::Status(Status::BadIdentifier)).await;
            }
        };

        if op != Operation::Store && !self.store.exists(&id) {
            debug!(%op, chunk = %id, "chunk not present");
            return respond(channel, Response::Status(Status::NotFound)).await;
        }

        let request = match accept(channel).await {
            Ok(r) => r,
            Err(e) => {
                warn!(%op, chunk = %id, "handshake failed: {e}");
                return Outcome::HandshakeFailed;
            }
        };
        let peer = request.address;

        let response = self.execute(op, id.clone(), peer, request.payload.body).await;
        let outcome = respond(channel, response).await;
        info!(%op, chunk = %id, peer = %peer, outcome = outcome.as_str(), "request handled");
        outcome
    }

    async fn execute(&self, op: Operation, id: ChunkId, peer: Address, body: Vec<u8>) -> Response {
        let store = Arc::clone(&self.store);
        let writes = Arc::clone(&self.writes);
        let result = tokio::task::spawn_blocking(move || match op {
            Operation::Store => {
                let _guard = writes.lock(&id);
                if !store.can_be_stored(&id, &peer) {
                    return Response::Status(Status::Forbidden);
                }
                match store.store(&id, &peer, &body) {
                    Ok(()) => Response::Status(Status::Stored),
                    Err(e) => failure(op, &id, e),
                }
            }
            Operation::Fetch => match store.read(&id, &peer) {
                Ok(payload) => Response::Payload(payload),
                Err(e) => failure(op, &id, e),
            },
            Operation::Delete => {
                let _guard = writes.lock(&id);
                match store.delete(&id, &peer) {
                    Ok(()) => Response::Status(Status::Deleted),
                    Err(e) => failure(op, &id, e),
                }
            }
        })
        .await;

        result.unwrap_or_else(|e| {
            warn!(%op, "storage task failed: {e}");
            Response::Status(Status::Internal)
        })
    }
}

fn failure(op: Operation, id: &ChunkId, e: RecordError) -> Response {
    let status = match e {
        RecordError::AddressMismatch { .. } => Status::Forbidden,
        RecordError::Missing(_) => Status::NotFound,
        RecordError::TooShort(_)
        | RecordError::BadMagic
        | RecordError::ChecksumMismatch { .. }
        | RecordError::Io(_) => Status::Internal,
    };
    if status == Status::Internal {
        warn!(%op, chunk = %id, "storage failure: {e}");
    }
    Response::Status(status)
}

async fn respond<C>(channel: &mut C, response: Response) -> Outcome
where
    C: FrameChannel + ?Sized,
{
    let outcome = response.outcome();
    if let Err(e) = channel.send_binary(response.into_bytes()).await {
        debug!("response not delivered: {e}");
    }
    outcome
}
