//! One request to one node: dial, preamble, single response

use std::time::Duration;

use tracing::debug;

use distorage_core::{ChunkId, DistorageError, DistorageResult, Operation, Status};
use distorage_crypto::{hash, SigningIdentity};
use distorage_session::{initiate, FrameChannel, Opening};

use crate::connector::NodeConnector;

/// Store, fetch, and delete against a single node, each bounded by `timeout`.
/// A timeout is reported as a connection failure.
pub struct NodeClient<C> {
    connector: C,
    identity: SigningIdentity,
    timeout: Duration,
}

impl<C: NodeConnector> NodeClient<C> {
    pub fn new(connector: C, identity: SigningIdentity, timeout: Duration) -> Self {
        Self {
            connector,
            identity,
            timeout,
        }
    }

    pub async fn store_chunk(&self, endpoint: &str, id: &ChunkId, data: &[u8]) -> DistorageResult<()> {
        let response = self
            .exchange(endpoint, Operation::Store, id, data.to_vec())
            .await?;
        expect_status(&response, Status::Stored, id)
    }

    /// Fetched bytes are accepted only if they hash to `id`.
    pub async fn fetch_chunk(&self, endpoint: &str, id: &ChunkId) -> DistorageResult<Vec<u8>> {
        let response = self.exchange(endpoint, Operation::Fetch, id, Vec::new()).await?;
        if ChunkId::from_digest(&hash(&response)) == *id {
            return Ok(response);
        }
        if let Some(err) = Status::from_bytes(&response).and_then(|s| s.into_error(id)) {
            return Err(err);
        }
        Err(DistorageError::Integrity(format!(
            "chunk {id} from {endpoint} does not match its hash"
        )))
    }

    pub async fn delete_chunk(&self, endpoint: &str, id: &ChunkId) -> DistorageResult<()> {
        let response = self
            .exchange(endpoint, Operation::Delete, id, Vec::new())
            .await?;
        expect_status(&response, Status::Deleted, id)
    }

    async fn exchange(
        &self,
        endpoint: &str,
        op: Operation,
        id: &ChunkId,
        body: Vec<u8>,
    ) -> DistorageResult<Vec<u8>> {
        let attempt = async {
            let mut channel = self.connector.connect(endpoint, op, id).await?;
            let result = self.converse(channel.as_mut(), id, body).await;
            let _ = channel.close().await;
            result
        };
        match tokio::time::timeout(self.timeout, attempt).await {
            Ok(result) => {
                if let Err(e) = &result {
                    debug!(%op, chunk = %id, node = %endpoint, "request failed: {e}");
                }
                result
            }
            Err(_) => Err(DistorageError::ConnectionFailure(format!(
                "{op} {id} on {endpoint} timed out after {:?}",
                self.timeout
            ))),
        }
    }

    async fn converse(
        &self,
        channel: &mut dyn FrameChannel,
        id: &ChunkId,
        body: Vec<u8>,
    ) -> DistorageResult<Vec<u8>> {
        match initiate(channel, &self.identity, body).await? {
            Opening::Established(_) => channel.recv_binary().await,
            Opening::Refused(status) => Err(status.into_error(id).unwrap_or_else(|| {
                DistorageError::Protocol(format!("node answered {status:?} before handshake"))
            })),
        }
    }
}

fn expect_status(response: &[u8], expected: Status, id: &ChunkId) -> DistorageResult<()> {
    match Status::from_bytes(response) {
        Some(status) if status == expected => Ok(()),
        Some(status) => Err(status.into_error(id).unwrap_or_else(|| {
            DistorageError::Protocol(format!("expected {expected:?}, node answered {status:?}"))
        })),
        None => Err(DistorageError::Protocol(format!(
            "unrecognised response of {} bytes",
            response.len()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> ChunkId {
        ChunkId::from_digest(&hash(b"c"))
    }

    #[test]
    fn test_expect_status() {
        assert!(expect_status(&[0xc8], Status::Stored, &id()).is_ok());
        assert!(matches!(
            expect_status(&[0x01, 0x93], Status::Stored, &id()),
            Err(DistorageError::NotAuthorized(_))
        ));
        assert!(matches!(
            expect_status(&[0xcc], Status::Stored, &id()),
            Err(DistorageError::Protocol(_))
        ));
        assert!(matches!(
            expect_status(b"garbage", Status::Deleted, &id()),
            Err(DistorageError::Protocol(_))
        ));
    }
}
