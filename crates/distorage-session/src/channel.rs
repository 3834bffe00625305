//! Message channel the preamble runs over
//!
//! One logical protocol step is one frame. Transports (axum on the node,
//! tungstenite on the client) adapt their socket types to [`FrameChannel`].

use async_trait::async_trait;
use tokio::sync::mpsc;

use distorage_core::{DistorageError, DistorageResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Binary(Vec<u8>),
    Text(String),
    Close,
}

#[async_trait]
pub trait FrameChannel: Send {
    async fn send(&mut self, frame: Frame) -> DistorageResult<()>;

    /// Next frame. A closed connection reads as [`Frame::Close`].
    async fn recv(&mut self) -> DistorageResult<Frame>;

    async fn send_binary(&mut self, data: Vec<u8>) -> DistorageResult<()> {
        self.send(Frame::Binary(data)).await
    }

    /// Next frame, which must be binary.
    async fn recv_binary(&mut self) -> DistorageResult<Vec<u8>> {
        match self.recv().await? {
            Frame::Binary(data) => Ok(data),
            Frame::Text(_) => Err(DistorageError::Protocol(
                "expected binary frame, got text".into(),
            )),
            Frame::Close => Err(DistorageError::Protocol(
                "connection closed while expecting a binary frame".into(),
            )),
        }
    }

    async fn close(&mut self) -> DistorageResult<()> {
        self.send(Frame::Close).await
    }
}

/// In-process channel, one end of a connected pair.
#[derive(Debug)]
pub struct MemoryChannel {
    tx: mpsc::UnboundedSender<Frame>,
    rx: mpsc::UnboundedReceiver<Frame>,
}

impl MemoryChannel {
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (
            Self { tx: a_tx, rx: a_rx },
            Self { tx: b_tx, rx: b_rx },
        )
    }
}

#[async_trait]
impl FrameChannel for MemoryChannel {
    async fn send(&mut self, frame: Frame) -> DistorageResult<()> {
        self.tx
            .send(frame)
            .map_err(|_| DistorageError::ConnectionFailure("peer went away".into()))
    }

    async fn recv(&mut self) -> DistorageResult<Frame> {
        Ok(self.rx.recv().await.unwrap_or(Frame::Close))
    }
}
