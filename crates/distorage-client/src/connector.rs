//! Dialing storage nodes

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{self, Message},
    MaybeTlsStream, WebSocketStream,
};

use distorage_core::{ChunkId, DistorageError, DistorageResult, Operation};
use distorage_session::{Frame, FrameChannel};

/// Opens one connection per (operation, chunk) to a node endpoint.
#[async_trait]
pub trait NodeConnector: Send + Sync {
    async fn connect(
        &self,
        endpoint: &str,
        op: Operation,
        id: &ChunkId,
    ) -> DistorageResult<Box<dyn FrameChannel>>;
}

/// `ws://{endpoint}/{store|get|delete}/{chunk_id}`
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

#[async_trait]
impl NodeConnector for WsConnector {
    async fn connect(
        &self,
        endpoint: &str,
        op: Operation,
        id: &ChunkId,
    ) -> DistorageResult<Box<dyn FrameChannel>> {
        let url = format!("ws://{endpoint}/{}/{id}", op.path_segment());
        let (ws, _) = connect_async(url.as_str())
            .await
            .map_err(|e| DistorageError::ConnectionFailure(format!("{url}: {e}")))?;
        Ok(Box::new(TungsteniteChannel(ws)))
    }
}

/// Frame channel over a client-side tungstenite stream.
pub struct TungsteniteChannel(pub WebSocketStream<MaybeTlsStream<TcpStream>>);

fn connection_error(e: tungstenite::Error) -> DistorageError {
    DistorageError::ConnectionFailure(format!("websocket: {e}"))
}

#[async_trait]
impl FrameChannel for TungsteniteChannel {
    async fn send(&mut self, frame: Frame) -> DistorageResult<()> {
        match frame {
            Frame::Binary(data) => self.0.send(Message::binary(data)).await,
            Frame::Text(text) => self.0.send(Message::text(text)).await,
            Frame::Close => self.0.close(None).await,
        }
        .map_err(connection_error)
    }

    async fn recv(&mut self) -> DistorageResult<Frame> {
        loop {
            match self.0.next().await {
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                None | Some(Ok(Message::Close(_))) => return Ok(Frame::Close),
                Some(Ok(Message::Binary(data))) => return Ok(Frame::Binary(data.to_vec())),
                Some(Ok(Message::Text(text))) => return Ok(Frame::Text(text.as_str().to_owned())),
                Some(Err(tungstenite::Error::ConnectionClosed)) => return Ok(Frame::Close),
                Some(Err(e)) => return Err(connection_error(e)),
            }
        }
    }
}
