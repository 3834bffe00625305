//! WebSocket front end: `/store/{id}`, `/get/{id}`, `/delete/{id}`

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use distorage_core::{DistorageError, DistorageResult, Operation};
use distorage_session::{Frame, FrameChannel};

use crate::service::NodeService;

/// Frame channel over an accepted axum WebSocket.
pub struct AxumChannel(pub WebSocket);

#[async_trait]
impl FrameChannel for AxumChannel {
    async fn send(&mut self, frame: Frame) -> DistorageResult<()> {
        let message = match frame {
            Frame::Binary(data) => Message::Binary(data.into()),
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Close => Message::Close(None),
        };
        self.0
            .send(message)
            .await
            .map_err(|e| DistorageError::ConnectionFailure(format!("websocket send: {e}")))
    }

    async fn recv(&mut self) -> DistorageResult<Frame> {
        loop {
            match self.0.recv().await {
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                None | Some(Ok(Message::Close(_))) => return Ok(Frame::Close),
                Some(Ok(Message::Binary(data))) => return Ok(Frame::Binary(data.to_vec())),
                Some(Ok(Message::Text(text))) => {
                    return Ok(Frame::Text(text.as_str().to_owned()))
                }
                Some(Err(e)) => {
                    return Err(DistorageError::ConnectionFailure(format!(
                        "websocket recv: {e}"
                    )))
                }
            }
        }
    }
}

pub fn router(service: Arc<NodeService>) -> Router {
    Router::new()
        .route("/store/{id}", get(store_handler))
        .route("/get/{id}", get(fetch_handler))
        .route("/delete/{id}", get(delete_handler))
        .with_state(service)
}

async fn store_handler(
    ws: WebSocketUpgrade,
    Path(id): Path<String>,
    State(service): State<Arc<NodeService>>,
) -> Response {
    upgrade(ws, service, Operation::Store, id)
}

async fn fetch_handler(
    ws: WebSocketUpgrade,
    Path(id): Path<String>,
    State(service): State<Arc<NodeService>>,
) -> Response {
    upgrade(ws, service, Operation::Fetch, id)
}

async fn delete_handler(
    ws: WebSocketUpgrade,
    Path(id): Path<String>,
    State(service): State<Arc<NodeService>>,
) -> Response {
    upgrade(ws, service, Operation::Delete, id)
}

fn upgrade(ws: WebSocketUpgrade, service: Arc<NodeService>, op: Operation, id: String) -> Response {
    ws.on_upgrade(move |socket| async move {
        let _guard = service.metrics().connection();
        let mut channel = AxumChannel(socket);
        service.serve(&mut channel, op, &id).await;
    })
}

/// Serve until `shutdown` is cancelled, then drain in-flight connections.
pub async fn serve(
    listener: TcpListener,
    service: Arc<NodeService>,
    shutdown: CancellationToken,
) -> Result<()> {
    let addr = listener.local_addr()?;
    info!(addr = %addr, "node: listening on /store, /get, /delete");

    axum::serve(listener, router(service))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|e| anyhow::anyhow!("node server: {e}"))
}
