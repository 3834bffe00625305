//! Directory registration
//!
//! The node holds one WebSocket open to `ws://{directory}/connect` and sends
//! its 20-byte address as the first binary frame. The directory lists the
//! node for as long as that connection lives, so a dropped connection is
//! re-established after a fixed backoff.

use std::time::Duration;

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use distorage_crypto::Address;

pub struct Announcer {
    url: String,
    address: Address,
    retry: Duration,
}

enum Ended {
    Shutdown,
    Dropped,
}

impl Announcer {
    pub fn new(directory_url: &str, address: Address, retry: Duration) -> Self {
        Self {
            url: format!("ws://{directory_url}/connect"),
            address,
            retry,
        }
    }

    /// Keep the registration alive until `shutdown` fires. On shutdown the
    /// connection is closed with a Close frame.
    pub async fn run(self, shutdown: CancellationToken) {
        loop {
            match self.session(&shutdown).await {
                Ok(Ended::Shutdown) => {
                    info!("directory connection closed");
                    return;
                }
                Ok(Ended::Dropped) => warn!(directory = %self.url, "directory connection dropped"),
                Err(e) => warn!(directory = %self.url, "directory announce failed: {e:#}"),
            }

            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(self.retry) => {}
            }
        }
    }

    async fn session(&self, shutdown: &CancellationToken) -> Result<Ended> {
        let (mut ws, _) = connect_async(self.url.as_str())
            .await
            .with_context(|| format!("connecting to {}", self.url))?;
        ws.send(Message::binary(self.address.as_bytes().to_vec()))
            .await
            .context("sending address")?;
        info!(directory = %self.url, address = %self.address, "announced to directory");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    let _ = ws.close(None).await;
                    return Ok(Ended::Shutdown);
                }
                msg = ws.next() => match msg {
                    None | Some(Ok(Message::Close(_))) => return Ok(Ended::Dropped),
                    // tungstenite queues the pong for us
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e).context("directory connection"),
                },
            }
        }
    }
}
