//! Publisher module for IPC communication
//!
//! Publishes desired quotes to the execution side over a Unix socket. Each
//! frame is a big-endian u32 length followed by a MessagePack body.

use bytes::{BufMut, Bytes, BytesMut};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{FairbookError, Result};
use crate::pipeline::QuoteUpdate;

/// Upper bound on writing one frame before the connection is dropped
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_millis(500);

/// Publisher for sending quote updates via Unix socket
pub struct Publisher {
    socket_path: String,
    write_timeout: Duration,
    stream: Mutex<Option<UnixStream>>,
}

impl Publisher {
    /// Create a new publisher
    pub async fn new(socket_path: &str) -> Result<Self> {
        Self::with_write_timeout(socket_path, DEFAULT_WRITE_TIMEOUT).await
    }

    /// Create a publisher that gives up on a frame after `write_timeout`
    pub async fn with_write_timeout(socket_path: &str, write_timeout: Duration) -> Result<Self> {
        let publisher = Self {
            socket_path: socket_path.to_string(),
            write_timeout,
            stream: Mutex::new(None),
        };

        // The execution side may not be listening yet
        if let Err(e) = publisher.connect().await {
            warn!(error = %e, "Initial IPC connection failed, will retry on publish");
        }

        Ok(publisher)
    }

    /// Connect to the Unix socket
    async fn connect(&self) -> Result<()> {
        let path = Path::new(&self.socket_path);

        if !path.exists() {
            return Err(FairbookError::IpcError(format!(
                "Socket path does not exist: {}",
                self.socket_path
            )));
        }

        let stream = UnixStream::connect(path).await.map_err(|e| {
            FairbookError::IpcError(format!("Failed to connect to {}: {}", self.socket_path, e))
        })?;

        let mut guard = self.stream.lock().await;
        *guard = Some(stream);

        info!(path = %self.socket_path, "Connected to IPC socket");
        Ok(())
    }

    /// Length-prefixed MessagePack frame for one update
    pub fn encode(update: &QuoteUpdate) -> Result<Bytes> {
        let data = rmp_serde::to_vec_named(update).map_err(|e| {
            FairbookError::SerializationError(format!("Failed to serialize: {}", e))
        })?;

        let mut frame = BytesMut::with_capacity(4 + data.len());
        frame.put_u32(data.len() as u32);
        frame.extend_from_slice(&data);
        Ok(frame.freeze())
    }

    /// Publish a quote update; delivery failures are logged, never returned
    pub async fn publish(&self, update: &QuoteUpdate) -> Result<()> {
        let message = Self::encode(update)?;

        let mut guard = self.stream.lock().await;

        if guard.is_none() {
            drop(guard);
            if let Err(e) = self.connect().await {
                debug!(error = %e, "Failed to reconnect to IPC socket");
                return Ok(());
            }
            guard = self.stream.lock().await;
        }

        if let Some(stream) = guard.as_mut() {
            match timeout(self.write_timeout, stream.write_all(&message)).await {
                Ok(Ok(())) => {
                    debug!(
                        asset_id = %update.asset_id,
                        bid = %update.quote.bid,
                        ask = %update.quote.ask,
                        "Published quote"
                    );
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "Failed to write to IPC socket");
                    *guard = None;
                }
                Err(_) => {
                    // A partial frame may be on the wire, so the stream is unusable
                    warn!(
                        timeout_ms = self.write_timeout.as_millis() as u64,
                        "IPC reader not draining, dropping connection"
                    );
                    *guard = None;
                }
            }
        }

        Ok(())
    }

    /// Drain the quote channel until every consumer has hung up
    pub async fn run(&self, mut quotes: mpsc::Receiver<QuoteUpdate>) {
        while let Some(update) = quotes.recv().await {
            info!(
                asset_id = %update.asset_id,
                bid = %update.quote.bid,
                ask = %update.quote.ask,
                size = %update.quote.size,
                p_fair = update.quote.p_fair,
                ts_ms = update.quote.ts_ms,
                "Desired quote"
            );
            if let Err(e) = self.publish(&update).await {
                warn!(error = %e, "Failed to publish quote");
            }
        }
        info!("Quote channel closed, publisher stopping");
    }
}
