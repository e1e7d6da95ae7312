//! WebSocket connection manager
//!
//! Handles reconnection logic and hands decoded events to the router.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::WebSocketClient;
use crate::config::Config;
use crate::error::{FairbookError, Result};
use crate::events::MarketEvent;
use crate::pipeline::EventRouter;

/// Maximum backoff delay in milliseconds (60 seconds)
const MAX_BACKOFF_MS: u64 = 60_000;
/// Cooldown period after which reconnect attempts are reset (5 minutes)
const RECONNECT_COOLDOWN_SECS: u64 = 300;
/// Silence after which the connection is considered stale
const STALE_AFTER_SECS: u64 = 45;

/// Exponential backoff for the given attempt, capped at [`MAX_BACKOFF_MS`]
pub fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let delay = base_ms.saturating_mul(2u64.pow(attempt.min(6)));
    Duration::from_millis(delay.min(MAX_BACKOFF_MS))
}

/// Manages the market channel connection with automatic reconnection
pub struct WebSocketManager {
    config: Arc<Config>,
    client: WebSocketClient,
    router: EventRouter,
    reconnect_attempts: u32,
    last_successful_connection: Option<Instant>,
}

impl WebSocketManager {
    /// Create a new WebSocket manager subscribed to every asset the router knows
    pub fn new(config: Arc<Config>, router: EventRouter) -> Self {
        let mut asset_ids = router.assets();
        asset_ids.sort();

        let client = WebSocketClient::new(
            &config.feed.ws_endpoint,
            asset_ids,
            config.feed.custom_feature_enabled,
        );

        Self {
            config,
            client,
            router,
            reconnect_attempts: 0,
            last_successful_connection: None,
        }
    }

    /// Run the WebSocket manager - runs indefinitely with automatic reconnection
    pub async fn run(&mut self) -> Result<()> {
        info!("Starting WebSocket manager with infinite retry");

        loop {
            if let Some(last_success) = self.last_successful_connection {
                if last_success.elapsed() > Duration::from_secs(RECONNECT_COOLDOWN_SECS)
                    && self.reconnect_attempts > 0
                {
                    info!(
                        previous_attempts = self.reconnect_attempts,
                        "Resetting reconnect counter after cooldown period"
                    );
                    self.reconnect_attempts = 0;
                }
            }

            match self.connect_and_process().await {
                Ok(()) => {
                    info!("WebSocket processing completed normally, reconnecting...");
                    sleep(Duration::from_secs(1)).await;
                }
                Err(FairbookError::ChannelClosed(asset_id)) => {
                    error!(asset_id = %asset_id, "Asset consumer gone, stopping ingestion");
                    return Err(FairbookError::ChannelClosed(asset_id));
                }
                Err(e) => {
                    error!(error = %e, "WebSocket error");
                    self.reconnect_attempts += 1;

                    let delay =
                        backoff_delay(self.config.feed.reconnect_delay_ms, self.reconnect_attempts);

                    warn!(
                        attempt = self.reconnect_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Reconnecting after error..."
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    /// Connect, subscribe and process messages until the connection fails
    async fn connect_and_process(&mut self) -> Result<()> {
        self.client.connect().await?;

        self.last_successful_connection = Some(Instant::now());
        self.reconnect_attempts = 0;
        info!("WebSocket connected successfully, resetting reconnect counter");

        let mut keepalive = interval(Duration::from_secs(self.config.feed.ping_interval_secs.max(1)));
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_message = Instant::now();

        loop {
            tokio::select! {
                received = self.client.recv() => {
                    match received? {
                        Some(text) => {
                            last_message = Instant::now();
                            self.process_message(&text).await?;
                        }
                        None => continue,
                    }
                }
                _ = keepalive.tick() => {
                    if last_message.elapsed() > Duration::from_secs(STALE_AFTER_SECS) {
                        warn!(
                            last_message_secs = last_message.elapsed().as_secs(),
                            "No message received within timeout, reconnecting"
                        );
                        self.client.close().await;
                        return Err(FairbookError::ConnectionTimeout);
                    }
                    if let Err(e) = self.client.ping().await {
                        warn!(error = %e, "Failed to send keepalive ping");
                        return Err(e);
                    }
                }
            }
        }
    }

    /// Decode one frame and route every event in it.
    ///
    /// Items are decoded one at a time, so one malformed item does not drop
    /// its neighbours. Only a dead consumer is reported back to the caller.
    async fn process_message(&mut self, raw: &str) -> Result<usize> {
        let items = match MarketEvent::split_frame(raw) {
            Ok(items) => items,
            Err(e) => {
                warn!(error = %e, "Failed to decode frame");
                return Ok(0);
            }
        };

        let mut routed = 0;
        for item in items {
            match MarketEvent::from_value(item) {
                Ok(event) => {
                    self.router.route(event).await?;
                    routed += 1;
                }
                Err(e) => warn!(error = %e, "Dropping undecodable event"),
            }
        }

        debug!(routed, "Frame processed");
        Ok(routed)
    }

    /// Close the connection and drain every asset consumer
    pub async fn shutdown(mut self) {
        self.client.close().await;
        self.router.shutdown().await;
    }
}
