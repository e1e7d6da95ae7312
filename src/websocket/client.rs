//! WebSocket client for the market channel
//!
//! Handles connection, subscription, and message reception.

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::protocol::Message,
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};

use crate::error::{FairbookError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Text keep-alive understood by the market channel
const PING: &str = "PING";

/// Subscription sent right after connecting
#[derive(Debug, Serialize)]
pub struct SubscribeRequest<'a> {
    #[serde(rename = "type")]
    pub channel: &'static str,
    pub assets_ids: &'a [String],
    pub custom_feature_enabled: bool,
}

impl<'a> SubscribeRequest<'a> {
    pub fn market(assets_ids: &'a [String], custom_feature_enabled: bool) -> Self {
        Self {
            channel: "market",
            assets_ids,
            custom_feature_enabled,
        }
    }
}

/// WebSocket client for a single connection
pub struct WebSocketClient {
    stream: Option<WsStream>,
    endpoint: String,
    asset_ids: Vec<String>,
    custom_feature_enabled: bool,
}

impl WebSocketClient {
    /// Create a new WebSocket client
    pub fn new(endpoint: &str, asset_ids: Vec<String>, custom_feature_enabled: bool) -> Self {
        Self {
            stream: None,
            endpoint: endpoint.to_string(),
            asset_ids,
            custom_feature_enabled,
        }
    }

    /// Connect to the market channel and subscribe to every asset
    pub async fn connect(&mut self) -> Result<()> {
        info!(url = %self.endpoint, assets = self.asset_ids.len(), "Connecting to market channel");

        let (mut ws_stream, response) = connect_async(&self.endpoint).await.map_err(|e| {
            FairbookError::WebSocketConnection(format!("Failed to connect: {}", e))
        })?;

        info!(status = ?response.status(), "WebSocket connected");

        let request = SubscribeRequest::market(&self.asset_ids, self.custom_feature_enabled);
        let payload = serde_json::to_string(&request)?;
        ws_stream
            .send(Message::Text(payload))
            .await
            .map_err(|e| FairbookError::WebSocketMessage(format!("Subscribe failed: {}", e)))?;

        debug!(assets = ?self.asset_ids, "Subscription sent");
        self.stream = Some(ws_stream);

        Ok(())
    }

    /// Receive the next message
    pub async fn recv(&mut self) -> Result<Option<String>> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| FairbookError::WebSocketConnection("Not connected".to_string()))?;

        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                debug!(len = text.len(), "Received text message");
                Ok(Some(text))
            }
            Some(Ok(Message::Binary(data))) => {
                let text = String::from_utf8_lossy(&data).to_string();
                Ok(Some(text))
            }
            Some(Ok(Message::Ping(data))) => {
                debug!("Received ping, sending pong");
                if let Some(stream) = self.stream.as_mut() {
                    let _ = stream.send(Message::Pong(data)).await;
                }
                Ok(None)
            }
            Some(Ok(Message::Pong(_))) => {
                debug!("Received pong");
                Ok(None)
            }
            Some(Ok(Message::Close(frame))) => {
                warn!(frame = ?frame, "Received close frame");
                self.stream = None;
                Err(FairbookError::WebSocketConnection(
                    "Connection closed".to_string(),
                ))
            }
            Some(Ok(Message::Frame(_))) => Ok(None),
            Some(Err(e)) => {
                error!(error = %e, "WebSocket error");
                self.stream = None;
                Err(FairbookError::WebSocketMessage(e.to_string()))
            }
            None => {
                warn!("WebSocket stream ended");
                self.stream = None;
                Err(FairbookError::WebSocketConnection(
                    "Stream ended".to_string(),
                ))
            }
        }
    }

    /// Send the text keep-alive; the server answers with "PONG"
    pub async fn ping(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.as_mut() {
            stream
                .send(Message::Text(PING.to_string()))
                .await
                .map_err(|e| FairbookError::WebSocketMessage(e.to_string()))?;
        }
        Ok(())
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Close the connection
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.close(None).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_payload() {
        let assets = vec!["111".to_string(), "222".to_string()];
        let payload =
            serde_json::to_value(SubscribeRequest::market(&assets, true)).unwrap();

        assert_eq!(
            payload,
            serde_json::json!({
                "type": "market",
                "assets_ids": ["111", "222"],
                "custom_feature_enabled": true
            })
        );
    }

    #[test]
    fn test_new_client_is_disconnected() {
        let client = WebSocketClient::new("wss://example.invalid/ws", vec![], false);
        assert!(!client.is_connected());
    }
}
