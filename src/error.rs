//! Error types for the fair value pipeline

use rust_decimal::Decimal;
use thiserror::Error;

/// Pipeline and boundary errors
#[derive(Error, Debug)]
pub enum FairbookError {
    #[error("Price {price} is not aligned to tick size {tick_size}")]
    Alignment { price: Decimal, tick_size: Decimal },

    #[error("Invalid tick size: {0}")]
    InvalidTickSize(Decimal),

    #[error("Malformed {event_type} event: {reason}")]
    MalformedEvent { event_type: String, reason: String },

    #[error("Failed to parse message: {0}")]
    ParseError(String),

    #[error("WebSocket connection error: {0}")]
    WebSocketConnection(String),

    #[error("WebSocket message error: {0}")]
    WebSocketMessage(String),

    #[error("Market discovery error: {0}")]
    Discovery(String),

    #[error("IPC error: {0}")]
    IpcError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Metrics error: {0}")]
    Metrics(String),

    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    #[error("Connection timeout")]
    ConnectionTimeout,
}

impl FairbookError {
    pub fn malformed(event_type: &str, reason: impl Into<String>) -> Self {
        FairbookError::MalformedEvent {
            event_type: event_type.to_string(),
            reason: reason.into(),
        }
    }

    /// Short label used for failure counters
    pub fn reason(&self) -> &'static str {
        match self {
            FairbookError::Alignment { .. } => "alignment",
            FairbookError::InvalidTickSize(_) => "invalid_tick_size",
            FairbookError::MalformedEvent { .. } => "malformed",
            FairbookError::ParseError(_) => "parse",
            FairbookError::WebSocketConnection(_) | FairbookError::WebSocketMessage(_) => {
                "websocket"
            }
            FairbookError::Discovery(_) => "discovery",
            FairbookError::IpcError(_) => "ipc",
            FairbookError::ConfigError(_) => "config",
            FairbookError::SerializationError(_) => "serialization",
            FairbookError::Metrics(_) => "metrics",
            FairbookError::ChannelClosed(_) => "channel_closed",
            FairbookError::ConnectionTimeout => "timeout",
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for FairbookError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        FairbookError::WebSocketConnection(err.to_string())
    }
}

impl From<serde_json::Error> for FairbookError {
    fn from(err: serde_json::Error) -> Self {
        FairbookError::ParseError(err.to_string())
    }
}

impl From<reqwest::Error> for FairbookError {
    fn from(err: reqwest::Error) -> Self {
        FairbookError::Discovery(err.to_string())
    }
}

impl From<std::io::Error> for FairbookError {
    fn from(err: std::io::Error) -> Self {
        FairbookError::IpcError(err.to_string())
    }
}

impl From<config::ConfigError> for FairbookError {
    fn from(err: config::ConfigError) -> Self {
        FairbookError::ConfigError(err.to_string())
    }
}

impl From<prometheus::Error> for FairbookError {
    fn from(err: prometheus::Error) -> Self {
        FairbookError::Metrics(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FairbookError>;
