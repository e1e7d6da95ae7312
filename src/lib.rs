//! Fairbook - fair value quoting for binary-outcome markets
//!
//! This crate maintains a tick-quantized order book per outcome token,
//! filters a fair probability from its microstructure in logit space, and
//! turns that into a desired two-sided quote.

use std::sync::Arc;

pub mod config;
pub mod controller;
pub mod discovery;
pub mod error;
pub mod events;
pub mod fair_value;
pub mod orderbook;
pub mod pipeline;
pub mod publisher;
pub mod telemetry;
pub mod websocket;

pub use config::Config;
pub use controller::{DesiredQuote, QuoteController, RequotePolicy};
pub use error::{FairbookError, Result};
pub use events::{MarketEvent, Outcome};
pub use fair_value::{FairValueEngine, FairValueSnapshot, MicroFeatures};
pub use orderbook::{BookSummary, OrderBook};
pub use pipeline::{EventRouter, QuoteUpdate};
pub use publisher::Publisher;
pub use telemetry::Telemetry;
pub use websocket::WebSocketManager;

/// Application state shared with the health server and the quote sink
pub struct AppState {
    pub config: Arc<Config>,
    pub telemetry: Arc<Telemetry>,
    pub publisher: Arc<Publisher>,
}
