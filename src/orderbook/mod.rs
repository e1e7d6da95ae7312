//! Order book module
//!
//! Maintains tick-quantized order book state for one outcome token from the
//! market channel events.

mod book;
pub mod tick;

pub use book::OrderBook;
pub use tick::Tick;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::events::{EventKind, Side};

/// Side of the order book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookSide {
    Bid,
    Ask,
}

impl From<Side> for BookSide {
    fn from(side: Side) -> Self {
        match side {
            Side::Buy => BookSide::Bid,
            Side::Sell => BookSide::Ask,
        }
    }
}

/// A single level in the order book
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Level {
    pub price: Decimal,
    pub size: Decimal,
}

/// Read-only view of a book for logs and publishing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookSummary {
    pub asset_id: String,
    pub update_seq: u64,
    pub last_event: Option<EventKind>,
    pub tick_size: Decimal,
    pub bid_levels: usize,
    pub ask_levels: usize,
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
    pub ts_ms: Option<u64>,
    pub book_hash: Option<String>,
    pub last_trade_price: Option<Decimal>,
    pub top_bids: Vec<Level>,
    pub top_asks: Vec<Level>,
}
