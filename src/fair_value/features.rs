//! Microstructure features from the top of an order book

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::orderbook::{BookSide, OrderBook};

/// Probabilities leaving this module stay inside `(PROB_EPS, 1 - PROB_EPS)`
pub const PROB_EPS: f64 = 1e-6;

/// Floor for size denominators
pub const SIZE_EPS: f64 = 1e-9;

/// Feature vector recomputed from the book on every pipeline tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MicroFeatures {
    /// `best_ask - best_bid`, never negative
    pub spread: f64,
    /// Size over the top N bid levels
    pub depth_bid: f64,
    /// Size over the top N ask levels
    pub depth_ask: f64,
    /// `(depth_bid - depth_ask) / (depth_bid + depth_ask)`
    pub imbalance: f64,
    pub mid: f64,
    /// Touch price weighted toward the side with less resting size
    pub microprice: f64,
}

fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

/// Compute features from the current book.
///
/// Returns `None` until both sides of the touch are known; that is the
/// normal state before two-sided liquidity arrives, not an error.
pub fn extract(book: &OrderBook, depth_levels: usize) -> Option<MicroFeatures> {
    let best_bid = book.best_bid()?;
    let best_ask = book.best_ask()?;

    let bid_px = to_f64(book.tick_to_price(best_bid));
    let ask_px = to_f64(book.tick_to_price(best_ask));

    let mid = 0.5 * (bid_px + ask_px);
    let spread = (ask_px - bid_px).max(0.0);

    // Touch sizes may be zero right after an out-of-band best bid/ask update
    let bid_sz0 = to_f64(book.size_at(BookSide::Bid, best_bid));
    let ask_sz0 = to_f64(book.size_at(BookSide::Ask, best_ask));
    let microprice = (bid_px * ask_sz0 + ask_px * bid_sz0) / (bid_sz0 + ask_sz0).max(SIZE_EPS);

    let depth_bid = to_f64(book.depth_sum(BookSide::Bid, depth_levels));
    let depth_ask = to_f64(book.depth_sum(BookSide::Ask, depth_levels));
    let imbalance = (depth_bid - depth_ask) / (depth_bid + depth_ask).max(SIZE_EPS);

    Some(MicroFeatures {
        spread,
        depth_bid,
        depth_ask,
        imbalance,
        mid: mid.clamp(PROB_EPS, 1.0 - PROB_EPS),
        microprice: microprice.clamp(PROB_EPS, 1.0 - PROB_EPS),
    })
}
