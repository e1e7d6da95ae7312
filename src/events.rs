//! Market channel events
//!
//! Typed events for the binary-outcome market channel and the JSON decode
//! boundary that produces them. Prices and sizes are decoded straight into
//! [`Decimal`] so no binary float ever touches a money value.

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::{FairbookError, Result};

/// Outcome token of a binary market
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Yes,
    No,
}

impl Outcome {
    pub fn complement(self) -> Self {
        match self {
            Outcome::Yes => Outcome::No,
            Outcome::No => Outcome::Yes,
        }
    }
}

/// Aggressor / resting side as reported by the feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

/// A `(price, size)` pair from a book snapshot
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PriceLevel {
    #[serde(deserialize_with = "deserialize_decimal")]
    pub price: Decimal,
    #[serde(deserialize_with = "deserialize_decimal")]
    pub size: Decimal,
}

/// Full book replacement for one asset
#[derive(Debug, Clone, Deserialize)]
pub struct BookSnapshot {
    #[serde(default)]
    pub market: String,
    pub asset_id: String,
    #[serde(rename = "timestamp", deserialize_with = "deserialize_ts")]
    pub ts_ms: u64,
    #[serde(rename = "hash", default)]
    pub book_hash: String,
    #[serde(default)]
    pub bids: Vec<PriceLevel>,
    #[serde(default)]
    pub asks: Vec<PriceLevel>,
    #[serde(default, deserialize_with = "deserialize_opt_decimal")]
    pub last_trade_price: Option<Decimal>,
}

/// Single level change inside a [`PriceChangeBatch`]
#[derive(Debug, Clone, Deserialize)]
pub struct PriceLevelUpdate {
    pub asset_id: String,
    #[serde(deserialize_with = "deserialize_decimal")]
    pub price: Decimal,
    #[serde(deserialize_with = "deserialize_decimal")]
    pub size: Decimal,
    pub side: Side,
    #[serde(rename = "hash", default)]
    pub book_hash: Option<String>,
    #[serde(default, deserialize_with = "deserialize_opt_decimal")]
    pub best_bid: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_opt_decimal")]
    pub best_ask: Option<Decimal>,
}

/// Level changes sharing one timestamp, possibly spanning several assets
#[derive(Debug, Clone, Deserialize)]
pub struct PriceChangeBatch {
    #[serde(default)]
    pub market: String,
    #[serde(rename = "timestamp", deserialize_with = "deserialize_ts")]
    pub ts_ms: u64,
    #[serde(rename = "price_changes", default)]
    pub changes: Vec<PriceLevelUpdate>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LastTrade {
    #[serde(default)]
    pub market: String,
    pub asset_id: String,
    #[serde(rename = "timestamp", deserialize_with = "deserialize_ts")]
    pub ts_ms: u64,
    #[serde(deserialize_with = "deserialize_decimal")]
    pub price: Decimal,
    #[serde(deserialize_with = "deserialize_decimal")]
    pub size: Decimal,
    pub side: Side,
}

/// Out-of-band top of book confirmation
#[derive(Debug, Clone, Deserialize)]
pub struct BestBidAsk {
    #[serde(default)]
    pub market: String,
    pub asset_id: String,
    #[serde(rename = "timestamp", deserialize_with = "deserialize_ts")]
    pub ts_ms: u64,
    #[serde(deserialize_with = "deserialize_decimal")]
    pub best_bid: Decimal,
    #[serde(deserialize_with = "deserialize_decimal")]
    pub best_ask: Decimal,
    #[serde(default, deserialize_with = "deserialize_opt_decimal")]
    pub spread: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TickSizeChange {
    #[serde(default)]
    pub market: String,
    pub asset_id: String,
    #[serde(rename = "timestamp", deserialize_with = "deserialize_ts")]
    pub ts_ms: u64,
    #[serde(deserialize_with = "deserialize_decimal")]
    pub old_tick_size: Decimal,
    #[serde(deserialize_with = "deserialize_decimal")]
    pub new_tick_size: Decimal,
}

/// Anything the decoder has no handler for; kept verbatim for observability
#[derive(Debug, Clone)]
pub struct UnknownEvent {
    pub market: Option<String>,
    pub event_type: Option<String>,
    pub raw: Value,
}

/// Closed set of market channel events
#[derive(Debug, Clone)]
pub enum MarketEvent {
    Book(BookSnapshot),
    PriceChange(PriceChangeBatch),
    LastTrade(LastTrade),
    BestBidAsk(BestBidAsk),
    TickSizeChange(TickSizeChange),
    Unknown(UnknownEvent),
}

/// Event tag used in logs, metrics and the book's `last_event`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Book,
    PriceChange,
    LastTrade,
    BestBidAsk,
    TickSizeChange,
    Unknown,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Book => "book",
            EventKind::PriceChange => "price_change",
            EventKind::LastTrade => "last_trade_price",
            EventKind::BestBidAsk => "best_bid_ask",
            EventKind::TickSizeChange => "tick_size_change",
            EventKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl MarketEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            MarketEvent::Book(_) => EventKind::Book,
            MarketEvent::PriceChange(_) => EventKind::PriceChange,
            MarketEvent::LastTrade(_) => EventKind::LastTrade,
            MarketEvent::BestBidAsk(_) => EventKind::BestBidAsk,
            MarketEvent::TickSizeChange(_) => EventKind::TickSizeChange,
            MarketEvent::Unknown(_) => EventKind::Unknown,
        }
    }

    /// Event timestamp in milliseconds, when the event carries one
    pub fn ts_ms(&self) -> Option<u64> {
        match self {
            MarketEvent::Book(e) => Some(e.ts_ms),
            MarketEvent::PriceChange(e) => Some(e.ts_ms),
            MarketEvent::LastTrade(e) => Some(e.ts_ms),
            MarketEvent::BestBidAsk(e) => Some(e.ts_ms),
            MarketEvent::TickSizeChange(e) => Some(e.ts_ms),
            MarketEvent::Unknown(_) => None,
        }
    }

    /// Split into per-asset events, preserving feed order within each asset.
    ///
    /// A price change batch spanning several assets becomes one batch per
    /// asset, all sharing the batch timestamp. Unknown events have no
    /// asset and yield nothing.
    pub fn split_by_asset(self) -> Vec<(String, MarketEvent)> {
        match self {
            MarketEvent::Book(e) => vec![(e.asset_id.clone(), MarketEvent::Book(e))],
            MarketEvent::LastTrade(e) => vec![(e.asset_id.clone(), MarketEvent::LastTrade(e))],
            MarketEvent::BestBidAsk(e) => vec![(e.asset_id.clone(), MarketEvent::BestBidAsk(e))],
            MarketEvent::TickSizeChange(e) => {
                vec![(e.asset_id.clone(), MarketEvent::TickSizeChange(e))]
            }
            MarketEvent::PriceChange(batch) => {
                let mut per_asset: Vec<(String, Vec<PriceLevelUpdate>)> = Vec::new();
                for change in batch.changes {
                    match per_asset.iter_mut().find(|(id, _)| *id == change.asset_id) {
                        Some((_, changes)) => changes.push(change),
                        None => per_asset.push((change.asset_id.clone(), vec![change])),
                    }
                }
                per_asset
                    .into_iter()
                    .map(|(asset_id, changes)| {
                        let event = MarketEvent::PriceChange(PriceChangeBatch {
                            market: batch.market.clone(),
                            ts_ms: batch.ts_ms,
                            changes,
                        });
                        (asset_id, event)
                    })
                    .collect()
            }
            MarketEvent::Unknown(_) => Vec::new(),
        }
    }

    /// Decode one websocket text frame into zero or more events.
    ///
    /// Fails as a whole if any object in the frame is malformed; callers that
    /// need per-event isolation use [`MarketEvent::split_frame`] and
    /// [`MarketEvent::from_value`] instead.
    pub fn parse_frame(raw: &str) -> Result<Vec<MarketEvent>> {
        Self::split_frame(raw)?
            .into_iter()
            .map(Self::from_value)
            .collect()
    }

    /// Split a frame into its JSON objects.
    ///
    /// A frame is either a single JSON object or an array of them. The
    /// keep-alive reply `PONG` yields nothing.
    pub fn split_frame(raw: &str) -> Result<Vec<Value>> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed == "PONG" {
            return Ok(Vec::new());
        }

        match serde_json::from_str::<Value>(trimmed)? {
            Value::Array(items) => Ok(items),
            other => Ok(vec![other]),
        }
    }

    /// Decode a single JSON object, dispatching on its `event_type` tag
    pub fn from_value(value: Value) -> Result<MarketEvent> {
        let event_type = value
            .get("event_type")
            .and_then(Value::as_str)
            .map(str::to_string);

        let event = match event_type.as_deref() {
            Some("book") => MarketEvent::Book(decode("book", value)?),
            Some("price_change") => MarketEvent::PriceChange(decode("price_change", value)?),
            Some("last_trade_price") => MarketEvent::LastTrade(decode("last_trade_price", value)?),
            Some("best_bid_ask") => MarketEvent::BestBidAsk(decode("best_bid_ask", value)?),
            Some("tick_size_change") => {
                MarketEvent::TickSizeChange(decode("tick_size_change", value)?)
            }
            _ => MarketEvent::Unknown(UnknownEvent {
                market: value
                    .get("market")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                event_type,
                raw: value,
            }),
        };

        Ok(event)
    }
}

fn decode<T: serde::de::DeserializeOwned>(event_type: &str, value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| FairbookError::malformed(event_type, e.to_string()))
}

/// Decimal from a JSON string; numbers are rejected so binary floats never leak in
fn deserialize_decimal<'de, D>(deserializer: D) -> std::result::Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    Decimal::from_str(s.trim()).map_err(serde::de::Error::custom)
}

fn deserialize_opt_decimal<'de, D>(deserializer: D) -> std::result::Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    let s: Option<String> = Deserialize::deserialize(deserializer)?;
    match s.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => Decimal::from_str(s).map(Some).map_err(serde::de::Error::custom),
    }
}

/// Millisecond timestamp sent either as a decimal string or a JSON integer
fn deserialize_ts<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawTs {
        Num(u64),
        Str(String),
    }

    match RawTs::deserialize(deserializer)? {
        RawTs::Num(ts) => Ok(ts),
        RawTs::Str(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}
