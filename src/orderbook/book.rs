//! Core order book implementation
//!
//! Levels are keyed by integer tick in a BTreeMap. Bids use `Reverse` keys so
//! both sides iterate touch-first.

use rust_decimal::Decimal;
use std::cmp::Reverse;
use std::collections::BTreeMap;

use super::tick::{self, Tick};
use super::{BookSide, BookSummary, Level};
use crate::error::{FairbookError, Result};
use crate::events::{
    BestBidAsk, BookSnapshot, EventKind, LastTrade, MarketEvent, PriceChangeBatch, TickSizeChange,
};

/// Order book for a single outcome token
///
/// `best_bid`/`best_ask` are stored rather than derived on read. Level
/// mutations recompute them from the maps; a best bid/ask event overwrites
/// them directly and leaves the maps alone, so the two views can disagree
/// until the next snapshot or level update on that side.
#[derive(Debug, Clone)]
pub struct OrderBook {
    asset_id: String,
    tick_size: Decimal,
    /// Bids sorted by tick descending (highest first)
    bids: BTreeMap<Reverse<Tick>, Decimal>,
    /// Asks sorted by tick ascending (lowest first)
    asks: BTreeMap<Tick, Decimal>,
    best_bid: Option<Tick>,
    best_ask: Option<Tick>,
    ts_ms: Option<u64>,
    book_hash: Option<String>,
    last_trade_price: Option<Decimal>,
    /// Number of events applied so far
    update_seq: u64,
    last_event: Option<EventKind>,
}

impl OrderBook {
    /// Create a new empty order book
    pub fn new(asset_id: &str, tick_size: Decimal) -> Result<Self> {
        Ok(Self {
            asset_id: asset_id.to_string(),
            tick_size: tick::check_tick_size(tick_size)?,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            best_bid: None,
            best_ask: None,
            ts_ms: None,
            book_hash: None,
            last_trade_price: None,
            update_seq: 0,
            last_event: None,
        })
    }

    /// Apply one market event.
    ///
    /// Either the whole event is applied or, on error, the book is left
    /// exactly as it was. Events must arrive in feed order; nothing here
    /// detects gaps or reorders.
    pub fn apply(&mut self, event: &MarketEvent) -> Result<()> {
        match event {
            MarketEvent::Book(snapshot) => self.apply_snapshot(snapshot),
            MarketEvent::PriceChange(batch) => self.apply_price_changes(batch),
            MarketEvent::LastTrade(trade) => {
                self.apply_last_trade(trade);
                Ok(())
            }
            MarketEvent::BestBidAsk(bba) => self.apply_best_bid_ask(bba),
            MarketEvent::TickSizeChange(change) => self.apply_tick_size_change(change),
            MarketEvent::Unknown(_) => Ok(()),
        }
    }

    /// Replace the whole book with a snapshot
    pub fn apply_snapshot(&mut self, snapshot: &BookSnapshot) -> Result<()> {
        let mut bids = BTreeMap::new();
        for level in &snapshot.bids {
            if level.size > Decimal::ZERO {
                bids.insert(Reverse(self.to_tick(level.price)?), level.size);
            }
        }

        let mut asks = BTreeMap::new();
        for level in &snapshot.asks {
            if level.size > Decimal::ZERO {
                asks.insert(self.to_tick(level.price)?, level.size);
            }
        }

        self.bids = bids;
        self.asks = asks;
        self.refresh_best(BookSide::Bid);
        self.refresh_best(BookSide::Ask);
        self.ts_ms = Some(snapshot.ts_ms);
        self.book_hash = Some(snapshot.book_hash.clone());
        if let Some(price) = snapshot.last_trade_price {
            self.last_trade_price = Some(price);
        }
        self.mark_updated(EventKind::Book);

        Ok(())
    }

    /// Apply a batch of level changes sharing one timestamp.
    ///
    /// Every price is aligned before the first mutation, so a single bad
    /// level rejects the whole batch.
    pub fn apply_price_changes(&mut self, batch: &PriceChangeBatch) -> Result<()> {
        let mut aligned = Vec::with_capacity(batch.changes.len());
        for change in &batch.changes {
            if change.size < Decimal::ZERO {
                return Err(FairbookError::malformed(
                    EventKind::PriceChange.as_str(),
                    format!("negative size {} at {}", change.size, change.price),
                ));
            }
            let tick = self.to_tick(change.price)?;
            aligned.push((BookSide::from(change.side), tick, change));
        }

        for (side, tick, change) in aligned {
            self.set_level(side, tick, change.size);
            self.refresh_best(side);
            if let Some(hash) = &change.book_hash {
                self.book_hash = Some(hash.clone());
            }
        }
        self.ts_ms = Some(batch.ts_ms);
        self.mark_updated(EventKind::PriceChange);

        Ok(())
    }

    pub fn apply_last_trade(&mut self, trade: &LastTrade) {
        self.last_trade_price = Some(trade.price);
        self.mark_updated(EventKind::LastTrade);
    }

    /// Overwrite the touch without touching the level maps
    pub fn apply_best_bid_ask(&mut self, bba: &BestBidAsk) -> Result<()> {
        let best_bid = self.to_tick(bba.best_bid)?;
        let best_ask = self.to_tick(bba.best_ask)?;

        self.best_bid = Some(best_bid);
        self.best_ask = Some(best_ask);
        self.ts_ms = Some(bba.ts_ms);
        self.mark_updated(EventKind::BestBidAsk);

        Ok(())
    }

    /// Adopt a new tick size; levels quantized to the old one are dropped
    pub fn apply_tick_size_change(&mut self, change: &TickSizeChange) -> Result<()> {
        self.tick_size = tick::check_tick_size(change.new_tick_size)?;
        self.bids.clear();
        self.asks.clear();
        self.best_bid = None;
        self.best_ask = None;
        self.book_hash = None;
        self.ts_ms = Some(change.ts_ms);
        self.mark_updated(EventKind::TickSizeChange);

        Ok(())
    }

    fn to_tick(&self, price: Decimal) -> Result<Tick> {
        tick::to_tick(price, self.tick_size)
    }

    pub fn tick_to_price(&self, tick: Tick) -> Decimal {
        tick::tick_to_price(tick, self.tick_size)
    }

    /// Upsert a level, deleting it instead when `size` is zero
    fn set_level(&mut self, side: BookSide, tick: Tick, size: Decimal) {
        match side {
            BookSide::Bid => {
                if size.is_zero() {
                    self.bids.remove(&Reverse(tick));
                } else {
                    self.bids.insert(Reverse(tick), size);
                }
            }
            BookSide::Ask => {
                if size.is_zero() {
                    self.asks.remove(&tick);
                } else {
                    self.asks.insert(tick, size);
                }
            }
        }
    }

    fn refresh_best(&mut self, side: BookSide) {
        match side {
            BookSide::Bid => self.best_bid = self.bids.first_key_value().map(|(Reverse(t), _)| *t),
            BookSide::Ask => self.best_ask = self.asks.first_key_value().map(|(t, _)| *t),
        }
    }

    fn mark_updated(&mut self, kind: EventKind) {
        self.update_seq += 1;
        self.last_event = Some(kind);
    }

    pub fn asset_id(&self) -> &str {
        &self.asset_id
    }

    pub fn tick_size(&self) -> Decimal {
        self.tick_size
    }

    pub fn best_bid(&self) -> Option<Tick> {
        self.best_bid
    }

    pub fn best_ask(&self) -> Option<Tick> {
        self.best_ask
    }

    pub fn best_bid_price(&self) -> Option<Decimal> {
        self.best_bid.map(|t| self.tick_to_price(t))
    }

    pub fn best_ask_price(&self) -> Option<Decimal> {
        self.best_ask.map(|t| self.tick_to_price(t))
    }

    /// Both sides of the touch are known
    pub fn has_top_of_book(&self) -> bool {
        self.best_bid.is_some() && self.best_ask.is_some()
    }

    /// Resting size at a tick, zero when the level is absent
    pub fn size_at(&self, side: BookSide, tick: Tick) -> Decimal {
        let size = match side {
            BookSide::Bid => self.bids.get(&Reverse(tick)),
            BookSide::Ask => self.asks.get(&tick),
        };
        size.copied().unwrap_or(Decimal::ZERO)
    }

    /// Sum of sizes over the `n` levels closest to the touch.
    ///
    /// The maps are already ordered touch-first, so this walks at most `n`
    /// entries and never sorts.
    pub fn depth_sum(&self, side: BookSide, n: usize) -> Decimal {
        match side {
            BookSide::Bid => self.bids.values().take(n).copied().sum(),
            BookSide::Ask => self.asks.values().take(n).copied().sum(),
        }
    }

    /// The `n` levels closest to the touch, touch first
    pub fn depth(&self, side: BookSide, n: usize) -> Vec<Level> {
        match side {
            BookSide::Bid => self
                .bids
                .iter()
                .take(n)
                .map(|(Reverse(t), s)| Level {
                    price: self.tick_to_price(*t),
                    size: *s,
                })
                .collect(),
            BookSide::Ask => self
                .asks
                .iter()
                .take(n)
                .map(|(t, s)| Level {
                    price: self.tick_to_price(*t),
                    size: *s,
                })
                .collect(),
        }
    }

    pub fn level_count(&self, side: BookSide) -> usize {
        match side {
            BookSide::Bid => self.bids.len(),
            BookSide::Ask => self.asks.len(),
        }
    }

    pub fn ts_ms(&self) -> Option<u64> {
        self.ts_ms
    }

    pub fn book_hash(&self) -> Option<&str> {
        self.book_hash.as_deref()
    }

    pub fn last_trade_price(&self) -> Option<Decimal> {
        self.last_trade_price
    }

    pub fn update_seq(&self) -> u64 {
        self.update_seq
    }

    pub fn last_event(&self) -> Option<EventKind> {
        self.last_event
    }

    /// Snapshot of the book state with the top `n` levels per side
    pub fn summary(&self, n: usize) -> BookSummary {
        BookSummary {
            asset_id: self.asset_id.clone(),
            update_seq: self.update_seq,
            last_event: self.last_event,
            tick_size: self.tick_size,
            bid_levels: self.bids.len(),
            ask_levels: self.asks.len(),
            best_bid: self.best_bid_price(),
            best_ask: self.best_ask_price(),
            ts_ms: self.ts_ms,
            book_hash: self.book_hash.clone(),
            last_trade_price: self.last_trade_price,
            top_bids: self.depth(BookSide::Bid, n),
            top_asks: self.depth(BookSide::Ask, n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{PriceLevel, PriceLevelUpdate, Side};
    use rust_decimal_macros::dec;

    fn level(price: Decimal, size: Decimal) -> PriceLevel {
        PriceLevel { price, size }
    }

    fn snapshot(bids: Vec<PriceLevel>, asks: Vec<PriceLevel>) -> MarketEvent {
        MarketEvent::Book(BookSnapshot {
            market: "0xmarket".to_string(),
            asset_id: "yes".to_string(),
            ts_ms: 1000,
            book_hash: "h0".to_string(),
            bids,
            asks,
            last_trade_price: Some(dec!(0.41)),
        })
    }

    fn update(price: Decimal, size: Decimal, side: Side) -> PriceLevelUpdate {
        PriceLevelUpdate {
            asset_id: "yes".to_string(),
            price,
            size,
            side,
            book_hash: Some(format!("h-{}", price)),
            best_bid: None,
            best_ask: None,
        }
    }

    fn batch(ts_ms: u64, changes: Vec<PriceLevelUpdate>) -> MarketEvent {
        MarketEvent::PriceChange(PriceChangeBatch {
            market: "0xmarket".to_string(),
            ts_ms,
            changes,
        })
    }

    fn create_test_book() -> OrderBook {
        let mut book = OrderBook::new("yes", dec!(0.01)).unwrap();
        book.apply(&snapshot(
            vec![level(dec!(0.40), dec!(100)), level(dec!(0.41), dec!(50))],
            vec![level(dec!(0.42), dec!(80))],
        ))
        .unwrap();
        book
    }

    /// Everything an aborted event must leave untouched
    fn fingerprint(book: &OrderBook) -> (Vec<Level>, Vec<Level>, Option<Tick>, Option<Tick>, Option<String>) {
        (
            book.depth(BookSide::Bid, usize::MAX),
            book.depth(BookSide::Ask, usize::MAX),
            book.best_bid(),
            book.best_ask(),
            book.book_hash().map(str::to_string),
        )
    }

    #[test]
    fn test_snapshot_sets_touch() {
        let book = create_test_book();
        assert_eq!(book.best_bid(), Some(41));
        assert_eq!(book.best_ask(), Some(42));
        assert_eq!(book.best_bid_price(), Some(dec!(0.41)));
        assert_eq!(book.ts_ms(), Some(1000));
        assert_eq!(book.book_hash(), Some("h0"));
        assert_eq!(book.last_trade_price(), Some(dec!(0.41)));
        assert_eq!(book.update_seq(), 1);
        assert_eq!(book.last_event(), Some(EventKind::Book));
    }

    #[test]
    fn test_snapshot_skips_zero_sizes_and_replaces() {
        let mut book = create_test_book();
        book.apply(&snapshot(
            vec![level(dec!(0.30), dec!(0)), level(dec!(0.35), dec!(10))],
            vec![],
        ))
        .unwrap();

        assert_eq!(book.level_count(BookSide::Bid), 1);
        assert_eq!(book.level_count(BookSide::Ask), 0);
        assert_eq!(book.best_bid(), Some(35));
        assert_eq!(book.best_ask(), None);
    }

    #[test]
    fn test_remove_best_level_falls_back() {
        let mut book = create_test_book();
        book.apply(&batch(2000, vec![update(dec!(0.41), dec!(0), Side::Buy)]))
            .unwrap();

        assert_eq!(book.best_bid(), Some(40));
        assert_eq!(book.size_at(BookSide::Bid, 41), Decimal::ZERO);
        assert_eq!(book.level_count(BookSide::Bid), 1);
        assert_eq!(book.book_hash(), Some("h-0.41"));
        assert_eq!(book.ts_ms(), Some(2000));

        book.apply(&batch(2001, vec![update(dec!(0.42), dec!(0), Side::Sell)]))
            .unwrap();
        assert_eq!(book.best_ask(), None);
        assert!(!book.has_top_of_book());
    }

    #[test]
    fn test_upsert_improves_touch() {
        let mut book = create_test_book();
        book.apply(&batch(
            2000,
            vec![
                update(dec!(0.39), dec!(5), Side::Buy),
                update(dec!(0.41), dec!(70), Side::Buy),
                update(dec!(0.43), dec!(9), Side::Sell),
            ],
        ))
        .unwrap();

        assert_eq!(book.best_bid(), Some(41));
        assert_eq!(book.size_at(BookSide::Bid, 41), dec!(70));
        assert_eq!(book.best_ask(), Some(42));
        assert_eq!(book.level_count(BookSide::Ask), 2);
    }

    #[test]
    fn test_alignment_error_leaves_book_unchanged() {
        let mut book = create_test_book();
        let before = fingerprint(&book);
        let seq = book.update_seq();

        let bad_batch = batch(
            3000,
            vec![
                update(dec!(0.41), dec!(0), Side::Buy),
                update(dec!(0.425), dec!(10), Side::Sell),
            ],
        );
        let err = book.apply(&bad_batch).unwrap_err();
        assert!(matches!(err, FairbookError::Alignment { .. }));
        assert_eq!(fingerprint(&book), before);
        assert_eq!(book.update_seq(), seq);

        let bad_snapshot = snapshot(vec![level(dec!(0.405), dec!(1))], vec![]);
        assert!(book.apply(&bad_snapshot).is_err());
        assert_eq!(fingerprint(&book), before);

        let bad_bba = MarketEvent::BestBidAsk(BestBidAsk {
            market: String::new(),
            asset_id: "yes".to_string(),
            ts_ms: 3001,
            best_bid: dec!(0.40),
            best_ask: dec!(0.4201),
            spread: None,
        });
        assert!(book.apply(&bad_bba).is_err());
        assert_eq!(fingerprint(&book), before);
        assert_eq!(book.ts_ms(), Some(1000));
    }

    #[test]
    fn test_negative_size_rejected() {
        let mut book = create_test_book();
        let before = fingerprint(&book);
        let err = book
            .apply(&batch(2000, vec![update(dec!(0.40), dec!(-1), Side::Buy)]))
            .unwrap_err();
        assert!(matches!(err, FairbookError::MalformedEvent { .. }));
        assert_eq!(fingerprint(&book), before);
    }

    #[test]
    fn test_best_bid_ask_overwrites_without_levels() {
        let mut book = create_test_book();
        book.apply(&MarketEvent::BestBidAsk(BestBidAsk {
            market: String::new(),
            asset_id: "yes".to_string(),
            ts_ms: 4000,
            best_bid: dec!(0.38),
            best_ask: dec!(0.45),
            spread: Some(dec!(0.07)),
        }))
        .unwrap();

        assert_eq!(book.best_bid(), Some(38));
        assert_eq!(book.best_ask(), Some(45));
        // maps are not reconciled
        assert_eq!(book.level_count(BookSide::Bid), 2);
        assert_eq!(book.depth(BookSide::Bid, 1)[0].price, dec!(0.41));
        assert_eq!(book.ts_ms(), Some(4000));

        // a bid level update reconciles only the bid side
        book.apply(&batch(4001, vec![update(dec!(0.40), dec!(1), Side::Buy)]))
            .unwrap();
        assert_eq!(book.best_bid(), Some(41));
        assert_eq!(book.best_ask(), Some(45));
    }

    #[test]
    fn test_last_trade_only_touches_trade_price() {
        let mut book = create_test_book();
        let before = fingerprint(&book);
        book.apply(&MarketEvent::LastTrade(LastTrade {
            market: String::new(),
            asset_id: "yes".to_string(),
            ts_ms: 5000,
            price: dec!(0.42),
            size: dec!(3),
            side: Side::Buy,
        }))
        .unwrap();

        assert_eq!(book.last_trade_price(), Some(dec!(0.42)));
        assert_eq!(fingerprint(&book), before);
        assert_eq!(book.last_event(), Some(EventKind::LastTrade));
    }

    #[test]
    fn test_tick_size_change_clears_book() {
        let mut book = create_test_book();
        book.apply(&MarketEvent::TickSizeChange(TickSizeChange {
            market: String::new(),
            asset_id: "yes".to_string(),
            ts_ms: 6000,
            old_tick_size: dec!(0.01),
            new_tick_size: dec!(0.001),
        }))
        .unwrap();

        assert_eq!(book.tick_size(), dec!(0.001));
        assert_eq!(book.level_count(BookSide::Bid), 0);
        assert_eq!(book.level_count(BookSide::Ask), 0);
        assert_eq!(book.best_bid(), None);
        assert_eq!(book.best_ask(), None);
        assert_eq!(book.book_hash(), None);

        // finer prices now align
        book.apply(&batch(6001, vec![update(dec!(0.415), dec!(5), Side::Buy)]))
            .unwrap();
        assert_eq!(book.best_bid(), Some(415));
    }

    #[test]
    fn test_invalid_tick_size_change_rejected() {
        let mut book = create_test_book();
        let before = fingerprint(&book);
        let err = book
            .apply(&MarketEvent::TickSizeChange(TickSizeChange {
                market: String::new(),
                asset_id: "yes".to_string(),
                ts_ms: 6000,
                old_tick_size: dec!(0.01),
                new_tick_size: Decimal::ZERO,
            }))
            .unwrap_err();
        assert!(matches!(err, FairbookError::InvalidTickSize(_)));
        assert_eq!(fingerprint(&book), before);
        assert_eq!(book.tick_size(), dec!(0.01));
    }

    /// Full sort then slice over the raw levels, the obvious reference for `depth_sum`
    fn reference_depth_sum(levels: &[PriceLevel], side: BookSide, n: usize) -> Decimal {
        let mut by_price: std::collections::HashMap<Decimal, Decimal> = Default::default();
        for l in levels.iter().filter(|l| l.size > Decimal::ZERO) {
            by_price.insert(l.price, l.size);
        }
        let mut prices: Vec<Decimal> = by_price.keys().copied().collect();
        prices.sort();
        if side == BookSide::Bid {
            prices.reverse();
        }
        prices.iter().take(n).map(|p| by_price[p]).sum()
    }

    #[test]
    fn test_depth_sum_matches_reference() {
        let mut book = OrderBook::new("yes", dec!(0.001)).unwrap();
        // deterministic scatter of levels; repeated prices exercise overwrites
        let mut bids = Vec::new();
        let mut asks = Vec::new();
        let mut x: u64 = 7;
        for _ in 0..40 {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let tick = (x >> 33) % 400;
            let size = Decimal::from((x >> 13) % 90);
            bids.push(level(Decimal::new(tick as i64, 3), size));
            asks.push(level(Decimal::new(500 + tick as i64, 3), size + dec!(0.5)));
        }
        book.apply(&snapshot(bids.clone(), asks.clone())).unwrap();

        for n in 0..50 {
            assert_eq!(
                book.depth_sum(BookSide::Bid, n),
                reference_depth_sum(&bids, BookSide::Bid, n)
            );
            assert_eq!(
                book.depth_sum(BookSide::Ask, n),
                reference_depth_sum(&asks, BookSide::Ask, n)
            );
        }
    }

    #[test]
    fn test_depth_sum_matches_reference_after_level_updates() {
        use std::collections::HashMap;

        let mut book = OrderBook::new("yes", dec!(0.001)).unwrap();
        let mut bids: HashMap<Decimal, Decimal> = HashMap::new();
        let mut asks: HashMap<Decimal, Decimal> = HashMap::new();
        let as_levels = |model: &HashMap<Decimal, Decimal>| -> Vec<PriceLevel> {
            model.iter().map(|(price, size)| level(*price, *size)).collect()
        };

        let mut x: u64 = 11;
        for round in 0..60u64 {
            let mut changes = Vec::new();
            for _ in 0..6 {
                x = x.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                let tick = ((x >> 33) % 60) as i64;
                // about one change in four deletes its level
                let size = if (x >> 20) % 4 == 0 {
                    Decimal::ZERO
                } else {
                    Decimal::from((x >> 13) % 90 + 1)
                };
                let (side, price, model) = if (x >> 40) % 2 == 0 {
                    (Side::Buy, Decimal::new(tick, 3), &mut bids)
                } else {
                    (Side::Sell, Decimal::new(500 + tick, 3), &mut asks)
                };
                if size.is_zero() {
                    model.remove(&price);
                } else {
                    model.insert(price, size);
                }
                changes.push(update(price, size, side));
            }
            book.apply(&batch(round, changes)).unwrap();

            for n in [0, 1, 2, 5, 10, 100] {
                assert_eq!(
                    book.depth_sum(BookSide::Bid, n),
                    reference_depth_sum(&as_levels(&bids), BookSide::Bid, n)
                );
                assert_eq!(
                    book.depth_sum(BookSide::Ask, n),
                    reference_depth_sum(&as_levels(&asks), BookSide::Ask, n)
                );
            }
            assert_eq!(book.level_count(BookSide::Bid), bids.len());
            assert_eq!(book.level_count(BookSide::Ask), asks.len());
        }
    }

    #[test]
    fn test_depth_sum_empty_and_zero() {
        let book = OrderBook::new("yes", dec!(0.01)).unwrap();
        assert_eq!(book.depth_sum(BookSide::Bid, 5), Decimal::ZERO);

        let book = create_test_book();
        assert_eq!(book.depth_sum(BookSide::Bid, 0), Decimal::ZERO);
        assert_eq!(book.depth_sum(BookSide::Bid, 1), dec!(50));
        assert_eq!(book.depth_sum(BookSide::Bid, 5), dec!(150));
        assert_eq!(book.depth_sum(BookSide::Ask, 5), dec!(80));
    }

    #[test]
    fn test_unknown_event_is_noop() {
        let mut book = create_test_book();
        book.apply(&MarketEvent::Unknown(crate::events::UnknownEvent {
            market: None,
            event_type: Some("tick".to_string()),
            raw: serde_json::Value::Null,
        }))
        .unwrap();
        assert_eq!(book.update_seq(), 1);
    }

    #[test]
    fn test_summary() {
        let book = create_test_book();
        let summary = book.summary(1);
        assert_eq!(summary.asset_id, "yes");
        assert_eq!(summary.bid_levels, 2);
        assert_eq!(summary.top_bids, vec![Level { price: dec!(0.41), size: dec!(50) }]);
        assert_eq!(summary.best_ask, Some(dec!(0.42)));
    }
}
