//! Prometheus metrics for the pipeline

use prometheus::{Encoder, GaugeVec, IntCounterVec, Opts, Registry, TextEncoder};
use rust_decimal::prelude::ToPrimitive;

use crate::controller::DesiredQuote;
use crate::error::{FairbookError, Result};
use crate::events::EventKind;

/// Pipeline counters and gauges, registered on a private registry
#[derive(Clone)]
pub struct Telemetry {
    registry: Registry,
    events_applied: IntCounterVec,
    apply_failures: IntCounterVec,
    not_ready: IntCounterVec,
    quotes_emitted: IntCounterVec,
    quotes_superseded: IntCounterVec,
    fair_value: GaugeVec,
    quote_price: GaugeVec,
}

impl Telemetry {
    pub fn new() -> Result<Self> {
        let registry = Registry::new_custom(Some("fairbook".to_string()), None)?;

        let events_applied = IntCounterVec::new(
            Opts::new("events_applied_total", "Market events applied to a book"),
            &["asset_id", "kind"],
        )?;
        let apply_failures = IntCounterVec::new(
            Opts::new("apply_failures_total", "Market events rejected by a book"),
            &["asset_id", "reason"],
        )?;
        let not_ready = IntCounterVec::new(
            Opts::new("not_ready_total", "Events processed without a two-sided touch"),
            &["asset_id"],
        )?;
        let quotes_emitted = IntCounterVec::new(
            Opts::new("quotes_emitted_total", "Desired quotes emitted"),
            &["asset_id"],
        )?;
        let quotes_superseded = IntCounterVec::new(
            Opts::new(
                "quotes_superseded_total",
                "Desired quotes replaced by a newer one before the sink took them",
            ),
            &["asset_id"],
        )?;
        let fair_value = GaugeVec::new(
            Opts::new("fair_value", "Latest filtered fair probability"),
            &["asset_id"],
        )?;
        let quote_price = GaugeVec::new(
            Opts::new("quote_price", "Latest desired quote price"),
            &["asset_id", "side"],
        )?;

        registry.register(Box::new(events_applied.clone()))?;
        registry.register(Box::new(apply_failures.clone()))?;
        registry.register(Box::new(not_ready.clone()))?;
        registry.register(Box::new(quotes_emitted.clone()))?;
        registry.register(Box::new(quotes_superseded.clone()))?;
        registry.register(Box::new(fair_value.clone()))?;
        registry.register(Box::new(quote_price.clone()))?;

        Ok(Self {
            registry,
            events_applied,
            apply_failures,
            not_ready,
            quotes_emitted,
            quotes_superseded,
            fair_value,
            quote_price,
        })
    }

    pub fn record_applied(&self, asset_id: &str, kind: EventKind) {
        self.events_applied
            .with_label_values(&[asset_id, kind.as_str()])
            .inc();
    }

    pub fn record_failure(&self, asset_id: &str, err: &FairbookError) {
        self.apply_failures
            .with_label_values(&[asset_id, err.reason()])
            .inc();
    }

    pub fn record_not_ready(&self, asset_id: &str) {
        self.not_ready.with_label_values(&[asset_id]).inc();
    }

    pub fn record_superseded(&self, asset_id: &str) {
        self.quotes_superseded.with_label_values(&[asset_id]).inc();
    }

    pub fn record_fair_value(&self, asset_id: &str, p_fair: f64) {
        self.fair_value.with_label_values(&[asset_id]).set(p_fair);
    }

    pub fn record_quote(&self, asset_id: &str, quote: &DesiredQuote) {
        self.quotes_emitted.with_label_values(&[asset_id]).inc();
        if let Some(bid) = quote.bid.to_f64() {
            self.quote_price.with_label_values(&[asset_id, "bid"]).set(bid);
        }
        if let Some(ask) = quote.ask.to_f64() {
            self.quote_price.with_label_values(&[asset_id, "ask"]).set(ask);
        }
    }

    /// Prometheus text exposition of every metric
    pub fn encode(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| FairbookError::Metrics(e.to_string()))
    }
}
