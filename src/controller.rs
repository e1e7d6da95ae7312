//! Quote controller
//!
//! Converts a fair value snapshot into a tick-aligned two-sided quote. Whether
//! a fresh candidate is actually emitted is delegated to a [`RequotePolicy`].

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::fair_value::FairValueSnapshot;
use crate::orderbook::tick::{self, Tick};

/// Controller configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerParams {
    /// Size quoted on each side
    pub size: Decimal,
    /// Price grid the quote is aligned to
    pub tick: Decimal,
    pub half_spread_ticks: u32,
    /// Rate-limit knobs, only read by [`Throttled`]
    pub min_requote_ms: u64,
    pub requote_if_fair_moves_ticks: u32,
}

impl Default for ControllerParams {
    fn default() -> Self {
        Self {
            size: Decimal::from(50),
            tick: Decimal::new(1, 3),
            half_spread_ticks: 1,
            min_requote_ms: 250,
            requote_if_fair_moves_ticks: 1,
        }
    }
}

/// The quote the pipeline wants resting in the market
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesiredQuote {
    pub bid: Decimal,
    pub ask: Decimal,
    pub size: Decimal,
    pub ts_ms: u64,
    pub p_fair: f64,
}

/// Decides whether a freshly computed quote replaces the previous one.
///
/// Implementations that track history record the candidate when they
/// return `true`.
#[cfg_attr(test, mockall::automock)]
pub trait RequotePolicy: Send {
    fn should_requote(&mut self, candidate: &DesiredQuote, fair_tick: Tick) -> bool;
}

/// Requote on every ready snapshot
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysRequote;

impl RequotePolicy for AlwaysRequote {
    fn should_requote(&mut self, _candidate: &DesiredQuote, _fair_tick: Tick) -> bool {
        true
    }
}

/// Suppresses a requote that is both too soon and too small a fair move
#[derive(Debug, Clone)]
pub struct Throttled {
    min_requote_ms: u64,
    min_fair_move_ticks: u32,
    last: Option<(u64, Tick)>,
}

impl Throttled {
    pub fn new(min_requote_ms: u64, min_fair_move_ticks: u32) -> Self {
        Self {
            min_requote_ms,
            min_fair_move_ticks,
            last: None,
        }
    }

    pub fn from_params(params: &ControllerParams) -> Self {
        Self::new(params.min_requote_ms, params.requote_if_fair_moves_ticks)
    }
}

impl RequotePolicy for Throttled {
    fn should_requote(&mut self, candidate: &DesiredQuote, fair_tick: Tick) -> bool {
        if let Some((last_ts, last_tick)) = self.last {
            let too_soon = candidate.ts_ms.saturating_sub(last_ts) < self.min_requote_ms;
            let small_move = fair_tick.abs_diff(last_tick) < u64::from(self.min_fair_move_ticks);
            if too_soon && small_move {
                return false;
            }
        }
        self.last = Some((candidate.ts_ms, fair_tick));
        true
    }
}

/// Which [`RequotePolicy`] a pipeline is built with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequotePolicyKind {
    #[default]
    Always,
    Throttled,
}

impl RequotePolicyKind {
    pub fn build(self, params: &ControllerParams) -> Box<dyn RequotePolicy> {
        match self {
            RequotePolicyKind::Always => Box::new(AlwaysRequote),
            RequotePolicyKind::Throttled => Box::new(Throttled::from_params(params)),
        }
    }
}

pub struct QuoteController {
    params: ControllerParams,
    policy: Box<dyn RequotePolicy>,
    last_quote: Option<DesiredQuote>,
}

impl QuoteController {
    pub fn new(params: ControllerParams, policy: Box<dyn RequotePolicy>) -> Result<Self> {
        tick::check_tick_size(params.tick)?;
        Ok(Self {
            params,
            policy,
            last_quote: None,
        })
    }

    pub fn params(&self) -> &ControllerParams {
        &self.params
    }

    pub fn last_quote(&self) -> Option<&DesiredQuote> {
        self.last_quote.as_ref()
    }

    /// Build the candidate quote around fair value, without consulting the policy
    pub fn quote_for(&self, p_fair: f64, ts_ms: u64) -> Option<(DesiredQuote, Tick)> {
        let tick_size = self.params.tick;
        let fair = Decimal::from_f64(p_fair)?;
        let fair_tick = tick::floor_tick(fair, tick_size)?;

        let half = Decimal::from(self.params.half_spread_ticks) * tick_size;
        let bid = tick::floor_to_tick(fair - half, tick_size);
        let mut ask = tick::ceil_to_tick(fair + half, tick_size);
        if ask <= bid {
            ask = bid + tick_size;
        }

        let quote = DesiredQuote {
            bid,
            ask,
            size: self.params.size,
            ts_ms,
            p_fair,
        };
        Some((quote, fair_tick))
    }

    /// Turn a snapshot into a quote, or nothing if the policy declines
    pub fn on_snapshot(&mut self, snapshot: &FairValueSnapshot) -> Option<DesiredQuote> {
        let ts_ms = snapshot.ts_ms.unwrap_or(0);
        let (quote, fair_tick) = self.quote_for(snapshot.p_fair, ts_ms)?;

        if !self.policy.should_requote(&quote, fair_tick) {
            debug!(fair_tick, ts_ms, "Requote suppressed by policy");
            return None;
        }

        self.last_quote = Some(quote.clone());
        Some(quote)
    }
}
