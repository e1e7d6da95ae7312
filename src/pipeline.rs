//! Per-asset event pipeline
//!
//! Each asset gets one [`AssetConsumer`] task that exclusively owns its book,
//! filter and controller. The [`EventRouter`] sits on the ingestion side and
//! hands events to those tasks over bounded channels, so events for one asset
//! are processed strictly in feed order and different assets never share
//! mutable state.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::controller::{ControllerParams, DesiredQuote, QuoteController, RequotePolicyKind};
use crate::error::{FairbookError, Result};
use crate::events::MarketEvent;
use crate::fair_value::{FairValueEngine, FairValueParams, FairValueSnapshot};
use crate::orderbook::OrderBook;
use crate::telemetry::Telemetry;

/// Everything needed to build a fresh pipeline for a newly seen asset
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    /// Tick size a new book starts with, until the feed says otherwise
    pub tick_size: Decimal,
    pub fair_value: FairValueParams,
    pub controller: ControllerParams,
    pub requote_policy: RequotePolicyKind,
}

/// A desired quote tagged with the asset it is for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteUpdate {
    pub asset_id: String,
    pub quote: DesiredQuote,
}

/// Book, fair value engine and controller for one asset
pub struct AssetPipeline {
    book: OrderBook,
    engine: FairValueEngine,
    controller: QuoteController,
    last_snapshot: Option<FairValueSnapshot>,
}

impl AssetPipeline {
    pub fn new(asset_id: &str, settings: &PipelineSettings) -> Result<Self> {
        Ok(Self {
            book: OrderBook::new(asset_id, settings.tick_size)?,
            engine: FairValueEngine::new(settings.fair_value),
            controller: QuoteController::new(
                settings.controller.clone(),
                settings.requote_policy.build(&settings.controller),
            )?,
            last_snapshot: None,
        })
    }

    pub fn book(&self) -> &OrderBook {
        &self.book
    }

    pub fn engine(&self) -> &FairValueEngine {
        &self.engine
    }

    /// Snapshot produced by the most recent event, if the book was ready
    pub fn last_snapshot(&self) -> Option<&FairValueSnapshot> {
        self.last_snapshot.as_ref()
    }

    /// Run one event through book, filter and controller, in that order.
    ///
    /// A rejected event leaves every stage untouched. Unknown events never
    /// step the filter.
    pub fn on_event(&mut self, event: &MarketEvent) -> Result<Option<DesiredQuote>> {
        self.book.apply(event)?;

        if let MarketEvent::Unknown(_) = event {
            return Ok(None);
        }

        self.last_snapshot = self.engine.on_book(&self.book);
        Ok(self
            .last_snapshot
            .as_ref()
            .and_then(|snapshot| self.controller.on_snapshot(snapshot)))
    }
}

/// Single consumer owning one asset's pipeline
pub struct AssetConsumer {
    asset_id: String,
    pipeline: AssetPipeline,
    events: mpsc::Receiver<MarketEvent>,
    quotes: mpsc::Sender<QuoteUpdate>,
    telemetry: Arc<Telemetry>,
}

impl AssetConsumer {
    pub fn new(
        asset_id: &str,
        pipeline: AssetPipeline,
        events: mpsc::Receiver<MarketEvent>,
        quotes: mpsc::Sender<QuoteUpdate>,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        Self {
            asset_id: asset_id.to_string(),
            pipeline,
            events,
            quotes,
            telemetry,
        }
    }

    /// Process one event, logging and counting failures instead of returning them
    pub fn process(&mut self, event: &MarketEvent) -> Option<QuoteUpdate> {
        let kind = event.kind();
        match self.pipeline.on_event(event) {
            Ok(quote) => {
                self.telemetry.record_applied(&self.asset_id, kind);
                match self.pipeline.last_snapshot() {
                    Some(snapshot) => {
                        self.telemetry.record_fair_value(&self.asset_id, snapshot.p_fair)
                    }
                    None => self.telemetry.record_not_ready(&self.asset_id),
                }
                trace!(
                    asset_id = %self.asset_id,
                    kind = %kind,
                    seq = self.pipeline.book().update_seq(),
                    "Event applied"
                );

                quote.map(|quote| {
                    self.telemetry.record_quote(&self.asset_id, &quote);
                    debug!(
                        asset_id = %self.asset_id,
                        bid = %quote.bid,
                        ask = %quote.ask,
                        p_fair = quote.p_fair,
                        "Desired quote"
                    );
                    QuoteUpdate {
                        asset_id: self.asset_id.clone(),
                        quote,
                    }
                })
            }
            Err(e) => {
                self.telemetry.record_failure(&self.asset_id, &e);
                warn!(asset_id = %self.asset_id, kind = %kind, error = %e, "Event rejected");
                None
            }
        }
    }

    /// Hand the pending quote to the sink if it has room. Returns `false`
    /// once the sink is gone.
    fn flush(&self, pending: &mut Option<QuoteUpdate>) -> bool {
        let Some(update) = pending.take() else {
            return true;
        };
        match self.quotes.try_send(update) {
            Ok(()) => true,
            Err(TrySendError::Full(update)) => {
                *pending = Some(update);
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Drain events until the router hangs up or the quote sink goes away.
    ///
    /// Event processing never waits on the sink. While the sink is backed up
    /// at most one quote is held, and a newer quote replaces it.
    pub async fn run(mut self) {
        info!(asset_id = %self.asset_id, "Asset consumer started");

        // permits borrow this handle, not `self`
        let sink = self.quotes.clone();
        let mut pending: Option<QuoteUpdate> = None;
        let mut sink_open = true;

        loop {
            tokio::select! {
                permit = sink.reserve(), if pending.is_some() => match permit {
                    Ok(permit) => {
                        if let Some(update) = pending.take() {
                            permit.send(update);
                        }
                    }
                    Err(_) => {
                        sink_open = false;
                        break;
                    }
                },
                event = self.events.recv() => {
                    let Some(event) = event else {
                        break;
                    };
                    if let Some(update) = self.process(&event) {
                        if pending.replace(update).is_some() {
                            self.telemetry.record_superseded(&self.asset_id);
                        }
                        if !self.flush(&mut pending) {
                            sink_open = false;
                            break;
                        }
                    }
                }
            }
        }

        if !sink_open {
            warn!(asset_id = %self.asset_id, "Quote sink closed, stopping consumer");
        } else if let Some(update) = pending.take() {
            if self.quotes.send(update).await.is_err() {
                warn!(asset_id = %self.asset_id, "Quote sink closed before final quote");
            }
        }

        info!(asset_id = %self.asset_id, "Asset consumer stopped");
    }
}

/// Event channel and task of one running consumer
struct ConsumerHandle {
    events: mpsc::Sender<MarketEvent>,
    task: JoinHandle<()>,
}

/// Fans decoded events out to per-asset consumers
pub struct EventRouter {
    settings: PipelineSettings,
    capacity: usize,
    consumers: HashMap<String, ConsumerHandle>,
    quotes: mpsc::Sender<QuoteUpdate>,
    telemetry: Arc<Telemetry>,
}

impl EventRouter {
    pub fn new(
        settings: PipelineSettings,
        capacity: usize,
        quotes: mpsc::Sender<QuoteUpdate>,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        Self {
            settings,
            capacity: capacity.max(1),
            consumers: HashMap::new(),
            quotes,
            telemetry,
        }
    }

    /// Spawn a consumer with an empty book for `asset_id`, if none exists yet
    pub fn register(&mut self, asset_id: &str) -> Result<()> {
        if self.consumers.contains_key(asset_id) {
            return Ok(());
        }

        self.consumers.retain(|asset_id, consumer| {
            let finished = consumer.task.is_finished();
            if finished {
                debug!(asset_id = %asset_id, "Pruning exited consumer");
            }
            !finished
        });

        let pipeline = AssetPipeline::new(asset_id, &self.settings)?;
        let (tx, rx) = mpsc::channel(self.capacity);
        let consumer = AssetConsumer::new(
            asset_id,
            pipeline,
            rx,
            self.quotes.clone(),
            self.telemetry.clone(),
        );

        self.consumers.insert(
            asset_id.to_string(),
            ConsumerHandle {
                events: tx,
                task: tokio::spawn(consumer.run()),
            },
        );
        Ok(())
    }

    pub fn assets(&self) -> Vec<String> {
        self.consumers.keys().cloned().collect()
    }

    /// Hand an event to the consumers of the assets it touches
    pub async fn route(&mut self, event: MarketEvent) -> Result<()> {
        if let MarketEvent::Unknown(unknown) = &event {
            debug!(
                market = ?unknown.market,
                event_type = ?unknown.event_type,
                "Unknown market event"
            );
            return Ok(());
        }

        for (asset_id, event) in event.split_by_asset() {
            self.register(&asset_id)?;
            let sender = self
                .consumers
                .get(&asset_id)
                .map(|consumer| consumer.events.clone())
                .ok_or_else(|| FairbookError::ChannelClosed(asset_id.clone()))?;

            if sender.send(event).await.is_err() {
                self.consumers.remove(&asset_id);
                return Err(FairbookError::ChannelClosed(asset_id));
            }
        }

        Ok(())
    }

    /// Close every consumer channel and wait for the consumers to drain
    pub async fn shutdown(mut self) {
        let tasks: Vec<JoinHandle<()>> = self
            .consumers
            .drain()
            .map(|(_, consumer)| consumer.task)
            .collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Asset consumer task failed");
            }
        }
    }
}
