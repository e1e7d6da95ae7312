//! Configuration module
//!
//! Layered as: built-in defaults, then an optional `fairbook.{toml,yaml,json}`
//! file, then `FAIRBOOK_*` environment variables (nested keys use `__`, e.g.
//! `FAIRBOOK_FILTER__Q=0.001`, `FAIRBOOK_FEED__ASSET_IDS=a,b`).

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::controller::{ControllerParams, RequotePolicyKind};
use crate::error::{FairbookError, Result};
use crate::fair_value::{FairValueParams, NoiseModel, ObservationMode};
use crate::pipeline::PipelineSettings;

/// Market channel connection settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Market channel WebSocket endpoint
    pub ws_endpoint: String,
    /// Outcome token ids to subscribe to
    pub asset_ids: Vec<String>,
    /// Resolved to token ids through discovery when `asset_ids` is empty
    pub condition_id: Option<String>,
    pub gamma_endpoint: String,
    pub clob_endpoint: String,
    pub custom_feature_enabled: bool,
    pub ping_interval_secs: u64,
    pub reconnect_delay_ms: u64,
    /// Bound of each per-asset event channel
    pub channel_capacity: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            ws_endpoint: "wss://ws-subscriptions-clob.polymarket.com/ws/market".to_string(),
            asset_ids: Vec::new(),
            condition_id: None,
            gamma_endpoint: "https://gamma-api.polymarket.com".to_string(),
            clob_endpoint: "https://clob.polymarket.com".to_string(),
            custom_feature_enabled: true,
            ping_interval_secs: 5,
            reconnect_delay_ms: 1000,
            channel_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BookConfig {
    pub tick_size: Decimal,
    /// Levels per side summed for depth and imbalance
    pub depth_levels: usize,
}

impl Default for BookConfig {
    fn default() -> Self {
        Self {
            tick_size: Decimal::new(1, 3),
            depth_levels: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub q: f64,
    pub x0: f64,
    pub p0: f64,
    pub obs_mode: ObservationMode,
    pub blend_alpha: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        let defaults = FairValueParams::default();
        Self {
            q: defaults.q,
            x0: defaults.x0,
            p0: defaults.p0,
            obs_mode: defaults.obs_mode,
            blend_alpha: defaults.blend_alpha,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub size: Decimal,
    pub half_spread_ticks: u32,
    pub min_requote_ms: u64,
    pub requote_if_fair_moves_ticks: u32,
    pub requote_policy: RequotePolicyKind,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        let defaults = ControllerParams::default();
        Self {
            size: defaults.size,
            half_spread_ticks: defaults.half_spread_ticks,
            min_requote_ms: defaults.min_requote_ms,
            requote_if_fair_moves_ticks: defaults.requote_if_fair_moves_ticks,
            requote_policy: RequotePolicyKind::default(),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub feed: FeedConfig,
    pub book: BookConfig,
    pub filter: FilterConfig,
    pub noise: NoiseModel,
    pub controller: ControllerConfig,

    /// IPC socket path for publishing quotes
    pub ipc_socket_path: String,

    /// Port for the health and metrics server
    pub health_port: u16,

    /// JSON log lines instead of human-readable ones
    pub log_json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            feed: FeedConfig::default(),
            book: BookConfig::default(),
            filter: FilterConfig::default(),
            noise: NoiseModel::default(),
            controller: ControllerConfig::default(),
            ipc_socket_path: "/tmp/fairbook.sock".to_string(),
            health_port: 9090,
            log_json: true,
        }
    }
}

impl Config {
    /// Load configuration from the optional config file and the environment
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let settings = config::Config::builder()
            .add_source(config::File::with_name("fairbook").required(false))
            .add_source(
                config::Environment::with_prefix("FAIRBOOK")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("feed.asset_ids"),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(FairbookError::ConfigError(msg));

        if self.book.tick_size <= Decimal::ZERO {
            return invalid(format!("book.tick_size must be positive, got {}", self.book.tick_size));
        }
        if self.book.depth_levels == 0 {
            return invalid("book.depth_levels must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.filter.blend_alpha) {
            return invalid(format!(
                "filter.blend_alpha must be within [0, 1], got {}",
                self.filter.blend_alpha
            ));
        }
        if !(self.filter.q > 0.0) || !(self.filter.p0 > 0.0) {
            return invalid("filter.q and filter.p0 must be positive".to_string());
        }
        let noise = &self.noise;
        if [noise.a0, noise.a_spread, noise.a_depth, noise.a_imb]
            .iter()
            .any(|a| !(*a >= 0.0))
        {
            return invalid("noise coefficients must be non-negative".to_string());
        }
        if self.controller.size <= Decimal::ZERO {
            return invalid("controller.size must be positive".to_string());
        }
        if self.feed.asset_ids.is_empty() && self.feed.condition_id.is_none() {
            return invalid("set feed.asset_ids or feed.condition_id".to_string());
        }

        Ok(())
    }

    /// Settings each per-asset pipeline is built from
    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            tick_size: self.book.tick_size,
            fair_value: FairValueParams {
                q: self.filter.q,
                x0: self.filter.x0,
                p0: self.filter.p0,
                noise: self.noise,
                depth_levels: self.book.depth_levels,
                obs_mode: self.filter.obs_mode,
                blend_alpha: self.filter.blend_alpha,
            },
            controller: ControllerParams {
                size: self.controller.size,
                tick: self.book.tick_size,
                half_spread_ticks: self.controller.half_spread_ticks,
                min_requote_ms: self.controller.min_requote_ms,
                requote_if_fair_moves_ticks: self.controller.requote_if_fair_moves_ticks,
            },
            requote_policy: self.controller.requote_policy,
        }
    }
}
