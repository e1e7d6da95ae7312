//! Fair value estimation
//!
//! Turns order book microstructure into a filtered fair probability. The
//! engine keeps one Kalman state per asset and steps it once per applied
//! event while the book has a two-sided touch.

pub mod features;
pub mod filter;

pub use features::MicroFeatures;
pub use filter::{KalmanState, NoiseModel};

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::orderbook::OrderBook;

/// Which price the filter observes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObservationMode {
    Mid,
    Microprice,
    /// `alpha * microprice + (1 - alpha) * mid`
    Blend,
}

/// Filter configuration, fixed for the life of an engine
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FairValueParams {
    /// Process noise added to the variance on every step
    pub q: f64,
    /// Initial logit mean
    pub x0: f64,
    /// Initial logit variance
    pub p0: f64,
    pub noise: NoiseModel,
    pub depth_levels: usize,
    pub obs_mode: ObservationMode,
    pub blend_alpha: f64,
}

impl Default for FairValueParams {
    fn default() -> Self {
        Self {
            q: 0.0005,
            x0: 0.0,
            p0: 1.0,
            noise: NoiseModel::default(),
            depth_levels: 5,
            obs_mode: ObservationMode::Microprice,
            blend_alpha: 0.7,
        }
    }
}

/// Output of one filter step
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FairValueSnapshot {
    pub ts_ms: Option<u64>,
    /// Observed probability fed to the filter
    pub p_obs: f64,
    /// Filtered fair probability, `sigmoid(x_fair)`
    pub p_fair: f64,
    pub x_fair: f64,
    /// Posterior logit variance
    pub p: f64,
    /// Observation variance used for this step
    pub r: f64,
    pub features: MicroFeatures,
}

#[derive(Debug, Clone)]
pub struct FairValueEngine {
    state: KalmanState,
    params: FairValueParams,
}

impl FairValueEngine {
    pub fn new(params: FairValueParams) -> Self {
        Self {
            state: KalmanState::new(params.x0, params.p0),
            params,
        }
    }

    pub fn state(&self) -> KalmanState {
        self.state
    }

    pub fn params(&self) -> &FairValueParams {
        &self.params
    }

    fn choose_observation(&self, features: &MicroFeatures) -> f64 {
        match self.params.obs_mode {
            ObservationMode::Mid => features.mid,
            ObservationMode::Microprice => features.microprice,
            ObservationMode::Blend => {
                let a = self.params.blend_alpha.clamp(0.0, 1.0);
                a * features.microprice + (1.0 - a) * features.mid
            }
        }
    }

    /// Step the filter against the current book.
    ///
    /// Returns `None`, leaving the state untouched, while the book has no
    /// two-sided touch.
    pub fn on_book(&mut self, book: &OrderBook) -> Option<FairValueSnapshot> {
        let features = features::extract(book, self.params.depth_levels)?;
        Some(self.on_features(features, book.ts_ms()))
    }

    /// Step the filter against an already extracted feature vector
    pub fn on_features(&mut self, features: MicroFeatures, ts_ms: Option<u64>) -> FairValueSnapshot {
        let p_obs = self.choose_observation(&features);
        let y = filter::logit(p_obs);
        let r = self.params.noise.observation_variance(&features);

        self.state = self.state.step(y, r, self.params.q);
        let p_fair = filter::sigmoid(self.state.x);

        trace!(p_obs, p_fair, r, variance = self.state.p, "Fair value step");

        FairValueSnapshot {
            ts_ms,
            p_obs,
            p_fair,
            x_fair: self.state.x,
            p: self.state.p,
            r,
            features,
        }
    }
}
