//! Scalar Kalman filter in logit space
//!
//! State-space model, with `x` the log-odds of the fair probability:
//! - State: x_t = x_{t-1} + w_t, w_t ~ N(0, Q)
//! - Observation: y_t = logit(p_obs) = x_t + v_t, v_t ~ N(0, R_t)
//!
//! R_t is rebuilt from the book on every step so that wide, thin or lopsided
//! books are trusted less.

use serde::{Deserialize, Serialize};

use super::features::MicroFeatures;

/// Clamp applied before taking a logit
pub const LOGIT_EPS: f64 = 1e-9;

/// Floors inside the observation variance
const SPREAD_FLOOR: f64 = 1e-6;
const DEPTH_FLOOR: f64 = 1e-6;
const R_FLOOR: f64 = 1e-12;

pub fn logit(p: f64) -> f64 {
    let p = p.clamp(LOGIT_EPS, 1.0 - LOGIT_EPS);
    (p / (1.0 - p)).ln()
}

/// Logistic function, split by sign so `exp` never overflows
pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let z = x.exp();
        z / (1.0 + z)
    }
}

/// Coefficients of the adaptive observation variance
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseModel {
    pub a0: f64,
    pub a_spread: f64,
    pub a_depth: f64,
    pub a_imb: f64,
}

impl Default for NoiseModel {
    fn default() -> Self {
        Self {
            a0: 0.01,
            a_spread: 50.0,
            a_depth: 10.0,
            a_imb: 0.1,
        }
    }
}

impl NoiseModel {
    /// `R = a0 + a_spread*spread^2 + a_depth/depth + a_imb*imbalance^2`
    pub fn observation_variance(&self, features: &MicroFeatures) -> f64 {
        let spread = features.spread.max(SPREAD_FLOOR);
        let depth = (features.depth_bid + features.depth_ask).max(DEPTH_FLOOR);
        let imb = features.imbalance;

        let r = self.a0
            + self.a_spread * spread * spread
            + self.a_depth / depth
            + self.a_imb * imb * imb;
        r.max(R_FLOOR)
    }
}

/// Gaussian belief over the logit of fair value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KalmanState {
    /// Posterior mean
    pub x: f64,
    /// Posterior variance
    pub p: f64,
}

impl KalmanState {
    pub fn new(x0: f64, p0: f64) -> Self {
        Self { x: x0, p: p0 }
    }

    /// One random-walk predict + update step
    pub fn step(self, y: f64, r: f64, q: f64) -> Self {
        let x_pred = self.x;
        let p_pred = self.p + q;

        let k = p_pred / (p_pred + r);
        let innovation = y - x_pred;

        Self {
            x: x_pred + k * innovation,
            p: (1.0 - k) * p_pred,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features(spread: f64, depth: f64, imbalance: f64) -> MicroFeatures {
        MicroFeatures {
            spread,
            depth_bid: depth / 2.0,
            depth_ask: depth / 2.0,
            imbalance,
            mid: 0.5,
            microprice: 0.5,
        }
    }

    #[test]
    fn test_logit_sigmoid_inverse() {
        for p in [0.01, 0.2, 0.5, 0.77, 0.99] {
            assert!((sigmoid(logit(p)) - p).abs() < 1e-12);
        }
        assert_eq!(logit(0.5), 0.0);
        assert!(logit(0.0).is_finite());
        assert!(logit(1.0).is_finite());
        assert!(sigmoid(800.0) <= 1.0);
        assert!(sigmoid(-800.0) >= 0.0);
    }

    #[test]
    fn test_observation_variance_formula() {
        let noise = NoiseModel {
            a0: 0.01,
            a_spread: 50.0,
            a_depth: 10.0,
            a_imb: 0.1,
        };
        let r = noise.observation_variance(&features(0.02, 200.0, 0.5));
        let expected = 0.01 + 50.0 * 0.0004 + 10.0 / 200.0 + 0.1 * 0.25;
        assert!((r - expected).abs() < 1e-12);
    }

    #[test]
    fn test_observation_variance_grows_with_bad_books() {
        let noise = NoiseModel::default();
        let base = noise.observation_variance(&features(0.01, 500.0, 0.0));

        assert!(noise.observation_variance(&features(0.05, 500.0, 0.0)) > base);
        assert!(noise.observation_variance(&features(0.01, 20.0, 0.0)) > base);
        assert!(noise.observation_variance(&features(0.01, 500.0, 0.8)) > base);
    }

    #[test]
    fn test_observation_variance_floors() {
        let noise = NoiseModel {
            a0: 0.0,
            a_spread: 1.0,
            a_depth: 1.0,
            a_imb: 0.0,
        };
        // zero spread and empty depth hit their floors, not zero or infinity
        let r = noise.observation_variance(&features(0.0, 0.0, 0.0));
        assert!((r - (1e-12 + 1.0 / 1e-6)).abs() < 1e-3);

        let zero = NoiseModel {
            a0: 0.0,
            a_spread: 0.0,
            a_depth: 0.0,
            a_imb: 0.0,
        };
        assert_eq!(zero.observation_variance(&features(0.0, 10.0, 0.0)), 1e-12);
    }

    #[test]
    fn test_step_matches_closed_form() {
        let state = KalmanState::new(0.0, 1.0).step(2.0, 1.0, 0.0);
        assert!((state.x - 1.0).abs() < 1e-12);
        assert!((state.p - 0.5).abs() < 1e-12);
    }
}
