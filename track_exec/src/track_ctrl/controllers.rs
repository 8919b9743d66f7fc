//! # Track controllers module
//!
//! This module provides the PD steering law and the throttle regulator used by TrackCtrl.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;

// Internal
use super::Params;
use util::maths::clamp;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Uniform random perturbation on `[-bound, bound]`.
#[derive(Debug, Clone)]
pub struct Dither {
    bound: f64,
    rng: ChaCha8Rng,
}

/// PD lateral controller with a proportional throttle regulator.
#[derive(Debug, Clone, Serialize)]
pub struct PdController {
    /// Proportional gain
    k_p: f64,

    /// Derivative gain
    k_d: f64,

    /// Throttle change per unit of speed error
    k_t: f64,

    min_throttle: f64,
    max_throttle: f64,

    #[serde(skip)]
    dither: Dither,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Dither {
    /// Create a new dither source. With no seed the generator is seeded from the OS.
    pub fn new(bound: f64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => ChaCha8Rng::seed_from_u64(s),
            None => ChaCha8Rng::from_entropy(),
        };

        Self {
            bound: bound.abs(),
            rng,
        }
    }

    /// Draw the next perturbation.
    pub fn sample(&mut self) -> f64 {
        if !(self.bound > 0.0) || !self.bound.is_finite() {
            return 0.0;
        }

        self.rng.gen_range(-self.bound..=self.bound)
    }
}

impl PdController {
    pub fn new(params: &Params) -> Self {
        Self {
            k_p: params.k_p,
            k_d: params.k_d,
            k_t: params.throttle_gain,
            min_throttle: params.min_throttle,
            max_throttle: params.max_throttle,
            dither: Dither::new(params.steer_dither, params.dither_seed),
        }
    }

    /// Steering demand for the given lateral error and smoothed error derivative.
    ///
    /// The demand is not limited here, the simulator saturates it.
    pub fn steer(&mut self, error: f64, smoothed_derivative: f64) -> f64 {
        -self.k_p * error - self.k_d * smoothed_derivative + self.dither.sample()
    }

    /// Throttle demand from the previous demand and the speed error.
    ///
    /// Always within the throttle limits. A non-finite result falls back to the previous
    /// throttle, or the minimum if that is non-finite too.
    pub fn throttle(&self, current_speed: f64, target_speed: f64, previous_throttle: f64) -> f64 {
        let raw = previous_throttle - self.k_t * (current_speed - target_speed);

        let demand = if raw.is_nan() {
            if previous_throttle.is_nan() {
                self.min_throttle
            } else {
                previous_throttle
            }
        } else {
            raw
        };

        clamp(demand, self.min_throttle, self.max_throttle)
    }

    pub fn min_throttle(&self) -> f64 {
        self.min_throttle
    }

    pub fn max_throttle(&self) -> f64 {
        self.max_throttle
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn controller(k_p: f64, k_d: f64, dither: f64) -> PdController {
        PdController::new(&Params {
            k_p,
            k_d,
            steer_dither: dither,
            dither_seed: Some(7),
            ..Default::default()
        })
    }

    #[test]
    fn test_steer_without_dither() {
        let mut c = controller(2.0, 0.5, 0.0);

        assert_eq!(c.steer(-5.0, 0.0), 10.0);
        assert_eq!(c.steer(1.0, 2.0), -3.0);
        assert_eq!(c.steer(0.0, 0.0), 0.0);
    }

    #[test]
    fn test_steer_dither_bounded() {
        let mut c = controller(0.0, 0.0, 0.05);
        let mut any_nonzero = false;

        for _ in 0..1000 {
            let s = c.steer(0.0, 0.0);
            assert!(s.abs() <= 0.05);
            any_nonzero |= s != 0.0;
        }

        assert!(any_nonzero);
    }

    #[test]
    fn test_dither_seeded_repeatable() {
        let mut a = Dither::new(0.05, Some(42));
        let mut b = Dither::new(0.05, Some(42));

        for _ in 0..10 {
            assert_eq!(a.sample(), b.sample());
        }
    }

    #[test]
    fn test_throttle_recurrence() {
        let c = controller(0.0, 0.0, 0.0);

        // Below target speeds up
        assert!((c.throttle(25.0, 30.0, 0.5) - 1.0).abs() < 1e-12);
        assert!((c.throttle(29.0, 30.0, 0.5) - 0.6).abs() < 1e-12);

        // Above target slows down
        assert!((c.throttle(32.0, 30.0, 0.5) - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_throttle_clamped() {
        let c = controller(0.0, 0.0, 0.0);

        assert_eq!(c.throttle(0.0, 30.0, 0.5), 1.0);
        assert_eq!(c.throttle(200.0, 30.0, 0.5), 0.25);
        assert_eq!(c.throttle(f64::MAX, 30.0, 0.5), 0.25);
        assert_eq!(c.throttle(f64::MIN, 30.0, 0.5), 1.0);
        assert_eq!(c.throttle(f64::INFINITY, 30.0, 0.5), 0.25);
    }

    #[test]
    fn test_throttle_non_finite() {
        let c = controller(0.0, 0.0, 0.0);

        assert_eq!(c.throttle(f64::NAN, 30.0, 0.5), 0.5);
        assert_eq!(c.throttle(30.0, 30.0, f64::NAN), 0.25);
        assert_eq!(c.throttle(f64::INFINITY, f64::INFINITY, 0.7), 0.7);
    }
}
