//! Track control parameters

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use serde::Deserialize;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for track control
#[derive(Deserialize, Debug, Clone)]
pub struct Params {
    /// Lateral error proportional gain
    pub k_p: f64,

    /// Lateral error derivative gain
    pub k_d: f64,

    /// Speed the throttle regulator aims for, in km/h
    pub target_speed_kmh: f64,

    /// Number of instantaneous derivatives averaged by the error smoother
    pub deriv_window: usize,

    /// Half width of the uniform dither added to the steering demand
    pub steer_dither: f64,

    /// Throttle change per km/h of speed error
    pub throttle_gain: f64,

    /// Throttle demand minimum limit
    pub min_throttle: f64,

    /// Throttle demand maximum limit
    pub max_throttle: f64,

    /// Throttle demand at the start of an episode
    pub initial_throttle: f64,

    /// Seed of the dither generator, `None` seeds from the OS
    pub dither_seed: Option<u64>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for Params {
    fn default() -> Self {
        Self {
            k_p: 0.0,
            k_d: 0.0,
            target_speed_kmh: 30.0,
            deriv_window: 5,
            steer_dither: 0.05,
            throttle_gain: 0.1,
            min_throttle: 0.25,
            max_throttle: 1.0,
            initial_throttle: 0.5,
            dither_seed: None,
        }
    }
}
