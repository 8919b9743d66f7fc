//! # Track control module
//!
//! Track control keeps the vehicle on the reference path of the race track. Each cycle the
//! vehicle's position is projected onto the dense points of the path, giving the closest point
//! and the signed lateral error to it. The error is positive when the vehicle is to the left of
//! the path, looking along the direction of travel.
//!
//! Steering is a PD law on the lateral error. The derivative term uses a smoothed estimate of the
//! error's derivative, the mean of the last few central differences of the error, as the raw
//! difference is too noisy to use directly. A small uniform dither is added to the steering
//! demand.
//!
//! The throttle is regulated separately, each cycle it is nudged against the difference between
//! the current and target speeds and held within its limits.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod controllers;
pub mod params;
pub mod projector;
pub mod smoother;
pub mod state;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// Internal
pub use controllers::*;
pub use params::Params;
pub use projector::*;
pub use smoother::*;
pub use state::*;
