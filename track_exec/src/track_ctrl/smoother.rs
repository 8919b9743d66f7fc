//! # Error smoother
//!
//! Turns the raw lateral error into a smoothed derivative estimate. The instantaneous derivative
//! is a central difference over the last three errors, `0.5 * (curr - prev_prev)`, and the output
//! is the mean of the last `window` of those.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use serde::Serialize;
use std::collections::VecDeque;

// Internal
use util::maths::mean;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Error history of the tracking loop.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TrackingState {
    pub prev_prev_error: Option<f64>,
    pub prev_error: Option<f64>,
    pub curr_error: Option<f64>,

    /// Most recent instantaneous derivatives, oldest first
    pub derivs: VecDeque<f64>,
}

/// Moving average smoother of the error derivative.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorSmoother {
    window: usize,
    state: TrackingState,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SmootherError {
    #[error("The derivative window must hold at least one value")]
    ZeroWindow,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl ErrorSmoother {
    /// Create a new smoother averaging over `window` derivatives.
    pub fn new(window: usize) -> Result<Self, SmootherError> {
        if window == 0 {
            return Err(SmootherError::ZeroWindow);
        }

        Ok(Self {
            window,
            state: TrackingState {
                derivs: VecDeque::with_capacity(window + 1),
                ..Default::default()
            },
        })
    }

    /// Push a new error and get the smoothed derivative.
    ///
    /// Until three errors have been seen this returns exactly zero.
    pub fn update(&mut self, signed_error: f64) -> f64 {
        let s = &mut self.state;

        s.prev_prev_error = s.prev_error;
        s.prev_error = s.curr_error;
        s.curr_error = Some(signed_error);

        let (curr, prev_prev) = match (s.curr_error, s.prev_error, s.prev_prev_error) {
            (Some(c), Some(_), Some(pp)) => (c, pp),
            _ => return 0.0,
        };

        s.derivs.push_back(0.5 * (curr - prev_prev));
        while s.derivs.len() > self.window {
            s.derivs.pop_front();
        }

        mean(s.derivs.iter()).unwrap_or(0.0)
    }

    /// Forget all previous errors.
    pub fn reset(&mut self) {
        self.state.prev_prev_error = None;
        self.state.prev_error = None;
        self.state.curr_error = None;
        self.state.derivs.clear();
    }

    pub fn state(&self) -> &TrackingState {
        &self.state
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
