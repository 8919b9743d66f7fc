//! # Track library.
//!
//! This library holds the track controller used by the `track_exec` executable, and allows it to
//! be tested and benchmarked without a simulator.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Command line arguments
pub mod cli;

/// Episode runner - runs the control loop against the simulator and archives the results
pub mod episode;

/// Simulation client - lock-step session with the driving simulator
pub mod sim_client;

/// Track model - reference path fitted to the track waypoints
pub mod track;

/// Track control module - keeps the vehicle on the reference path
pub mod track_ctrl;
