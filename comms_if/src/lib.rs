//! # Communications interface crate.
//!
//! Provides the network layer and the message definitions exchanged with the driving simulator.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Network module
pub mod net;

/// Simulator requests, responses and the data they carry
pub mod sim;
