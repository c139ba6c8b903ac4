//! Ratesync - Bit-perfect sample rate synchronization
//!
//! Watches what is playing and switches the output device's hardware sample
//! rate to match, so the signal reaches the DAC without resampling.

pub mod config;

pub use ratesync_core::*;
