//! Published resolver state
//!
//! Written only by the control task through a `watch` channel; observers
//! (CLI status line, UIs) read snapshots.

use crate::device::DeviceSummary;
use crate::evidence::tracks::Track;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Snapshot of what the resolver has published
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResolverStatus {
    /// Current resolved sample rate in Hz
    pub sample_rate: Option<f64>,
    /// Bit depth of the current format, when a full format was applied
    pub bit_depth: Option<u32>,
    /// Known output devices
    pub devices: Vec<DeviceSummary>,
    /// Explicit device selection
    pub selected_device: Option<String>,
    /// Host default output device name
    pub default_device: Option<String>,
    /// Device passes currently target
    pub active_device: Option<String>,
    /// Track currently playing
    pub current_track: Option<Track>,
    /// When the published rate last changed
    pub last_switch_at: Option<DateTime<Utc>>,
    /// Number of published rate changes
    pub switch_count: u64,
}

impl ResolverStatus {
    /// Current rate for display, e.g. "96.0 kHz"
    pub fn sample_rate_khz(&self) -> Option<String> {
        self.sample_rate.map(format_khz)
    }
}

/// Format a rate in Hz as kHz with one decimal
pub fn format_khz(rate: f64) -> String {
    format!("{:.1} kHz", rate / 1000.0)
}
