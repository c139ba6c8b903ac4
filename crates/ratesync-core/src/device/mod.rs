//! Output devices
//!
//! - Device and provider traits the resolver works against (this module)
//! - Active device tracking and de-duplicated writes ([`context`])
//! - cpal / CoreAudio backed implementation ([`host`])

pub mod context;
pub mod host;

use crate::format::catalog::AudioFormat;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur while reading or configuring a device
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to query device '{device}': {reason}")]
    Query { device: String, reason: String },

    #[error("Failed to set {what} on '{device}': {reason}")]
    Write {
        device: String,
        what: String,
        reason: String,
    },

    #[error("Changing the {0} is not supported on this host")]
    Unsupported(&'static str),
}

/// One output device as seen by the resolver
pub trait OutputDevice: Send + Sync {
    /// Stable identity used to notice device switches
    fn id(&self) -> &str;

    /// Human-readable name, used for selection matching
    fn name(&self) -> &str;

    /// Rate the device currently runs at
    fn nominal_sample_rate(&self) -> Result<f64, DeviceError>;

    /// Nominal rates the device advertises
    fn supported_sample_rates(&self) -> Result<Vec<f64>, DeviceError>;

    /// Physical (rate, bit depth) formats of the output stream, if readable
    fn output_stream_formats(&self) -> Option<Vec<AudioFormat>>;

    fn set_nominal_sample_rate(&self, rate: f64) -> Result<(), DeviceError>;

    fn set_physical_format(&self, format: AudioFormat) -> Result<(), DeviceError>;
}

/// Enumerates output devices
pub trait DeviceProvider: Send + Sync {
    fn output_devices(&self) -> Result<Vec<Arc<dyn OutputDevice>>, DeviceError>;

    fn default_output_device(&self) -> Option<Arc<dyn OutputDevice>>;
}

/// Published description of a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSummary {
    pub id: String,
    pub name: String,
    /// Whether this is the host default output device
    pub is_default: bool,
}

/// Device state read on the worker for one resolution pass
#[derive(Debug, Clone, Default)]
pub struct DeviceSnapshot {
    /// Advertised physical formats; `None` when unreadable
    pub formats: Option<Vec<AudioFormat>>,
    /// Advertised nominal rates
    pub supported_rates: Vec<f64>,
}

impl DeviceSnapshot {
    /// Read formats and rates from `device` (blocking)
    pub fn read(device: &dyn OutputDevice) -> Self {
        let supported_rates = match device.supported_sample_rates() {
            Ok(rates) => rates,
            Err(e) => {
                tracing::warn!(device = device.name(), error = %e, "failed to read nominal rates");
                Vec::new()
            }
        };
        let formats = if supported_rates.is_empty() {
            None
        } else {
            device.output_stream_formats().filter(|f| !f.is_empty())
        };
        Self {
            formats,
            supported_rates,
        }
    }
}

/// Case-insensitive substring match used for explicit device selection
pub fn matches_device_name(name: &str, needle: &str) -> bool {
    name.to_lowercase().contains(&needle.trim().to_lowercase())
}
