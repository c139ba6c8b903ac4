//! Best achievable output format for a requested rate and bit depth
//!
//! The sample rate is matched first against the device's nominal rates.
//! The bit depth is matched independently against every advertised physical
//! format, and only then are the two intersected. Rate correctness wins;
//! bit depth is best effort and may find no exact pairing, in which case the
//! device is left untouched.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Two rates closer than this are the same rate
const RATE_TOLERANCE_HZ: f64 = 0.5;

/// A (sample rate, bits per channel) pair a device can be configured to
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Sample rate in Hz
    pub sample_rate: f64,
    /// Bits per channel
    pub bit_depth: u32,
}

impl AudioFormat {
    pub fn new(sample_rate: f64, bit_depth: u32) -> Self {
        Self {
            sample_rate,
            bit_depth,
        }
    }

    /// Whether `other` has the same rate (within tolerance) and bit depth
    pub fn matches(&self, other: &AudioFormat) -> bool {
        same_rate(self.sample_rate, other.sample_rate) && self.bit_depth == other.bit_depth
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1} kHz / {}-bit", self.sample_rate / 1000.0, self.bit_depth)
    }
}

/// Whether two sample rates are the same rate
pub fn same_rate(a: f64, b: f64) -> bool {
    (a - b).abs() < RATE_TOLERANCE_HZ
}

/// Advertised formats of one device, borrowed for a single resolution
///
/// # Example
/// ```
/// use ratesync_core::format::catalog::{AudioFormat, FormatCatalog};
///
/// let formats = [
///     AudioFormat::new(44100.0, 16),
///     AudioFormat::new(44100.0, 24),
///     AudioFormat::new(96000.0, 24),
/// ];
/// let rates = [44100.0, 48000.0, 96000.0];
///
/// let catalog = FormatCatalog::new(&formats, &rates);
/// assert_eq!(catalog.resolve(88200.0, 24), Some(AudioFormat::new(96000.0, 24)));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct FormatCatalog<'a> {
    formats: &'a [AudioFormat],
    supported_rates: &'a [f64],
}

impl<'a> FormatCatalog<'a> {
    /// Create a catalog over a device's physical formats and nominal rates
    pub fn new(formats: &'a [AudioFormat], supported_rates: &'a [f64]) -> Self {
        Self {
            formats,
            supported_rates,
        }
    }

    /// Supported nominal rate closest to `requested`
    ///
    /// Ties keep the first rate in advertised order.
    pub fn nearest_rate(&self, requested: f64) -> Option<f64> {
        self.supported_rates
            .iter()
            .copied()
            .min_by(|a, b| (a - requested).abs().total_cmp(&(b - requested).abs()))
    }

    /// Bit depth closest to `requested` across all advertised formats
    ///
    /// Not restricted to any particular rate. Ties keep the first format in
    /// advertised order.
    pub fn nearest_bit_depth(&self, requested: u32) -> Option<u32> {
        self.formats
            .iter()
            .map(|f| f.bit_depth)
            .min_by_key(|depth| depth.abs_diff(requested))
    }

    /// Resolve the format to apply for a requested rate and bit depth
    ///
    /// # Returns
    /// The first advertised format matching both the nearest rate and the
    /// nearest bit depth, or `None` when that pairing is not advertised.
    pub fn resolve(&self, requested_rate: f64, requested_bit_depth: u32) -> Option<AudioFormat> {
        let rate = self.nearest_rate(requested_rate)?;
        let bit_depth = self.nearest_bit_depth(requested_bit_depth)?;

        let resolved = self
            .formats
            .iter()
            .find(|f| same_rate(f.sample_rate, rate) && f.bit_depth == bit_depth)
            .copied();

        tracing::trace!(
            requested_rate,
            requested_bit_depth,
            nearest_rate = rate,
            nearest_bit_depth = bit_depth,
            resolved = ?resolved,
            "format_resolved"
        );

        resolved
    }
}
