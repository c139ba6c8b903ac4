//! Ratesync Core - Format resolution and retry state machine
//!
//! Keeps an output device's hardware sample rate (and optionally bit depth)
//! in step with the track that is currently being decoded, so playback stays
//! bit-perfect. Evidence about the playing format arrives late and noisily
//! from diagnostic logs; this crate decides which format to apply, when to
//! look again, and when to leave the device alone.

pub mod device;
pub mod evidence;
pub mod format;
pub mod now_playing;
pub mod observer;
pub mod resolver;
pub mod script;

pub use device::context::DeviceContext;
pub use evidence::parser::{Evidence, EvidenceParser};
pub use evidence::tracks::{Track, TrackEvidenceStore};
pub use format::catalog::{AudioFormat, FormatCatalog};
pub use resolver::retry::RetryScheduler;
pub use resolver::status::ResolverStatus;
pub use resolver::{ResolverHandle, ResolverSettings, SampleRateResolver};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Date the crate was built (set by build.rs)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Generic rate the platform reports before the real track format is known
pub const FALLBACK_SAMPLE_RATE: f64 = 48000.0;

/// Bit depth assumed for evidence sources that do not report one
pub const UNKNOWN_BIT_DEPTH: u32 = 24;

/// Sample rates probed on hosts that only advertise continuous ranges
pub const COMMON_SAMPLE_RATES: [u32; 8] = [
    44100, 48000, 88200, 96000, 176400, 192000, 352800, 384000,
];
