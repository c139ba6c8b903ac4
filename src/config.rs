//! Persistent application configuration
//!
//! Stores the device selection, detection mode, collaborator commands and
//! timing in a JSON file at `<data_dir>/ratesync/config.json`. Every field
//! has a default so older or hand-written files keep loading.

use ratesync_core::evidence::tracks::DEFAULT_TRACK_CACHE_CAPACITY;
use ratesync_core::observer::DEFAULT_DEVICE_POLL_INTERVAL;
use ratesync_core::resolver::coalesce::DEFAULT_NOW_PLAYING_SPACING;
use ratesync_core::resolver::retry::{DEFAULT_MAX_ATTEMPTS, DEFAULT_POLL_INTERVAL};
use ratesync_core::resolver::{ResolverSettings, DEFAULT_RETRY_DELAY};
use ratesync_core::FALLBACK_SAMPLE_RATE;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL.as_millis() as u64
}

fn default_max_poll_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_retry_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY.as_millis() as u64
}

fn default_now_playing_spacing_ms() -> u64 {
    DEFAULT_NOW_PLAYING_SPACING.as_millis() as u64
}

fn default_device_poll_interval_ms() -> u64 {
    DEFAULT_DEVICE_POLL_INTERVAL.as_millis() as u64
}

fn default_track_cache_capacity() -> usize {
    DEFAULT_TRACK_CACHE_CAPACITY
}

/// Persistent application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Output device name substring (None = follow the system default)
    #[serde(default)]
    pub device: Option<String>,
    /// Use bit-depth-carrying diagnostics and apply full physical formats
    #[serde(default)]
    pub prefer_bit_depth_detection: bool,
    /// Script run with the new rate in Hz after every switch
    #[serde(default)]
    pub post_switch_script: Option<PathBuf>,
    /// Command printing the now-playing dictionary as JSON
    #[serde(default)]
    pub now_playing_command: Option<Vec<String>>,
    /// Interval between passes after a track change
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Passes per track change
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,
    /// Delay of the single in-pass retry
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Minimum spacing between now-playing checks
    #[serde(default = "default_now_playing_spacing_ms")]
    pub now_playing_spacing_ms: u64,
    /// Interval between device samples
    #[serde(default = "default_device_poll_interval_ms")]
    pub device_poll_interval_ms: u64,
    /// Number of tracks whose rates are remembered
    #[serde(default = "default_track_cache_capacity")]
    pub track_cache_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            device: None,
            prefer_bit_depth_detection: false,
            post_switch_script: None,
            now_playing_command: None,
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_attempts: default_max_poll_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            now_playing_spacing_ms: default_now_playing_spacing_ms(),
            device_poll_interval_ms: default_device_poll_interval_ms(),
            track_cache_capacity: default_track_cache_capacity(),
        }
    }
}

impl AppConfig {
    /// Config file path: `<data_dir>/ratesync/config.json`
    pub fn path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ratesync")
            .join("config.json")
    }

    /// Load config from the default path, falling back to defaults on any error
    pub fn load() -> Self {
        Self::load_from(&Self::path())
    }

    /// Load config from `path`, falling back to defaults on any error
    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    tracing::info!(path = %path.display(), "Loaded config from disk");
                    config
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to parse config, using defaults");
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!(path = %path.display(), "No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Save config to disk, creating parent directories if needed
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!(path = %path.display(), "Config saved to disk");
        Ok(())
    }

    /// Interval for the device observer
    pub fn device_poll_interval(&self) -> Duration {
        Duration::from_millis(self.device_poll_interval_ms.max(1))
    }

    /// Resolver settings derived from this config
    ///
    /// Zero intervals, attempt counts and capacities are raised to 1.
    pub fn resolver_settings(&self) -> ResolverSettings {
        ResolverSettings {
            prefer_bit_depth: self.prefer_bit_depth_detection,
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            max_poll_attempts: self.max_poll_attempts.max(1),
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            now_playing_spacing: Duration::from_millis(self.now_playing_spacing_ms),
            fallback_sample_rate: FALLBACK_SAMPLE_RATE,
            track_cache_capacity: self.track_cache_capacity.max(1),
            device_selection: self.device.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.device, None);
        assert!(!config.prefer_bit_depth_detection);
        assert_eq!(config.poll_interval_ms, 1500);
        assert_eq!(config.max_poll_attempts, 3);
        assert_eq!(config.retry_delay_ms, 800);
        assert_eq!(config.now_playing_spacing_ms, 500);
        assert_eq!(config.track_cache_capacity, 512);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let json = r#"{"device": "USB DAC", "prefer_bit_depth_detection": true}"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.device, Some("USB DAC".to_string()));
        assert!(config.prefer_bit_depth_detection);
        assert_eq!(config.poll_interval_ms, 1500);
        assert_eq!(config.post_switch_script, None);
    }

    #[test]
    fn test_empty_json_uses_defaults() {
        let config: AppConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_resolver_settings() {
        let config = AppConfig {
            device: Some("DAC".to_string()),
            prefer_bit_depth_detection: true,
            poll_interval_ms: 0,
            max_poll_attempts: 0,
            ..Default::default()
        };
        let settings = config.resolver_settings();
        assert!(settings.prefer_bit_depth);
        assert_eq!(settings.device_selection.as_deref(), Some("DAC"));
        assert_eq!(settings.poll_interval, Duration::from_millis(1));
        assert_eq!(settings.max_poll_attempts, 1);
        assert_eq!(settings.retry_delay, Duration::from_millis(800));
    }
}
