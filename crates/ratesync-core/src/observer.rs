//! Change observers
//!
//! Hosts without change callbacks are polled: device enumeration, the
//! default device, the active device's nominal rate, and the now-playing
//! track are sampled on the blocking pool and differences are forwarded to
//! the resolver as events. Observers stop once the resolver has stopped.

use crate::device::DeviceProvider;
use crate::evidence::tracks::Track;
use crate::format::catalog::same_rate;
use crate::now_playing::NowPlayingSource;
use crate::resolver::{ResolverError, ResolverHandle};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Default interval between device samples
pub const DEFAULT_DEVICE_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Default interval between now-playing samples
pub const DEFAULT_NOW_PLAYING_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// One sample of the host's device state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceSample {
    /// Ids of all output devices, in enumeration order
    pub device_ids: Vec<String>,
    /// Id of the host default output device
    pub default_id: Option<String>,
    /// Nominal rate of the device named `active`, if readable
    pub active_rate: Option<f64>,
}

/// Differences between two consecutive samples
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DeviceChanges {
    pub device_list: bool,
    pub default_device: bool,
    pub nominal_rate: Option<f64>,
}

impl DeviceSample {
    /// Take a sample (blocking)
    pub fn take(provider: &dyn DeviceProvider, active: Option<&str>) -> Self {
        let devices = match provider.output_devices() {
            Ok(devices) => devices,
            Err(e) => {
                tracing::debug!(error = %e, "device sample failed");
                Vec::new()
            }
        };
        let active_rate = active
            .and_then(|name| devices.iter().find(|d| d.name() == name))
            .and_then(|d| d.nominal_sample_rate().ok());

        Self {
            device_ids: devices.iter().map(|d| d.id().to_string()).collect(),
            default_id: provider.default_output_device().map(|d| d.id().to_string()),
            active_rate,
        }
    }

    /// What changed between `self` (older) and `next`
    pub fn diff(&self, next: &DeviceSample) -> DeviceChanges {
        let nominal_rate = match (self.active_rate, next.active_rate) {
            (Some(old), Some(new)) if !same_rate(old, new) => Some(new),
            (None, Some(new)) => Some(new),
            _ => None,
        };
        DeviceChanges {
            device_list: self.device_ids != next.device_ids,
            default_device: self.default_id != next.default_id,
            nominal_rate,
        }
    }
}

/// Poll devices every `interval` and forward changes to `handle`
pub fn spawn_device_observer(
    provider: Arc<dyn DeviceProvider>,
    handle: ResolverHandle,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut previous: Option<DeviceSample> = None;
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            let active = handle.status().active_device;
            let source = Arc::clone(&provider);
            let sample = match tokio::task::spawn_blocking(move || {
                DeviceSample::take(source.as_ref(), active.as_deref())
            })
            .await
            {
                Ok(sample) => sample,
                Err(e) => {
                    tracing::warn!(error = %e, "device observer worker failed");
                    continue;
                }
            };

            let Some(old) = previous.replace(sample.clone()) else {
                continue;
            };
            if forward_device_changes(&handle, old.diff(&sample)).is_err() {
                break;
            }
        }
        tracing::debug!("device observer stopped");
    })
}

fn forward_device_changes(
    handle: &ResolverHandle,
    changes: DeviceChanges,
) -> Result<(), ResolverError> {
    if changes.device_list {
        tracing::info!("output device list changed");
        handle.device_list_changed()?;
    }
    if changes.default_device {
        tracing::info!("default output device changed");
        handle.default_device_changed()?;
    }
    if let Some(rate) = changes.nominal_rate {
        handle.nominal_rate_changed(rate)?;
    }
    Ok(())
}

/// Poll the now-playing track every `interval` and notify `handle`
pub fn spawn_now_playing_observer(
    source: Arc<dyn NowPlayingSource>,
    handle: ResolverHandle,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut previous: Option<Option<Track>> = None;
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            let query = Arc::clone(&source);
            let track = match tokio::task::spawn_blocking(move || query.current_track()).await {
                Ok(track) => track,
                Err(e) => {
                    tracing::warn!(error = %e, "now-playing observer worker failed");
                    continue;
                }
            };

            let changed = previous.as_ref().is_some_and(|old| *old != track);
            previous = Some(track);
            if changed && handle.now_playing_changed().is_err() {
                break;
            }
        }
        tracing::debug!("now-playing observer stopped");
    })
}
