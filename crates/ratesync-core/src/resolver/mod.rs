//! Sample rate resolution
//!
//! The resolver owns all resolution state and lives on a single control
//! task. Every input (device changes, selection, track changes, poll ticks,
//! delayed retries) arrives as a [`ControlEvent`] on one channel and is
//! handled to completion before the next, so passes never overlap and every
//! decision reads a consistent snapshot. Blocking work (log scanning, device
//! queries, now-playing lookups) runs on the blocking pool and hands its
//! result back to the control task.
//!
//! - Poll cycle state machine ([`retry`])
//! - Now-playing notification rate limiting ([`coalesce`])
//! - Published state ([`status`])

pub mod coalesce;
pub mod retry;
pub mod status;

use crate::device::context::DeviceContext;
use crate::device::{DeviceProvider, DeviceSnapshot, OutputDevice};
use crate::evidence::parser::best_evidence;
use crate::evidence::source::{collect_evidence, EvidenceSource};
use crate::evidence::tracks::{Track, TrackEvidenceStore, DEFAULT_TRACK_CACHE_CAPACITY};
use crate::evidence::EntryKind;
use crate::format::catalog::{same_rate, AudioFormat, FormatCatalog};
use crate::now_playing::NowPlayingSource;
use crate::script::{self, PostSwitchScript};
use crate::{FALLBACK_SAMPLE_RATE, UNKNOWN_BIT_DEPTH};
use chrono::Utc;
use coalesce::{NowPlayingCoalescer, Offer, DEFAULT_NOW_PLAYING_SPACING};
use retry::{RetryScheduler, TickAction, DEFAULT_MAX_ATTEMPTS, DEFAULT_POLL_INTERVAL};
use status::{format_khz, ResolverStatus};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Delay before the single disambiguation / format retry of a pass
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(800);

/// Errors returned by [`ResolverHandle`]
#[derive(Error, Debug)]
pub enum ResolverError {
    #[error("Resolver task stopped")]
    Stopped,
}

/// Tunables for one resolver instance
#[derive(Debug, Clone)]
pub struct ResolverSettings {
    /// Use the bit-depth-carrying evidence and apply full physical formats
    pub prefer_bit_depth: bool,
    /// Interval between poll ticks after a track change
    pub poll_interval: Duration,
    /// Passes per poll cycle
    pub max_poll_attempts: u32,
    /// Delay of the single in-pass retry
    pub retry_delay: Duration,
    /// Minimum spacing between now-playing checks
    pub now_playing_spacing: Duration,
    /// Rate treated as ambiguous on a first pass
    pub fallback_sample_rate: f64,
    /// Number of tracks whose rates are remembered
    pub track_cache_capacity: usize,
    /// Explicit output device selection (name substring)
    pub device_selection: Option<String>,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            prefer_bit_depth: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_poll_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
            now_playing_spacing: DEFAULT_NOW_PLAYING_SPACING,
            fallback_sample_rate: FALLBACK_SAMPLE_RATE,
            track_cache_capacity: DEFAULT_TRACK_CACHE_CAPACITY,
            device_selection: None,
        }
    }
}

/// External collaborators the resolver consumes
#[derive(Clone)]
pub struct Collaborators {
    pub devices: Arc<dyn DeviceProvider>,
    pub evidence: Arc<dyn EvidenceSource>,
    pub now_playing: Arc<dyn NowPlayingSource>,
    pub script: Arc<dyn PostSwitchScript>,
}

/// Why a pass was started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerCause {
    DeviceList,
    DefaultDevice,
    Selection,
    NominalRate,
    Settings,
    PollTick,
    DelayedRetry,
    Manual,
}

/// Inputs to the control task
#[derive(Debug)]
pub enum ControlEvent {
    /// Run a resolution pass
    Trigger {
        cause: TriggerCause,
        disambiguation_retry: bool,
    },
    /// Poll cycle tick
    PollTick { generation: u64 },
    /// The media session reported a change
    NowPlayingChanged,
    /// End of a coalescing window
    FlushNowPlaying,
    DeviceListChanged,
    DefaultDeviceChanged,
    /// Set or clear the explicit device selection
    SelectDevice(Option<String>),
    /// The active device's nominal rate was observed at this value
    NominalRateChanged(f64),
    SetPreferBitDepth(bool),
    Shutdown,
}

/// Result of one resolution pass
#[derive(Debug, Clone, PartialEq)]
pub enum PassOutcome {
    /// No selected or default device
    NoActiveDevice,
    /// Diagnostics yielded nothing usable
    NoEvidence { retry_scheduled: bool },
    /// Same track, candidate lower than the applied rate
    SameTrackDowngrade { applied: f64, candidate: f64 },
    /// Candidate is the fallback rate; one retry scheduled
    FallbackDeferred,
    /// Device formats could not be read
    FormatsUnavailable { retry_scheduled: bool },
    /// No advertised format pairs the nearest rate and bit depth
    Unresolvable { requested: AudioFormat },
    /// Device was written
    Applied(AudioFormat),
    /// Device already had the format
    Unchanged(AudioFormat),
    /// Device write failed
    WriteFailed(String),
}

/// The control-task state machine
pub struct SampleRateResolver {
    settings: ResolverSettings,
    collaborators: Collaborators,
    tracks: TrackEvidenceStore,
    devices: DeviceContext,
    retry: RetryScheduler,
    coalescer: NowPlayingCoalescer,
    status: watch::Sender<ResolverStatus>,
    events: mpsc::UnboundedSender<ControlEvent>,
    pending_retry: Option<JoinHandle<()>>,
    pending_flush: Option<JoinHandle<()>>,
}

impl SampleRateResolver {
    /// Create a resolver and the receiving end of its event channel
    pub fn new(
        settings: ResolverSettings,
        collaborators: Collaborators,
    ) -> (Self, mpsc::UnboundedReceiver<ControlEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let (status, _) = watch::channel(ResolverStatus {
            selected_device: settings.device_selection.clone(),
            ..Default::default()
        });

        let resolver = Self {
            tracks: TrackEvidenceStore::new(settings.track_cache_capacity),
            devices: DeviceContext::new(settings.device_selection.clone()),
            retry: RetryScheduler::new(settings.poll_interval, settings.max_poll_attempts),
            coalescer: NowPlayingCoalescer::new(settings.now_playing_spacing),
            settings,
            collaborators,
            status,
            events,
            pending_retry: None,
            pending_flush: None,
        };
        (resolver, rx)
    }

    /// Sender for posting events to this resolver
    pub fn events(&self) -> mpsc::UnboundedSender<ControlEvent> {
        self.events.clone()
    }

    /// Subscribe to published state
    pub fn subscribe(&self) -> watch::Receiver<ResolverStatus> {
        self.status.subscribe()
    }

    /// Current published state
    pub fn status(&self) -> ResolverStatus {
        self.status.borrow().clone()
    }

    pub fn settings(&self) -> &ResolverSettings {
        &self.settings
    }

    pub fn tracks(&self) -> &TrackEvidenceStore {
        &self.tracks
    }

    pub fn devices(&self) -> &DeviceContext {
        &self.devices
    }

    pub fn retry(&self) -> &RetryScheduler {
        &self.retry
    }

    /// Process events until shutdown, then tear down
    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<ControlEvent>) {
        tracing::info!(
            prefer_bit_depth = self.settings.prefer_bit_depth,
            selection = ?self.settings.device_selection,
            "resolver started"
        );
        self.refresh_devices().await;
        self.track_changed().await;

        while let Some(event) = rx.recv().await {
            if !self.handle(event).await {
                break;
            }
        }

        self.shutdown();
        tracing::info!("resolver stopped");
    }

    /// Handle one event
    ///
    /// # Returns
    /// `false` once the resolver has been asked to shut down
    pub async fn handle(&mut self, event: ControlEvent) -> bool {
        tracing::trace!(?event, "control event");
        match event {
            ControlEvent::Trigger {
                cause,
                disambiguation_retry,
            } => {
                if cause == TriggerCause::DelayedRetry {
                    self.pending_retry = None;
                }
                self.run_pass(cause, disambiguation_retry).await;
            }
            ControlEvent::PollTick { generation } => match self.retry.on_tick(generation) {
                TickAction::Dispatch { attempt } => {
                    tracing::debug!(attempt, "poll tick");
                    self.run_pass(TriggerCause::PollTick, false).await;
                }
                TickAction::Finished | TickAction::Ignored => {}
            },
            ControlEvent::NowPlayingChanged => self.on_now_playing_changed().await,
            ControlEvent::FlushNowPlaying => {
                self.pending_flush = None;
                if self.coalescer.flush(Instant::now()) {
                    self.track_changed().await;
                }
            }
            ControlEvent::DeviceListChanged => {
                self.refresh_devices().await;
                self.run_pass(TriggerCause::DeviceList, false).await;
            }
            ControlEvent::DefaultDeviceChanged => {
                self.refresh_devices().await;
                self.run_pass(TriggerCause::DefaultDevice, false).await;
            }
            ControlEvent::SelectDevice(selection) => {
                self.devices.select(selection);
                self.publish_devices();
                self.run_pass(TriggerCause::Selection, false).await;
            }
            ControlEvent::NominalRateChanged(rate) => {
                if self.devices.observe_nominal_rate(rate) {
                    self.run_pass(TriggerCause::NominalRate, false).await;
                }
            }
            ControlEvent::SetPreferBitDepth(prefer) => {
                tracing::info!(prefer_bit_depth = prefer, "bit depth detection changed");
                self.settings.prefer_bit_depth = prefer;
                self.run_pass(TriggerCause::Settings, false).await;
            }
            ControlEvent::Shutdown => return false,
        }
        true
    }

    async fn run_pass(&mut self, cause: TriggerCause, disambiguation_retry: bool) -> PassOutcome {
        let outcome = self.on_trigger(disambiguation_retry).await;
        tracing::debug!(?cause, disambiguation_retry, ?outcome, "resolution pass");
        outcome
    }

    /// One resolution pass: evidence → decision → (maybe) device write
    ///
    /// `disambiguation_retry` marks the single delayed re-run of a pass; it
    /// accepts the fallback rate and does not schedule further retries.
    pub async fn on_trigger(&mut self, disambiguation_retry: bool) -> PassOutcome {
        let Some(device) = self.devices.active_device() else {
            return PassOutcome::NoActiveDevice;
        };

        let kinds = EntryKind::for_detection(self.settings.prefer_bit_depth);
        let source = Arc::clone(&self.collaborators.evidence);
        let target = Arc::clone(&device);
        let collected = tokio::task::spawn_blocking(move || {
            let evidence = collect_evidence(source.as_ref(), kinds);
            let snapshot = DeviceSnapshot::read(target.as_ref());
            (evidence, snapshot)
        })
        .await;
        let (evidence, snapshot) = match collected {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(error = %e, "evidence worker failed");
                (Vec::new(), DeviceSnapshot::default())
            }
        };

        let Some(candidate) = best_evidence(evidence) else {
            let retry_scheduled = !disambiguation_retry;
            if retry_scheduled {
                self.schedule_retry();
            }
            return PassOutcome::NoEvidence { retry_scheduled };
        };

        if self.tracks.is_same_track() {
            if let Some(applied) = self.devices.committed_rate() {
                if applied > candidate.sample_rate && !same_rate(applied, candidate.sample_rate) {
                    return PassOutcome::SameTrackDowngrade {
                        applied,
                        candidate: candidate.sample_rate,
                    };
                }
            }
        }

        if !disambiguation_retry
            && same_rate(candidate.sample_rate, self.settings.fallback_sample_rate)
        {
            self.schedule_retry();
            return PassOutcome::FallbackDeferred;
        }

        let Some(formats) = snapshot.formats else {
            if !disambiguation_retry {
                self.schedule_retry();
                return PassOutcome::FormatsUnavailable {
                    retry_scheduled: true,
                };
            }
            if self.tracks.is_same_track() {
                tracing::debug!(device = device.name(), "formats unavailable, nothing new to do");
            } else {
                tracing::info!(device = device.name(), "formats unavailable, no action taken");
            }
            return PassOutcome::FormatsUnavailable {
                retry_scheduled: false,
            };
        };

        let catalog = FormatCatalog::new(&formats, &snapshot.supported_rates);
        let Some(resolved) = catalog.resolve(candidate.sample_rate, candidate.bit_depth) else {
            let requested = AudioFormat::new(candidate.sample_rate, candidate.bit_depth);
            tracing::info!(device = device.name(), %requested, "no matching device format");
            return PassOutcome::Unresolvable { requested };
        };

        self.apply(device.as_ref(), resolved)
    }

    /// Write `resolved` through the device context, then publish and cache
    fn apply(&mut self, device: &dyn OutputDevice, resolved: AudioFormat) -> PassOutcome {
        let prefer_bit_depth = self.settings.prefer_bit_depth;
        let written = if prefer_bit_depth {
            self.devices.apply_format(device, resolved)
        } else {
            self.devices.apply_sample_rate(device, resolved.sample_rate)
        };

        match written {
            Ok(written) => {
                let bit_depth = prefer_bit_depth.then_some(resolved.bit_depth);
                self.update_sample_rate(resolved.sample_rate, bit_depth);
                self.tracks.commit(resolved.sample_rate);
                if written {
                    PassOutcome::Applied(resolved)
                } else {
                    PassOutcome::Unchanged(resolved)
                }
            }
            Err(e) => {
                tracing::warn!(device = device.name(), format = %resolved, error = %e, "device write failed");
                PassOutcome::WriteFailed(e.to_string())
            }
        }
    }

    /// Publish `rate`; runs the post-switch script when it changed
    ///
    /// # Returns
    /// `true` when the published rate changed
    pub fn update_sample_rate(&mut self, rate: f64, bit_depth: Option<u32>) -> bool {
        let unchanged = self
            .status
            .borrow()
            .sample_rate
            .is_some_and(|current| same_rate(current, rate));
        if unchanged {
            self.status.send_if_modified(|s| {
                let modified = s.bit_depth != bit_depth;
                s.bit_depth = bit_depth;
                modified
            });
            return false;
        }

        self.status.send_modify(|s| {
            s.sample_rate = Some(rate);
            s.bit_depth = bit_depth;
            s.last_switch_at = Some(Utc::now());
            s.switch_count += 1;
        });
        tracing::info!(rate = %format_khz(rate), bit_depth = ?bit_depth, "sample rate updated");

        script::spawn_detached(Arc::clone(&self.collaborators.script), rate.round() as u32);
        true
    }

    async fn on_now_playing_changed(&mut self) {
        match self.coalescer.offer(Instant::now()) {
            Offer::Fire => self.track_changed().await,
            Offer::Defer(wait) => {
                let tx = self.events.clone();
                self.pending_flush = Some(tokio::spawn(async move {
                    tokio::time::sleep(wait).await;
                    let _ = tx.send(ControlEvent::FlushNowPlaying);
                }));
            }
            Offer::Merged => {}
        }
    }

    /// Re-read the current track; use the cache or start a poll cycle
    async fn track_changed(&mut self) {
        let source = Arc::clone(&self.collaborators.now_playing);
        let track = match tokio::task::spawn_blocking(move || source.current_track()).await {
            Ok(track) => track,
            Err(e) => {
                tracing::warn!(error = %e, "now-playing worker failed");
                None
            }
        };

        if !self.tracks.observe(track.clone()) {
            return;
        }
        self.publish_track(track);

        if self.tracks.current().is_none() {
            return;
        }

        if let Some(rate) = self.tracks.cached_rate() {
            if let Some(device) = self.devices.active_device() {
                if self.apply_cached_rate(device, rate).await {
                    return;
                }
            }
        }

        self.retry.arm(&self.events);
    }

    /// Apply a track's cached rate if the active device offers exactly it
    ///
    /// # Returns
    /// `true` when the device now runs at `rate`
    async fn apply_cached_rate(&mut self, device: Arc<dyn OutputDevice>, rate: f64) -> bool {
        let target = Arc::clone(&device);
        let read = tokio::task::spawn_blocking(move || DeviceSnapshot::read(target.as_ref()));
        let snapshot = match read.await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(error = %e, "device worker failed");
                return false;
            }
        };
        let Some(formats) = snapshot.formats else {
            return false;
        };

        let catalog = FormatCatalog::new(&formats, &snapshot.supported_rates);
        let resolved = catalog
            .resolve(rate, UNKNOWN_BIT_DEPTH)
            .filter(|f| same_rate(f.sample_rate, rate));
        let Some(resolved) = resolved else {
            tracing::debug!(device = device.name(), rate, "cached rate not offered by device");
            return false;
        };

        tracing::debug!(rate, "using cached rate for track");
        matches!(
            self.apply(device.as_ref(), resolved),
            PassOutcome::Applied(_) | PassOutcome::Unchanged(_)
        )
    }

    /// Re-enumerate devices on the worker and update the context
    ///
    /// # Returns
    /// `true` when the active device changed
    pub async fn refresh_devices(&mut self) -> bool {
        let provider = Arc::clone(&self.collaborators.devices);
        let listed = tokio::task::spawn_blocking(move || {
            let devices = provider.output_devices();
            let default_device = provider.default_output_device();
            (devices, default_device)
        })
        .await;

        let changed = match listed {
            Ok((Ok(devices), default_device)) => {
                tracing::debug!(count = devices.len(), "output devices enumerated");
                self.devices.update_devices(devices, default_device)
            }
            Ok((Err(e), _)) => {
                tracing::warn!(error = %e, "device enumeration failed");
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "device worker failed");
                false
            }
        };
        self.publish_devices();
        changed
    }

    fn schedule_retry(&mut self) {
        if let Some(pending) = self.pending_retry.take() {
            pending.abort();
        }
        let tx = self.events.clone();
        let delay = self.settings.retry_delay;
        self.pending_retry = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(ControlEvent::Trigger {
                cause: TriggerCause::DelayedRetry,
                disambiguation_retry: true,
            });
        }));
    }

    fn publish_devices(&self) {
        let summaries = self.devices.summaries();
        let selection = self.devices.selection().map(str::to_string);
        let default_device = self.devices.default_device().map(|d| d.name().to_string());
        let active_device = self.devices.active_device().map(|d| d.name().to_string());
        self.status.send_modify(|s| {
            s.devices = summaries;
            s.selected_device = selection;
            s.default_device = default_device;
            s.active_device = active_device;
        });
    }

    fn publish_track(&self, track: Option<Track>) {
        self.status.send_modify(|s| s.current_track = track);
    }

    /// Cancel timers and pending continuations
    pub fn shutdown(&mut self) {
        self.retry.cancel();
        if let Some(pending) = self.pending_retry.take() {
            pending.abort();
        }
        if let Some(pending) = self.pending_flush.take() {
            pending.abort();
        }
    }
}

impl Drop for SampleRateResolver {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Handle to the resolver's control task
#[derive(Clone)]
pub struct ResolverHandle {
    tx: mpsc::UnboundedSender<ControlEvent>,
    status: watch::Receiver<ResolverStatus>,
}

impl ResolverHandle {
    /// Spawn the resolver on the current runtime and return a handle
    pub fn spawn(
        settings: ResolverSettings,
        collaborators: Collaborators,
    ) -> (Self, JoinHandle<()>) {
        let (resolver, rx) = SampleRateResolver::new(settings, collaborators);
        let handle = Self {
            tx: resolver.events(),
            status: resolver.subscribe(),
        };
        let task = tokio::spawn(resolver.run(rx));
        (handle, task)
    }

    fn send(&self, event: ControlEvent) -> Result<(), ResolverError> {
        self.tx.send(event).map_err(|_| ResolverError::Stopped)
    }

    /// Run a pass now
    pub fn trigger(&self) -> Result<(), ResolverError> {
        self.send(ControlEvent::Trigger {
            cause: TriggerCause::Manual,
            disambiguation_retry: false,
        })
    }

    pub fn now_playing_changed(&self) -> Result<(), ResolverError> {
        self.send(ControlEvent::NowPlayingChanged)
    }

    pub fn device_list_changed(&self) -> Result<(), ResolverError> {
        self.send(ControlEvent::DeviceListChanged)
    }

    pub fn default_device_changed(&self) -> Result<(), ResolverError> {
        self.send(ControlEvent::DefaultDeviceChanged)
    }

    pub fn select_device(&self, selection: Option<String>) -> Result<(), ResolverError> {
        self.send(ControlEvent::SelectDevice(selection))
    }

    pub fn nominal_rate_changed(&self, rate: f64) -> Result<(), ResolverError> {
        self.send(ControlEvent::NominalRateChanged(rate))
    }

    pub fn set_prefer_bit_depth(&self, prefer: bool) -> Result<(), ResolverError> {
        self.send(ControlEvent::SetPreferBitDepth(prefer))
    }

    /// Ask the control task to stop; pending timers are cancelled
    pub fn shutdown(&self) -> Result<(), ResolverError> {
        self.send(ControlEvent::Shutdown)
    }

    /// Current published state
    pub fn status(&self) -> ResolverStatus {
        self.status.borrow().clone()
    }

    /// Subscribe to published state changes
    pub fn subscribe(&self) -> watch::Receiver<ResolverStatus> {
        self.status.clone()
    }
}
