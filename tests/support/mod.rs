//! Shared fakes for resolver integration tests
//!
//! Devices record every write, the log source serves whatever lines the
//! test put in and counts queries, and the script records the rates it was
//! run with.

#![allow(dead_code)]

use ratesync::device::{DeviceError, DeviceProvider, OutputDevice};
use ratesync::evidence::source::{EvidenceError, EvidenceSource};
use ratesync::evidence::EntryKind;
use ratesync::now_playing::{NowPlayingError, NowPlayingInfo, NowPlayingSource};
use ratesync::resolver::{Collaborators, ResolverSettings};
use ratesync::script::{PostSwitchScript, ScriptError};
use ratesync::{AudioFormat, Track};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Formats of a typical USB DAC
pub const DAC_FORMATS: &[(f64, u32)] = &[
    (44100.0, 16),
    (44100.0, 24),
    (48000.0, 16),
    (48000.0, 24),
    (88200.0, 24),
    (96000.0, 24),
    (176400.0, 24),
    (192000.0, 24),
];

pub struct FakeDevice {
    id: String,
    formats: Vec<AudioFormat>,
    rate: Mutex<f64>,
    writes: Mutex<Vec<f64>>,
}

impl FakeDevice {
    pub fn new(id: &str, formats: &[(f64, u32)]) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            formats: formats
                .iter()
                .map(|&(rate, bits)| AudioFormat::new(rate, bits))
                .collect(),
            rate: Mutex::new(44100.0),
            writes: Mutex::new(Vec::new()),
        })
    }

    pub fn writes(&self) -> Vec<f64> {
        self.writes.lock().unwrap().clone()
    }
}

impl OutputDevice for FakeDevice {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.id
    }

    fn nominal_sample_rate(&self) -> Result<f64, DeviceError> {
        Ok(*self.rate.lock().unwrap())
    }

    fn supported_sample_rates(&self) -> Result<Vec<f64>, DeviceError> {
        let mut rates: Vec<f64> = self.formats.iter().map(|f| f.sample_rate).collect();
        rates.dedup();
        Ok(rates)
    }

    fn output_stream_formats(&self) -> Option<Vec<AudioFormat>> {
        Some(self.formats.clone())
    }

    fn set_nominal_sample_rate(&self, rate: f64) -> Result<(), DeviceError> {
        *self.rate.lock().unwrap() = rate;
        self.writes.lock().unwrap().push(rate);
        Ok(())
    }

    fn set_physical_format(&self, format: AudioFormat) -> Result<(), DeviceError> {
        self.set_nominal_sample_rate(format.sample_rate)
    }
}

/// Provider whose first device is the default
pub struct FakeProvider(pub Vec<Arc<FakeDevice>>);

impl DeviceProvider for FakeProvider {
    fn output_devices(&self) -> Result<Vec<Arc<dyn OutputDevice>>, DeviceError> {
        Ok(self
            .0
            .iter()
            .map(|d| d.clone() as Arc<dyn OutputDevice>)
            .collect())
    }

    fn default_output_device(&self) -> Option<Arc<dyn OutputDevice>> {
        self.0.first().map(|d| d.clone() as Arc<dyn OutputDevice>)
    }
}

#[derive(Default)]
pub struct FakeLog {
    entries: Mutex<HashMap<EntryKind, Vec<String>>>,
    queries: AtomicUsize,
}

impl FakeLog {
    pub fn set(&self, kind: EntryKind, lines: &[&str]) {
        self.entries
            .lock()
            .unwrap()
            .insert(kind, lines.iter().map(|s| s.to_string()).collect());
    }

    /// Replace the Music entries with one line reporting `rate`
    pub fn music_rate(&self, rate: u32) {
        self.set(EntryKind::Music, &[&format!("Music: sample rate {rate}")]);
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    /// Number of `recent_entries` calls so far
    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

impl EvidenceSource for FakeLog {
    fn recent_entries(&self, kind: EntryKind) -> Result<Vec<String>, EvidenceError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .entries
            .lock()
            .unwrap()
            .get(&kind)
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Default)]
pub struct FakeNowPlaying {
    track: Mutex<Option<Track>>,
    queries: AtomicUsize,
}

impl FakeNowPlaying {
    pub fn playing(title: &str) -> Arc<Self> {
        let source = Arc::new(Self::default());
        source.play(title);
        source
    }

    pub fn play(&self, title: &str) {
        *self.track.lock().unwrap() = Some(Track::new(title));
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

impl NowPlayingSource for FakeNowPlaying {
    fn now_playing_info(&self) -> Result<Option<NowPlayingInfo>, NowPlayingError> {
        Ok(None)
    }

    fn current_track(&self) -> Option<Track> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.track.lock().unwrap().clone()
    }
}

#[derive(Default)]
pub struct RecordingScript(Mutex<Vec<u32>>);

impl RecordingScript {
    pub fn runs(&self) -> Vec<u32> {
        self.0.lock().unwrap().clone()
    }
}

impl PostSwitchScript for RecordingScript {
    fn run(&self, rate_hz: u32) -> Result<(), ScriptError> {
        self.0.lock().unwrap().push(rate_hz);
        Ok(())
    }
}

/// Everything a test needs to drive and observe one resolver
pub struct Rig {
    pub dac: Arc<FakeDevice>,
    pub log: Arc<FakeLog>,
    pub now_playing: Arc<FakeNowPlaying>,
    pub script: Arc<RecordingScript>,
}

impl Rig {
    /// A single DAC, nothing playing
    pub fn new() -> Self {
        Self::with_now_playing(Arc::new(FakeNowPlaying::default()))
    }

    pub fn with_now_playing(now_playing: Arc<FakeNowPlaying>) -> Self {
        Self {
            dac: FakeDevice::new("USB DAC", DAC_FORMATS),
            log: Arc::new(FakeLog::default()),
            now_playing,
            script: Arc::new(RecordingScript::default()),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            devices: Arc::new(FakeProvider(vec![self.dac.clone()])),
            evidence: self.log.clone(),
            now_playing: self.now_playing.clone(),
            script: self.script.clone(),
        }
    }

    pub fn settings(&self) -> ResolverSettings {
        ResolverSettings::default()
    }
}
