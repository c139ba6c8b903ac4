//! Track identity and per-track resolved rates
//!
//! Remembers which sample rate was applied for each track so a track that
//! comes around again can be switched to immediately, without waiting for
//! fresh diagnostics.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;

/// Default number of tracks whose rates are remembered
pub const DEFAULT_TRACK_CACHE_CAPACITY: usize = 512;

/// Identity of what is currently playing
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Track {
    pub title: String,
    pub artist: Option<String>,
    pub album: Option<String>,
}

impl Track {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            artist: None,
            album: None,
        }
    }

    pub fn with_artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = Some(artist.into());
        self
    }

    pub fn with_album(mut self, album: impl Into<String>) -> Self {
        self.album = Some(album.into());
        self
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.artist {
            Some(artist) => write!(f, "{} - {}", artist, self.title),
            None => f.write_str(&self.title),
        }
    }
}

/// Current/previous track identity plus the track → rate cache
///
/// `previous` is the track identity a format was last applied or confirmed
/// for, so `current == previous` means "this track has already been
/// handled". Identities are optional: with no now-playing data both sides
/// are `None` and every pass counts as the same track.
#[derive(Debug)]
pub struct TrackEvidenceStore {
    current: Option<Track>,
    previous: Option<Track>,
    rates: HashMap<Track, f64>,
    /// Insertion order for eviction
    order: VecDeque<Track>,
    capacity: usize,
}

impl TrackEvidenceStore {
    /// Create a store remembering at most `capacity` tracks
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            current: None,
            previous: None,
            rates: HashMap::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    /// Record what is playing now
    ///
    /// # Returns
    /// `true` when the track differs from the current one
    pub fn observe(&mut self, track: Option<Track>) -> bool {
        if self.current == track {
            return false;
        }
        tracing::debug!(
            from = ?self.current.as_ref().map(ToString::to_string),
            to = ?track.as_ref().map(ToString::to_string),
            "track_changed"
        );
        self.current = track;
        true
    }

    /// Currently playing track
    pub fn current(&self) -> Option<&Track> {
        self.current.as_ref()
    }

    /// Whether the current track identity (possibly unknown) has already
    /// been handled
    pub fn is_same_track(&self) -> bool {
        self.current == self.previous
    }

    /// Cached rate for the current track
    pub fn cached_rate(&self) -> Option<f64> {
        self.current.as_ref().and_then(|t| self.rates.get(t).copied())
    }

    /// Commit `rate` as applied for the current track
    ///
    /// Call only after the device was written or confirmed at `rate`. An
    /// unknown track is marked handled but nothing is cached for it.
    pub fn commit(&mut self, rate: f64) {
        self.previous = self.current.clone();
        let Some(track) = self.current.clone() else {
            return;
        };

        if self.rates.insert(track.clone(), rate).is_none() {
            if self.order.len() >= self.capacity {
                if let Some(oldest) = self.order.pop_front() {
                    self.rates.remove(&oldest);
                }
            }
            self.order.push_back(track);
        }
    }

    /// Number of cached tracks
    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }
}

impl Default for TrackEvidenceStore {
    fn default() -> Self {
        Self::new(DEFAULT_TRACK_CACHE_CAPACITY)
    }
}
