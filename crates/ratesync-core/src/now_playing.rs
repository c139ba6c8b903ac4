//! Now-playing metadata
//!
//! The media session is queried through [`NowPlayingSource`]. The bundled
//! implementation runs a helper command that prints the now-playing
//! dictionary as a JSON object.

use crate::evidence::tracks::Track;
use serde_json::{Map, Value};
use std::process::Command;
use thiserror::Error;

/// Raw now-playing dictionary
pub type NowPlayingInfo = Map<String, Value>;

/// Errors that can occur while querying now-playing metadata
#[derive(Error, Debug)]
pub enum NowPlayingError {
    #[error("Failed to run now-playing command '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Now-playing command '{program}' exited with {status}")]
    Exit { program: String, status: String },

    #[error("Invalid now-playing payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Source of the current now-playing dictionary
pub trait NowPlayingSource: Send + Sync {
    /// `None` when nothing is playing
    fn now_playing_info(&self) -> Result<Option<NowPlayingInfo>, NowPlayingError>;

    /// Current track identity (blocking)
    fn current_track(&self) -> Option<Track> {
        match self.now_playing_info() {
            Ok(info) => info.as_ref().and_then(track_from_info),
            Err(e) => {
                tracing::warn!(error = %e, "now-playing query failed");
                None
            }
        }
    }
}

/// Build a track identity from a now-playing dictionary
///
/// Keys are matched case-insensitively; `name` is accepted for the title.
pub fn track_from_info(info: &NowPlayingInfo) -> Option<Track> {
    let field = |keys: &[&str]| -> Option<String> {
        info.iter()
            .find(|(k, _)| keys.iter().any(|key| k.eq_ignore_ascii_case(key)))
            .and_then(|(_, v)| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let title = field(&["title", "name"]);
    let artist = field(&["artist"]);
    let album = field(&["album"]);

    if title.is_none() && artist.is_none() && album.is_none() {
        return None;
    }

    Some(Track {
        title: title.unwrap_or_default(),
        artist,
        album,
    })
}

/// Runs a helper command and parses its stdout as a JSON object
#[derive(Debug, Clone)]
pub struct CommandNowPlaying {
    program: String,
    args: Vec<String>,
}

impl CommandNowPlaying {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Build from a `[program, args...]` list, as stored in config
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self::new(program.clone(), args.to_vec()))
    }
}

impl NowPlayingSource for CommandNowPlaying {
    fn now_playing_info(&self) -> Result<Option<NowPlayingInfo>, NowPlayingError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .output()
            .map_err(|source| NowPlayingError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(NowPlayingError::Exit {
                program: self.program.clone(),
                status: output.status.to_string(),
            });
        }

        parse_payload(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Parse helper output; empty output or `null` means nothing is playing
pub fn parse_payload(payload: &str) -> Result<Option<NowPlayingInfo>, NowPlayingError> {
    let payload = payload.trim();
    if payload.is_empty() {
        return Ok(None);
    }
    match serde_json::from_str::<Value>(payload)? {
        Value::Object(map) => Ok(Some(map)),
        _ => Ok(None),
    }
}

/// Used when no now-playing helper is configured: every pass sees no track
#[derive(Debug, Default, Clone, Copy)]
pub struct NoNowPlaying;

impl NowPlayingSource for NoNowPlaying {
    fn now_playing_info(&self) -> Result<Option<NowPlayingInfo>, NowPlayingError> {
        Ok(None)
    }
}
