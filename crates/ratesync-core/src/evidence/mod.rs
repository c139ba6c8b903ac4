//! Evidence about the format of the playing track
//!
//! This module covers everything between raw diagnostics and a decision:
//! - Diagnostic log collection ([`source`])
//! - Log line parsing into prioritised evidence ([`parser`])
//! - Per-track cache of resolved rates ([`tracks`])

pub mod parser;
pub mod source;
pub mod tracks;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which diagnostic stream an entry was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryKind {
    /// Player process messages; rate only
    Music,
    /// Decoder input format messages; rate and source bit depth
    CoreAudioFormat,
    /// Playback item audio capabilities; rate and bit depth
    CoreMediaFormat,
}

impl EntryKind {
    /// Kinds to collect depending on whether bit depth detection is enabled
    pub fn for_detection(prefer_bit_depth: bool) -> &'static [EntryKind] {
        if prefer_bit_depth {
            &[EntryKind::CoreMediaFormat, EntryKind::CoreAudioFormat]
        } else {
            &[EntryKind::Music]
        }
    }

    /// Priority given to evidence parsed from this kind
    pub fn priority(self) -> i32 {
        match self {
            EntryKind::CoreMediaFormat => 5,
            EntryKind::CoreAudioFormat => 2,
            EntryKind::Music => 1,
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntryKind::Music => "music",
            EntryKind::CoreAudioFormat => "core-audio",
            EntryKind::CoreMediaFormat => "core-media",
        };
        f.write_str(name)
    }
}

impl FromStr for EntryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "music" => Ok(EntryKind::Music),
            "core-audio" => Ok(EntryKind::CoreAudioFormat),
            "core-media" => Ok(EntryKind::CoreMediaFormat),
            other => Err(format!(
                "unknown entry kind '{other}' (expected music, core-audio or core-media)"
            )),
        }
    }
}
