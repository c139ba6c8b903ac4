//! Diagnostic log line parsing
//!
//! Each entry kind has its own message shape. Lines that do not carry a
//! plausible sample rate are skipped rather than reported, since the log
//! streams are shared with unrelated messages.

use super::EntryKind;
use crate::UNKNOWN_BIT_DEPTH;
use regex::Regex;
use std::sync::LazyLock;

/// Rates outside this range are parse noise
const MIN_PLAUSIBLE_RATE: f64 = 8000.0;
const MAX_PLAUSIBLE_RATE: f64 = 768000.0;

static CORE_MEDIA_RATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"asbdSampleRate\s*=\s*([0-9]+(?:\.[0-9]+)?)\s*kHz").expect("static pattern")
});

static CORE_MEDIA_BITS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"sdBitDepth\s*=\s*([0-9]+)\s*bit").expect("static pattern"));

static CORE_AUDIO_RATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([0-9]+(?:\.[0-9]+)?)\s*Hz\b").expect("static pattern"));

static CORE_AUDIO_BITS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"from\s+([0-9]+)-bit\s+source").expect("static pattern"));

static MUSIC_RATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)sample\s*rate\s*[:=]?\s*([0-9]+(?:\.[0-9]+)?)").expect("static pattern")
});

/// A candidate format for the playing track, read from one log entry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evidence {
    /// Sample rate in Hz
    pub sample_rate: f64,
    /// Bits per channel
    pub bit_depth: u32,
    /// Higher wins when picking the best candidate
    pub priority: i32,
    /// Stream the entry came from
    pub kind: EntryKind,
}

/// Parses raw diagnostic entries into [`Evidence`]
#[derive(Debug, Default, Clone, Copy)]
pub struct EvidenceParser;

impl EvidenceParser {
    /// Parse every entry of one kind, keeping entry order
    pub fn parse(&self, kind: EntryKind, entries: &[String]) -> Vec<Evidence> {
        entries
            .iter()
            .filter_map(|entry| self.parse_entry(kind, entry))
            .collect()
    }

    /// Parse a single entry
    pub fn parse_entry(&self, kind: EntryKind, entry: &str) -> Option<Evidence> {
        let (sample_rate, bit_depth) = match kind {
            EntryKind::CoreMediaFormat => {
                let khz = capture_f64(&CORE_MEDIA_RATE, entry)?;
                let bits = capture_u32(&CORE_MEDIA_BITS, entry).unwrap_or(UNKNOWN_BIT_DEPTH);
                (khz * 1000.0, bits)
            }
            EntryKind::CoreAudioFormat => {
                let hz = capture_f64(&CORE_AUDIO_RATE, entry)?;
                let bits = capture_u32(&CORE_AUDIO_BITS, entry).unwrap_or(UNKNOWN_BIT_DEPTH);
                (hz, bits)
            }
            EntryKind::Music => (capture_f64(&MUSIC_RATE, entry)?, UNKNOWN_BIT_DEPTH),
        };

        if !(MIN_PLAUSIBLE_RATE..=MAX_PLAUSIBLE_RATE).contains(&sample_rate) {
            tracing::trace!(%kind, sample_rate, "implausible rate skipped");
            return None;
        }

        Some(Evidence {
            sample_rate,
            bit_depth,
            priority: kind.priority(),
            kind,
        })
    }
}

/// Pick the best candidate: highest priority, first collected among equals
pub fn best_evidence(mut evidence: Vec<Evidence>) -> Option<Evidence> {
    // sort_by is stable, so collection order breaks ties
    evidence.sort_by(|a, b| b.priority.cmp(&a.priority));
    evidence.into_iter().next()
}

fn capture_f64(pattern: &Regex, entry: &str) -> Option<f64> {
    pattern
        .captures(entry)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn capture_u32(pattern: &Regex, entry: &str) -> Option<u32> {
    pattern
        .captures(entry)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_core_media_entry() {
        let line = "2024-03-01 12:00:00.1 Df Music[812:1a2b] [com.apple.coremedia:] \
                    audioCapabilities: asbdSampleRate = 96.0 kHz, sdBitDepth = 24 bit";
        let ev = EvidenceParser
            .parse_entry(EntryKind::CoreMediaFormat, line)
            .unwrap();
        assert_relative_eq!(ev.sample_rate, 96000.0);
        assert_eq!(ev.bit_depth, 24);
        assert_eq!(ev.priority, 5);
    }

    #[test]
    fn test_core_media_fractional_khz() {
        let line = "audioCapabilities: asbdSampleRate = 44.1 kHz, sdBitDepth = 16 bit";
        let ev = EvidenceParser
            .parse_entry(EntryKind::CoreMediaFormat, line)
            .unwrap();
        assert_relative_eq!(ev.sample_rate, 44100.0, epsilon = 1e-6);
        assert_eq!(ev.bit_depth, 16);
    }

    #[test]
    fn test_core_audio_entry() {
        let line = "ACAppleLosslessDecoder.cpp:123 Input format: 2 ch, 176400 Hz, \
                    'alac' (0x00000004) from 24-bit source, 4096 frames/packet";
        let ev = EvidenceParser
            .parse_entry(EntryKind::CoreAudioFormat, line)
            .unwrap();
        assert_relative_eq!(ev.sample_rate, 176400.0);
        assert_eq!(ev.bit_depth, 24);
        assert_eq!(ev.priority, 2);
    }

    #[test]
    fn test_core_audio_without_bit_depth() {
        let line = "Input format: 2 ch, 44100 Hz, 'aac '";
        let ev = EvidenceParser
            .parse_entry(EntryKind::CoreAudioFormat, line)
            .unwrap();
        assert_eq!(ev.bit_depth, UNKNOWN_BIT_DEPTH);
    }

    #[test]
    fn test_music_entry() {
        for line in [
            "Music: playback format sampleRate: 88200.0 channels: 2",
            "Music: sample rate 44100",
            "Music: SampleRate=192000",
        ] {
            let ev = EvidenceParser.parse_entry(EntryKind::Music, line);
            assert!(ev.is_some(), "no evidence from {line:?}");
            assert_eq!(ev.unwrap().bit_depth, UNKNOWN_BIT_DEPTH);
        }
    }

    #[test]
    fn test_unrelated_and_implausible_lines_skipped() {
        let entries = vec![
            "Timestamp               Ty Process[PID:TID]".to_string(),
            "Input format: 2 ch, 12 Hz".to_string(),
            "sampleRate: 4000000".to_string(),
        ];
        assert!(EvidenceParser.parse(EntryKind::CoreAudioFormat, &entries).is_empty());
        assert!(EvidenceParser.parse(EntryKind::Music, &entries).is_empty());
    }

    #[test]
    fn test_best_evidence_by_priority() {
        let evidence = vec![
            EvidenceParser
                .parse_entry(EntryKind::CoreAudioFormat, "2 ch, 44100 Hz from 16-bit source")
                .unwrap(),
            EvidenceParser
                .parse_entry(
                    EntryKind::CoreMediaFormat,
                    "asbdSampleRate = 96.0 kHz, sdBitDepth = 24 bit",
                )
                .unwrap(),
        ];
        let best = best_evidence(evidence).unwrap();
        assert_eq!(best.kind, EntryKind::CoreMediaFormat);
    }

    #[test]
    fn test_best_evidence_tie_keeps_collection_order() {
        let entries = vec![
            "sampleRate: 96000".to_string(),
            "sampleRate: 44100".to_string(),
        ];
        let best = best_evidence(EvidenceParser.parse(EntryKind::Music, &entries)).unwrap();
        assert_relative_eq!(best.sample_rate, 96000.0);
    }

    #[test]
    fn test_best_evidence_empty() {
        assert!(best_evidence(Vec::new()).is_none());
    }
}
