//! Diagnostic log collection
//!
//! Reading logs can block for a noticeable time, so collection only ever
//! runs on the blocking worker pool.

use super::parser::{Evidence, EvidenceParser};
use super::EntryKind;
use std::collections::HashMap;
use std::process::Command;
use thiserror::Error;

/// Errors that can occur while reading diagnostic entries
#[derive(Error, Debug)]
pub enum EvidenceError {
    #[error("Failed to run log command '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Log command '{program}' exited with {status}")]
    Exit { program: String, status: String },

    #[error("No query configured for {0} entries")]
    UnsupportedKind(EntryKind),
}

/// Source of recent raw diagnostic entries
pub trait EvidenceSource: Send + Sync {
    /// Recent entries of one kind, newest first
    fn recent_entries(&self, kind: EntryKind) -> Result<Vec<String>, EvidenceError>;
}

/// Collect and parse evidence from every kind in `kinds`
///
/// Collection errors are logged and treated as "no entries" for that kind.
pub fn collect_evidence(source: &dyn EvidenceSource, kinds: &[EntryKind]) -> Vec<Evidence> {
    let parser = EvidenceParser;
    let mut evidence = Vec::new();

    for &kind in kinds {
        match source.recent_entries(kind) {
            Ok(entries) => {
                let parsed = parser.parse(kind, &entries);
                tracing::debug!(
                    %kind,
                    entries = entries.len(),
                    evidence = parsed.len(),
                    "diagnostics collected"
                );
                evidence.extend(parsed);
            }
            Err(e) => {
                tracing::warn!(%kind, error = %e, "diagnostics collection failed");
            }
        }
    }

    evidence
}

/// Reads entries by running a log query command, one predicate per kind
///
/// The default runs macOS `log show` over the last two seconds.
#[derive(Debug, Clone)]
pub struct CommandLogSource {
    program: String,
    args: Vec<String>,
    predicates: HashMap<EntryKind, String>,
}

impl CommandLogSource {
    /// Create a source that runs `program args... <predicate>`
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            predicates: HashMap::new(),
        }
    }

    /// Set the query predicate for one kind
    pub fn with_predicate(mut self, kind: EntryKind, predicate: impl Into<String>) -> Self {
        self.predicates.insert(kind, predicate.into());
        self
    }

    /// Program this source runs
    pub fn program(&self) -> &str {
        &self.program
    }
}

impl Default for CommandLogSource {
    fn default() -> Self {
        let args = ["show", "--style", "compact", "--info", "--debug", "--last", "2s", "--predicate"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        Self::new("/usr/bin/log", args)
            .with_predicate(
                EntryKind::Music,
                r#"process == "Music" AND eventMessage CONTAINS[c] "sampleRate""#,
            )
            .with_predicate(
                EntryKind::CoreAudioFormat,
                r#"subsystem == "com.apple.coreaudio" AND eventMessage CONTAINS "Input format""#,
            )
            .with_predicate(
                EntryKind::CoreMediaFormat,
                r#"subsystem == "com.apple.coremedia" AND eventMessage CONTAINS "audioCapabilities""#,
            )
    }
}

impl EvidenceSource for CommandLogSource {
    fn recent_entries(&self, kind: EntryKind) -> Result<Vec<String>, EvidenceError> {
        let predicate = self
            .predicates
            .get(&kind)
            .ok_or(EvidenceError::UnsupportedKind(kind))?;

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(predicate)
            .output()
            .map_err(|source| EvidenceError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(EvidenceError::Exit {
                program: self.program.clone(),
                status: output.status.to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().rev().map(str::to_string).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct ScriptedSource {
        entries: HashMap<EntryKind, Result<Vec<String>, ()>>,
        queried: Mutex<Vec<EntryKind>>,
    }

    impl EvidenceSource for ScriptedSource {
        fn recent_entries(&self, kind: EntryKind) -> Result<Vec<String>, EvidenceError> {
            self.queried.lock().unwrap().push(kind);
            match self.entries.get(&kind) {
                Some(Ok(lines)) => Ok(lines.clone()),
                Some(Err(())) => Err(EvidenceError::Exit {
                    program: "log".to_string(),
                    status: "exit status: 1".to_string(),
                }),
                None => Ok(Vec::new()),
            }
        }
    }

    #[test]
    fn test_collect_queries_only_requested_kinds() {
        let source = ScriptedSource {
            entries: HashMap::from([(
                EntryKind::Music,
                Ok(vec!["sampleRate: 44100".to_string()]),
            )]),
            queried: Mutex::new(Vec::new()),
        };
        let evidence = collect_evidence(&source, EntryKind::for_detection(false));
        assert_eq!(evidence.len(), 1);
        assert_eq!(*source.queried.lock().unwrap(), vec![EntryKind::Music]);
    }

    #[test]
    fn test_collect_survives_failing_kind() {
        let source = ScriptedSource {
            entries: HashMap::from([
                (EntryKind::CoreMediaFormat, Err(())),
                (
                    EntryKind::CoreAudioFormat,
                    Ok(vec!["2 ch, 96000 Hz from 24-bit source".to_string()]),
                ),
            ]),
            queried: Mutex::new(Vec::new()),
        };
        let evidence = collect_evidence(&source, EntryKind::for_detection(true));
        assert_eq!(evidence.len(), 1);
        assert_eq!(evidence[0].kind, EntryKind::CoreAudioFormat);
    }

    #[test]
    fn test_missing_program_is_spawn_error() {
        let source = CommandLogSource::new("/nonexistent/ratesync-log", Vec::new())
            .with_predicate(EntryKind::Music, "true");
        let err = source.recent_entries(EntryKind::Music).unwrap_err();
        assert!(matches!(err, EvidenceError::Spawn { .. }));
    }

    #[test]
    fn test_unconfigured_kind() {
        let source = CommandLogSource::new("log", Vec::new());
        let err = source.recent_entries(EntryKind::Music).unwrap_err();
        assert!(matches!(err, EvidenceError::UnsupportedKind(EntryKind::Music)));
    }

    #[test]
    fn test_default_has_predicate_for_every_kind() {
        let source = CommandLogSource::default();
        assert_eq!(source.predicates.len(), 3);
        assert_eq!(source.program(), "/usr/bin/log");
    }
}
