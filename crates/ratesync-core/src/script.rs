//! User post-switch script
//!
//! Runs after every published rate change with the new rate in Hz as its
//! only argument. The script is fire-and-forget: it runs on the blocking
//! pool and its failure is only logged.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur while running the post-switch script
#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("Failed to run script '{path}': {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Script '{path}' exited with {status}")]
    Exit { path: PathBuf, status: String },
}

/// Hook run after a rate switch
pub trait PostSwitchScript: Send + Sync {
    /// Run with the new rate (blocking)
    fn run(&self, rate_hz: u32) -> Result<(), ScriptError>;
}

/// Executes a script file
#[derive(Debug, Clone)]
pub struct ShellScript {
    path: PathBuf,
}

impl ShellScript {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PostSwitchScript for ShellScript {
    fn run(&self, rate_hz: u32) -> Result<(), ScriptError> {
        let status = Command::new(&self.path)
            .arg(rate_hz.to_string())
            .status()
            .map_err(|source| ScriptError::Spawn {
                path: self.path.clone(),
                source,
            })?;

        if !status.success() {
            return Err(ScriptError::Exit {
                path: self.path.clone(),
                status: status.to_string(),
            });
        }
        Ok(())
    }
}

/// Used when no script is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct NoScript;

impl PostSwitchScript for NoScript {
    fn run(&self, _rate_hz: u32) -> Result<(), ScriptError> {
        Ok(())
    }
}

/// Run `script` detached on the blocking pool
///
/// Must be called from within a tokio runtime. The returned handle is not
/// awaited by the resolver.
pub fn spawn_detached(
    script: Arc<dyn PostSwitchScript>,
    rate_hz: u32,
) -> tokio::task::JoinHandle<()> {
    tokio::task::spawn_blocking(move || match script.run(rate_hz) {
        Ok(()) => tracing::debug!(rate_hz, "post-switch script finished"),
        Err(e) => tracing::warn!(rate_hz, error = %e, "post-switch script failed"),
    })
}
