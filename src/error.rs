//! Error types for the watcher.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors from watcher operations.
///
/// Only [`InitFailed`](WatchError::InitFailed), [`Config`](WatchError::Config)
/// and a failure to watch the root are fatal. Everything else is reported by
/// the dispatcher and the loop keeps going.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Failed to initialize inotify: {reason}")]
    InitFailed { reason: String },

    #[error("Failed to read inotify events: {source}")]
    ReadFailed {
        #[source]
        source: io::Error,
    },

    #[error("Inotify read returned no data")]
    EmptyRead,

    #[error("Truncated event record at offset {offset} of a {len} byte batch")]
    TruncatedBatch { offset: usize, len: usize },

    #[error("Cannot watch {path}: {source}")]
    WatchFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to launch handler '{program}': {source}")]
    HandlerLaunchFailed {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Invalid configuration: {reason}")]
    Config { reason: String },
}

impl WatchError {
    /// Whether this error belongs to the read step of the event loop.
    pub fn is_read_failure(&self) -> bool {
        matches!(
            self,
            WatchError::ReadFailed { .. } | WatchError::EmptyRead | WatchError::TruncatedBatch { .. }
        )
    }
}

impl From<figment::Error> for WatchError {
    fn from(e: figment::Error) -> Self {
        WatchError::Config {
            reason: e.to_string(),
        }
    }
}
