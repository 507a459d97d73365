//! Failures surfaced to subscribers as `error` events.
//!
//! Only failures that cross the pipeline boundary live here. Decode
//! failures stay inside the decoder and lifecycle transitions are not
//! errors at all.

use thiserror::Error;

/// A subprocess-level failure published under the `error` pattern.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The event-stream subprocess could not be launched.
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        /// Shell command line that was being launched.
        command: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// Reading the subprocess stdout failed.
    #[error("failed to read event stream: {0}")]
    Read(#[from] std::io::Error),
}

impl StreamError {
    /// Build a spawn failure for `command`.
    #[must_use]
    pub fn spawn(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::Spawn {
            command: command.into(),
            source,
        }
    }

    /// Returns `true` if the subprocess never started.
    #[must_use]
    pub fn is_spawn(&self) -> bool {
        matches!(self, Self::Spawn { .. })
    }
}
