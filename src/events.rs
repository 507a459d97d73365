//! Unified event channel for the emitter loop.
//!
//! Background producers (the directory watch forwarder, the stdout reader
//! task, the child waiter task, shutdown handles) never touch emitter
//! state. They send `EmitterEvent`s through one
//! `mpsc::UnboundedSender<EmitterEvent>`, and the emitter handles them one
//! at a time, each to completion, in arrival order.

use std::process::ExitStatus;

use crate::error::StreamError;
use crate::file_watcher::DirEvent;

/// Event from a background producer delivered to the emitter loop.
#[derive(Debug)]
pub(crate) enum EmitterEvent {
    /// Classified changes in the daemon runtime directory.
    SocketDirChange {
        /// Changes from one OS notification.
        events: Vec<DirEvent>,
    },

    /// Text read from a subprocess stdout.
    Chunk {
        /// Subprocess generation that produced the text.
        generation: u64,
        /// Complete UTF-8 text, arbitrarily split.
        text: String,
    },

    /// Reading a subprocess stdout failed.
    StreamFailed {
        /// Subprocess generation whose pipe failed.
        generation: u64,
        /// Failure detail.
        error: StreamError,
    },

    /// A subprocess has exited and been reaped.
    ProcessExited {
        /// Subprocess generation that exited.
        generation: u64,
        /// Exit status, `None` if waiting on the child failed.
        status: Option<ExitStatus>,
    },

    /// Stop the subprocess and leave the loop.
    Shutdown,
}
