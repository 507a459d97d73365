//! docker-events - Docker daemon event streaming.
//!
//! Runs `docker events` as a subprocess, decodes its JSON output into
//! records and publishes them to in-process listeners by action name. The
//! daemon's runtime directory is watched so the stream restarts when the
//! daemon comes back after a restart.
//!
//! # Architecture
//!
//! - **Emitter** - Owns everything below and runs the single event loop
//! - **Presence** - Socket/pid file state machine over a directory watch
//! - **Supervisor** - Spawns, kills and reaps the event-stream subprocess
//! - **Decoder** - Reassembles newline delimited JSON from arbitrary chunks
//! - **Bus** - Pattern based listener registry (`*`, exact action, fallback)
//!
//! # Modules
//!
//! - [`emitter`] - [`EventEmitter`], the public entry point
//! - [`bus`] - Listener registration and dispatch
//! - [`config`] - Configuration loading/saving

// Library modules
pub mod bus;
pub mod config;
pub mod constants;
pub mod decoder;
pub mod emitter;
pub mod error;
pub mod file_watcher;
pub mod presence;
pub mod supervisor;

mod events;

// Re-export commonly used types
pub use bus::{Event, EventBus, EventRecord, ListenerId, Pattern};
pub use config::Config;
pub use emitter::{EventEmitter, ShutdownHandle};
pub use error::StreamError;
pub use presence::SocketState;
