//! Application-wide constants for docker-events.
//!
//! Centralizes default paths, marker file names and buffer limits so the
//! config layer, the supervisor and the decoder agree on them.
//!
//! # Categories
//!
//! - **Daemon**: CLI binary and runtime directory layout
//! - **Stream**: Subprocess output reading and decoding limits

// ============================================================================
// Daemon
// ============================================================================

/// Shell that runs the event-stream command line.
pub const DEFAULT_SHELL: &str = "sh";

/// Daemon CLI invoked to stream events.
pub const DEFAULT_DOCKER_BIN: &str = "docker";

/// Runtime directory watched for socket presence.
///
/// The daemon creates its control socket and pid file here on startup and
/// removes them on shutdown.
pub const DEFAULT_RUN_DIR: &str = "/var/run";

/// Control socket file name inside the runtime directory.
pub const DEFAULT_SOCKET_FILE: &str = "docker.sock";

/// Companion pid file name inside the runtime directory.
pub const DEFAULT_PID_FILE: &str = "docker.pid";

/// Output template handed to `docker events --format`.
///
/// Renders every event as a single-line JSON object.
pub const EVENT_FORMAT: &str = "{{json .}}";

// ============================================================================
// Stream
// ============================================================================

/// Size of each read from the subprocess stdout pipe.
pub const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Upper bound on text retained while waiting for a document to complete.
///
/// Docker event records are a few hundred bytes; a buffer this large only
/// happens when the stream is corrupt and will never parse.
pub const DEFAULT_MAX_BUFFER_BYTES: usize = 1024 * 1024;

// ============================================================================
// Event patterns
// ============================================================================

/// Pattern matching every published event.
pub const WILDCARD_PATTERN: &str = "*";

/// Pattern matching events whose action has no dedicated listener.
pub const FALLBACK_PATTERN: &str = "";

/// Action under which stream failures are published.
pub const ERROR_ACTION: &str = "error";
