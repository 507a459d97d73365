//! The event emitter: socket presence, subprocess, decoder and bus wired
//! into one event loop.
//!
//! # Control flow
//!
//! ```text
//! run dir change ──► SocketPresenceWatcher ──► start / stop
//!                                                  │
//!                                         ProcessSupervisor
//!                                                  │ stdout chunks
//!                                            StreamDecoder
//!                                                  │ records
//!                                              EventBus ──► listeners
//! ```
//!
//! Everything the background tasks produce arrives as an
//! [`EmitterEvent`](crate::events::EmitterEvent) on one channel, and
//! [`EventEmitter::process_next`] handles them one at a time. Listener
//! callbacks therefore run on the task that drives the emitter, never
//! concurrently with each other or with state updates.
//!
//! # Usage
//!
//! ```no_run
//! use docker_events::{Event, EventEmitter};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let mut emitter = EventEmitter::new(vec!["type=container".to_string()]);
//! emitter.on("die", |event: &Event| {
//!     if let Some(record) = event.as_record() {
//!         println!("container died: {:?}", record.get("id"));
//!     }
//! });
//! emitter.on("error", |event: &Event| eprintln!("{:?}", event.as_error()));
//!
//! emitter.listen()?;
//! emitter.run().await;
//! # Ok(())
//! # }
//! ```

use anyhow::{Context, Result};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::bus::{Event, EventBus, ListenerId, Pattern};
use crate::config::Config;
use crate::decoder::StreamDecoder;
use crate::error::StreamError;
use crate::events::EmitterEvent;
use crate::presence::{PresenceAction, SocketPresenceWatcher, SocketState};
use crate::supervisor::ProcessSupervisor;

/// Requests shutdown of an [`EventEmitter`] from anywhere.
///
/// Cheap to clone; safe to use from signal handlers and other threads.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: UnboundedSender<EmitterEvent>,
}

impl ShutdownHandle {
    /// Ask the emitter to stop its subprocess and leave its loop.
    ///
    /// Returns `false` if the emitter no longer exists.
    pub fn shutdown(&self) -> bool {
        self.tx.send(EmitterEvent::Shutdown).is_ok()
    }
}

/// Streams daemon events to in-process listeners for as long as the
/// daemon socket exists.
pub struct EventEmitter {
    config: Config,
    bus: EventBus,
    decoder: StreamDecoder,
    supervisor: ProcessSupervisor,
    presence: SocketPresenceWatcher,
    event_tx: UnboundedSender<EmitterEvent>,
    event_rx: UnboundedReceiver<EmitterEvent>,
    shutting_down: bool,
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("config", &self.config)
            .field("bus", &self.bus)
            .field("presence", &self.presence)
            .field("supervisor", &self.supervisor)
            .field("shutting_down", &self.shutting_down)
            .finish_non_exhaustive()
    }
}

impl EventEmitter {
    /// Create an emitter with default settings and the given filters.
    ///
    /// No I/O happens until [`listen`](Self::listen).
    #[must_use]
    pub fn new(filters: Vec<String>) -> Self {
        Self::with_config(Config::with_filters(filters))
    }

    /// Create an emitter from a full configuration.
    #[must_use]
    pub fn with_config(config: Config) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            bus: EventBus::new(),
            decoder: StreamDecoder::new(config.max_buffer_bytes),
            supervisor: ProcessSupervisor::new(&config, event_tx.clone()),
            presence: SocketPresenceWatcher::new(&config.socket_file, &config.pid_file),
            config,
            event_tx,
            event_rx,
            shutting_down: false,
        }
    }

    /// Settings this emitter was built with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Register a listener; see [`EventBus::on`].
    pub fn on<P, F>(&mut self, pattern: P, listener: F) -> ListenerId
    where
        P: Into<Pattern>,
        F: FnMut(&Event) + Send + 'static,
    {
        self.bus.on(pattern, listener)
    }

    /// Unregister a listener; see [`EventBus::off`].
    pub fn off(&mut self, id: &str) -> bool {
        self.bus.off(id)
    }

    /// Number of listeners registered under `pattern`.
    #[must_use]
    pub fn listener_count(&self, pattern: &str) -> usize {
        self.bus.listener_count(pattern)
    }

    /// Start (or restart) streaming.
    ///
    /// Stops any previous subprocess, establishes the run directory watch
    /// on first use, then spawns a fresh subprocess. A spawn failure is
    /// published as an `error` event rather than returned. Must be called
    /// from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no tokio runtime or the run directory
    /// cannot be watched.
    pub fn listen(&mut self) -> Result<()> {
        self.stop_stream();

        let handle = tokio::runtime::Handle::try_current()
            .context("listen() must be called from within a tokio runtime")?;
        let tx = self.event_tx.clone();
        self.presence
            .ensure_watching(&self.config.run_dir, &handle, move |events| {
                tx.send(EmitterEvent::SocketDirChange { events }).is_ok()
            })
            .with_context(|| {
                format!(
                    "Failed to watch daemon run directory {}",
                    self.config.run_dir.display()
                )
            })?;

        self.start_stream();
        Ok(())
    }

    /// Stop the subprocess without leaving the loop.
    ///
    /// The directory watch stays active, so a socket reappearance starts
    /// streaming again.
    pub fn stop(&mut self) {
        self.stop_stream();
    }

    /// Handle that makes [`run`](Self::run) return.
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.event_tx.clone(),
        }
    }

    /// Last marker file seen in the run directory.
    #[must_use]
    pub fn socket_state(&self) -> SocketState {
        self.presence.state()
    }

    /// Check if an event-stream subprocess is alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.supervisor.is_running()
    }

    /// OS pid of the current subprocess.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.supervisor.pid()
    }

    /// Number of subprocess spawn attempts so far.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.supervisor.generation()
    }

    /// Text held by the decoder while waiting for a document to complete.
    #[must_use]
    pub fn pending_text(&self) -> &str {
        self.decoder.buffer()
    }

    /// Handle events until shutdown is requested.
    pub async fn run(&mut self) {
        while self.process_next().await {}
        log::info!("Event emitter stopped");
    }

    /// Wait for one event and handle it.
    ///
    /// Returns `false` once shutdown has been requested.
    pub async fn process_next(&mut self) -> bool {
        if self.shutting_down {
            return false;
        }
        // The emitter holds a sender, so the channel never closes.
        if let Some(event) = self.event_rx.recv().await {
            self.handle_event(event);
        }
        !self.shutting_down
    }

    pub(crate) fn handle_event(&mut self, event: EmitterEvent) {
        match event {
            EmitterEvent::SocketDirChange { events } => {
                for change in &events {
                    match self.presence.observe(change) {
                        Some(PresenceAction::Start) => {
                            log::info!("Daemon socket created, restarting event stream");
                            self.start_stream();
                        }
                        Some(PresenceAction::Stop) => {
                            log::info!("Daemon socket removed, stopping event stream");
                            self.stop_stream();
                        }
                        None => {}
                    }
                }
            }

            EmitterEvent::Chunk { generation, text } => {
                if !self.supervisor.accepts(generation) {
                    log::debug!(
                        "Dropping {} bytes from stopped generation {}",
                        text.len(),
                        generation
                    );
                    return;
                }
                let bus = &mut self.bus;
                self.decoder.feed(&text, |record| {
                    bus.publish(&Event::Record(record));
                });
            }

            EmitterEvent::StreamFailed { generation, error } => {
                if !self.supervisor.accepts(generation) {
                    log::debug!("Ignoring read failure from stopped generation {}", generation);
                    return;
                }
                log::warn!("{}", error);
                self.publish_error(error);
            }

            EmitterEvent::ProcessExited { generation, status } => {
                if !self.supervisor.is_current(generation) {
                    log::debug!("Replaced generation {} exited", generation);
                    return;
                }
                match status {
                    Some(status) if status.success() => {
                        log::info!("Event stream exited");
                    }
                    Some(status) => {
                        log::warn!("Event stream exited with {}", status);
                    }
                    None => {}
                }
                self.supervisor.reap(generation);
            }

            EmitterEvent::Shutdown => {
                log::info!("Shutdown requested");
                self.stop_stream();
                self.shutting_down = true;
            }
        }
    }

    /// Spawn a fresh subprocess with an empty decoder.
    fn start_stream(&mut self) {
        // A partial record from the previous process would corrupt the
        // first record of the next one.
        self.decoder.clear();
        if let Err(error) = self.supervisor.start() {
            log::warn!("{}", error);
            self.publish_error(error);
        }
    }

    /// Kill the subprocess and forget any partial record it left.
    fn stop_stream(&mut self) {
        self.supervisor.stop();
        self.decoder.clear();
    }

    fn publish_error(&mut self, error: StreamError) {
        self.bus.publish(&Event::Error(error));
    }
}
