//! Supervision of the event-stream subprocess.
//!
//! [`ProcessSupervisor`] owns at most one running `docker events` process.
//! Starting always stops the previous process first, so ownership is
//! handed over, never shared.
//!
//! Each spawn gets two tasks:
//!
//! - a **reader** that turns stdout into UTF-8 chunks tagged with the
//!   spawn's generation and sends them to the emitter loop;
//! - a **waiter** that owns the `Child`, reaps it, and kills it when asked
//!   (or when the supervisor lets go of it).
//!
//! Stopping only sends the kill request; it never waits for the process
//! to exit.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;

use crate::config::Config;
use crate::constants::{EVENT_FORMAT, READ_CHUNK_SIZE};
use crate::decoder::Utf8Assembler;
use crate::error::StreamError;
use crate::events::EmitterEvent;

/// Render the shell command line that streams daemon events.
///
/// `docker_bin` is inserted as shell text, so it may carry a wrapper such
/// as `sudo docker`. Filters are quoted and appended in order.
#[must_use]
pub fn render_command(docker_bin: &str, filters: &[String]) -> String {
    let mut line = format!(
        "exec {} events --format {}",
        docker_bin,
        shell_quote(EVENT_FORMAT)
    );
    for filter in filters {
        line.push_str(" --filter ");
        line.push_str(&shell_quote(filter));
    }
    line
}

/// Single-quote `value` for `sh`.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Handle to the live subprocess of one generation.
#[derive(Debug)]
struct ChildHandle {
    generation: u64,
    pid: Option<u32>,
    /// Dropping or firing this makes the waiter kill the child.
    kill_tx: Option<oneshot::Sender<()>>,
    exited: Arc<AtomicBool>,
}

/// Owns the single event-stream subprocess.
#[derive(Debug)]
pub struct ProcessSupervisor {
    shell: String,
    command: String,
    event_tx: UnboundedSender<EmitterEvent>,
    current: Option<ChildHandle>,
    /// Generation of the most recent spawn attempt.
    generation: u64,
    /// Generation whose output is still wanted; cleared by `stop`.
    accepting: Option<u64>,
}

impl ProcessSupervisor {
    /// Create a supervisor for the configured daemon CLI and filters.
    ///
    /// Nothing is spawned until [`start`](Self::start).
    pub(crate) fn new(config: &Config, event_tx: UnboundedSender<EmitterEvent>) -> Self {
        Self {
            shell: config.shell.clone(),
            command: render_command(&config.docker_bin, &config.filters),
            event_tx,
            current: None,
            generation: 0,
            accepting: None,
        }
    }

    /// Shell command line used for every spawn.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Generation of the most recent spawn attempt (0 before the first).
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Check if `generation` belongs to the tracked subprocess.
    #[must_use]
    pub fn is_current(&self, generation: u64) -> bool {
        self.current
            .as_ref()
            .is_some_and(|h| h.generation == generation)
    }

    /// Check if output tagged with `generation` should be decoded.
    ///
    /// Only the latest spawn qualifies, and only until it is stopped. A
    /// child that exited on its own keeps qualifying, since its last
    /// chunks may arrive after the exit notification.
    #[must_use]
    pub fn accepts(&self, generation: u64) -> bool {
        self.accepting == Some(generation)
    }

    /// OS pid of the tracked subprocess.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.current.as_ref().and_then(|h| h.pid)
    }

    /// Check if a subprocess is tracked and has not exited.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(|h| !h.exited.load(Ordering::Acquire))
    }

    /// Stop any previous subprocess, then spawn a new one.
    ///
    /// Must be called from within a tokio runtime. Returns the new
    /// generation.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Spawn`] if the process could not be launched.
    /// There is no retry.
    pub fn start(&mut self) -> Result<u64, StreamError> {
        self.stop();
        self.generation += 1;
        let generation = self.generation;

        let mut child = Command::new(&self.shell)
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| StreamError::spawn(self.command.clone(), e))?;

        let pid = child.id();
        log::info!(
            "Started event stream (generation={}, pid={:?}): {}",
            generation,
            pid,
            self.command
        );

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_stdout(generation, stdout, self.event_tx.clone()));
        }

        let (kill_tx, kill_rx) = oneshot::channel();
        let exited = Arc::new(AtomicBool::new(false));
        tokio::spawn(wait_for_exit(
            generation,
            child,
            kill_rx,
            Arc::clone(&exited),
            self.event_tx.clone(),
        ));

        self.current = Some(ChildHandle {
            generation,
            pid,
            kill_tx: Some(kill_tx),
            exited,
        });
        self.accepting = Some(generation);
        Ok(generation)
    }

    /// Send a kill request to the tracked subprocess.
    ///
    /// Idempotent: a no-op when nothing is tracked or the process has
    /// already exited. Does not wait for the exit.
    pub fn stop(&mut self) {
        self.accepting = None;
        let Some(mut handle) = self.current.take() else {
            return;
        };
        if handle.exited.load(Ordering::Acquire) {
            log::debug!("Event stream generation {} already exited", handle.generation);
            return;
        }
        if let Some(kill_tx) = handle.kill_tx.take() {
            log::info!(
                "Stopping event stream (generation={}, pid={:?})",
                handle.generation,
                handle.pid
            );
            let _ = kill_tx.send(());
        }
    }

    /// Forget the tracked subprocess after it exited on its own.
    ///
    /// Ignores exits from generations that are no longer tracked.
    pub(crate) fn reap(&mut self, generation: u64) {
        if self.is_current(generation) {
            self.current = None;
        }
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Read stdout until EOF, forwarding complete UTF-8 text.
async fn forward_stdout(
    generation: u64,
    mut stdout: ChildStdout,
    tx: UnboundedSender<EmitterEvent>,
) {
    let mut assembler = Utf8Assembler::new();
    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    loop {
        match stdout.read(&mut buf).await {
            Ok(0) => {
                if assembler.pending_len() > 0 {
                    log::debug!(
                        "Event stream generation {} ended inside a character ({} bytes)",
                        generation,
                        assembler.pending_len()
                    );
                    let text = assembler.finish();
                    let _ = tx.send(EmitterEvent::Chunk { generation, text });
                }
                break;
            }
            Ok(n) => {
                let text = assembler.push(&buf[..n]);
                if text.is_empty() {
                    continue;
                }
                if tx.send(EmitterEvent::Chunk { generation, text }).is_err() {
                    break; // Emitter gone
                }
            }
            Err(e) => {
                let _ = tx.send(EmitterEvent::StreamFailed {
                    generation,
                    error: StreamError::Read(e),
                });
                break;
            }
        }
    }
    log::debug!("Event stream reader for generation {} finished", generation);
}

/// Reap `child`, killing it first if a stop is requested.
async fn wait_for_exit(
    generation: u64,
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
    exited: Arc<AtomicBool>,
    tx: UnboundedSender<EmitterEvent>,
) {
    let finished = tokio::select! {
        status = child.wait() => Some(status),
        // Fires on an explicit stop and when the handle is dropped.
        _ = kill_rx => None,
    };

    let status = match finished {
        Some(status) => status,
        None => {
            if let Err(e) = child.start_kill() {
                log::warn!("Failed to kill event stream generation {}: {}", generation, e);
            }
            child.wait().await
        }
    };

    exited.store(true, Ordering::Release);
    let status = match status {
        Ok(status) => Some(status),
        Err(e) => {
            log::warn!("Failed to wait on event stream generation {}: {}", generation, e);
            None
        }
    };
    let _ = tx.send(EmitterEvent::ProcessExited { generation, status });
}
