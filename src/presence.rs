//! Daemon socket presence tracking.
//!
//! The daemon's runtime directory holds two marker files: the control
//! socket and a companion pid file. Both are created when the daemon
//! starts and removed when it stops, and the order of the rename-class
//! notifications reveals which way the daemon went:
//!
//! | last seen | now seen | meaning          | action  |
//! |-----------|----------|------------------|---------|
//! | socket    | pid      | socket removed   | stop    |
//! | pid       | socket   | socket created   | restart |
//! | anything else       || ambiguous        | none    |
//!
//! The last seen name is recorded after every qualifying notification.
//!
//! A socket deleted and recreated without a pid file notification in
//! between goes unnoticed; only the two-file ordering is observed, not the
//! socket itself.

use std::ffi::{OsStr, OsString};
use std::path::Path;

use anyhow::Result;

use crate::file_watcher::{DirEvent, DirWatcher};

/// Last qualifying marker file observed in the runtime directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SocketState {
    /// No qualifying notification seen yet.
    #[default]
    Unknown,
    /// The socket file was the last marker touched.
    SocketPresent,
    /// The pid file was the last marker touched.
    PidPresent,
}

/// What the pipeline should do after a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceAction {
    /// The socket reappeared: restart the listener.
    Start,
    /// The socket went away: stop the listener.
    Stop,
}

/// Socket presence state machine plus its lazily created directory watch.
pub struct SocketPresenceWatcher {
    socket_file: OsString,
    pid_file: OsString,
    state: SocketState,
    /// OS watch on the runtime directory, created on first use.
    watcher: Option<DirWatcher>,
}

impl std::fmt::Debug for SocketPresenceWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketPresenceWatcher")
            .field("socket_file", &self.socket_file)
            .field("pid_file", &self.pid_file)
            .field("state", &self.state)
            .field("watching", &self.watcher.is_some())
            .finish()
    }
}

impl SocketPresenceWatcher {
    /// Track the given socket and pid file names. No I/O is performed.
    #[must_use]
    pub fn new(socket_file: impl Into<OsString>, pid_file: impl Into<OsString>) -> Self {
        Self {
            socket_file: socket_file.into(),
            pid_file: pid_file.into(),
            state: SocketState::Unknown,
            watcher: None,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SocketState {
        self.state
    }

    /// Check if the directory watch has been established.
    #[must_use]
    pub fn is_watching(&self) -> bool {
        self.watcher.is_some()
    }

    /// Establish the directory watch if it does not exist yet.
    ///
    /// Batches of changes are handed to `deliver` from a blocking task.
    /// Later calls are no-ops, so the watch is created once and lives as
    /// long as this value. Returns `true` if a watch was created.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be watched.
    pub fn ensure_watching<F>(
        &mut self,
        dir: &Path,
        handle: &tokio::runtime::Handle,
        deliver: F,
    ) -> Result<bool>
    where
        F: FnMut(Vec<DirEvent>) -> bool + Send + 'static,
    {
        if self.watcher.is_some() {
            return Ok(false);
        }
        let mut watcher = DirWatcher::new(dir)?;
        // The forwarder ends on its own when the watcher drops.
        let _ = watcher.spawn_forwarder(handle, deliver);
        self.watcher = Some(watcher);
        Ok(true)
    }

    /// Apply one directory change.
    ///
    /// Ignores anything that is not a rename-class change to one of the two
    /// marker files.
    pub fn observe(&mut self, event: &DirEvent) -> Option<PresenceAction> {
        if !event.kind.is_rename_class() {
            return None;
        }
        self.observe_name(event.file_name()?)
    }

    /// Apply a rename-class notification for `name`.
    pub fn observe_name(&mut self, name: &OsStr) -> Option<PresenceAction> {
        let seen = if name == self.socket_file.as_os_str() {
            SocketState::SocketPresent
        } else if name == self.pid_file.as_os_str() {
            SocketState::PidPresent
        } else {
            return None;
        };

        let action = match (self.state, seen) {
            (SocketState::SocketPresent, SocketState::PidPresent) => Some(PresenceAction::Stop),
            (SocketState::PidPresent, SocketState::SocketPresent) => Some(PresenceAction::Start),
            _ => None,
        };

        log::debug!(
            "Marker {:?} seen ({:?} -> {:?}), action: {:?}",
            name,
            self.state,
            seen,
            action
        );
        self.state = seen;
        action
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_watcher::DirEventKind;

    fn watcher() -> SocketPresenceWatcher {
        SocketPresenceWatcher::new("docker.sock", "docker.pid")
    }

    fn event(name: &str, kind: DirEventKind) -> DirEvent {
        DirEvent::new(Path::new("/var/run").join(name), kind)
    }

    #[test]
    fn test_initial_state_unknown() {
        let w = watcher();
        assert_eq!(w.state(), SocketState::Unknown);
        assert!(!w.is_watching());
    }

    #[test]
    fn test_socket_created_after_pid_restarts() {
        let mut w = watcher();
        assert_eq!(w.observe_name(OsStr::new("docker.pid")), None);
        assert_eq!(w.state(), SocketState::PidPresent);

        assert_eq!(w.observe_name(OsStr::new("docker.sock")), Some(PresenceAction::Start));
        assert_eq!(w.state(), SocketState::SocketPresent);
    }

    #[test]
    fn test_pid_after_socket_stops() {
        let mut w = watcher();
        w.observe_name(OsStr::new("docker.pid"));
        w.observe_name(OsStr::new("docker.sock"));

        assert_eq!(w.observe_name(OsStr::new("docker.pid")), Some(PresenceAction::Stop));
        assert_eq!(w.state(), SocketState::PidPresent);
    }

    #[test]
    fn test_full_daemon_cycle() {
        let mut w = watcher();
        let actions: Vec<_> = ["docker.pid", "docker.sock", "docker.sock", "docker.pid", "docker.pid", "docker.sock"]
            .iter()
            .map(|n| w.observe_name(OsStr::new(n)))
            .collect();

        assert_eq!(
            actions,
            vec![
                None,
                Some(PresenceAction::Start),
                None,
                Some(PresenceAction::Stop),
                None,
                Some(PresenceAction::Start),
            ]
        );
    }

    #[test]
    fn test_first_socket_notification_has_no_action() {
        let mut w = watcher();
        assert_eq!(w.observe_name(OsStr::new("docker.sock")), None);
        assert_eq!(w.state(), SocketState::SocketPresent);
    }

    #[test]
    fn test_socket_recreated_without_pid_goes_unnoticed() {
        let mut w = watcher();
        w.observe_name(OsStr::new("docker.pid"));
        w.observe_name(OsStr::new("docker.sock"));

        // Delete + recreate of the socket alone.
        assert_eq!(w.observe_name(OsStr::new("docker.sock")), None);
        assert_eq!(w.observe_name(OsStr::new("docker.sock")), None);
    }

    #[test]
    fn test_unrelated_files_ignored() {
        let mut w = watcher();
        w.observe_name(OsStr::new("docker.pid"));
        assert_eq!(w.observe_name(OsStr::new("containerd.sock")), None);
        assert_eq!(w.state(), SocketState::PidPresent);
    }

    #[test]
    fn test_observe_filters_non_rename_events() {
        let mut w = watcher();
        assert_eq!(w.observe(&event("docker.pid", DirEventKind::Modify)), None);
        assert_eq!(w.state(), SocketState::Unknown);

        assert_eq!(w.observe(&event("docker.pid", DirEventKind::Create)), None);
        assert_eq!(
            w.observe(&event("docker.sock", DirEventKind::Rename)),
            Some(PresenceAction::Start)
        );
        assert_eq!(
            w.observe(&event("docker.pid", DirEventKind::Delete)),
            Some(PresenceAction::Stop)
        );
    }

    #[tokio::test]
    async fn test_watch_created_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let handle = tokio::runtime::Handle::current();
        let mut w = watcher();

        assert!(w.ensure_watching(dir.path(), &handle, |_| true).expect("watch"));
        assert!(!w.ensure_watching(dir.path(), &handle, |_| true).expect("watch"));
        assert!(w.is_watching());
    }

    #[tokio::test]
    async fn test_watch_missing_dir_fails() {
        let handle = tokio::runtime::Handle::current();
        let mut w = watcher();
        let result = w.ensure_watching(Path::new("/nonexistent/run/dir"), &handle, |_| true);
        assert!(result.is_err());
        assert!(!w.is_watching());
    }
}
