//! End-to-end tests for the event emitter.
//!
//! A shell script stands in for the daemon CLI: it logs its arguments,
//! prints two event records and then blocks, like `docker events` does.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use docker_events::{Config, Event, EventEmitter, SocketState};
use tempfile::TempDir;

const FAKE_DOCKER: &str = r#"printf '%s\n' "$@" > "$(dirname "$0")/args.log"
printf '{"Action":"start","id":"abc","Type":"container"}\n'
printf '{"Action":"die","id":"abc","Type":"container"}\n'
exec sleep 30
"#;

struct Fixture {
    _bin_dir: TempDir,
    run_dir: TempDir,
    docker_bin: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let bin_dir = tempfile::tempdir().expect("bin tempdir");
        let run_dir = tempfile::tempdir().expect("run tempdir");
        let docker_bin = bin_dir.path().join("docker");
        fs::write(&docker_bin, FAKE_DOCKER).expect("write fake docker");
        Self {
            _bin_dir: bin_dir,
            run_dir,
            docker_bin,
        }
    }

    /// Run the script through `sh` rather than exec'ing it, so a
    /// concurrently forking test cannot hit ETXTBSY.
    fn docker_cmd(&self) -> String {
        format!("sh {}", self.docker_bin.display())
    }

    fn emitter(&self, filters: &[&str]) -> EventEmitter {
        EventEmitter::with_config(Config {
            docker_bin: self.docker_cmd(),
            run_dir: self.run_dir.path().to_path_buf(),
            filters: filters.iter().map(|s| (*s).to_string()).collect(),
            ..Config::default()
        })
    }

    fn args_log(&self) -> Vec<String> {
        let log = self.docker_bin.with_file_name("args.log");
        fs::read_to_string(log)
            .expect("args.log")
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn marker(&self, name: &str) -> PathBuf {
        self.run_dir.path().join(name)
    }
}

fn is_alive(pid: u32) -> bool {
    let pid = i32::try_from(pid).expect("pid fits in i32");
    // SAFETY: signal 0 only checks for existence.
    unsafe { libc::kill(pid, 0) == 0 }
}

/// Handle emitter events until `done` holds.
async fn drive_until(emitter: &mut EventEmitter, mut done: impl FnMut(&EventEmitter) -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !done(&*emitter) {
        assert!(Instant::now() < deadline, "timed out driving emitter");
        let _ = tokio::time::timeout(Duration::from_millis(100), emitter.process_next()).await;
    }
}

fn touch(path: &Path) {
    fs::write(path, b"").expect("create marker");
}

#[tokio::test]
async fn test_events_reach_listeners_with_filters() {
    let fixture = Fixture::new();
    let mut emitter = fixture.emitter(&["type=container", "event=die"]);

    let all = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&all);
    emitter.on("*", move |event: &Event| {
        sink.lock().unwrap().push(event.action().to_string());
    });

    let died = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&died);
    emitter.on("die", move |event: &Event| {
        let record = event.as_record().expect("record");
        sink.lock().unwrap().push(record.get("id").cloned());
    });

    emitter.listen().expect("listen");
    drive_until(&mut emitter, |_| all.lock().unwrap().len() >= 2).await;

    assert_eq!(*all.lock().unwrap(), vec!["start", "die"]);
    assert_eq!(*died.lock().unwrap(), vec![Some(serde_json::json!("abc"))]);
    assert_eq!(
        fixture.args_log(),
        vec![
            "events",
            "--format",
            "{{json .}}",
            "--filter",
            "type=container",
            "--filter",
            "event=die",
        ]
    );
    assert!(emitter.pending_text().is_empty());
    emitter.stop();
}

#[tokio::test]
async fn test_listen_twice_leaves_one_process() {
    let fixture = Fixture::new();
    let mut emitter = fixture.emitter(&[]);

    emitter.listen().expect("first listen");
    let first = emitter.pid().expect("first pid");
    emitter.listen().expect("second listen");
    let second = emitter.pid().expect("second pid");
    assert_ne!(first, second);
    assert_eq!(emitter.generation(), 2);

    drive_until(&mut emitter, |_| !is_alive(first)).await;
    assert!(is_alive(second));
    assert!(emitter.is_running());

    emitter.stop();
    drive_until(&mut emitter, |_| !is_alive(second)).await;
    assert!(!emitter.is_running());
}

#[tokio::test]
async fn test_socket_reappearance_restarts_stream() {
    let fixture = Fixture::new();
    let mut emitter = fixture.emitter(&[]);

    let starts = Arc::new(Mutex::new(0usize));
    let sink = Arc::clone(&starts);
    emitter.on("start", move |_: &Event| {
        *sink.lock().unwrap() += 1;
    });

    emitter.listen().expect("listen");
    drive_until(&mut emitter, |_| *starts.lock().unwrap() >= 1).await;
    let first = emitter.pid().expect("first pid");

    // Daemon startup: pid file first, then the socket.
    touch(&fixture.marker("docker.pid"));
    touch(&fixture.marker("docker.sock"));
    drive_until(&mut emitter, |e| e.generation() == 2).await;
    assert_eq!(emitter.socket_state(), SocketState::SocketPresent);

    drive_until(&mut emitter, |_| *starts.lock().unwrap() >= 2).await;
    assert_ne!(emitter.pid(), Some(first));
    drive_until(&mut emitter, |_| !is_alive(first)).await;

    // Daemon shutdown: socket removed, then the pid file.
    fs::remove_file(fixture.marker("docker.sock")).expect("remove socket");
    fs::remove_file(fixture.marker("docker.pid")).expect("remove pid");
    drive_until(&mut emitter, |e| !e.is_running()).await;
    assert_eq!(emitter.socket_state(), SocketState::PidPresent);
    assert_eq!(emitter.generation(), 2);
}

#[tokio::test]
async fn test_shutdown_handle_ends_run() {
    let fixture = Fixture::new();
    let mut emitter = fixture.emitter(&[]);
    emitter.listen().expect("listen");
    let pid = emitter.pid().expect("pid");

    let shutdown = emitter.shutdown_handle();
    std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(200));
        shutdown.shutdown();
    });

    tokio::time::timeout(Duration::from_secs(10), emitter.run())
        .await
        .expect("run returns after shutdown");
    assert!(!emitter.is_running());

    let deadline = Instant::now() + Duration::from_secs(10);
    while is_alive(pid) {
        assert!(Instant::now() < deadline, "child survived shutdown");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn test_missing_run_dir_fails_listen() {
    let fixture = Fixture::new();
    let mut emitter = EventEmitter::with_config(Config {
        docker_bin: fixture.docker_cmd(),
        run_dir: fixture.run_dir.path().join("missing"),
        ..Config::default()
    });
    assert!(emitter.listen().is_err());
    assert!(emitter.pid().is_none());
}
