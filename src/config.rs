//! Configuration loading and persistence.
//!
//! Settings come from `config.json` in the config directory, then
//! environment variables override individual fields. Every field has a
//! default, so a missing file is not an error.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf};

use crate::constants::{
    DEFAULT_DOCKER_BIN, DEFAULT_MAX_BUFFER_BYTES, DEFAULT_PID_FILE, DEFAULT_RUN_DIR,
    DEFAULT_SHELL, DEFAULT_SOCKET_FILE,
};

/// Configuration for an event emitter.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Shell used to run the event-stream command line.
    pub shell: String,
    /// Daemon CLI, inserted into the shell command line as-is.
    pub docker_bin: String,
    /// Daemon runtime directory holding the socket and pid file.
    pub run_dir: PathBuf,
    /// Control socket file name inside `run_dir`.
    pub socket_file: String,
    /// Pid file name inside `run_dir`.
    pub pid_file: String,
    /// Filters passed as `--filter <value>`, in order.
    pub filters: Vec<String>,
    /// Decoder buffer limit in bytes.
    pub max_buffer_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shell: DEFAULT_SHELL.to_string(),
            docker_bin: DEFAULT_DOCKER_BIN.to_string(),
            run_dir: PathBuf::from(DEFAULT_RUN_DIR),
            socket_file: DEFAULT_SOCKET_FILE.to_string(),
            pid_file: DEFAULT_PID_FILE.to_string(),
            filters: Vec::new(),
            max_buffer_bytes: DEFAULT_MAX_BUFFER_BYTES,
        }
    }
}

impl Config {
    /// Default configuration with the given filters.
    #[must_use]
    pub fn with_filters(filters: Vec<String>) -> Self {
        Self {
            filters,
            ..Self::default()
        }
    }

    /// Returns the configuration directory path.
    ///
    /// `DOCKER_EVENTS_CONFIG_DIR` overrides the platform config directory.
    pub fn config_dir() -> Result<PathBuf> {
        if let Ok(dir) = std::env::var("DOCKER_EVENTS_CONFIG_DIR") {
            return Ok(PathBuf::from(dir));
        }
        Ok(dirs::config_dir()
            .context("Could not determine config directory")?
            .join("docker-events"))
    }

    /// Loads configuration from file, with environment variable overrides.
    pub fn load() -> Result<Self> {
        let mut config = match Self::load_from_file() {
            Ok(Some(config)) => config,
            Ok(None) => Self::default(),
            Err(e) => {
                log::warn!("Ignoring unreadable config file: {e:#}");
                Self::default()
            }
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn load_from_file() -> Result<Option<Self>> {
        let config_path = Self::config_dir()?.join("config.json");
        if !config_path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        let config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;
        Ok(Some(config))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(shell) = std::env::var("DOCKER_EVENTS_SHELL") {
            self.shell = shell;
        }

        if let Ok(bin) = std::env::var("DOCKER_EVENTS_BIN") {
            self.docker_bin = bin;
        }

        if let Ok(run_dir) = std::env::var("DOCKER_EVENTS_RUN_DIR") {
            self.run_dir = PathBuf::from(run_dir);
        }

        if let Ok(socket_file) = std::env::var("DOCKER_EVENTS_SOCKET_FILE") {
            self.socket_file = socket_file;
        }

        if let Ok(pid_file) = std::env::var("DOCKER_EVENTS_PID_FILE") {
            self.pid_file = pid_file;
        }

        if let Ok(filters) = std::env::var("DOCKER_EVENTS_FILTERS") {
            self.filters = parse_filter_list(&filters);
        }

        if let Ok(max) = std::env::var("DOCKER_EVENTS_MAX_BUFFER") {
            if let Ok(max) = max.parse::<usize>() {
                self.max_buffer_bytes = max;
            }
        }
    }

    /// Persists the current configuration to disk.
    pub fn save(&self) -> Result<()> {
        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
        fs::write(dir.join("config.json"), serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Full path of the daemon control socket.
    #[must_use]
    pub fn socket_path(&self) -> PathBuf {
        self.run_dir.join(&self.socket_file)
    }

    /// Full path of the daemon pid file.
    #[must_use]
    pub fn pid_path(&self) -> PathBuf {
        self.run_dir.join(&self.pid_file)
    }
}

/// Split a comma separated filter list, dropping blanks.
fn parse_filter_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
