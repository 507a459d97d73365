//! docker-events CLI - prints Docker daemon events as JSON lines.
//!
//! This is the main binary entry point. See the `docker_events` library
//! for the core functionality.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use docker_events::constants::ERROR_ACTION;
use docker_events::{Config, Event, EventEmitter, Pattern};
use mimalloc::MiMalloc;
use std::io::Write;

/// mimalloc provides better multi-threaded performance than the system allocator.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser)]
#[command(name = "docker-events")]
#[command(version)]
#[command(about = "Stream Docker daemon events, surviving daemon restarts")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream events to stdout, one JSON object per line
    Listen {
        /// Filter passed to `docker events --filter` (repeatable)
        #[arg(long = "filter", short = 'f')]
        filters: Vec<String>,
        /// Only print events with this action (repeatable)
        #[arg(long = "action", short = 'a')]
        actions: Vec<String>,
        /// Daemon CLI to run, e.g. "sudo docker"
        #[arg(long)]
        docker_bin: Option<String>,
        /// Daemon runtime directory holding the socket and pid file
        #[arg(long)]
        run_dir: Option<std::path::PathBuf>,
    },
    /// Print the effective configuration
    Config {
        /// Also write it to the config file
        #[arg(long)]
        save: bool,
    },
}

fn init_logging() -> Result<()> {
    // Logs go to stderr unless DOCKER_EVENTS_LOG_FILE is set; stdout
    // carries the event stream.
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Ok(path) = std::env::var("DOCKER_EVENTS_LOG_FILE") {
        let log_file = std::fs::File::create(&path)
            .with_context(|| format!("Failed to create log file at {path}"))?;
        builder.target(env_logger::Target::Pipe(Box::new(log_file)));
    } else {
        builder.target(env_logger::Target::Stderr);
    }
    builder.format_timestamp_secs().init();
    Ok(())
}

fn print_event(event: &Event) {
    match event {
        Event::Record(record) => {
            let mut stdout = std::io::stdout().lock();
            let line = serde_json::Value::Object(record.payload().clone());
            // A closed stdout (e.g. `| head`) is not worth a panic.
            let _ = writeln!(stdout, "{line}");
            let _ = stdout.flush();
        }
        Event::Error(error) => eprintln!("error: {error}"),
    }
}

/// Print every event, or only `actions` plus errors.
fn subscribe(emitter: &mut EventEmitter, actions: Vec<String>) {
    if actions.is_empty() {
        emitter.on(Pattern::Wildcard, print_event);
        return;
    }
    if !actions.iter().any(|a| a == ERROR_ACTION) {
        emitter.on(ERROR_ACTION, print_event);
    }
    for action in actions {
        emitter.on(action, print_event);
    }
}

fn run_listen(config: Config, actions: Vec<String>) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("Failed to start tokio runtime")?;
    runtime.block_on(async move {
        let mut emitter = EventEmitter::with_config(config);

        subscribe(&mut emitter, actions);

        let shutdown = emitter.shutdown_handle();
        ctrlc::set_handler(move || {
            shutdown.shutdown();
        })
        .context("Failed to install signal handler")?;

        emitter.listen()?;
        log::info!("docker-events v{} listening", env!("CARGO_PKG_VERSION"));
        emitter.run().await;
        Ok(())
    })
}

fn main() -> Result<()> {
    init_logging()?;

    let cli = Cli::parse();

    match cli.command {
        Commands::Listen {
            filters,
            actions,
            docker_bin,
            run_dir,
        } => {
            let mut config = Config::load()?;
            if !filters.is_empty() {
                config.filters = filters;
            }
            if let Some(bin) = docker_bin {
                config.docker_bin = bin;
            }
            if let Some(dir) = run_dir {
                config.run_dir = dir;
            }
            run_listen(config, actions)?;
        }
        Commands::Config { save } => {
            let config = Config::load()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            if save {
                config.save()?;
                log::info!(
                    "Saved configuration to {}",
                    Config::config_dir()?.join("config.json").display()
                );
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actions(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_no_actions_prints_everything() {
        let mut emitter = EventEmitter::new(Vec::new());
        subscribe(&mut emitter, Vec::new());
        assert_eq!(emitter.listener_count("*"), 1);
        assert_eq!(emitter.listener_count(ERROR_ACTION), 0);
    }

    #[test]
    fn test_actions_always_include_errors() {
        let mut emitter = EventEmitter::new(Vec::new());
        subscribe(&mut emitter, actions(&["start", "die"]));
        assert_eq!(emitter.listener_count("start"), 1);
        assert_eq!(emitter.listener_count("die"), 1);
        assert_eq!(emitter.listener_count(ERROR_ACTION), 1);
        assert_eq!(emitter.listener_count("*"), 0);
    }

    #[test]
    fn test_explicit_error_action_registered_once() {
        let mut emitter = EventEmitter::new(Vec::new());
        subscribe(&mut emitter, actions(&["error", "start"]));
        assert_eq!(emitter.listener_count(ERROR_ACTION), 1);
        assert_eq!(emitter.listener_count("start"), 1);
    }
}
