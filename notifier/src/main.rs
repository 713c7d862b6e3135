//! Syncthing Notifier - desktop notifications for Syncthing trouble.
//!
//! This binary watches a local Syncthing daemon's event log and shows a
//! desktop notification for folder errors, item sync errors and conflicts.
//!
//! # Commands
//!
//! - `syncthing-notifier run`: Start monitoring (`--dry-run` logs instead of notifying)
//! - `syncthing-notifier check`: Show the resolved daemon credential and preferences
//! - `syncthing-notifier init`: Write the default preference file
//!
//! # Environment Variables
//!
//! See the [`syncthing_notifier::config`] module for available configuration options.

use std::io::{self, Write};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use syncthing_notifier::config::Config;
use syncthing_notifier::dispatcher::Dispatcher;
use syncthing_notifier::monitor::Monitor;
use syncthing_notifier::preferences::Preferences;
use syncthing_notifier::sink::{platform_sink, LogSink, NotificationSink};

/// Syncthing Notifier - desktop notifications for Syncthing trouble.
///
/// Long-polls the Syncthing REST API and notifies about folder errors,
/// files that failed to sync, and newly created conflict copies.
#[derive(Parser, Debug)]
#[command(name = "syncthing-notifier")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "\
ENVIRONMENT VARIABLES:
    SYNCTHING_CONFIG_PATH                 Syncthing config.xml (default: platform location)
    SYNCTHING_API_URL                     REST base URL (with SYNCTHING_API_KEY)
    SYNCTHING_API_KEY                     API key (with SYNCTHING_API_URL)
    SYNCTHING_NOTIFIER_CONFIG_DIR         Preference directory (default: ~/.config/syncthing-notifier)
    SYNCTHING_NOTIFIER_POLL_TIMEOUT_SECS  Long-poll timeout (default: 60)
    SYNCTHING_NOTIFIER_DEBOUNCE_SECS      Conflict debounce window (default: 5)
    SYNCTHING_NOTIFIER_REPLAY_BACKLOG     Start from the oldest buffered event (default: false)

EXAMPLES:
    # Write default preferences
    syncthing-notifier init

    # See which daemon and preferences would be used
    syncthing-notifier check

    # Start monitoring
    syncthing-notifier run
")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// CLI subcommands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Start monitoring the Syncthing daemon.
    Run {
        /// Log notifications instead of showing them.
        #[arg(long)]
        dry_run: bool,

        /// Emit JSON log lines (for launchd or systemd journals).
        #[arg(long)]
        json_logs: bool,
    },

    /// Show the resolved daemon credential and preferences, then exit.
    Check,

    /// Write the default preference file.
    Init {
        /// Overwrite an existing preference file without confirmation.
        #[arg(short, long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Check => run_check(),
        Command::Init { force } => run_init(force),
        Command::Run { dry_run, json_logs } => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("Failed to create tokio runtime")?;

            runtime.block_on(run_monitor(dry_run, json_logs))
        }
    }
}

/// Runs the check command.
fn run_check() -> Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    let credential = config
        .resolve_credential()
        .context("Failed to find the Syncthing API key")?;

    let prefs_path = config.preferences_path();
    let (prefs, origin) = match Preferences::load(&prefs_path)
        .with_context(|| format!("Failed to read {}", prefs_path.display()))?
    {
        Some(prefs) => (prefs, "file"),
        None => (Preferences::default(), "defaults, file not created yet"),
    };

    println!("Syncthing API:  {}", credential.base_url());
    println!("API key:        {}", credential.redacted_key());
    println!();
    println!("Preferences:    {} ({origin})", prefs_path.display());
    println!("{}", serde_json::to_string_pretty(&prefs)?);
    println!();
    println!("Poll timeout:   {}s", config.poll_timeout.as_secs());
    println!("Debounce:       {}s", config.debounce_window.as_secs());

    Ok(())
}

/// Runs the init command.
fn run_init(force: bool) -> Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    let path = config.preferences_path();

    if path.exists() && !force {
        eprintln!("Preferences already exist at: {}", path.display());
        eprintln!();
        eprint!("Overwrite with defaults? [y/N] ");
        io::stderr().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            eprintln!("Aborted.");
            return Ok(());
        }
    }

    Preferences::default()
        .save(&path)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    println!("Default preferences written to: {}", path.display());
    Ok(())
}

/// Runs the monitor until a shutdown signal or a fatal error.
async fn run_monitor(dry_run: bool, json_logs: bool) -> Result<()> {
    init_logging(json_logs);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting Syncthing Notifier");

    let config = Config::from_env().context("Failed to load configuration")?;

    let sink: Box<dyn NotificationSink> = if dry_run {
        Box::new(LogSink)
    } else {
        platform_sink()
    };
    let dispatcher = Dispatcher::new(sink);
    info!(sink = dispatcher.sink_name(), "Notification sink ready");

    let mut monitor = Monitor::from_config(&config, dispatcher).context(
        "Failed to start monitoring. Set SYNCTHING_CONFIG_PATH to your config.xml \
         or set SYNCTHING_API_URL and SYNCTHING_API_KEY.",
    )?;
    monitor.announce_start().await;

    monitor
        .run_until(wait_for_shutdown())
        .await
        .context("Monitor stopped")?;

    info!("Shutdown complete");
    Ok(())
}

/// Initializes the tracing subscriber with environment-based filtering.
///
/// Human-readable output by default; JSON lines when `json` is set.
fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_target(true).with_level(true))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn wait_for_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
