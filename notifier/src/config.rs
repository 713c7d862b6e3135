//! Configuration module for the Syncthing notifier.
//!
//! This module handles parsing configuration from environment variables.
//! User-facing notification preferences live in a separate JSON file; see
//! [`crate::preferences`].
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `SYNCTHING_CONFIG_PATH` | No | platform default | Syncthing `config.xml` to read the API key from |
//! | `SYNCTHING_API_URL` | No | - | REST base URL (set together with `SYNCTHING_API_KEY`) |
//! | `SYNCTHING_API_KEY` | No | - | API key (set together with `SYNCTHING_API_URL`) |
//! | `SYNCTHING_NOTIFIER_CONFIG_DIR` | No | `~/.config/syncthing-notifier` | Directory holding `config.json` |
//! | `SYNCTHING_NOTIFIER_POLL_TIMEOUT_SECS` | No | 60 | Long-poll timeout (1-3600) |
//! | `SYNCTHING_NOTIFIER_DEBOUNCE_SECS` | No | 5 | Conflict debounce window |
//! | `SYNCTHING_NOTIFIER_REPLAY_BACKLOG` | No | false | Start from the beginning of the daemon's event log |
//!
//! # Example
//!
//! ```no_run
//! use syncthing_notifier::config::Config;
//!
//! let config = Config::from_env().expect("Failed to load configuration");
//! println!("Preferences: {}", config.preferences_path().display());
//! ```

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use directories::BaseDirs;
use thiserror::Error;

use crate::credential::{default_config_paths, Credential, CredentialError};
use crate::dedup::DEFAULT_DEBOUNCE_SECS;
use crate::preferences::PREFERENCES_FILE;
use crate::source::DEFAULT_POLL_TIMEOUT_SECS;

/// Default preference directory name relative to the user config dir.
const DEFAULT_CONFIG_DIR: &str = "syncthing-notifier";

/// Lowest accepted long-poll timeout.
const MIN_POLL_TIMEOUT_SECS: u64 = 1;

/// Highest accepted long-poll timeout.
const MAX_POLL_TIMEOUT_SECS: u64 = 3600;

const ENV_CONFIG_PATH: &str = "SYNCTHING_CONFIG_PATH";
const ENV_API_URL: &str = "SYNCTHING_API_URL";
const ENV_API_KEY: &str = "SYNCTHING_API_KEY";
const ENV_CONFIG_DIR: &str = "SYNCTHING_NOTIFIER_CONFIG_DIR";
const ENV_POLL_TIMEOUT: &str = "SYNCTHING_NOTIFIER_POLL_TIMEOUT_SECS";
const ENV_DEBOUNCE: &str = "SYNCTHING_NOTIFIER_DEBOUNCE_SECS";
const ENV_REPLAY_BACKLOG: &str = "SYNCTHING_NOTIFIER_REPLAY_BACKLOG";

/// Errors that can occur during configuration parsing.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    /// Environment variable has an invalid value.
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Failed to determine home directory.
    #[error("failed to determine home directory")]
    NoHomeDirectory,
}

/// Runtime configuration for the notifier.
#[derive(Debug, Clone)]
pub struct Config {
    /// Explicit Syncthing `config.xml` location. If `None`, the platform
    /// defaults are searched.
    pub syncthing_config: Option<PathBuf>,

    /// Credential given directly through the environment. Takes precedence
    /// over `config.xml`.
    pub credential_override: Option<Credential>,

    /// Directory holding the preference file.
    pub config_dir: PathBuf,

    /// Server-side long-poll timeout.
    pub poll_timeout: Duration,

    /// Window inside which repeated conflict notifications are suppressed.
    pub debounce_window: Duration,

    /// Whether to start from event id 0 instead of the newest event.
    pub replay_backlog: bool,
}

impl Config {
    /// Creates a new `Config` by parsing environment variables.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if:
    /// - only one of `SYNCTHING_API_URL` and `SYNCTHING_API_KEY` is set
    /// - a numeric or boolean variable cannot be parsed or is out of range
    /// - the home directory cannot be determined and no config dir is given
    pub fn from_env() -> Result<Self, ConfigError> {
        // Optional: SYNCTHING_CONFIG_PATH (default: platform search)
        let syncthing_config = non_empty_var(ENV_CONFIG_PATH).map(PathBuf::from);

        // Optional: SYNCTHING_API_URL + SYNCTHING_API_KEY, both or neither
        let credential_override = match (non_empty_var(ENV_API_URL), non_empty_var(ENV_API_KEY)) {
            (Some(url), Some(key)) => Some(Credential::new(url, key)),
            (Some(_), None) => return Err(ConfigError::MissingEnvVar(ENV_API_KEY.to_string())),
            (None, Some(_)) => return Err(ConfigError::MissingEnvVar(ENV_API_URL.to_string())),
            (None, None) => None,
        };

        // Optional: SYNCTHING_NOTIFIER_CONFIG_DIR (default: ~/.config/syncthing-notifier)
        let config_dir = match non_empty_var(ENV_CONFIG_DIR) {
            Some(dir) => PathBuf::from(dir),
            None => {
                let base_dirs = BaseDirs::new().ok_or(ConfigError::NoHomeDirectory)?;
                base_dirs.home_dir().join(".config").join(DEFAULT_CONFIG_DIR)
            }
        };

        // Optional: SYNCTHING_NOTIFIER_POLL_TIMEOUT_SECS (default: 60, 1-3600)
        let poll_timeout_secs = parse_secs(ENV_POLL_TIMEOUT)?.unwrap_or(DEFAULT_POLL_TIMEOUT_SECS);
        if !(MIN_POLL_TIMEOUT_SECS..=MAX_POLL_TIMEOUT_SECS).contains(&poll_timeout_secs) {
            return Err(ConfigError::InvalidValue {
                key: ENV_POLL_TIMEOUT.to_string(),
                message: format!(
                    "poll timeout must be between {MIN_POLL_TIMEOUT_SECS} and {MAX_POLL_TIMEOUT_SECS}, got {poll_timeout_secs}"
                ),
            });
        }

        // Optional: SYNCTHING_NOTIFIER_DEBOUNCE_SECS (default: 5, 0 disables)
        let debounce_secs = parse_secs(ENV_DEBOUNCE)?.unwrap_or(DEFAULT_DEBOUNCE_SECS);

        // Optional: SYNCTHING_NOTIFIER_REPLAY_BACKLOG (default: false)
        let replay_backlog = match non_empty_var(ENV_REPLAY_BACKLOG) {
            Some(val) => parse_bool(ENV_REPLAY_BACKLOG, &val)?,
            None => false,
        };

        Ok(Self {
            syncthing_config,
            credential_override,
            config_dir,
            poll_timeout: Duration::from_secs(poll_timeout_secs),
            debounce_window: Duration::from_secs(debounce_secs),
            replay_backlog,
        })
    }

    /// Path of the preference file.
    #[must_use]
    pub fn preferences_path(&self) -> PathBuf {
        self.config_dir.join(PREFERENCES_FILE)
    }

    /// Resolves the daemon credential.
    ///
    /// The environment override wins; otherwise `config.xml` is read from the
    /// configured path or the first platform default that exists.
    ///
    /// # Errors
    ///
    /// Returns `CredentialError` if no usable credential can be found.
    pub fn resolve_credential(&self) -> Result<Credential, CredentialError> {
        if let Some(credential) = &self.credential_override {
            return Ok(credential.clone());
        }
        match &self.syncthing_config {
            Some(path) => Credential::from_config_file(path),
            None => Credential::discover(&default_config_paths()),
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|val| val.trim().to_string())
        .filter(|val| !val.is_empty())
}

fn parse_secs(key: &str) -> Result<Option<u64>, ConfigError> {
    let Some(val) = non_empty_var(key) else {
        return Ok(None);
    };
    val.parse::<u64>()
        .map(Some)
        .map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected non-negative integer, got '{val}'"),
        })
}

fn parse_bool(key: &str, val: &str) -> Result<bool, ConfigError> {
    match val.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected true or false, got '{val}'"),
        }),
    }
}
