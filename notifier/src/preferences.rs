//! User notification preferences.
//!
//! Preferences live in a small JSON file (`config.json`) in the notifier's
//! config directory:
//!
//! ```json
//! {
//!   "version": "0.1.0",
//!   "notify_on": {
//!     "folder_errors": true,
//!     "item_errors": true,
//!     "conflicts": true
//!   },
//!   "notification_sound": true,
//!   "check_interval_on_error": 5
//! }
//! ```
//!
//! Every field is optional. Missing fields take their default, and a missing
//! or unreadable file yields the defaults: the monitor never fails because of
//! preferences.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::classifier::Category;

/// Preference file name inside the notifier config directory.
pub const PREFERENCES_FILE: &str = "config.json";

/// Default wait before retrying after a connection error, in seconds.
pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 5;

/// Lowest accepted retry interval, in seconds.
const MIN_CHECK_INTERVAL_SECS: u64 = 1;

/// Errors that can occur while reading or writing the preference file.
#[derive(Error, Debug)]
pub enum PreferencesError {
    /// File could not be read or written.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// File contents are not valid preference JSON.
    #[error("invalid preferences JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Per-category notification switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyOn {
    pub folder_errors: bool,
    pub item_errors: bool,
    pub conflicts: bool,
}

impl Default for NotifyOn {
    fn default() -> Self {
        Self {
            folder_errors: true,
            item_errors: true,
            conflicts: true,
        }
    }
}

/// User preferences, read once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    /// Version of the notifier that wrote the file.
    pub version: String,

    /// Which categories raise notifications.
    pub notify_on: NotifyOn,

    /// Whether notifications request a sound.
    pub notification_sound: bool,

    /// Seconds to wait before re-polling after a connection error.
    pub check_interval_on_error: u64,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            notify_on: NotifyOn::default(),
            notification_sound: true,
            check_interval_on_error: DEFAULT_CHECK_INTERVAL_SECS,
        }
    }
}

impl Preferences {
    /// Returns true if the user wants notifications for `category`.
    ///
    /// [`Category::Ignored`] is never wanted.
    #[must_use]
    pub fn wants(&self, category: Category) -> bool {
        match category {
            Category::FolderError => self.notify_on.folder_errors,
            Category::ItemError => self.notify_on.item_errors,
            Category::ConflictCreated => self.notify_on.conflicts,
            Category::Ignored => false,
        }
    }

    /// Base delay before retrying a failed poll, never below one second.
    #[must_use]
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_on_error.max(MIN_CHECK_INTERVAL_SECS))
    }

    /// Reads preferences from `path`.
    ///
    /// Returns `Ok(None)` if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns `PreferencesError` if the file exists but cannot be read or
    /// parsed.
    pub fn load(path: &Path) -> Result<Option<Self>, PreferencesError> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        Ok(Some(serde_json::from_str(&contents)?))
    }

    /// Writes preferences to `path` as pretty JSON, creating parent
    /// directories as needed.
    ///
    /// # Errors
    ///
    /// Returns `PreferencesError` if the directory or file cannot be written.
    pub fn save(&self, path: &Path) -> Result<(), PreferencesError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Loads preferences, writing the defaults when no file exists yet.
    ///
    /// Any failure is logged and answered with the defaults.
    pub fn load_or_init(path: &Path) -> Self {
        match Self::load(path) {
            Ok(Some(prefs)) => {
                debug!(path = %path.display(), "Preferences loaded");
                prefs
            }
            Ok(None) => {
                let prefs = Self::default();
                match prefs.save(path) {
                    Ok(()) => info!(path = %path.display(), "Created default preferences"),
                    Err(e) => warn!(
                        path = %path.display(),
                        error = %e,
                        "Could not write default preferences"
                    ),
                }
                prefs
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to load preferences, using defaults"
                );
                Self::default()
            }
        }
    }
}
