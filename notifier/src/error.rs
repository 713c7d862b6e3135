//! Error types for the Syncthing notifier.
//!
//! Each module owns a small `thiserror` enum for its own failures. The ones
//! that can stop the notifier roll up into [`MonitorError`], which is what
//! [`Monitor::from_config`](crate::monitor::Monitor::from_config) and the
//! monitor loop return. Preference problems never get this far; they fall
//! back to defaults.

use thiserror::Error;

use crate::credential::CredentialError;
use crate::source::SourceError;

/// Errors that can stop the notifier.
///
/// Transient connectivity problems never surface here; the monitor loop
/// retries them. What remains is either a startup problem or an
/// authentication rejection.
#[derive(Error, Debug)]
pub enum MonitorError {
    /// The daemon's address or API key could not be determined.
    #[error("credential error: {0}")]
    Credential(#[from] CredentialError),

    /// The event source could not be built or failed fatally.
    #[error("event source error: {0}")]
    Source(#[from] SourceError),

    /// The daemon rejected the API key.
    #[error("daemon rejected the API key (HTTP {status}); check the apikey in config.xml")]
    AuthRejected { status: u16 },
}

impl MonitorError {
    /// Converts a fatal source error, mapping authentication rejections to
    /// their own variant.
    #[must_use]
    pub fn from_source(err: SourceError) -> Self {
        match err {
            SourceError::AuthRejected { status } => Self::AuthRejected { status },
            other => Self::Source(other),
        }
    }
}

/// A specialized `Result` type for notifier operations.
pub type Result<T> = std::result::Result<T, MonitorError>;
