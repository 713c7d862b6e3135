//! Syncthing Notifier - desktop notifications for Syncthing trouble.
//!
//! This crate long-polls a local Syncthing daemon's event log and raises a
//! desktop notification when a folder fails, an item cannot be synced, or a
//! conflict copy appears.
//!
//! # Overview
//!
//! One [`Monitor`] owns all state and runs a single poll loop:
//!
//! ```text
//! EventSource --batch--> classify --> preference filter --> DedupGuard --> Dispatcher
//!      ^                                                                      |
//!      +------------------------- cursor advanced per event ------------------+
//! ```
//!
//! Transient connection failures are retried with backoff from the last
//! processed event; an API key rejection stops the monitor.
//!
//! # Modules
//!
//! - [`types`]: Raw daemon events and their typed payloads
//! - [`classifier`]: Event classification and preference filtering
//! - [`cursor`]: Monotonic event cursor
//! - [`dedup`]: Conflict notification debouncing
//! - [`source`]: Long-poll client for the daemon's event API
//! - [`reconnect`]: Reconnect state machine and backoff
//! - [`dispatcher`]: Notification building and bounded delivery
//! - [`sink`]: Platform notification backends
//! - [`monitor`]: The poll loop tying it all together
//! - [`credential`]: Daemon address and API key discovery
//! - [`preferences`]: User notification preferences
//! - [`config`]: Configuration from environment variables
//! - [`error`]: Error types for notifier operations
//! - [`utils`]: Shared text helpers

pub mod classifier;
pub mod config;
pub mod credential;
pub mod cursor;
pub mod dedup;
pub mod dispatcher;
pub mod error;
pub mod monitor;
pub mod preferences;
pub mod reconnect;
pub mod sink;
pub mod source;
pub mod types;
pub mod utils;

pub use classifier::{classify, passes_filter, Category, ClassifiedEvent};
pub use config::{Config, ConfigError};
pub use credential::{Credential, CredentialError};
pub use cursor::Cursor;
pub use dedup::{DedupGuard, DEFAULT_DEBOUNCE_SECS};
pub use dispatcher::{build_notification, DispatchOutcome, Dispatcher};
pub use error::{MonitorError, Result};
pub use monitor::{BatchStats, Monitor, PollOutcome, StartPosition};
pub use preferences::{NotifyOn, Preferences, PreferencesError};
pub use reconnect::{ConnectionState, ReconnectController, RetryPolicy};
pub use sink::{platform_sink, LogSink, Notification, NotificationSink, SinkError};
pub use source::{Batch, EventSource, HttpEventSource, SourceError};
pub use types::{EventPayload, RawEvent};
