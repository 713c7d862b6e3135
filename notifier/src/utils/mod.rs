//! Utility modules for the Syncthing notifier.
//!
//! # Modules
//!
//! - [`text`]: Truncation and path helpers for notification text

pub mod text;

pub use text::{file_name, truncate_chars};
