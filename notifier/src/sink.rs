//! Platform-native notification delivery.
//!
//! The monitor only knows the [`NotificationSink`] contract. Concrete sinks
//! shell out to the platform's notification tool:
//!
//! - macOS: `osascript -e 'display notification ...'`
//! - Linux and other unix systems: `notify-send`
//! - Everywhere else, or with `--dry-run`: [`LogSink`], which only logs
//!
//! Child processes are spawned with `kill_on_drop`, so a dispatcher timeout
//! that drops the delivery future also stops the child.

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::info;

/// Application name shown by notification daemons that support it.
const APP_NAME: &str = "Syncthing Notifier";

/// Errors that can occur while delivering a notification.
#[derive(Error, Debug)]
pub enum SinkError {
    /// The notification tool could not be started.
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// The notification tool exited unsuccessfully.
    #[error("{program} exited with {status}: {stderr}")]
    CommandFailed {
        program: &'static str,
        status: String,
        stderr: String,
    },
}

/// A desktop notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub subtitle: Option<String>,
    pub body: String,
    pub play_sound: bool,
}

/// Something that can show a notification to the user.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Shows `notification`.
    async fn deliver(&self, notification: &Notification) -> Result<(), SinkError>;
}

/// Sink that writes notifications to the log instead of the desktop.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn deliver(&self, notification: &Notification) -> Result<(), SinkError> {
        info!(
            title = %notification.title,
            subtitle = notification.subtitle.as_deref().unwrap_or(""),
            body = %notification.body,
            sound = notification.play_sound,
            "Notification"
        );
        Ok(())
    }
}

/// macOS sink using AppleScript's `display notification`.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsascriptSink;

impl OsascriptSink {
    /// Builds the AppleScript source for `notification`.
    #[must_use]
    pub fn script(notification: &Notification) -> String {
        let mut script = format!(
            "display notification \"{}\" with title \"{}\"",
            escape_applescript(&notification.body),
            escape_applescript(&notification.title)
        );
        if let Some(subtitle) = &notification.subtitle {
            script.push_str(&format!(" subtitle \"{}\"", escape_applescript(subtitle)));
        }
        if notification.play_sound {
            script.push_str(" sound name \"default\"");
        }
        script
    }
}

#[async_trait]
impl NotificationSink for OsascriptSink {
    fn name(&self) -> &'static str {
        "osascript"
    }

    async fn deliver(&self, notification: &Notification) -> Result<(), SinkError> {
        let mut command = Command::new("osascript");
        command.arg("-e").arg(Self::script(notification));
        run("osascript", command).await
    }
}

/// Freedesktop sink using `notify-send`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NotifySendSink;

impl NotifySendSink {
    /// Builds the `notify-send` argument list for `notification`.
    #[must_use]
    pub fn args(notification: &Notification) -> Vec<String> {
        let mut args = vec![format!("--app-name={APP_NAME}")];
        if notification.play_sound {
            args.push("--hint=string:sound-name:message-new-instant".to_string());
        }
        args.push(notification.title.clone());
        args.push(match &notification.subtitle {
            Some(subtitle) => format!("{subtitle}\n{}", notification.body),
            None => notification.body.clone(),
        });
        args
    }
}

#[async_trait]
impl NotificationSink for NotifySendSink {
    fn name(&self) -> &'static str {
        "notify-send"
    }

    async fn deliver(&self, notification: &Notification) -> Result<(), SinkError> {
        let mut command = Command::new("notify-send");
        command.args(Self::args(notification));
        run("notify-send", command).await
    }
}

/// Returns the native sink for the current platform.
#[must_use]
pub fn platform_sink() -> Box<dyn NotificationSink> {
    if cfg!(target_os = "macos") {
        Box::new(OsascriptSink)
    } else if cfg!(unix) {
        Box::new(NotifySendSink)
    } else {
        Box::new(LogSink)
    }
}

async fn run(program: &'static str, mut command: Command) -> Result<(), SinkError> {
    let output = command
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| SinkError::Spawn { program, source })?;

    if output.status.success() {
        Ok(())
    } else {
        Err(SinkError::CommandFailed {
            program,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

fn escape_applescript(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}
