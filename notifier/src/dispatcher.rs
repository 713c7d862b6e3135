//! Turns classified events into desktop notifications.
//!
//! Delivery is fire-and-forget from the monitor's point of view: every call
//! is bounded by a timeout, and failures are logged and reported as a
//! [`DispatchOutcome`] rather than returned as errors. A broken notification
//! tool must never stop event processing.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::classifier::{passes_filter, Category, ClassifiedEvent};
use crate::preferences::Preferences;
use crate::sink::{Notification, NotificationSink};
use crate::utils::{file_name, truncate_chars};

/// Default upper bound for a single delivery.
pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest item name shown in a subtitle.
const MAX_ITEM_NAME_CHARS: usize = 50;

const FOLDER_ERROR_TITLE: &str = "Syncthing Folder Error";
const ITEM_ERROR_TITLE: &str = "Syncthing Sync Error";
const CONFLICT_TITLE: &str = "Syncthing Conflict";
const STARTED_TITLE: &str = "Syncthing Monitor Started";

/// Result of one dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The sink accepted the notification.
    Delivered,
    /// Nothing was sent: the event is ignored or filtered out.
    Skipped,
    /// The sink reported an error.
    Failed,
    /// The sink did not finish within the timeout.
    TimedOut,
}

/// Builds the notification for `event`, or `None` for ignored events.
#[must_use]
pub fn build_notification(event: &ClassifiedEvent, prefs: &Preferences) -> Option<Notification> {
    let title = match event.category {
        Category::FolderError => FOLDER_ERROR_TITLE,
        Category::ItemError => ITEM_ERROR_TITLE,
        Category::ConflictCreated => CONFLICT_TITLE,
        Category::Ignored => return None,
    };

    let subtitle = match (event.item.as_deref(), event.folder.as_deref()) {
        (Some(item), Some(folder)) => Some(format!(
            "{} in {folder}",
            truncate_chars(file_name(item), MAX_ITEM_NAME_CHARS)
        )),
        (Some(item), None) => Some(truncate_chars(file_name(item), MAX_ITEM_NAME_CHARS)),
        (None, Some(folder)) => Some(format!("Folder: {folder}")),
        (None, None) => None,
    };

    Some(Notification {
        title: title.to_string(),
        subtitle,
        body: event.message.clone(),
        play_sound: prefs.notification_sound,
    })
}

/// Delivers notifications through a sink with a bounded wait.
pub struct Dispatcher {
    sink: Box<dyn NotificationSink>,
    timeout: Duration,
}

impl Dispatcher {
    /// Creates a dispatcher with the default timeout.
    #[must_use]
    pub fn new(sink: Box<dyn NotificationSink>) -> Self {
        Self::with_timeout(sink, DEFAULT_DISPATCH_TIMEOUT)
    }

    /// Creates a dispatcher with a custom timeout.
    #[must_use]
    pub fn with_timeout(sink: Box<dyn NotificationSink>, timeout: Duration) -> Self {
        Self { sink, timeout }
    }

    /// Name of the underlying sink.
    #[must_use]
    pub fn sink_name(&self) -> &'static str {
        self.sink.name()
    }

    /// Notifies the user about `event` if their preferences allow it.
    pub async fn dispatch(&self, event: &ClassifiedEvent, prefs: &Preferences) -> DispatchOutcome {
        if !passes_filter(event, prefs) {
            return DispatchOutcome::Skipped;
        }
        let Some(notification) = build_notification(event, prefs) else {
            return DispatchOutcome::Skipped;
        };

        let outcome = self.deliver(&notification).await;
        match outcome {
            DispatchOutcome::Delivered => info!(
                event_id = event.event_id,
                category = %event.category,
                folder = event.folder.as_deref().unwrap_or(""),
                "Notification sent"
            ),
            _ => debug!(event_id = event.event_id, ?outcome, "Notification not sent"),
        }
        outcome
    }

    /// Announces that monitoring has started for the daemon at `base_url`.
    pub async fn announce_start(&self, base_url: &str, prefs: &Preferences) -> DispatchOutcome {
        let notification = Notification {
            title: STARTED_TITLE.to_string(),
            subtitle: None,
            body: format!("Monitoring {base_url}"),
            play_sound: prefs.notification_sound,
        };
        self.deliver(&notification).await
    }

    async fn deliver(&self, notification: &Notification) -> DispatchOutcome {
        match tokio::time::timeout(self.timeout, self.sink.deliver(notification)).await {
            Ok(Ok(())) => DispatchOutcome::Delivered,
            Ok(Err(e)) => {
                warn!(sink = self.sink.name(), error = %e, "Failed to deliver notification");
                DispatchOutcome::Failed
            }
            Err(_) => {
                warn!(
                    sink = self.sink.name(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Notification delivery timed out"
                );
                DispatchOutcome::TimedOut
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::SinkError;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    #[derive(Default, Clone)]
    struct RecordingSink {
        sent: Arc<Mutex<Vec<Notification>>>,
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn deliver(&self, notification: &Notification) -> Result<(), SinkError> {
            self.sent.lock().unwrap().push(notification.clone());
            Ok(())
        }
    }

    struct HangingSink;

    #[async_trait]
    impl NotificationSink for HangingSink {
        fn name(&self) -> &'static str {
            "hanging"
        }

        async fn deliver(&self, _notification: &Notification) -> Result<(), SinkError> {
            std::future::pending().await
        }
    }

    struct FailingSink;

    #[async_trait]
    impl NotificationSink for FailingSink {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn deliver(&self, _notification: &Notification) -> Result<(), SinkError> {
            Err(SinkError::CommandFailed {
                program: "notify-send",
                status: "exit status: 1".to_string(),
                stderr: "no daemon".to_string(),
            })
        }
    }

    fn event(category: Category, folder: Option<&str>, item: Option<&str>) -> ClassifiedEvent {
        ClassifiedEvent {
            category,
            folder: folder.map(str::to_string),
            item: item.map(str::to_string),
            message: "something happened".to_string(),
            event_id: 7,
        }
    }

    #[test]
    fn titles_per_category() {
        let prefs = Preferences::default();
        let title = |c| build_notification(&event(c, Some("f"), None), &prefs).map(|n| n.title);

        assert_eq!(title(Category::FolderError).as_deref(), Some("Syncthing Folder Error"));
        assert_eq!(title(Category::ItemError).as_deref(), Some("Syncthing Sync Error"));
        assert_eq!(title(Category::ConflictCreated).as_deref(), Some("Syncthing Conflict"));
        assert_eq!(title(Category::Ignored), None);
    }

    #[test]
    fn subtitles() {
        let prefs = Preferences::default();

        let folder = build_notification(&event(Category::FolderError, Some("Photos"), None), &prefs)
            .unwrap();
        assert_eq!(folder.subtitle.as_deref(), Some("Folder: Photos"));
        assert_eq!(folder.body, "something happened");

        let item = build_notification(
            &event(Category::ItemError, Some("docs"), Some("reports/q1.pdf")),
            &prefs,
        )
        .unwrap();
        assert_eq!(item.subtitle.as_deref(), Some("q1.pdf in docs"));

        let long_name = format!("dir/{}", "x".repeat(80));
        let long = build_notification(
            &event(Category::ItemError, Some("docs"), Some(&long_name)),
            &prefs,
        )
        .unwrap();
        let shown = long.subtitle.unwrap();
        let name = shown.strip_suffix(" in docs").unwrap();
        assert_eq!(name.chars().count(), 50);
        assert!(name.ends_with("..."));
    }

    #[test]
    fn sound_follows_preferences() {
        let mut prefs = Preferences::default();
        prefs.notification_sound = false;
        let n = build_notification(&event(Category::FolderError, None, None), &prefs).unwrap();
        assert!(!n.play_sound);
        assert!(n.subtitle.is_none());
    }

    #[tokio::test]
    async fn delivers_wanted_events() {
        let sink = RecordingSink::default();
        let dispatcher = Dispatcher::new(Box::new(sink.clone()));
        let prefs = Preferences::default();

        let outcome = dispatcher
            .dispatch(&event(Category::ConflictCreated, Some("docs"), Some("a.txt")), &prefs)
            .await;

        assert_eq!(outcome, DispatchOutcome::Delivered);
        assert_eq!(sink.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn skips_filtered_and_ignored_events() {
        let sink = RecordingSink::default();
        let dispatcher = Dispatcher::new(Box::new(sink.clone()));
        let mut prefs = Preferences::default();
        prefs.notify_on.folder_errors = false;

        let filtered = dispatcher
            .dispatch(&event(Category::FolderError, Some("Photos"), None), &prefs)
            .await;
        let ignored = dispatcher
            .dispatch(&event(Category::Ignored, None, None), &prefs)
            .await;

        assert_eq!(filtered, DispatchOutcome::Skipped);
        assert_eq!(ignored, DispatchOutcome::Skipped);
        assert!(sink.sent.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_sink_times_out() {
        let dispatcher = Dispatcher::with_timeout(Box::new(HangingSink), Duration::from_secs(2));
        let outcome = dispatcher
            .dispatch(&event(Category::ItemError, Some("docs"), Some("a")), &Preferences::default())
            .await;
        assert_eq!(outcome, DispatchOutcome::TimedOut);
    }

    #[tokio::test]
    async fn sink_errors_are_absorbed() {
        let dispatcher = Dispatcher::new(Box::new(FailingSink));
        let outcome = dispatcher
            .dispatch(&event(Category::ItemError, Some("docs"), Some("a")), &Preferences::default())
            .await;
        assert_eq!(outcome, DispatchOutcome::Failed);
    }

    #[tokio::test]
    async fn start_announcement() {
        let sink = RecordingSink::default();
        let dispatcher = Dispatcher::new(Box::new(sink.clone()));

        let outcome = dispatcher
            .announce_start("http://127.0.0.1:8384", &Preferences::default())
            .await;

        assert_eq!(outcome, DispatchOutcome::Delivered);
        let sent = sink.sent.lock().unwrap();
        assert_eq!(sent[0].title, "Syncthing Monitor Started");
        assert_eq!(sent[0].body, "Monitoring http://127.0.0.1:8384");
    }
}
