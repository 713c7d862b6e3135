//! The long-poll monitor loop.
//!
//! A [`Monitor`] owns every piece of mutable state: the event source, the
//! cursor, the conflict debounce table, the preferences, the dispatcher and
//! the reconnect controller. One task drives it; there is never more than one
//! outstanding poll.
//!
//! Each iteration polls for events newer than the cursor, then walks the
//! batch in id order: classify, filter by preference, debounce, dispatch, and
//! only then advance the cursor past the event. A failed poll leaves the
//! cursor alone and schedules a retry through the reconnect controller.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::classifier::{classify, passes_filter, Category};
use crate::config::Config;
use crate::cursor::Cursor;
use crate::dedup::DedupGuard;
use crate::dispatcher::{DispatchOutcome, Dispatcher};
use crate::error::{MonitorError, Result};
use crate::preferences::Preferences;
use crate::reconnect::{ConnectionState, ReconnectController, RetryPolicy};
use crate::source::{Batch, EventSource, HttpEventSource, SourceError};

/// Where the cursor starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPosition {
    /// Skip the daemon's backlog and start at its newest event.
    Latest,
    /// Start at a fixed id; `At(0)` replays the whole buffered log.
    At(u64),
}

/// Counters for one processed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub received: usize,
    pub ignored: usize,
    pub filtered: usize,
    pub suppressed: usize,
    pub delivered: usize,
    pub undelivered: usize,
}

/// What one [`Monitor::step`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The start cursor was established.
    Positioned { cursor: u64 },
    /// The poll timed out with nothing new.
    Idle,
    /// A non-empty batch was processed.
    Processed(BatchStats),
    /// The poll failed; wait `delay` before the next step.
    Retry { delay: Duration },
}

/// Event monitor driving one [`EventSource`].
pub struct Monitor<S: EventSource> {
    source: S,
    prefs: Preferences,
    cursor: Cursor,
    dedup: DedupGuard,
    dispatcher: Dispatcher,
    reconnect: ReconnectController,
    start: StartPosition,
    positioned: bool,
}

impl<S: EventSource> Monitor<S> {
    /// Creates a monitor. The retry policy is derived from the preferences'
    /// `check_interval_on_error`.
    #[must_use]
    pub fn new(
        source: S,
        prefs: Preferences,
        dispatcher: Dispatcher,
        dedup: DedupGuard,
        start: StartPosition,
    ) -> Self {
        let policy = RetryPolicy::new(prefs.retry_interval());
        Self {
            source,
            prefs,
            cursor: Cursor::default(),
            dedup,
            dispatcher,
            reconnect: ReconnectController::new(policy),
            start,
            positioned: false,
        }
    }

    /// Replaces the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.reconnect = ReconnectController::new(policy);
        self
    }

    /// Id of the last fully processed event.
    #[must_use]
    pub fn cursor(&self) -> u64 {
        self.cursor.value()
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.reconnect.state()
    }

    /// Preferences in effect.
    #[must_use]
    pub fn preferences(&self) -> &Preferences {
        &self.prefs
    }

    /// Performs one unit of work without sleeping.
    ///
    /// The first call establishes the start cursor; later calls poll once and
    /// process the result.
    ///
    /// # Errors
    ///
    /// Returns `MonitorError::AuthRejected` if the daemon rejects the API key.
    /// Every other source failure becomes [`PollOutcome::Retry`].
    pub async fn step(&mut self) -> Result<PollOutcome> {
        if !self.positioned {
            return self.position().await;
        }

        let since = self.cursor.value();
        match self.source.poll(since).await {
            Ok(batch) => {
                self.reconnect.on_success();
                if batch.is_empty() {
                    debug!(cursor = since, "No new events");
                    Ok(PollOutcome::Idle)
                } else {
                    Ok(PollOutcome::Processed(self.process_batch(batch).await))
                }
            }
            Err(e) => self.on_source_error(e),
        }
    }

    /// Runs until `shutdown` completes or a fatal error occurs.
    ///
    /// Both the poll and the backoff sleep are raced against `shutdown`; an
    /// in-flight poll is abandoned when it fires.
    ///
    /// # Errors
    ///
    /// Returns `MonitorError::AuthRejected` if the daemon rejects the API key.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            let outcome = tokio::select! {
                biased;
                () = &mut shutdown => break,
                outcome = self.step() => outcome?,
            };

            if let PollOutcome::Retry { delay } = outcome {
                tokio::select! {
                    biased;
                    () = &mut shutdown => break,
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }

        info!(cursor = self.cursor.value(), "Monitor stopped");
        Ok(())
    }

    async fn position(&mut self) -> Result<PollOutcome> {
        let start = match self.start {
            StartPosition::At(id) => id,
            StartPosition::Latest => match self.source.latest_event_id().await {
                Ok(id) => {
                    self.reconnect.on_success();
                    id
                }
                Err(e) => return self.on_source_error(e),
            },
        };

        self.cursor = Cursor::starting_at(start);
        self.positioned = true;
        info!(cursor = start, "Monitoring events");
        Ok(PollOutcome::Positioned { cursor: start })
    }

    async fn process_batch(&mut self, batch: Batch) -> BatchStats {
        let mut stats = BatchStats {
            received: batch.events.len(),
            ..BatchStats::default()
        };

        for raw in &batch.events {
            let event = classify(raw);

            if event.category == Category::Ignored {
                stats.ignored += 1;
            } else if !passes_filter(&event, &self.prefs) {
                debug!(event_id = event.event_id, category = %event.category, "Disabled in preferences");
                stats.filtered += 1;
            } else if !self.dedup.should_emit(&event, Instant::now()) {
                stats.suppressed += 1;
            } else {
                match self.dispatcher.dispatch(&event, &self.prefs).await {
                    DispatchOutcome::Delivered => stats.delivered += 1,
                    DispatchOutcome::Skipped => stats.filtered += 1,
                    DispatchOutcome::Failed | DispatchOutcome::TimedOut => stats.undelivered += 1,
                }
            }

            self.cursor.advance(raw.id);
        }

        debug!(
            cursor = self.cursor.value(),
            received = stats.received,
            delivered = stats.delivered,
            suppressed = stats.suppressed,
            "Batch processed"
        );
        stats
    }

    fn on_source_error(&mut self, e: SourceError) -> Result<PollOutcome> {
        if e.is_fatal() {
            error!(error = %e, "Daemon rejected the API key, giving up");
            return Err(MonitorError::from_source(e));
        }

        let delay = self.reconnect.on_failure();
        warn!(
            error = %e,
            cursor = self.cursor.value(),
            delay_ms = delay.as_millis() as u64,
            "Poll failed, retrying"
        );
        Ok(PollOutcome::Retry { delay })
    }
}

impl Monitor<HttpEventSource> {
    /// Builds a monitor for the daemon described by `config`.
    ///
    /// Resolves the credential, loads (or creates) the preference file and
    /// sets up the HTTP source. Preference problems fall back to defaults.
    ///
    /// # Errors
    ///
    /// Returns `MonitorError::Credential` if the daemon's address or API key
    /// cannot be found, and `MonitorError::Source` if the HTTP client cannot
    /// be built.
    pub fn from_config(config: &Config, dispatcher: Dispatcher) -> Result<Self> {
        let credential = config.resolve_credential()?;
        let prefs = Preferences::load_or_init(&config.preferences_path());

        info!(
            base_url = %credential.base_url(),
            api_key = %credential.redacted_key(),
            preferences = %config.preferences_path().display(),
            poll_timeout_secs = config.poll_timeout.as_secs(),
            "Configuration loaded"
        );

        let source = HttpEventSource::new(credential, config.poll_timeout)?;
        let start = if config.replay_backlog {
            StartPosition::At(0)
        } else {
            StartPosition::Latest
        };
        let dedup = DedupGuard::with_window(config.debounce_window);

        Ok(Self::new(source, prefs, dispatcher, dedup, start))
    }

    /// Sends the "monitor started" notification for this daemon.
    pub async fn announce_start(&self) -> DispatchOutcome {
        self.dispatcher
            .announce_start(self.source.base_url(), &self.prefs)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{Notification, NotificationSink, SinkError};
    use crate::types::RawEvent;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Source that replays a fixed script, then blocks forever.
    #[derive(Default)]
    struct ScriptedSource {
        latest: VecDeque<std::result::Result<u64, SourceError>>,
        polls: VecDeque<std::result::Result<Vec<RawEvent>, SourceError>>,
        log: Arc<Mutex<Vec<(u64, Instant)>>>,
    }

    impl ScriptedSource {
        fn polls(polls: Vec<std::result::Result<Vec<RawEvent>, SourceError>>) -> Self {
            Self {
                polls: polls.into(),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl EventSource for ScriptedSource {
        async fn poll(&mut self, since: u64) -> std::result::Result<Batch, SourceError> {
            self.log.lock().unwrap().push((since, Instant::now()));
            match self.polls.pop_front() {
                Some(result) => result.map(|events| Batch::from_response(since, events)),
                None => std::future::pending().await,
            }
        }

        async fn latest_event_id(&mut self) -> std::result::Result<u64, SourceError> {
            match self.latest.pop_front() {
                Some(result) => result,
                None => Ok(0),
            }
        }
    }

    #[derive(Default, Clone)]
    struct RecordingSink {
        sent: Arc<Mutex<Vec<Notification>>>,
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn deliver(&self, notification: &Notification) -> std::result::Result<(), SinkError> {
            self.sent.lock().unwrap().push(notification.clone());
            Ok(())
        }
    }

    fn monitor_with(
        source: ScriptedSource,
        prefs: Preferences,
        start: StartPosition,
    ) -> (Monitor<ScriptedSource>, RecordingSink) {
        let sink = RecordingSink::default();
        let dispatcher = Dispatcher::new(Box::new(sink.clone()));
        let dedup = DedupGuard::with_window(Duration::from_secs(5));
        let monitor = Monitor::new(source, prefs, dispatcher, dedup, start)
            .with_retry_policy(RetryPolicy::new(Duration::from_secs(5)).without_jitter());
        (monitor, sink)
    }

    fn monitor(source: ScriptedSource) -> (Monitor<ScriptedSource>, RecordingSink) {
        monitor_with(source, Preferences::default(), StartPosition::At(0))
    }

    fn folder_errors(id: u64, folder: &str) -> RawEvent {
        RawEvent::new(
            id,
            "FolderErrors",
            json!({"folder": folder, "errors": [{"path": "", "error": "permission denied"}]}),
        )
    }

    fn conflict(id: u64) -> RawEvent {
        RawEvent::new(
            id,
            "ItemFinished",
            json!({
                "folder": "docs",
                "item": "a.txt.sync-conflict-20240101-120000",
                "error": null,
                "action": "update"
            }),
        )
    }

    fn sent(sink: &RecordingSink) -> Vec<Notification> {
        sink.sent.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn folder_error_is_dispatched_and_advances_cursor() {
        let (mut monitor, sink) = monitor(ScriptedSource::polls(vec![Ok(vec![folder_errors(
            10, "Photos",
        )])]));

        assert_eq!(
            monitor.step().await.unwrap(),
            PollOutcome::Positioned { cursor: 0 }
        );
        let outcome = monitor.step().await.unwrap();

        assert!(matches!(outcome, PollOutcome::Processed(s) if s.delivered == 1));
        assert_eq!(monitor.cursor(), 10);
        let sent = sent(&sink);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].title, "Syncthing Folder Error");
        assert!(sent[0].body.starts_with("Photos"));
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_conflict_is_debounced() {
        let (mut monitor, sink) = monitor(ScriptedSource::polls(vec![
            Ok(vec![conflict(11)]),
            Ok(vec![conflict(12)]),
        ]));

        monitor.step().await.unwrap();
        monitor.step().await.unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;
        let outcome = monitor.step().await.unwrap();

        assert!(matches!(outcome, PollOutcome::Processed(s) if s.suppressed == 1));
        assert_eq!(sent(&sink).len(), 1);
        assert_eq!(monitor.cursor(), 12);
    }

    #[tokio::test]
    async fn replayed_batch_dispatches_once() {
        let (mut monitor, sink) = monitor(ScriptedSource::polls(vec![Ok(vec![
            conflict(11),
            conflict(12),
        ])]));

        monitor.step().await.unwrap();
        monitor.step().await.unwrap();

        assert_eq!(sent(&sink).len(), 1);
    }

    #[tokio::test]
    async fn empty_batch_keeps_cursor_and_repolls() {
        let source = ScriptedSource::polls(vec![Ok(vec![]), Ok(vec![])]);
        let log = Arc::clone(&source.log);
        let (mut monitor, sink) = monitor_with(source, Preferences::default(), StartPosition::At(12));

        monitor.step().await.unwrap();
        assert_eq!(monitor.step().await.unwrap(), PollOutcome::Idle);
        assert_eq!(monitor.step().await.unwrap(), PollOutcome::Idle);

        assert_eq!(monitor.cursor(), 12);
        assert!(sent(&sink).is_empty());
        let sinces: Vec<u64> = log.lock().unwrap().iter().map(|(s, _)| *s).collect();
        assert_eq!(sinces, vec![12, 12]);
    }

    #[tokio::test]
    async fn disabled_category_is_not_dispatched() {
        let mut prefs = Preferences::default();
        prefs.notify_on.folder_errors = false;
        let (mut monitor, sink) = monitor_with(
            ScriptedSource::polls(vec![Ok(vec![folder_errors(3, "Photos")])]),
            prefs,
            StartPosition::At(0),
        );

        monitor.step().await.unwrap();
        let outcome = monitor.step().await.unwrap();

        assert!(matches!(outcome, PollOutcome::Processed(s) if s.filtered == 1));
        assert!(sent(&sink).is_empty());
        assert_eq!(monitor.cursor(), 3);
    }

    #[tokio::test]
    async fn unknown_events_are_ignored() {
        let (mut monitor, sink) = monitor(ScriptedSource::polls(vec![Ok(vec![
            RawEvent::new(4, "DeviceConnected", json!({"id": "ABC"})),
            RawEvent::new(5, "ItemFinished", json!({"folder": "docs", "item": "a.txt"})),
        ])]));

        monitor.step().await.unwrap();
        let outcome = monitor.step().await.unwrap();

        assert!(matches!(outcome, PollOutcome::Processed(s) if s.ignored == 2));
        assert!(sent(&sink).is_empty());
        assert_eq!(monitor.cursor(), 5);
    }

    #[tokio::test]
    async fn cursor_tracks_max_processed_id() {
        let (mut monitor, _sink) = monitor(ScriptedSource::polls(vec![
            Ok(vec![RawEvent::new(1, "Other", json!({})), RawEvent::new(2, "Other", json!({}))]),
            Ok(vec![RawEvent::new(7, "Other", json!({}))]),
            Ok(vec![RawEvent::new(8, "Other", json!({})), RawEvent::new(20, "Other", json!({}))]),
        ]));

        monitor.step().await.unwrap();
        let mut seen = Vec::new();
        for _ in 0..3 {
            monitor.step().await.unwrap();
            seen.push(monitor.cursor());
        }
        assert_eq!(seen, vec![2, 7, 20]);
    }

    #[tokio::test]
    async fn connection_error_keeps_cursor_and_backs_off() {
        let source = ScriptedSource::polls(vec![
            Ok(vec![folder_errors(4, "Photos")]),
            Err(SourceError::Timeout),
            Err(SourceError::Server {
                status: 503,
                message: String::new(),
            }),
            Ok(vec![]),
        ]);
        let log = Arc::clone(&source.log);
        let (mut monitor, _sink) = monitor(source);

        monitor.step().await.unwrap();
        monitor.step().await.unwrap();
        assert_eq!(monitor.cursor(), 4);

        let outcome = monitor.step().await.unwrap();
        assert_eq!(
            outcome,
            PollOutcome::Retry {
                delay: Duration::from_secs(5)
            }
        );
        assert_eq!(monitor.cursor(), 4);
        assert_eq!(monitor.state(), ConnectionState::Reconnecting { attempts: 1 });

        let outcome = monitor.step().await.unwrap();
        assert_eq!(
            outcome,
            PollOutcome::Retry {
                delay: Duration::from_secs(10)
            }
        );

        assert_eq!(monitor.step().await.unwrap(), PollOutcome::Idle);
        assert_eq!(monitor.state(), ConnectionState::Connected);

        let sinces: Vec<u64> = log.lock().unwrap().iter().map(|(s, _)| *s).collect();
        assert_eq!(sinces, vec![0, 4, 4, 4]);
    }

    #[tokio::test]
    async fn starts_at_latest_event() {
        let source = ScriptedSource {
            latest: VecDeque::from([Ok(42)]),
            ..ScriptedSource::default()
        };
        let (mut monitor, _sink) = monitor_with(source, Preferences::default(), StartPosition::Latest);

        assert_eq!(
            monitor.step().await.unwrap(),
            PollOutcome::Positioned { cursor: 42 }
        );
        assert_eq!(monitor.cursor(), 42);
    }

    #[tokio::test]
    async fn failed_start_lookup_is_retried() {
        let source = ScriptedSource {
            latest: VecDeque::from([Err(SourceError::Timeout), Ok(9)]),
            ..ScriptedSource::default()
        };
        let (mut monitor, _sink) = monitor_with(source, Preferences::default(), StartPosition::Latest);

        assert!(matches!(monitor.step().await.unwrap(), PollOutcome::Retry { .. }));
        assert_eq!(
            monitor.step().await.unwrap(),
            PollOutcome::Positioned { cursor: 9 }
        );
        assert_eq!(monitor.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn auth_rejection_at_startup_is_fatal() {
        let source = ScriptedSource {
            latest: VecDeque::from([Err(SourceError::AuthRejected { status: 403 })]),
            ..ScriptedSource::default()
        };
        let (mut monitor, _sink) = monitor_with(source, Preferences::default(), StartPosition::Latest);

        let err = monitor.step().await.unwrap_err();
        assert!(matches!(err, MonitorError::AuthRejected { status: 403 }));
    }

    #[tokio::test]
    async fn auth_rejection_mid_run_is_fatal() {
        let (mut monitor, _sink) = monitor(ScriptedSource::polls(vec![
            Ok(vec![conflict(1)]),
            Err(SourceError::AuthRejected { status: 401 }),
        ]));

        let err = monitor.run_until(std::future::pending()).await.unwrap_err();
        assert!(matches!(err, MonitorError::AuthRejected { status: 401 }));
        assert_eq!(monitor.cursor(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_waits_at_least_the_configured_interval() {
        let source = ScriptedSource::polls(vec![Err(SourceError::Timeout), Ok(vec![])]);
        let log = Arc::clone(&source.log);
        let (mut monitor, _sink) = monitor(source);

        monitor
            .run_until(tokio::time::sleep(Duration::from_secs(60)))
            .await
            .unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 3);
        assert!(log[1].1 - log[0].1 >= Duration::from_secs(5));
        assert_eq!(log[2].1, log[1].1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_backoff() {
        let mut prefs = Preferences::default();
        prefs.check_interval_on_error = 600;
        let sink = RecordingSink::default();
        let mut monitor = Monitor::new(
            ScriptedSource::polls(vec![Err(SourceError::Timeout)]),
            prefs,
            Dispatcher::new(Box::new(sink)),
            DedupGuard::default(),
            StartPosition::At(0),
        );

        let started = Instant::now();
        monitor
            .run_until(tokio::time::sleep(Duration::from_secs(1)))
            .await
            .unwrap();

        assert!(Instant::now() - started < Duration::from_secs(600));
        assert!(matches!(monitor.state(), ConnectionState::Reconnecting { .. }));
    }
}
