//! Long-poll client for the daemon's event log.
//!
//! Each call to [`EventSource::poll`] issues one request:
//!
//! ```text
//! GET {base_url}/rest/events?since={cursor}&timeout={secs}&events=FolderErrors,ItemFinished,StateChanged
//! X-API-Key: {api_key}
//! ```
//!
//! The daemon holds the request open until an event with an id greater than
//! `since` exists or the timeout elapses. An empty array is a normal result.
//! Failures come back as a typed [`SourceError`]; only
//! [`SourceError::AuthRejected`] is fatal, everything else is worth retrying.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::{debug, warn};

use crate::credential::Credential;
use crate::types::{RawEvent, SUBSCRIBED_EVENT_TYPES};

/// Header carrying the API key.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Events endpoint path relative to the base URL.
pub const EVENTS_PATH: &str = "/rest/events";

/// Default server-side long-poll timeout in seconds.
pub const DEFAULT_POLL_TIMEOUT_SECS: u64 = 60;

/// Extra client-side patience on top of the long-poll timeout.
const CLIENT_TIMEOUT_MARGIN_SECS: u64 = 10;

/// Errors that can occur while polling for events.
#[derive(Error, Debug)]
pub enum SourceError {
    /// The daemon could not be reached.
    #[error("connection failed: {0}")]
    Connect(#[source] reqwest::Error),

    /// The request outlived the client's patience.
    #[error("request timed out")]
    Timeout,

    /// Any other transport-level failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The daemon answered with an unexpected status.
    #[error("server error: {status} - {message}")]
    Server { status: u16, message: String },

    /// The body was not a JSON array of events.
    #[error("malformed event response: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The daemon rejected the API key.
    #[error("authentication rejected by daemon (HTTP {status})")]
    AuthRejected { status: u16 },
}

impl SourceError {
    /// Returns true if retrying cannot help.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::AuthRejected { .. })
    }

    fn from_transport(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_connect() {
            Self::Connect(e)
        } else {
            Self::Http(e)
        }
    }
}

/// One poll's worth of events.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Events with ids greater than the requested cursor, in ascending order.
    pub events: Vec<RawEvent>,

    /// Cursor value once every event in the batch has been processed.
    pub next_cursor: u64,
}

impl Batch {
    /// Builds a batch from a server response for `since`.
    ///
    /// Events at or below `since` (a replay) are dropped and the rest are
    /// put in ascending id order.
    #[must_use]
    pub fn from_response(since: u64, mut events: Vec<RawEvent>) -> Self {
        let received = events.len();
        events.retain(|e| e.id > since);
        if events.len() < received {
            debug!(
                since,
                dropped = received - events.len(),
                "Dropped already-processed events"
            );
        }

        if !events.windows(2).all(|w| w[0].id < w[1].id) {
            warn!(since, "Daemon returned events out of order, sorting");
            events.sort_by_key(|e| e.id);
            events.dedup_by_key(|e| e.id);
        }

        let next_cursor = events.last().map_or(since, |e| e.id);
        Self {
            events,
            next_cursor,
        }
    }

    /// Returns true if the poll timed out with nothing new.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// A restartable source of daemon events.
#[async_trait]
pub trait EventSource: Send {
    /// Waits for events newer than `since`.
    async fn poll(&mut self, since: u64) -> Result<Batch, SourceError>;

    /// Returns the id of the newest event in the daemon's log (0 if empty).
    async fn latest_event_id(&mut self) -> Result<u64, SourceError>;
}

/// [`EventSource`] backed by the daemon's REST API.
pub struct HttpEventSource {
    client: Client,
    credential: Credential,
    poll_timeout: Duration,
    event_filter: String,
}

impl HttpEventSource {
    /// Creates a source for the daemon described by `credential`.
    ///
    /// # Errors
    ///
    /// Returns `SourceError::Http` if the HTTP client cannot be built.
    pub fn new(credential: Credential, poll_timeout: Duration) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(poll_timeout + Duration::from_secs(CLIENT_TIMEOUT_MARGIN_SECS))
            .pool_max_idle_per_host(1)
            .build()?;

        Ok(Self {
            client,
            credential,
            poll_timeout,
            event_filter: SUBSCRIBED_EVENT_TYPES.join(","),
        })
    }

    /// Creates a source with the default 60 second long-poll timeout.
    ///
    /// # Errors
    ///
    /// Returns `SourceError::Http` if the HTTP client cannot be built.
    pub fn with_defaults(credential: Credential) -> Result<Self, SourceError> {
        Self::new(credential, Duration::from_secs(DEFAULT_POLL_TIMEOUT_SECS))
    }

    /// REST base URL of the daemon.
    #[must_use]
    pub fn base_url(&self) -> &str {
        self.credential.base_url()
    }

    fn events_url(&self) -> String {
        format!("{}{EVENTS_PATH}", self.credential.base_url())
    }

    async fn fetch(&self, query: &[(&str, String)]) -> Result<Vec<RawEvent>, SourceError> {
        let response = self
            .client
            .get(self.events_url())
            .header(API_KEY_HEADER, self.credential.api_key())
            .query(query)
            .send()
            .await
            .map_err(SourceError::from_transport)?;

        let status = response.status();
        match status {
            StatusCode::OK => {
                let body = response
                    .bytes()
                    .await
                    .map_err(SourceError::from_transport)?;
                Ok(serde_json::from_slice(&body)?)
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(SourceError::AuthRejected {
                status: status.as_u16(),
            }),
            _ => {
                let message = response.text().await.unwrap_or_default();
                Err(SourceError::Server {
                    status: status.as_u16(),
                    message: message.trim().to_string(),
                })
            }
        }
    }
}

#[async_trait]
impl EventSource for HttpEventSource {
    async fn poll(&mut self, since: u64) -> Result<Batch, SourceError> {
        debug!(since, timeout_secs = self.poll_timeout.as_secs(), "Polling for events");

        let events = self
            .fetch(&[
                ("since", since.to_string()),
                ("timeout", self.poll_timeout.as_secs().to_string()),
                ("events", self.event_filter.clone()),
            ])
            .await?;

        let batch = Batch::from_response(since, events);
        debug!(
            events = batch.events.len(),
            next_cursor = batch.next_cursor,
            "Poll returned"
        );
        Ok(batch)
    }

    async fn latest_event_id(&mut self) -> Result<u64, SourceError> {
        // Ids are numbered per event mask; use the same filter as the polls.
        let events = self
            .fetch(&[
                ("events", self.event_filter.clone()),
                ("limit", "1".to_string()),
                ("timeout", "0".to_string()),
            ])
            .await?;
        Ok(events.iter().map(|e| e.id).max().unwrap_or(0))
    }
}
