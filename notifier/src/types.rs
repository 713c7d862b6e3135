//! Event types for Syncthing event monitoring.
//!
//! This module defines the raw event schema returned by Syncthing's
//! `/rest/events` endpoint and the typed payloads derived from it. Syncthing
//! serializes events with camelCase field names inside `data`.
//!
//! Raw events keep their payload as untyped JSON so that one odd event cannot
//! fail a whole batch. [`RawEvent::payload`] turns that JSON into an
//! [`EventPayload`], falling back to [`EventPayload::Malformed`] when a known
//! event type carries data of the wrong shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Event type tag for folder-level error reports.
pub const FOLDER_ERRORS: &str = "FolderErrors";

/// Event type tag for a finished item (file or directory) sync.
pub const ITEM_FINISHED: &str = "ItemFinished";

/// Event type tag for folder state transitions.
pub const STATE_CHANGED: &str = "StateChanged";

/// Event types the monitor subscribes to.
pub const SUBSCRIBED_EVENT_TYPES: [&str; 3] = [FOLDER_ERRORS, ITEM_FINISHED, STATE_CHANGED];

/// A single event record as returned by the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Monotonically increasing event identifier.
    pub id: u64,

    /// Event type tag (e.g. `FolderErrors`).
    #[serde(rename = "type")]
    pub kind: String,

    /// When the daemon emitted the event. `None` if missing or unparseable.
    #[serde(default, deserialize_with = "lenient_time")]
    pub time: Option<DateTime<Utc>>,

    /// Type-specific payload.
    #[serde(default)]
    pub data: Value,
}

impl RawEvent {
    /// Creates a raw event with the current time.
    #[must_use]
    pub fn new(id: u64, kind: impl Into<String>, data: Value) -> Self {
        Self {
            id,
            kind: kind.into(),
            time: Some(Utc::now()),
            data,
        }
    }

    /// Decodes the payload according to the event type tag.
    #[must_use]
    pub fn payload(&self) -> EventPayload {
        match self.kind.as_str() {
            FOLDER_ERRORS => decode(&self.data, EventPayload::FolderErrors, FOLDER_ERRORS),
            ITEM_FINISHED => decode(&self.data, EventPayload::ItemFinished, ITEM_FINISHED),
            STATE_CHANGED => decode(&self.data, EventPayload::StateChanged, STATE_CHANGED),
            _ => EventPayload::Other,
        }
    }
}

fn decode<T, F>(data: &Value, wrap: F, kind: &'static str) -> EventPayload
where
    T: for<'de> Deserialize<'de>,
    F: FnOnce(T) -> EventPayload,
{
    match T::deserialize(data) {
        Ok(payload) => wrap(payload),
        Err(_) => EventPayload::Malformed { kind },
    }
}

/// Accepts any RFC 3339 timestamp; anything else becomes `None`.
fn lenient_time<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Value> = Option::deserialize(deserializer)?;
    Ok(raw
        .as_ref()
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc)))
}

/// Typed payload variants, discriminated by [`RawEvent::kind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPayload {
    /// Folder-level errors (permission denied, missing path, disk full).
    FolderErrors(FolderErrorsData),
    /// An item finished syncing, possibly with an error.
    ItemFinished(ItemFinishedData),
    /// A folder changed state.
    StateChanged(StateChangedData),
    /// A known event type whose data did not have the expected shape.
    Malformed { kind: &'static str },
    /// Any event type the monitor does not act on.
    Other,
}

/// Payload of a `FolderErrors` event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FolderErrorsData {
    #[serde(default)]
    pub folder: Option<String>,
    #[serde(default)]
    pub errors: Vec<FolderErrorEntry>,
}

/// One entry of a `FolderErrors` event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FolderErrorEntry {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Payload of an `ItemFinished` event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ItemFinishedData {
    #[serde(default)]
    pub folder: Option<String>,
    #[serde(default)]
    pub item: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    /// `update`, `delete` or `metadata`.
    #[serde(default)]
    pub action: Option<String>,
}

/// Payload of a `StateChanged` event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StateChangedData {
    #[serde(default)]
    pub folder: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserializes_daemon_event() {
        let raw: RawEvent = serde_json::from_value(json!({
            "id": 10,
            "globalID": 42,
            "type": "FolderErrors",
            "time": "2024-01-01T12:00:00.123456789+01:00",
            "data": {
                "folder": "Photos",
                "errors": [{"path": "img.jpg", "error": "permission denied"}]
            }
        }))
        .unwrap();

        assert_eq!(raw.id, 10);
        assert_eq!(raw.kind, FOLDER_ERRORS);
        assert_eq!(
            raw.time.unwrap().to_rfc3339(),
            "2024-01-01T11:00:00.123456789+00:00"
        );

        match raw.payload() {
            EventPayload::FolderErrors(data) => {
                assert_eq!(data.folder.as_deref(), Some("Photos"));
                assert_eq!(data.errors.len(), 1);
                assert_eq!(data.errors[0].error.as_deref(), Some("permission denied"));
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn bad_time_does_not_fail_event() {
        let raw: RawEvent = serde_json::from_value(json!({
            "id": 1,
            "type": "Starting",
            "time": "yesterday",
        }))
        .unwrap();

        assert!(raw.time.is_none());
        assert_eq!(raw.data, Value::Null);
    }

    #[test]
    fn unknown_type_is_other() {
        let raw = RawEvent::new(3, "DeviceConnected", json!({"id": "ABC"}));
        assert_eq!(raw.payload(), EventPayload::Other);
    }

    #[test]
    fn wrong_shape_is_malformed() {
        let raw = RawEvent::new(4, ITEM_FINISHED, json!({"item": 17}));
        assert_eq!(
            raw.payload(),
            EventPayload::Malformed {
                kind: ITEM_FINISHED
            }
        );

        let raw = RawEvent::new(5, FOLDER_ERRORS, json!("not an object"));
        assert!(matches!(raw.payload(), EventPayload::Malformed { .. }));
    }

    #[test]
    fn missing_fields_default() {
        let raw = RawEvent::new(6, ITEM_FINISHED, json!({}));
        assert_eq!(
            raw.payload(),
            EventPayload::ItemFinished(ItemFinishedData::default())
        );
    }
}
