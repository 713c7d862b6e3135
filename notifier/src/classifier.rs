//! Event classification and preference filtering.
//!
//! [`classify`] maps every raw event onto one of four categories. It is a
//! pure, total function: unknown event types become [`Category::Ignored`] and
//! payloads with an unexpected shape degrade to a generic message instead of
//! an error.
//!
//! | Event | Condition | Category |
//! |-------|-----------|----------|
//! | `FolderErrors` | non-empty `errors` | `FolderError` |
//! | `StateChanged` | `to == "error"` | `FolderError` |
//! | `ItemFinished` | non-empty `error` | `ItemError` |
//! | `ItemFinished` | name contains `.sync-conflict-`, not a delete | `ConflictCreated` |
//! | anything else | | `Ignored` |

use std::fmt;

use serde_json::Value;

use crate::preferences::Preferences;
use crate::types::{
    EventPayload, FolderErrorsData, ItemFinishedData, RawEvent, StateChangedData, FOLDER_ERRORS,
    ITEM_FINISHED, STATE_CHANGED,
};
use crate::utils::{file_name, truncate_chars};

/// Marker Syncthing inserts into the name of a conflicting copy.
pub const CONFLICT_MARKER: &str = ".sync-conflict-";

/// Longest error text carried into a notification.
pub const MAX_ERROR_CHARS: usize = 100;

/// Placeholder for a missing folder id.
const UNKNOWN_FOLDER: &str = "unknown folder";

/// Placeholder for a missing item path.
const UNKNOWN_ITEM: &str = "unknown item";

/// Semantic category of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    FolderError,
    ItemError,
    ConflictCreated,
    Ignored,
}

impl Category {
    /// Short name for logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FolderError => "folder_error",
            Self::ItemError => "item_error",
            Self::ConflictCreated => "conflict_created",
            Self::Ignored => "ignored",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw event reduced to what a notification needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedEvent {
    pub category: Category,
    pub folder: Option<String>,
    pub item: Option<String>,
    pub message: String,
    pub event_id: u64,
}

impl ClassifiedEvent {
    fn ignored(event_id: u64) -> Self {
        Self {
            category: Category::Ignored,
            folder: None,
            item: None,
            message: String::new(),
            event_id,
        }
    }
}

/// Classifies a raw event.
#[must_use]
pub fn classify(raw: &RawEvent) -> ClassifiedEvent {
    match raw.payload() {
        EventPayload::FolderErrors(data) => classify_folder_errors(raw.id, data),
        EventPayload::ItemFinished(data) => classify_item_finished(raw.id, data),
        EventPayload::StateChanged(data) => classify_state_changed(raw.id, data),
        EventPayload::Malformed { kind } => classify_malformed(raw, kind),
        EventPayload::Other => ClassifiedEvent::ignored(raw.id),
    }
}

/// Returns true if the event should continue towards dispatch.
#[must_use]
pub fn passes_filter(event: &ClassifiedEvent, prefs: &Preferences) -> bool {
    prefs.wants(event.category)
}

fn classify_folder_errors(event_id: u64, data: FolderErrorsData) -> ClassifiedEvent {
    let Some(first) = data.errors.first() else {
        return ClassifiedEvent::ignored(event_id);
    };

    let folder_label = data.folder.as_deref().unwrap_or(UNKNOWN_FOLDER);
    let error = truncate_chars(
        first.error.as_deref().unwrap_or("unknown error"),
        MAX_ERROR_CHARS,
    );

    let mut message = match first.path.as_deref() {
        Some(path) if !path.is_empty() => format!("{folder_label}: {path}: {error}"),
        _ => format!("{folder_label}: {error}"),
    };
    let remaining = data.errors.len() - 1;
    if remaining > 0 {
        message.push_str(&format!(" (and {remaining} more)"));
    }

    ClassifiedEvent {
        category: Category::FolderError,
        folder: data.folder,
        item: None,
        message,
        event_id,
    }
}

fn classify_item_finished(event_id: u64, data: ItemFinishedData) -> ClassifiedEvent {
    let item_label = data.item.as_deref().unwrap_or(UNKNOWN_ITEM);

    if let Some(error) = data.error.as_deref().filter(|e| !e.is_empty()) {
        let message = format!("{item_label}: {}", truncate_chars(error, MAX_ERROR_CHARS));
        return ClassifiedEvent {
            category: Category::ItemError,
            folder: data.folder,
            item: data.item,
            message,
            event_id,
        };
    }

    let is_delete = data.action.as_deref() == Some("delete");
    let conflict_message = match data.item.as_deref() {
        Some(item) if !is_delete && is_conflict_copy(item) => Some(format!(
            "{} has a conflicting copy: {item}",
            original_path(item)
        )),
        _ => None,
    };

    match conflict_message {
        Some(message) => ClassifiedEvent {
            category: Category::ConflictCreated,
            folder: data.folder,
            item: data.item,
            message,
            event_id,
        },
        None => ClassifiedEvent::ignored(event_id),
    }
}

fn classify_state_changed(event_id: u64, data: StateChangedData) -> ClassifiedEvent {
    if data.to.as_deref() != Some("error") {
        return ClassifiedEvent::ignored(event_id);
    }

    let folder_label = data.folder.as_deref().unwrap_or(UNKNOWN_FOLDER);
    let message = match data.error.as_deref().filter(|e| !e.is_empty()) {
        Some(error) => format!("{folder_label}: {}", truncate_chars(error, MAX_ERROR_CHARS)),
        None => format!("{folder_label}: folder stopped with an error"),
    };

    ClassifiedEvent {
        category: Category::FolderError,
        folder: data.folder,
        item: None,
        message,
        event_id,
    }
}

/// Best-effort classification of a known event type with unexpected data.
fn classify_malformed(raw: &RawEvent, kind: &'static str) -> ClassifiedEvent {
    let folder = string_field(&raw.data, "folder");
    let folder_label = folder.clone().unwrap_or_else(|| UNKNOWN_FOLDER.to_string());

    let (category, message) = match kind {
        FOLDER_ERRORS => (
            Category::FolderError,
            format!("{folder_label}: folder reported errors"),
        ),
        ITEM_FINISHED if has_value(&raw.data, "error") => {
            (Category::ItemError, format!("{folder_label}: an item failed to sync"))
        }
        STATE_CHANGED if raw.data.get("to").and_then(Value::as_str) == Some("error") => (
            Category::FolderError,
            format!("{folder_label}: folder stopped with an error"),
        ),
        _ => return ClassifiedEvent::ignored(raw.id),
    };

    ClassifiedEvent {
        category,
        folder,
        item: None,
        message,
        event_id: raw.id,
    }
}

fn string_field(data: &Value, key: &str) -> Option<String> {
    data.get(key).and_then(Value::as_str).map(str::to_string)
}

fn has_value(data: &Value, key: &str) -> bool {
    match data.get(key) {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

/// Returns true if the item's file name follows the conflict-copy convention.
#[must_use]
pub fn is_conflict_copy(item: &str) -> bool {
    file_name(item).contains(CONFLICT_MARKER)
}

/// Recovers the original path from a conflict copy path.
///
/// Syncthing names conflict copies `<stem>.sync-conflict-<date>-<time>-<device>.<ext>`.
/// Stripping the marker and its suffix up to the extension gives the original
/// name. Paths without a marker are returned unchanged.
#[must_use]
pub fn original_path(item: &str) -> String {
    let Some(pos) = item.rfind(CONFLICT_MARKER) else {
        return item.to_string();
    };

    let stem = &item[..pos];
    let suffix = &item[pos + CONFLICT_MARKER.len()..];
    match suffix.split_once('.') {
        Some((_, ext)) if !ext.is_empty() => format!("{stem}.{ext}"),
        _ => stem.to_string(),
    }
}
