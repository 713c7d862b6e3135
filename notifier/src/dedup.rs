//! Debouncing of repeated conflict notifications.
//!
//! A single conflict often reaches the monitor as several raw events: the
//! daemon may finish the same conflict copy more than once, and a reconnect
//! can replay the tail of a batch. The guard remembers when each conflict
//! was last announced and suppresses repeats inside a short window, while a
//! genuinely new conflict on the same path minutes later still gets through.
//!
//! Folder and item errors are never debounced: each occurrence is
//! independently actionable.

use std::num::NonZeroUsize;
use std::time::Duration;

use lru::LruCache;
use tokio::time::Instant;
use tracing::debug;

use crate::classifier::{Category, ClassifiedEvent};

/// Default debounce window in seconds.
pub const DEFAULT_DEBOUNCE_SECS: u64 = 5;

/// Default maximum number of remembered conflicts.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Identity of a logical notification.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub category: Category,
    pub folder: Option<String>,
    pub item: Option<String>,
}

impl From<&ClassifiedEvent> for DedupKey {
    fn from(event: &ClassifiedEvent) -> Self {
        Self {
            category: event.category,
            folder: event.folder.clone(),
            item: event.item.clone(),
        }
    }
}

/// Suppresses repeat conflict notifications within a time window.
///
/// The table is bounded: once full, the least recently emitted key is
/// dropped. Since emissions are recorded in time order, the least recently
/// used entry is also the oldest, which lets expired entries be evicted from
/// the cold end on each lookup.
#[derive(Debug)]
pub struct DedupGuard {
    window: Duration,
    last_emitted: LruCache<DedupKey, Instant>,
}

impl DedupGuard {
    /// Creates a guard with the given window and capacity.
    ///
    /// A capacity of zero is treated as one.
    #[must_use]
    pub fn new(window: Duration, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            window,
            last_emitted: LruCache::new(capacity),
        }
    }

    /// Creates a guard with the default capacity.
    #[must_use]
    pub fn with_window(window: Duration) -> Self {
        Self::new(window, DEFAULT_CAPACITY)
    }

    /// Returns the debounce window.
    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Number of keys currently remembered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.last_emitted.len()
    }

    /// Returns true if no keys are remembered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.last_emitted.is_empty()
    }

    /// Decides whether `event` should be announced at `now`.
    ///
    /// Only [`Category::ConflictCreated`] is ever suppressed. When the event
    /// is allowed through, `now` is recorded for its key.
    pub fn should_emit(&mut self, event: &ClassifiedEvent, now: Instant) -> bool {
        if event.category != Category::ConflictCreated {
            return true;
        }

        self.evict_expired(now);

        let key = DedupKey::from(event);
        if let Some(&previous) = self.last_emitted.peek(&key) {
            if now.saturating_duration_since(previous) < self.window {
                debug!(
                    event_id = event.event_id,
                    item = ?event.item,
                    "Suppressing repeated conflict notification"
                );
                return false;
            }
        }

        self.last_emitted.put(key, now);
        true
    }

    fn evict_expired(&mut self, now: Instant) {
        while let Some((_, &emitted)) = self.last_emitted.peek_lru() {
            if now.saturating_duration_since(emitted) < self.window {
                break;
            }
            self.last_emitted.pop_lru();
        }
    }
}

impl Default for DedupGuard {
    fn default() -> Self {
        Self::with_window(Duration::from_secs(DEFAULT_DEBOUNCE_SECS))
    }
}
