//! Cursor tracking for the daemon's event log.
//!
//! The cursor is the id of the highest event the monitor has finished
//! processing. Every poll asks for events with an id greater than the cursor,
//! so the cursor must only be advanced once an event's notification path has
//! been attempted. It never moves backwards.

use tracing::{trace, warn};

/// Monotonic position in the daemon's event log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor {
    last_processed: u64,
}

impl Cursor {
    /// Creates a cursor positioned after `event_id`.
    #[must_use]
    pub fn starting_at(event_id: u64) -> Self {
        Self {
            last_processed: event_id,
        }
    }

    /// Returns the id of the last processed event (0 if none).
    #[must_use]
    pub fn value(&self) -> u64 {
        self.last_processed
    }

    /// Marks `event_id` as processed.
    ///
    /// Ids below the current position are ignored: the cursor is monotonic
    /// and there is no rollback.
    pub fn advance(&mut self, event_id: u64) {
        if event_id < self.last_processed {
            warn!(
                event_id,
                cursor = self.last_processed,
                "Ignoring attempt to move cursor backwards"
            );
            return;
        }

        trace!(from = self.last_processed, to = event_id, "Cursor advanced");
        self.last_processed = event_id;
    }
}
