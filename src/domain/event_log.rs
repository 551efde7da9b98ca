//! Ordered, append-only record of protocol events.
//!
//! Producers are the session actor (radio callbacks) and the display layer
//! (user actions). Appends are serialized by one mutex; the timestamp is taken
//! and the broadcast published while it is held, so subscribers observe
//! entries in log order.

use crate::domain::models::{LogDirection, LogEntry};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use time::{OffsetDateTime, UtcOffset};
use tokio::sync::broadcast;
use tracing::debug;

const FEED_CAPACITY: usize = 256;

/// Change notifications for display subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum LogUpdate {
    Appended(LogEntry),
    Cleared,
}

struct LogState {
    entries: VecDeque<LogEntry>,
    capacity: Option<usize>,
}

pub struct EventLog {
    state: Mutex<LogState>,
    feed: broadcast::Sender<LogUpdate>,
    offset: UtcOffset,
}

impl EventLog {
    /// Create an unbounded log.
    pub fn new() -> Self {
        Self::with_capacity(None)
    }

    /// Create a log that keeps at most `capacity` newest entries.
    pub fn with_capacity(capacity: Option<usize>) -> Self {
        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        // Resolved once; the lookup is unreliable once other threads exist.
        let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
        Self {
            state: Mutex::new(LogState {
                entries: VecDeque::new(),
                capacity: capacity.filter(|c| *c > 0),
            }),
            feed,
            offset,
        }
    }

    fn lock(&self) -> MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append an entry stamped with the current time.
    pub fn record(&self, direction: LogDirection, payload: impl Into<String>) -> LogEntry {
        let mut state = self.lock();
        let entry = LogEntry {
            timestamp: OffsetDateTime::now_utc().to_offset(self.offset),
            direction,
            payload: payload.into(),
        };
        debug!("{}", entry.line());

        if let Some(capacity) = state.capacity {
            while state.entries.len() >= capacity {
                state.entries.pop_front();
            }
        }
        state.entries.push_back(entry.clone());
        // No receivers is fine
        let _ = self.feed.send(LogUpdate::Appended(entry.clone()));
        entry
    }

    pub fn info(&self, payload: impl Into<String>) {
        self.record(LogDirection::Info, payload);
    }

    pub fn warn(&self, payload: impl Into<String>) {
        self.record(LogDirection::Warning, payload);
    }

    pub fn error(&self, payload: impl Into<String>) {
        self.record(LogDirection::Error, payload);
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        let _ = self.feed.send(LogUpdate::Cleared);
    }

    /// Copy of the retained entries, oldest first.
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.lock().entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Subscribe to appends and clears made after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<LogUpdate> {
        self.feed.subscribe()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}
