//! Bounded log of user-visible notices, newest first.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Severity of a notice.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    /// Something happened
    Info,
    /// Something the user asked for completed
    Success,
    /// A request was refused or partially applied
    Warning,
    /// The replica lost contact or a send failed
    Error,
}

impl fmt::Display for NoticeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "info",
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
        })
    }
}

/// One entry in the log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    /// When it was recorded
    pub at: DateTime<Utc>,
    /// Severity
    pub level: NoticeLevel,
    /// Text shown to the user
    pub message: String,
}

/// Newest-first log that forgets the oldest entry once full.
#[derive(Clone, Debug)]
pub struct NoticeLog {
    entries: VecDeque<Notice>,
    capacity: usize,
}

impl NoticeLog {
    /// Empty log keeping at most `capacity` entries (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record a notice.
    pub fn push(&mut self, at: DateTime<Utc>, level: NoticeLevel, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(%level, %message, "Notice");
        self.entries.push_front(Notice { at, level, message });
        self.entries.truncate(self.capacity);
    }

    /// Entries, newest first.
    pub fn iter(&self) -> impl Iterator<Item = &Notice> {
        self.entries.iter()
    }

    /// The newest entry.
    #[must_use]
    pub fn latest(&self) -> Option<&Notice> {
        self.entries.front()
    }

    /// Whether any entry contains `text`.
    #[must_use]
    pub fn contains(&self, text: &str) -> bool {
        self.entries.iter().any(|n| n.message.contains(text))
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of entries kept.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}
