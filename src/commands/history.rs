//! Bounded, newest-first record of recent transcripts

use std::collections::VecDeque;

/// Maximum number of transcripts kept
pub const HISTORY_CAPACITY: usize = 5;

#[derive(Debug, Clone, Default)]
pub struct CommandHistory {
    entries: VecDeque<String>,
}

impl CommandHistory {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::with_capacity(HISTORY_CAPACITY),
        }
    }

    /// Insert as the newest entry, dropping the oldest once full
    pub fn push(&mut self, text: impl Into<String>) {
        self.entries.push_front(text.into());
        self.entries.truncate(HISTORY_CAPACITY);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn latest(&self) -> Option<&str> {
        self.entries.front().map(String::as_str)
    }

    /// Entries, newest first
    pub fn to_vec(&self) -> Vec<String> {
        self.entries.iter().cloned().collect()
    }
}
