//! Bounded, newest-first diagnostic log.

use std::collections::VecDeque;

/// Number of lines the session keeps for display.
pub const LOG_CAPACITY: usize = 10;

/// A ring buffer of formatted diagnostic lines, newest first.
///
/// Pushing into a full log evicts the oldest line, so after any number of
/// pushes the log holds at most `capacity` entries: the most recent ones.
#[derive(Debug, Clone)]
pub struct RollingLog {
    lines: VecDeque<String>,
    capacity: usize,
}

impl RollingLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    pub fn push(&mut self, line: impl Into<String>) {
        if self.capacity == 0 {
            return;
        }
        self.lines.push_front(line.into());
        self.lines.truncate(self.capacity);
    }

    /// Lines, newest first.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }
}

impl Default for RollingLog {
    fn default() -> Self {
        Self::new(LOG_CAPACITY)
    }
}
