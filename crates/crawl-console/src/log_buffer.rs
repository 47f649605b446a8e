use crawl_core::LogEntry;
use std::collections::VecDeque;

pub const LOG_BUFFER_CAPACITY: usize = 500;

/// FIFO ring of log entries. Never holds more than `capacity` entries.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    entries: VecDeque<LogEntry>,
    capacity: usize,
    appended: u64,
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::with_capacity(LOG_BUFFER_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            appended: 0,
        }
    }

    /// Appends at the tail, returning the evicted head when full.
    pub fn append(&mut self, entry: LogEntry) -> Option<LogEntry> {
        let evicted = if self.entries.len() >= self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(entry);
        self.appended += 1;
        evicted
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    /// True when an identical entry (id, timestamp, level and message) is held.
    pub fn contains(&self, entry: &LogEntry) -> bool {
        self.entries.iter().any(|held| held == entry)
    }

    /// Monotonic count of appends, used as a cursor by followers.
    pub fn cursor(&self) -> u64 {
        self.appended
    }

    /// Entries appended after `cursor` that are still held.
    pub fn since(&self, cursor: u64) -> Vec<LogEntry> {
        let newer = self.appended.saturating_sub(cursor);
        let held = usize::try_from(newer)
            .unwrap_or(usize::MAX)
            .min(self.entries.len());
        self.entries
            .iter()
            .skip(self.entries.len() - held)
            .cloned()
            .collect()
    }
}

/// Auto-follow state of the log view. Pausing never touches the buffer itself.
#[derive(Debug, Clone, Default)]
pub struct FollowState {
    paused_at: Option<u64>,
}

impl FollowState {
    pub fn is_following(&self) -> bool {
        self.paused_at.is_none()
    }

    pub fn pause(&mut self, buffer: &LogBuffer) {
        if self.paused_at.is_none() {
            self.paused_at = Some(buffer.cursor());
        }
    }

    /// Resumes following and hands back what arrived during the pause.
    pub fn resume(&mut self, buffer: &LogBuffer) -> Vec<LogEntry> {
        match self.paused_at.take() {
            Some(cursor) => buffer.since(cursor),
            None => Vec::new(),
        }
    }

    pub fn unseen(&self, buffer: &LogBuffer) -> usize {
        self.paused_at
            .map(|cursor| buffer.since(cursor).len())
            .unwrap_or(0)
    }
}
