//! Bounded history of applied events, kept for diagnosing book errors

use std::collections::VecDeque;

use super::{LobEvent, OrderId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    /// Position of the event in the book's applied stream
    pub seq: u64,
    pub event: LobEvent,
}

/// Ring buffer of the most recent events; capacity 0 disables recording
#[derive(Debug, Clone)]
pub struct EventJournal {
    capacity: usize,
    entries: VecDeque<JournalEntry>,
}

impl EventJournal {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn record(&mut self, seq: u64, event: LobEvent) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(JournalEntry { seq, event });
    }

    /// Retained events that touched `id`, oldest first
    pub fn history_of(&self, id: OrderId) -> Vec<&JournalEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.event.order_id() == id)
            .collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = &JournalEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for EventJournal {
    fn default() -> Self {
        Self::new(64)
    }
}
