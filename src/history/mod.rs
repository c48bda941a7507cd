//! History index
//!
//! Newest-first, capped list of [`HistoryEntry`] rows. Each row joins to a
//! stored `ScanResult` by id. The index itself is plain data; the result
//! store loads it, mutates it under its write lock and writes it back.

use std::collections::HashSet;

use uuid::Uuid;

use crate::models::HistoryEntry;

pub mod pattern_matcher;

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryIndex {
    entries: Vec<HistoryEntry>,
    max_len: usize,
}

impl HistoryIndex {
    /// An empty index holding at most `max_len` rows (at least one)
    pub fn new(max_len: usize) -> Self {
        Self {
            entries: Vec::new(),
            max_len: max_len.max(1),
        }
    }

    /// Rebuild from persisted rows, trimming to the cap. Duplicate ids keep
    /// their first (newest) row.
    pub fn from_entries(entries: Vec<HistoryEntry>, max_len: usize) -> Self {
        let mut index = Self::new(max_len);
        let mut seen = HashSet::new();
        index.entries = entries
            .into_iter()
            .filter(|entry| seen.insert(entry.id))
            .collect();
        index.entries.truncate(index.max_len);
        index
    }

    /// Prepend `entry`, dropping the oldest rows beyond the cap
    pub fn record(&mut self, entry: HistoryEntry) {
        self.entries.retain(|existing| existing.id != entry.id);
        self.entries.insert(0, entry);
        if self.entries.len() > self.max_len {
            let dropped = self.entries.len() - self.max_len;
            self.entries.truncate(self.max_len);
            log::debug!("History cap {} reached, dropped {} oldest row(s)", self.max_len, dropped);
        }
    }

    pub fn list(&self) -> Vec<HistoryEntry> {
        self.entries.clone()
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    /// Drop rows whose id is not in `valid_ids`; returns how many were dropped
    pub fn prune(&mut self, valid_ids: &HashSet<Uuid>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|entry| valid_ids.contains(&entry.id));
        before - self.entries.len()
    }

    /// Remove the row for `id`, if any
    pub fn remove(&mut self, id: Uuid) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.id != id);
        before != self.entries.len()
    }

    /// Rows whose target matches `pattern` exactly or as a glob
    pub fn filter(&self, pattern: &str) -> Vec<HistoryEntry> {
        self.entries
            .iter()
            .filter(|entry| pattern_matcher::matches_target_filter(&entry.target, pattern))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }
}
