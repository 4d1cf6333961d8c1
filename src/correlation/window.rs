// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bounded history of returns against one original transaction.

use crate::record::TransactionRecord;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// One return remembered in a window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowEntry {
    pub record_id: String,
    pub store_id: String,
    pub customer_id: String,
    pub timestamp: i64,
    pub has_photo: bool,
    pub amount: f64,
}

impl From<&TransactionRecord> for WindowEntry {
    fn from(record: &TransactionRecord) -> Self {
        Self {
            record_id: record.id.clone(),
            store_id: record.store_id.clone(),
            customer_id: record.customer_id.clone(),
            timestamp: record.timestamp,
            has_photo: record.has_photo,
            amount: record.amount,
        }
    }
}

/// Returns seen for one original id, oldest first.
#[derive(Debug, Clone, Default)]
pub struct CorrelationWindow {
    entries: VecDeque<WindowEntry>,
}

impl CorrelationWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, record_id: &str) -> bool {
        self.entries.iter().any(|e| e.record_id == record_id)
    }

    /// Append an entry, dropping the oldest once `capacity` is reached.
    /// Returns false if the record id is already present.
    pub fn push(&mut self, entry: WindowEntry, capacity: usize) -> bool {
        if self.contains(&entry.record_id) {
            return false;
        }
        while self.entries.len() >= capacity.max(1) {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
        true
    }

    /// Drop entries with a timestamp before `cutoff`. Returns how many were dropped.
    pub fn evict_older_than(&mut self, cutoff: i64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| e.timestamp >= cutoff);
        before - self.entries.len()
    }

    pub fn remove(&mut self, record_id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.record_id != record_id);
        before != self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WindowEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, ts: i64) -> WindowEntry {
        WindowEntry {
            record_id: id.to_string(),
            store_id: "STORE_A".to_string(),
            customer_id: "C1".to_string(),
            timestamp: ts,
            has_photo: true,
            amount: -10.0,
        }
    }

    #[test]
    fn test_push_dedupes_by_record_id() {
        let mut window = CorrelationWindow::new();
        assert!(window.push(entry("R1", 1), 8));
        assert!(!window.push(entry("R1", 2), 8));
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn test_push_drops_oldest_at_capacity() {
        let mut window = CorrelationWindow::new();
        for i in 0..5 {
            window.push(entry(&format!("R{}", i), i), 3);
        }
        let ids: Vec<_> = window.iter().map(|e| e.record_id.as_str()).collect();
        assert_eq!(ids, vec!["R2", "R3", "R4"]);
    }

    #[test]
    fn test_evict_older_than() {
        let mut window = CorrelationWindow::new();
        window.push(entry("R1", 100), 8);
        window.push(entry("R2", 200), 8);
        window.push(entry("R3", 300), 8);

        assert_eq!(window.evict_older_than(200), 1);
        assert!(!window.contains("R1"));
        assert!(window.contains("R2"));
    }

    #[test]
    fn test_remove() {
        let mut window = CorrelationWindow::new();
        window.push(entry("R1", 100), 8);
        assert!(window.remove("R1"));
        assert!(!window.remove("R1"));
        assert!(window.is_empty());
    }

    #[test]
    fn test_entry_from_record() {
        let record = TransactionRecord::refund("R1", "STORE_B", "C9", Some("T1".into()), 42.0, false, 77);
        let e = WindowEntry::from(&record);
        assert_eq!(e.record_id, "R1");
        assert_eq!(e.store_id, "STORE_B");
        assert!(!e.has_photo);
        assert_eq!(e.amount, -42.0);
    }
}
