// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

use std::collections::VecDeque;

use super::{Entry, Snapshot, SnapshotMeta};

/// The in-memory log: a window of entries starting right after the last
/// snapshot, plus the committed and applied watermarks.
#[derive(Debug)]
pub struct RaftLog {
    entries: VecDeque<Entry>,
    /// Index of `entries[0]`.
    offset: u64,
    pub committed: u64,
    pub applied: u64,
    snapshot_index: u64,
    snapshot_term: u64,
}

impl Default for RaftLog {
    fn default() -> Self {
        Self::new()
    }
}

impl RaftLog {
    pub fn new() -> RaftLog {
        RaftLog {
            entries: VecDeque::new(),
            offset: 1,
            committed: 0,
            applied: 0,
            snapshot_index: 0,
            snapshot_term: 0,
        }
    }

    pub fn first_index(&self) -> u64 {
        self.offset
    }

    pub fn snapshot_index(&self) -> u64 {
        self.snapshot_index
    }

    pub fn last_index(&self) -> u64 {
        self.offset + self.entries.len() as u64 - 1
    }

    pub fn last_term(&self) -> u64 {
        self.entries
            .back()
            .map(|e| e.term)
            .unwrap_or(self.snapshot_term)
    }

    pub fn term(&self, index: u64) -> Option<u64> {
        if index == self.snapshot_index {
            return Some(self.snapshot_term);
        }
        if index < self.offset || index > self.last_index() {
            return None;
        }
        Some(self.entries[(index - self.offset) as usize].term)
    }

    pub fn entry(&self, index: u64) -> Option<&Entry> {
        if index < self.offset || index > self.last_index() {
            return None;
        }
        Some(&self.entries[(index - self.offset) as usize])
    }

    pub fn append(&mut self, entry: Entry) {
        debug_assert_eq!(entry.index, self.last_index() + 1);
        self.entries.push_back(entry);
    }

    /// Entries `[from, last]`, or `None` when `from` has been compacted
    /// away and only a snapshot can help the follower.
    pub fn entries_from(&self, from: u64) -> Option<Vec<Entry>> {
        if from <= self.snapshot_index && self.snapshot_index > 0 {
            return None;
        }
        if from < self.offset {
            return None;
        }
        if from > self.last_index() {
            return Some(vec![]);
        }
        Some(
            self.entries
                .iter()
                .skip((from - self.offset) as usize)
                .cloned()
                .collect(),
        )
    }

    /// Follower-side append with conflict resolution. Returns the new last
    /// index of the appended batch on success.
    pub fn try_append(
        &mut self,
        prev_log_index: u64,
        prev_log_term: u64,
        entries: Vec<Entry>,
    ) -> Option<u64> {
        if self.term(prev_log_index) != Some(prev_log_term) {
            return None;
        }
        let batch_last = prev_log_index + entries.len() as u64;
        for entry in entries {
            match self.term(entry.index) {
                Some(term) if term == entry.term => {
                    // Already have it.
                }
                Some(_) => {
                    // Conflict: drop the divergent suffix, then append.
                    self.truncate_from(entry.index);
                    self.entries.push_back(entry);
                }
                None => {
                    debug_assert_eq!(entry.index, self.last_index() + 1);
                    self.entries.push_back(entry);
                }
            }
        }
        Some(batch_last)
    }

    fn truncate_from(&mut self, index: u64) {
        // Never truncate committed entries.
        debug_assert!(index > self.committed);
        while self.last_index() >= index && !self.entries.is_empty() {
            self.entries.pop_back();
        }
    }

    pub fn commit_to(&mut self, index: u64) -> bool {
        let index = index.min(self.last_index());
        if index > self.committed {
            self.committed = index;
            return true;
        }
        false
    }

    /// Drains entries `(applied, committed]`, advancing the applied mark.
    pub fn take_committed_entries(&mut self) -> Vec<Entry> {
        let mut out = Vec::new();
        while self.applied < self.committed {
            let next = self.applied + 1;
            match self.entry(next) {
                Some(entry) => out.push(entry.clone()),
                None => break,
            }
            self.applied = next;
        }
        out
    }

    /// Drops entries up to `to_index` after the state machine snapshotted
    /// its durable state at that index.
    pub fn compact(&mut self, to_index: u64, term: u64) {
        debug_assert!(to_index <= self.applied);
        while self.offset <= to_index && !self.entries.is_empty() {
            self.entries.pop_front();
            self.offset += 1;
        }
        self.offset = self.offset.max(to_index + 1);
        self.snapshot_index = to_index;
        self.snapshot_term = term;
    }

    /// Resets the whole log from an installed snapshot.
    pub fn restore(&mut self, meta: &SnapshotMeta) {
        self.entries.clear();
        self.offset = meta.index + 1;
        self.snapshot_index = meta.index;
        self.snapshot_term = meta.term;
        self.committed = meta.index;
        self.applied = meta.index;
    }

    /// Whether a candidate's log is at least as up to date as ours.
    pub fn is_up_to_date(&self, last_log_index: u64, last_log_term: u64) -> bool {
        last_log_term > self.last_term()
            || (last_log_term == self.last_term() && last_log_index >= self.last_index())
    }
}

impl RaftLog {
    pub fn snapshot_placeholder(&self) -> Snapshot {
        Snapshot {
            meta: SnapshotMeta {
                index: self.snapshot_index,
                term: self.snapshot_term,
                voters: vec![],
                learners: vec![],
            },
            data: vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::raft::EntryPayload;

    use super::*;

    fn entry(term: u64, index: u64) -> Entry {
        Entry {
            term,
            index,
            payload: EntryPayload::Noop,
        }
    }

    #[test]
    fn test_append_and_terms() {
        let mut log = RaftLog::new();
        assert_eq!(log.last_index(), 0);
        assert_eq!(log.term(0), Some(0));
        log.append(entry(1, 1));
        log.append(entry(1, 2));
        assert_eq!(log.last_index(), 2);
        assert_eq!(log.term(2), Some(1));
        assert_eq!(log.term(3), None);
    }

    #[test]
    fn test_try_append_conflict_resolution() {
        let mut log = RaftLog::new();
        log.append(entry(1, 1));
        log.append(entry(1, 2));
        log.append(entry(1, 3));
        // Mismatched prev term is rejected.
        assert!(log.try_append(2, 9, vec![entry(2, 3)]).is_none());
        // Conflicting suffix is replaced.
        assert_eq!(log.try_append(1, 1, vec![entry(2, 2)]), Some(2));
        assert_eq!(log.last_index(), 2);
        assert_eq!(log.term(2), Some(2));
        // Duplicate append is idempotent.
        assert_eq!(log.try_append(1, 1, vec![entry(2, 2)]), Some(2));
        assert_eq!(log.last_index(), 2);
    }

    #[test]
    fn test_commit_and_take() {
        let mut log = RaftLog::new();
        log.append(entry(1, 1));
        log.append(entry(1, 2));
        assert!(log.commit_to(2));
        assert!(!log.commit_to(1));
        let taken = log.take_committed_entries();
        assert_eq!(taken.len(), 2);
        assert_eq!(log.applied, 2);
        assert!(log.take_committed_entries().is_empty());
    }

    #[test]
    fn test_compact_and_restore() {
        let mut log = RaftLog::new();
        for i in 1..=4 {
            log.append(entry(1, i));
        }
        log.commit_to(4);
        log.take_committed_entries();
        log.compact(3, 1);
        assert_eq!(log.first_index(), 4);
        assert_eq!(log.term(3), Some(1));
        assert!(log.entries_from(2).is_none());
        assert_eq!(log.entries_from(4).unwrap().len(), 1);

        let meta = SnapshotMeta {
            index: 9,
            term: 3,
            voters: vec![1, 2, 3],
            learners: vec![],
        };
        log.restore(&meta);
        assert_eq!(log.last_index(), 9);
        assert_eq!(log.committed, 9);
        assert_eq!(log.term(9), Some(3));
    }
}
