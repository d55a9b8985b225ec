//! The in-memory Raft log (C1): a ring-buffered cache of [`LogEntry`] values.
//!
//! The log has the following invariants, mirroring the canonical C raft library's
//! `struct raft_log` (`examples/original_source/include/raft.h`):
//!
//! * Entry indexes are contiguous starting at 1 (no index gaps).
//! * `term_of` returns 0 for index 0 and for any index outside `[first_index,
//!   last_index]` (index 0 is a sentinel, always term 0).
//! * Entries acquired via [`Log::acquire`] stay alive (via their `Rc`) even after
//!   they're truncated or shifted out of the ring buffer, for as long as the caller
//!   holds the returned `Vec`.
//!
//! The C original hand-rolls a power-of-two circular buffer that doubles on overflow.
//! `VecDeque` already is exactly that growable ring buffer, so it's used directly
//! instead of reimplementing the same doubling/wraparound logic (see SPEC_FULL §4.1).

use std::collections::VecDeque;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::raft::entry::{EntryType, LogEntry, Payload};
use crate::raft::types::{Index, Term};

pub struct Log {
    /// Entries currently in the log, in index order. `entries[0]` has index
    /// `offset + 1`.
    entries: VecDeque<Rc<LogEntry>>,
    /// Index of the (possibly nonexistent) slot immediately before `entries[0]`.
    offset: Index,
}

impl Log {
    pub fn new() -> Self {
        Self { entries: VecDeque::new(), offset: 0 }
    }

    pub fn n_entries(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The index of the first entry in the log, or 0 if the log is empty.
    pub fn first_index(&self) -> Index {
        if self.entries.is_empty() { 0 } else { self.offset + 1 }
    }

    /// The index of the last entry in the log, or `offset` (possibly 0) if empty.
    pub fn last_index(&self) -> Index {
        self.offset + self.entries.len() as Index
    }

    /// The term of the entry at `index`, or 0 if `index` is 0 or outside
    /// `[first_index, last_index]`.
    pub fn term_of(&self, index: Index) -> Term {
        if index == 0 || index <= self.offset || index > self.last_index() {
            return 0;
        }
        self.entries[(index - self.offset - 1) as usize].term
    }

    pub fn last_term(&self) -> Term {
        self.term_of(self.last_index())
    }

    /// Looks up the entry at `index`, if it is still within the ring buffer's window.
    pub fn get(&self, index: Index) -> Option<&Rc<LogEntry>> {
        if index == 0 || index <= self.offset || index > self.last_index() {
            return None;
        }
        self.entries.get((index - self.offset - 1) as usize)
    }

    /// Appends a new entry at `current_term`'s caller-supplied term, returning its
    /// index.
    pub fn append(&mut self, term: Term, entry_type: EntryType, payload: Payload) -> Index {
        self.append_entry(LogEntry::new(term, entry_type, payload))
    }

    /// Appends an already-constructed entry (e.g. one decoded off the wire, sharing a
    /// batch block with its siblings), returning its index.
    pub fn append_entry(&mut self, entry: Rc<LogEntry>) -> Index {
        self.entries.push_back(entry);
        self.last_index()
    }

    /// Returns clones of the entries in `[from_index, last_index]`; cloning an `Rc`
    /// keeps the underlying `LogEntry` alive even if the log later truncates or
    /// shifts past it. An in-flight I/O request holds exactly this kind of clone,
    /// which is this rewrite's equivalent of the C API's `acquire`/`release` pair
    /// (see SPEC_FULL §4.1) -- there is no separate `release`: dropping the returned
    /// `Vec` performs it.
    pub fn acquire(&self, from_index: Index) -> Vec<Rc<LogEntry>> {
        if from_index == 0 || self.entries.is_empty() || from_index > self.last_index() {
            return Vec::new();
        }
        let start = from_index.max(self.first_index());
        let skip = (start - self.offset - 1) as usize;
        self.entries.iter().skip(skip).cloned().collect()
    }

    /// Deletes entries `[index, last_index]`. Forbidden to truncate below
    /// `first_index` (the caller would be discarding already-committed history).
    pub fn truncate(&mut self, index: Index) -> Result<()> {
        if index != 0 && index < self.first_index() {
            return Err(Error::Internal(format!(
                "cannot truncate at {index}: below first index {}",
                self.first_index()
            )));
        }
        while self.last_index() >= index && !self.entries.is_empty() {
            self.entries.pop_back();
        }
        if self.entries.is_empty() {
            self.offset = index.saturating_sub(1);
        }
        Ok(())
    }

    /// Deletes entries `[first_index, index]` (head removal), adjusting `offset`.
    pub fn shift(&mut self, index: Index) {
        while self.first_index() != 0 && self.first_index() <= index {
            self.entries.pop_front();
            self.offset += 1;
        }
    }
}

impl Default for Log {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(term: Term, byte: u8) -> (Term, EntryType, Payload) {
        (term, EntryType::Command, Payload::owned(vec![byte]))
    }

    #[test]
    fn empty_log_has_zero_bounds() {
        let l = Log::new();
        assert_eq!(l.first_index(), 0);
        assert_eq!(l.last_index(), 0);
        assert_eq!(l.term_of(0), 0);
        assert_eq!(l.term_of(5), 0);
        assert!(l.get(1).is_none());
    }

    #[test]
    fn append_grows_contiguously() {
        let mut l = Log::new();
        let (t, ty, p) = cmd(1, 1);
        assert_eq!(l.append(t, ty, p), 1);
        let (t, ty, p) = cmd(1, 2);
        assert_eq!(l.append(t, ty, p), 2);
        let (t, ty, p) = cmd(2, 3);
        assert_eq!(l.append(t, ty, p), 3);
        assert_eq!(l.first_index(), 1);
        assert_eq!(l.last_index(), 3);
        assert_eq!(l.term_of(1), 1);
        assert_eq!(l.term_of(3), 2);
        assert_eq!(l.term_of(4), 0);
    }

    #[test]
    fn acquire_returns_suffix_and_keeps_entries_alive_after_truncate() {
        let mut l = Log::new();
        for i in 0..3 {
            let (t, ty, p) = cmd(1, i);
            l.append(t, ty, p);
        }
        let acquired = l.acquire(2);
        assert_eq!(acquired.len(), 2);
        l.truncate(1).unwrap();
        assert_eq!(l.last_index(), 0);
        // Still alive via our acquired clones.
        assert_eq!(acquired[0].payload.as_bytes(), &[0]);
        assert_eq!(Rc::strong_count(&acquired[0]), 1);
    }

    #[test]
    fn truncate_rejects_below_first_index() {
        let mut l = Log::new();
        for i in 0..3 {
            let (t, ty, p) = cmd(1, i);
            l.append(t, ty, p);
        }
        l.shift(1);
        assert_eq!(l.first_index(), 2);
        assert_eq!(l.truncate(1), Err(Error::Internal("cannot truncate at 1: below first index 2".into())));
    }

    #[test]
    fn shift_removes_head_and_preserves_tail_terms() {
        let mut l = Log::new();
        for i in 0..5 {
            let (t, ty, p) = cmd(1, i);
            l.append(t, ty, p);
        }
        l.shift(2);
        assert_eq!(l.first_index(), 3);
        assert_eq!(l.last_index(), 5);
        assert_eq!(l.get(3).unwrap().payload.as_bytes(), &[2]);
        assert!(l.get(2).is_none());
    }

    #[test]
    fn quiescent_entries_have_refcount_one() {
        let mut l = Log::new();
        for i in 0..3 {
            let (t, ty, p) = cmd(1, i);
            l.append(t, ty, p);
        }
        for idx in l.first_index()..=l.last_index() {
            assert_eq!(Rc::strong_count(l.get(idx).unwrap()), 1);
        }
    }
}
