//! Log entries and their payload storage.
//!
//! See SPEC_FULL §3.1: the C reference keeps a `buf`/`batch` pair plus an external
//! refcount table so entries can be pinned by in-flight I/O independently of their
//! position in the log. Here a single [`Payload`] representation covers both the
//! "exclusively owned" and "shared batch" cases, and `Rc` does the ref-counting: an
//! entry's bytes are freed exactly when the last `Rc` clone (held by the log's ring
//! buffer, or by any [`crate::raft::io::IoRequest`] slot still referencing it) is
//! dropped.

use std::rc::Rc;

use crate::raft::types::Term;

/// The kind of a log entry, matching `RAFT_LOG_COMMAND`/`RAFT_LOG_CONFIGURATION`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryType {
    Command,
    Configuration,
}

/// An entry's payload bytes. `block` is the memory the bytes live in; `offset`/`len`
/// locate this entry's slice within it. For an entry that owns its payload outright,
/// `block` contains exactly this entry's bytes. For an entry decoded out of a network
/// or disk batch, `block` is shared with the other entries of that batch, and is only
/// freed once every entry referencing it has been dropped.
#[derive(Clone, Debug, PartialEq)]
pub struct Payload {
    block: Rc<[u8]>,
    offset: u32,
    len: u32,
}

impl Payload {
    /// Wraps a buffer this entry exclusively owns.
    pub fn owned(bytes: Vec<u8>) -> Self {
        let len = bytes.len() as u32;
        Self { block: Rc::from(bytes.into_boxed_slice()), offset: 0, len }
    }

    /// Builds a payload referencing a sub-range of a (possibly shared) batch block.
    pub fn from_batch(block: Rc<[u8]>, offset: u32, len: u32) -> Self {
        debug_assert!((offset as usize + len as usize) <= block.len());
        Self { block, offset, len }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.block[self.offset as usize..self.offset as usize + self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// True if this payload's bytes are shared with sibling entries of the same batch
    /// (i.e. it does not exclusively own its backing block).
    pub fn is_batched(&self) -> bool {
        self.offset != 0 || self.len as usize != self.block.len()
    }
}

/// A single entry in the Raft log.
#[derive(Debug, PartialEq)]
pub struct LogEntry {
    pub term: Term,
    pub entry_type: EntryType,
    pub payload: Payload,
}

impl LogEntry {
    pub fn new(term: Term, entry_type: EntryType, payload: Payload) -> Rc<Self> {
        Rc::new(Self { term, entry_type, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owned_payload_round_trips_bytes() {
        let p = Payload::owned(vec![1, 2, 3]);
        assert_eq!(p.as_bytes(), &[1, 2, 3]);
        assert!(!p.is_batched());
    }

    #[test]
    fn batched_payload_references_sub_range() {
        let block: Rc<[u8]> = Rc::from(vec![0u8, 1, 2, 3, 4, 5].into_boxed_slice());
        let p = Payload::from_batch(block.clone(), 2, 3);
        assert_eq!(p.as_bytes(), &[2, 3, 4]);
        assert!(p.is_batched());
        // Block outlives this payload's individual view.
        assert_eq!(Rc::strong_count(&block), 2);
    }

    #[test]
    fn batch_block_freed_once_no_entry_references_it() {
        let block: Rc<[u8]> = Rc::from(vec![9u8; 4].into_boxed_slice());
        let weak = Rc::downgrade(&block);
        {
            let _p1 = Payload::from_batch(block.clone(), 0, 2);
            let _p2 = Payload::from_batch(block.clone(), 2, 2);
            drop(block);
            assert!(weak.upgrade().is_some());
        }
        assert!(weak.upgrade().is_none());
    }
}
