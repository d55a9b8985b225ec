//! The I/O backend seam (SPEC_FULL §6): the core never performs I/O itself. It
//! describes what it needs done as an [`IoRequest`] and hands it to a
//! [`Box<dyn IoBackend>`], then later learns the outcome through
//! [`crate::raft::engine`]'s `handle_io`.
//!
//! `Box<dyn IoBackend>` rather than a generic `Raft<B: IoBackend>` for the same reason
//! the teacher's storage layer is `Box<dyn storage::Engine>`: callers build one engine
//! per process, so there is nothing to gain from monomorphization, and a trait object
//! keeps `Raft` itself free of a type parameter that would otherwise infect every
//! signature that touches it.

use std::rc::Rc;

use crate::error::Result;
use crate::raft::entry::LogEntry;
use crate::raft::message::{AppendEntriesArgs, AppendEntriesResult, RequestVoteArgs, RequestVoteResult};
use crate::raft::types::{ServerId, Term};

/// An opaque handle identifying one outstanding [`IoRequest`]. Returned by
/// [`IoBackend`] submission calls and echoed back through `handle_io` on completion.
pub type RequestId = u64;

/// What an [`IoRequest`] asked the backend to do, retained so `handle_io` can
/// interpret the completion without the backend needing to echo it back. `append_log`
/// is the only operation that actually occupies a slot: `persist_term_and_vote` and
/// `truncate_log` are synchronous from the core's perspective (SPEC_FULL §5/§6), and
/// the RPC sends are fire-and-forget with no completion to track at all -- their
/// replies arrive as fresh inbound events, not as `handle_io` outcomes.
#[derive(Clone)]
pub enum IoRequestKind {
    /// Append `entries` (already acquired from the log, so they stay alive regardless
    /// of later truncation) to stable storage.
    AppendLog { entries: Vec<Rc<LogEntry>> },
}

/// One unit of work the core has delegated to the backend.
pub struct IoRequest {
    pub id: RequestId,
    pub kind: IoRequestKind,
}

/// Everything the core needs the outside world to do on its behalf.
///
/// `persist_term_and_vote` and `truncate_log` are synchronous: the backend must not
/// return until the write is durable, and a failure is reported immediately as a
/// `Result` rather than through `handle_io` (SPEC_FULL §5). Every other method returns
/// a [`RequestId`] immediately; the backend is expected to complete the operation
/// asynchronously and report the outcome through `handle_io` -- sent RPCs instead
/// produce their own `handle_*_response` call when (and if) a reply arrives over the
/// wire.
pub trait IoBackend {
    /// Durably persist `term`/`voted_for`. Must return only once the write has landed.
    fn persist_term_and_vote(&mut self, term: Term, voted_for: Option<ServerId>) -> Result<()>;

    /// Append `entries` to the durable log, reported asynchronously via `handle_io`.
    fn append_log(&mut self, request_id: RequestId, entries: Vec<Rc<LogEntry>>);

    /// Durably truncate the persisted log at and after `index`.
    fn truncate_log(&mut self, index: u64) -> Result<()>;

    /// Send a `RequestVote` RPC to `target`. Fire-and-forget from the core's
    /// perspective: delivery and the eventual reply are the backend's concern.
    fn send_request_vote(&mut self, target: ServerId, args: RequestVoteArgs);

    /// Send an `AppendEntries` RPC to `target`.
    fn send_append_entries(&mut self, target: ServerId, args: AppendEntriesArgs);

    /// Send a `RequestVote` reply to `target`.
    fn send_request_vote_result(&mut self, target: ServerId, result: RequestVoteResult);

    /// Send an `AppendEntries` reply to `target`.
    fn send_append_entries_result(&mut self, target: ServerId, result: AppendEntriesResult);
}

/// Tracks outstanding requests by the slot index doubling as their [`RequestId`], so a
/// completion can be matched back to the `IoRequestKind` that produced it without the
/// backend needing to remember anything beyond the id it was given.
///
/// Mirrors the canonical library's fixed-size `queue` array of in-flight requests
/// (`examples/original_source/include/raft.h`'s `struct raft_io_request`), but grows
/// instead of being capped, and reclaims freed slots instead of leaving tombstones.
#[derive(Default)]
pub struct IoQueue {
    slots: Vec<Option<IoRequestKind>>,
    free: Vec<RequestId>,
}

impl IoQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves a slot for `kind`, returning the id the backend should be given.
    pub fn insert(&mut self, kind: IoRequestKind) -> RequestId {
        if let Some(id) = self.free.pop() {
            self.slots[id as usize] = Some(kind);
            id
        } else {
            self.slots.push(Some(kind));
            (self.slots.len() - 1) as RequestId
        }
    }

    /// Removes and returns the request registered under `id`, freeing the slot for
    /// reuse. Returns `None` for an unknown or already-completed id.
    pub fn take(&mut self, id: RequestId) -> Option<IoRequestKind> {
        let slot = self.slots.get_mut(id as usize)?;
        let kind = slot.take()?;
        self.free.push(id);
        Some(kind)
    }

    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_take_round_trips_and_frees_slot() {
        let mut q = IoQueue::new();
        let id = q.insert(IoRequestKind::AppendLog { entries: Vec::new() });
        assert_eq!(q.len(), 1);
        let IoRequestKind::AppendLog { entries } = q.take(id).unwrap();
        assert!(entries.is_empty());
        assert!(q.is_empty());
        assert!(q.take(id).is_none());
    }

    #[test]
    fn freed_slots_are_reused_before_growing() {
        let mut q = IoQueue::new();
        let a = q.insert(IoRequestKind::AppendLog { entries: Vec::new() });
        let _b = q.insert(IoRequestKind::AppendLog { entries: Vec::new() });
        q.take(a).unwrap();
        let c = q.insert(IoRequestKind::AppendLog { entries: Vec::new() });
        assert_eq!(c, a);
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn table_only_grows_never_shrinks() {
        let mut q = IoQueue::new();
        let a = q.insert(IoRequestKind::AppendLog { entries: Vec::new() });
        let b = q.insert(IoRequestKind::AppendLog { entries: Vec::new() });
        q.take(a).unwrap();
        q.take(b).unwrap();
        assert!(q.is_empty());
        assert_eq!(q.slots.len(), 2);
    }
}
