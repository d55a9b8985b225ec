//! RPC argument/result payloads (the in-memory form; [`crate::raft::codec`] handles
//! their wire encoding).

use std::rc::Rc;

use crate::raft::entry::LogEntry;
use crate::raft::types::{Index, ServerId, Term};

/// Invoked by candidates to gather votes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestVoteArgs {
    pub term: Term,
    pub candidate_id: ServerId,
    pub last_log_index: Index,
    pub last_log_term: Term,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestVoteResult {
    pub term: Term,
    pub vote_granted: bool,
}

/// Invoked by the leader to replicate log entries, and as a heartbeat when `entries`
/// is empty.
#[derive(Clone)]
pub struct AppendEntriesArgs {
    pub term: Term,
    pub leader_id: ServerId,
    pub prev_log_index: Index,
    pub prev_log_term: Term,
    pub leader_commit: Index,
    pub entries: Vec<Rc<LogEntry>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppendEntriesResult {
    pub term: Term,
    pub success: bool,
    pub last_log_index: Index,
}
