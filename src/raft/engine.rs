//! C4: the protocol engine. Every event entry point here runs to completion without
//! suspension (SPEC_FULL §4.4/§5) and returns only after emitting whatever intents
//! the event calls for.

use log::warn;

use crate::error::{Error, Result};
use crate::raft::entry::{EntryType, Payload};
use crate::raft::io::{IoRequestKind, RequestId};
use crate::raft::message::{AppendEntriesArgs, AppendEntriesResult, RequestVoteArgs, RequestVoteResult};
use crate::raft::state::ServerState;
use crate::raft::types::{majority, Index, ServerId};
use crate::raft::Raft;

impl Raft {
    /// Advances the election/heartbeat timers by `delta_ms`. A leader whose heartbeat
    /// timer has elapsed rebroadcasts; a follower or candidate whose election timer
    /// has elapsed starts a new election.
    pub fn tick(&mut self, delta_ms: u64) -> Result<()> {
        self.ensure_running()?;
        match &self.state {
            ServerState::Leader { .. } => {
                self.heartbeat_elapsed += delta_ms;
                if self.heartbeat_elapsed >= self.options.heartbeat_timeout {
                    self.heartbeat_elapsed = 0;
                    self.broadcast_heartbeat();
                }
            }
            ServerState::Follower { .. } | ServerState::Candidate { .. } => {
                self.election_elapsed += delta_ms;
                if self.election_elapsed >= self.election_timeout_rand {
                    self.convert_to_candidate()?;
                    self.check_votes_for_majority()?;
                }
            }
        }
        Ok(())
    }

    /// Appends `buffers` as COMMAND entries at the current term and starts
    /// replicating them to every peer. Fails with `NotLeader`/`Busy` per SPEC_FULL
    /// §4.4.
    pub fn submit(&mut self, buffers: Vec<Vec<u8>>) -> Result<Index> {
        self.ensure_running()?;
        if !self.state.is_leader() {
            return Err(self.record_error(Error::NotLeader));
        }
        if self.pending_log_write.is_some() {
            return Err(self.record_error(Error::Busy));
        }
        if buffers.is_empty() {
            return Ok(self.log.last_index());
        }

        let term = self.current_term;
        let first_new_index = self.log.last_index() + 1;
        for buf in buffers {
            self.log.append(term, EntryType::Command, Payload::owned(buf));
        }

        let entries = self.log.acquire(first_new_index);
        let request_id = self.io_queue.insert(IoRequestKind::AppendLog { entries: entries.clone() });
        self.pending_log_write = Some(request_id);
        self.io.append_log(request_id, entries);

        let peers: Vec<ServerId> = self.configuration.peers(self.id).map(|s| s.id).collect();
        for peer in peers {
            self.replicate_to(peer);
        }
        Ok(self.log.last_index())
    }

    /// Replies to a `RequestVote` RPC. Grants the vote iff the caller's term is at
    /// least as current, we have not already voted for someone else this term, and
    /// the candidate's log is at least as up-to-date as ours.
    pub fn handle_request_vote(&mut self, from: ServerId, args: RequestVoteArgs) -> Result<()> {
        self.ensure_running()?;
        if self.configuration.get(from).is_none() {
            warn!("server {} rejecting RequestVote from unknown server {from}", self.id);
            self.io.send_request_vote_result(from, RequestVoteResult { term: self.current_term, vote_granted: false });
            return Ok(());
        }
        if args.term < self.current_term {
            self.io.send_request_vote_result(from, RequestVoteResult { term: self.current_term, vote_granted: false });
            return Ok(());
        }
        if args.term > self.current_term {
            self.convert_to_follower(args.term, None)?;
        }

        let candidate_up_to_date = (args.last_log_term, args.last_log_index)
            >= (self.log.last_term(), self.log.last_index());
        let can_vote = self.voted_for.is_none() || self.voted_for == Some(args.candidate_id);
        let grant = can_vote && candidate_up_to_date;

        if grant {
            self.io.persist_term_and_vote(self.current_term, Some(args.candidate_id))?;
            self.voted_for = Some(args.candidate_id);
            self.election_elapsed = 0;
        }
        self.io.send_request_vote_result(from, RequestVoteResult { term: self.current_term, vote_granted: grant });
        Ok(())
    }

    /// Records a `RequestVote` reply, stepping down if it reveals a newer term and
    /// becoming leader once a majority of the voting set has granted.
    pub fn handle_request_vote_response(&mut self, from: ServerId, res: RequestVoteResult) -> Result<()> {
        self.ensure_running()?;
        if res.term > self.current_term {
            return self.convert_to_follower(res.term, None);
        }
        if res.term != self.current_term {
            return Ok(());
        }
        match &mut self.state {
            ServerState::Candidate { votes } => {
                votes.insert(from, res.vote_granted);
            }
            _ => return Ok(()),
        }
        self.check_votes_for_majority()
    }

    /// Replies to an `AppendEntries` RPC: rejects stale terms, otherwise steps down
    /// to follower of the caller's term, checks log consistency at `prev_log_index`,
    /// and on success truncates/appends as needed before advancing `commit_index`.
    pub fn handle_append_entries(&mut self, from: ServerId, mut args: AppendEntriesArgs) -> Result<()> {
        self.ensure_running()?;
        if self.configuration.get(from).is_none() {
            warn!("server {} rejecting AppendEntries from unknown server {from}", self.id);
            self.io.send_append_entries_result(
                from,
                AppendEntriesResult { term: self.current_term, success: false, last_log_index: self.log.last_index() },
            );
            return Ok(());
        }
        if args.term < self.current_term {
            self.io.send_append_entries_result(
                from,
                AppendEntriesResult { term: self.current_term, success: false, last_log_index: self.log.last_index() },
            );
            return Ok(());
        }
        self.convert_to_follower(args.term, Some(from))?;

        let consistent = args.prev_log_index <= self.log.last_index()
            && (args.prev_log_index == 0 || self.log.term_of(args.prev_log_index) == args.prev_log_term);
        if !consistent {
            self.io.send_append_entries_result(
                from,
                AppendEntriesResult { term: self.current_term, success: false, last_log_index: self.log.last_index() },
            );
            return Ok(());
        }

        let mut index = args.prev_log_index + 1;
        let mut to_append = Vec::new();
        for entry in args.entries.drain(..) {
            let existing_term = self.log.term_of(index);
            if existing_term == 0 {
                to_append.push(entry);
            } else if existing_term != entry.term {
                self.log.truncate(index)?;
                self.io.truncate_log(index)?;
                to_append.push(entry);
            }
            // else: an identical entry is already present; skip it.
            index += 1;
        }

        if !to_append.is_empty() {
            for entry in &to_append {
                if entry.entry_type == EntryType::Configuration && !self.warned_post_bootstrap_configuration {
                    warn!(
                        "server {} ignoring runtime CONFIGURATION entry; only the bootstrap configuration is applied",
                        self.id
                    );
                    self.warned_post_bootstrap_configuration = true;
                }
            }
            let first_new_index = self.log.last_index() + 1;
            for entry in to_append {
                self.log.append_entry(entry);
            }
            if self.pending_log_write.is_some() {
                // The scheduling model (SPEC_FULL §5) assumes this never happens; surface
                // it as a recorded (non-fatal) error rather than silently overwriting the
                // outstanding request.
                self.record_error(Error::IoBusy);
            } else {
                let entries = self.log.acquire(first_new_index);
                let request_id = self.io_queue.insert(IoRequestKind::AppendLog { entries: entries.clone() });
                self.pending_log_write = Some(request_id);
                self.io.append_log(request_id, entries);
            }
        }

        if args.leader_commit > self.commit_index {
            self.commit_index = args.leader_commit.min(self.log.last_index());
        }

        self.io.send_append_entries_result(
            from,
            AppendEntriesResult { term: self.current_term, success: true, last_log_index: self.log.last_index() },
        );
        Ok(())
    }

    /// Records an `AppendEntries` reply: on success, advances `match_index`/
    /// `next_index` and re-evaluates `commit_index`; on rejection, backs off
    /// `next_index` and retries immediately.
    pub fn handle_append_entries_response(&mut self, from: ServerId, res: AppendEntriesResult) -> Result<()> {
        self.ensure_running()?;
        if res.term > self.current_term {
            return self.convert_to_follower(res.term, None);
        }
        if !self.state.is_leader() || res.term != self.current_term {
            return Ok(());
        }

        if res.success {
            if let ServerState::Leader { next_index, match_index } = &mut self.state {
                let entry = match_index.entry(from).or_insert(0);
                *entry = (*entry).max(res.last_log_index);
                next_index.insert(from, res.last_log_index + 1);
            }
            self.advance_commit_index();
        } else {
            if let ServerState::Leader { next_index, .. } = &mut self.state {
                let entry = next_index.entry(from).or_insert(1);
                *entry = (*entry).saturating_sub(1).max(1);
            }
            self.replicate_to(from);
        }
        Ok(())
    }

    /// Releases the entries (or absence thereof) pinned by a completed I/O request.
    /// An unknown/duplicate `request_id` indicates a backend bug and is fatal; a
    /// failed log write is fatal (undefined durability state, SPEC_FULL §4.4/§7).
    pub fn handle_io(&mut self, request_id: RequestId, outcome: Result<()>) -> Result<()> {
        self.ensure_running()?;
        if self.pending_log_write == Some(request_id) {
            self.pending_log_write = None;
        }
        let Some(kind) = self.io_queue.take(request_id) else {
            let err = Error::Internal(format!("unknown or duplicate I/O request id {request_id}"));
            self.fatal_io_error(err.clone());
            return Err(err);
        };
        let IoRequestKind::AppendLog { entries } = kind;
        drop(entries); // releases one ref per entry (SPEC_FULL §4.1's "release")
        if let Err(e) = outcome {
            self.fatal_io_error(e.clone());
            return Err(e);
        }
        Ok(())
    }

    /// Leader-only: sends `AppendEntries` to `peer` carrying everything from its
    /// `next_index` onward (empty when the peer is fully caught up, which is exactly
    /// a heartbeat).
    pub(crate) fn replicate_to(&mut self, peer: ServerId) {
        let next_index = match &self.state {
            ServerState::Leader { next_index, .. } => next_index.get(&peer).copied().unwrap_or(1),
            _ => return,
        };
        let prev_log_index = next_index.saturating_sub(1);
        let prev_log_term = self.log.term_of(prev_log_index);
        let entries = self.log.acquire(next_index);
        let args = AppendEntriesArgs {
            term: self.current_term,
            leader_id: self.id,
            prev_log_index,
            prev_log_term,
            leader_commit: self.commit_index,
            entries,
        };
        self.io.send_append_entries(peer, args);
    }

    /// Leader-only: sends an `AppendEntries` to every peer (a heartbeat if the peer is
    /// fully caught up, a replication attempt otherwise).
    pub(crate) fn broadcast_heartbeat(&mut self) {
        let peers: Vec<ServerId> = match &self.state {
            ServerState::Leader { next_index, .. } => next_index.keys().copied().collect(),
            _ => return,
        };
        for peer in peers {
            self.replicate_to(peer);
        }
    }

    /// Recomputes `commit_index` as the highest index a majority of the voting set
    /// (counting the leader itself) has matched, subject to Raft's commitment
    /// restriction that the entry's term equals the current term.
    pub(crate) fn advance_commit_index(&mut self) {
        let Some(mut match_values) = (match &self.state {
            ServerState::Leader { match_index, .. } => Some(
                self.configuration
                    .voters()
                    .filter(|s| s.id != self.id)
                    .map(|s| *match_index.get(&s.id).unwrap_or(&0))
                    .collect::<Vec<Index>>(),
            ),
            _ => None,
        }) else {
            return;
        };
        match_values.push(self.log.last_index());
        match_values.sort_unstable_by(|a, b| b.cmp(a));

        let need = majority(self.configuration.voter_count());
        if need == 0 || need > match_values.len() {
            return;
        }
        let candidate = match_values[need - 1];
        if candidate > self.commit_index && self.log.term_of(candidate) == self.current_term {
            self.commit_index = candidate;
        }
    }

    pub(crate) fn check_votes_for_majority(&mut self) -> Result<()> {
        let become_leader = match &self.state {
            ServerState::Candidate { votes } => {
                let granted = votes.values().filter(|v| **v).count();
                granted >= majority(self.configuration.voter_count())
            }
            _ => false,
        };
        if become_leader {
            self.convert_to_leader()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raft::config::Configuration;
    use crate::raft::entry::LogEntry;
    use crate::raft::io::IoBackend;
    use crate::raft::rand::FixedRand;
    use crate::raft::types::Term;
    use crate::raft::Options;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Recorder {
        votes_sent: RefCell<Vec<(ServerId, RequestVoteArgs)>>,
        appends_sent: RefCell<Vec<(ServerId, AppendEntriesArgs)>>,
        append_log_calls: RefCell<Vec<RequestId>>,
        vote_results_sent: RefCell<Vec<(ServerId, RequestVoteResult)>>,
        append_results_sent: RefCell<Vec<(ServerId, AppendEntriesResult)>>,
    }

    struct TestIo(Rc<Recorder>);

    impl IoBackend for TestIo {
        fn persist_term_and_vote(&mut self, _term: Term, _voted_for: Option<ServerId>) -> Result<()> {
            Ok(())
        }
        fn append_log(&mut self, request_id: RequestId, _entries: Vec<Rc<LogEntry>>) {
            self.0.append_log_calls.borrow_mut().push(request_id);
        }
        fn truncate_log(&mut self, _index: u64) -> Result<()> {
            Ok(())
        }
        fn send_request_vote(&mut self, target: ServerId, args: RequestVoteArgs) {
            self.0.votes_sent.borrow_mut().push((target, args));
        }
        fn send_append_entries(&mut self, target: ServerId, args: AppendEntriesArgs) {
            self.0.appends_sent.borrow_mut().push((target, args));
        }
        fn send_request_vote_result(&mut self, target: ServerId, result: RequestVoteResult) {
            self.0.vote_results_sent.borrow_mut().push((target, result));
        }
        fn send_append_entries_result(&mut self, target: ServerId, result: AppendEntriesResult) {
            self.0.append_results_sent.borrow_mut().push((target, result));
        }
    }

    fn three_server_config() -> Configuration {
        let mut c = Configuration::new();
        c.add(1, "a", true).unwrap();
        c.add(2, "b", true).unwrap();
        c.add(3, "c", true).unwrap();
        c
    }

    fn leader(recorder: &Rc<Recorder>) -> Raft {
        let mut raft = Raft::init(1, Options::default(), Box::new(TestIo(recorder.clone())), Box::new(FixedRand)).unwrap();
        raft.bootstrap(three_server_config()).unwrap();
        raft.convert_to_candidate().unwrap();
        raft.handle_request_vote_response(2, RequestVoteResult { term: 1, vote_granted: true }).unwrap();
        assert!(raft.state.is_leader());
        raft
    }

    #[test]
    fn tick_past_election_timeout_starts_election() {
        let recorder = Rc::new(Recorder::default());
        let mut raft = Raft::init(1, Options::default(), Box::new(TestIo(recorder.clone())), Box::new(FixedRand)).unwrap();
        raft.bootstrap(three_server_config()).unwrap();
        raft.tick(1000).unwrap();
        assert!(raft.state.is_candidate());
        assert_eq!(recorder.votes_sent.borrow().len(), 2);
    }

    #[test]
    fn majority_votes_elect_leader() {
        let recorder = Rc::new(Recorder::default());
        let raft = leader(&recorder);
        assert_eq!(raft.current_term(), 1);
    }

    #[test]
    fn submit_replicates_to_every_peer() {
        let recorder = Rc::new(Recorder::default());
        let mut raft = leader(&recorder);
        recorder.appends_sent.borrow_mut().clear();
        let index = raft.submit(vec![vec![1, 2, 3]]).unwrap();
        assert_eq!(index, raft.log.last_index());
        assert_eq!(recorder.appends_sent.borrow().len(), 2);
        assert_eq!(raft.pending_log_write, Some(*recorder.append_log_calls.borrow().last().unwrap()));
    }

    #[test]
    fn submit_rejects_when_not_leader() {
        let recorder = Rc::new(Recorder::default());
        let mut raft = Raft::init(2, Options::default(), Box::new(TestIo(recorder.clone())), Box::new(FixedRand)).unwrap();
        raft.bootstrap(three_server_config()).unwrap();
        assert_eq!(raft.submit(vec![vec![1]]), Err(Error::NotLeader));
    }

    #[test]
    fn submit_rejects_second_call_while_write_pending() {
        let recorder = Rc::new(Recorder::default());
        let mut raft = leader(&recorder);
        raft.submit(vec![vec![1]]).unwrap();
        assert_eq!(raft.submit(vec![vec![2]]), Err(Error::Busy));
    }

    #[test]
    fn stale_term_request_vote_is_rejected_without_state_change() {
        let recorder = Rc::new(Recorder::default());
        let mut raft = leader(&recorder);
        let term_before = raft.current_term();
        raft.handle_request_vote(2, RequestVoteArgs { term: term_before - 1, candidate_id: 2, last_log_index: 0, last_log_term: 0 })
            .unwrap();
        let (target, res) = recorder.vote_results_sent.borrow().last().cloned().unwrap();
        assert_eq!(target, 2);
        assert!(!res.vote_granted);
        assert_eq!(res.term, term_before);
        assert!(raft.state.is_leader());
    }

    #[test]
    fn append_entries_beyond_last_index_is_rejected_and_does_not_mutate_log() {
        let recorder = Rc::new(Recorder::default());
        let mut raft = Raft::init(2, Options::default(), Box::new(TestIo(recorder.clone())), Box::new(FixedRand)).unwrap();
        raft.bootstrap(three_server_config()).unwrap();
        let last = raft.log.last_index();
        raft.handle_append_entries(
            1,
            AppendEntriesArgs { term: 1, leader_id: 1, prev_log_index: last + 10, prev_log_term: 1, leader_commit: 0, entries: vec![] },
        )
        .unwrap();
        let (_, res) = recorder.append_results_sent.borrow().last().cloned().unwrap();
        assert!(!res.success);
        assert_eq!(res.last_log_index, last);
        assert_eq!(raft.log.last_index(), last);
    }

    #[test]
    fn handle_append_entries_advances_commit_index_without_decreasing() {
        let recorder = Rc::new(Recorder::default());
        let mut raft = Raft::init(2, Options::default(), Box::new(TestIo(recorder.clone())), Box::new(FixedRand)).unwrap();
        raft.bootstrap(three_server_config()).unwrap();
        let prev_index = raft.log.last_index();
        let prev_term = raft.log.last_term();
        let entry = LogEntry::new(1, EntryType::Command, Payload::owned(vec![9]));
        raft.handle_append_entries(
            1,
            AppendEntriesArgs {
                term: 1,
                leader_id: 1,
                prev_log_index: prev_index,
                prev_log_term: prev_term,
                leader_commit: prev_index + 1,
                entries: vec![entry],
            },
        )
        .unwrap();
        let (_, res) = recorder.append_results_sent.borrow().last().cloned().unwrap();
        assert!(res.success);
        assert_eq!(raft.commit_index(), prev_index + 1);
    }

    #[test]
    fn failed_append_log_completion_is_fatal() {
        let recorder = Rc::new(Recorder::default());
        let mut raft = leader(&recorder);
        raft.submit(vec![vec![1]]).unwrap();
        let request_id = raft.pending_log_write.unwrap();
        let result = raft.handle_io(request_id, Err(Error::NoSpace));
        assert!(result.is_err());
        assert!(raft.is_shutdown());
    }
}
