//! C3: the per-server state variant and the four transitions that are the only code
//! allowed to mutate `state`, `current_term`, `voted_for`, or the election/heartbeat
//! timers (SPEC_FULL §4.3).

use std::collections::HashMap;

use crate::error::Result;
use crate::raft::message::RequestVoteArgs;
use crate::raft::types::{Index, ServerId, Term};
use crate::raft::Raft;

/// The per-state data, as a tagged variant rather than the C original's union of
/// `follower_state`/`candidate_state`/`leader_state` structs (SPEC_FULL §3.1/§9):
/// a sum type makes it impossible to read `next_index` while in `Follower`, a bug
/// class the tagged-union original could only catch by convention.
pub enum ServerState {
    Follower { leader_id: Option<ServerId> },
    Candidate { votes: HashMap<ServerId, bool> },
    Leader { next_index: HashMap<ServerId, Index>, match_index: HashMap<ServerId, Index> },
}

impl ServerState {
    pub fn name(&self) -> &'static str {
        match self {
            ServerState::Follower { .. } => "follower",
            ServerState::Candidate { .. } => "candidate",
            ServerState::Leader { .. } => "leader",
        }
    }

    pub fn is_leader(&self) -> bool {
        matches!(self, ServerState::Leader { .. })
    }

    pub fn is_candidate(&self) -> bool {
        matches!(self, ServerState::Candidate { .. })
    }

    pub fn leader_id(&self) -> Option<ServerId> {
        match self {
            ServerState::Follower { leader_id } => *leader_id,
            _ => None,
        }
    }
}

impl Raft {
    /// Persists `(term, voted_for = None)` and updates in-memory fields. Does not
    /// touch `state`; callers that need a role change call one of the `convert_to_*`
    /// methods, which call this first when needed.
    pub(crate) fn update_current_term(&mut self, term: Term) -> Result<()> {
        debug_assert!(term > self.current_term);
        self.io.persist_term_and_vote(term, None)?;
        self.current_term = term;
        self.voted_for = None;
        Ok(())
    }

    /// Steps down to `Follower` of `term` (or the current term, if not stepping up).
    /// Clears any leader/candidate-specific bookkeeping and resets the election timer
    /// with a freshly randomized timeout.
    pub(crate) fn convert_to_follower(&mut self, term: Term, leader_id: Option<ServerId>) -> Result<()> {
        if term > self.current_term {
            self.update_current_term(term)?;
        }
        let before = self.state.name();
        self.state = ServerState::Follower { leader_id };
        self.election_elapsed = 0;
        self.resample_election_timeout();
        self.notify(before, self.state.name());
        Ok(())
    }

    /// Becomes a candidate for `current_term + 1`: persists the new term and a vote
    /// for self, resets the election timer, and solicits votes from every voting
    /// peer.
    pub(crate) fn convert_to_candidate(&mut self) -> Result<()> {
        let term = self.current_term + 1;
        self.io.persist_term_and_vote(term, Some(self.id))?;
        self.current_term = term;
        self.voted_for = Some(self.id);

        let mut votes = HashMap::new();
        votes.insert(self.id, true);
        let before = self.state.name();
        self.state = ServerState::Candidate { votes };
        self.election_elapsed = 0;
        self.resample_election_timeout();
        self.notify(before, self.state.name());

        let args = RequestVoteArgs {
            term: self.current_term,
            candidate_id: self.id,
            last_log_index: self.log.last_index(),
            last_log_term: self.log.last_term(),
        };
        let peers: Vec<ServerId> = self.configuration.voters().map(|s| s.id).filter(|id| *id != self.id).collect();
        for peer in peers {
            self.io.send_request_vote(peer, args.clone());
        }
        Ok(())
    }

    /// Becomes leader: the caller must already have confirmed a majority of votes.
    /// Initializes `next_index`/`match_index` and immediately broadcasts an empty
    /// heartbeat so followers learn of the new leader without waiting a full
    /// `heartbeat_timeout`.
    pub(crate) fn convert_to_leader(&mut self) -> Result<()> {
        debug_assert!(self.state.is_candidate());
        let last_index = self.log.last_index();
        let mut next_index = HashMap::new();
        let mut match_index = HashMap::new();
        for peer in self.configuration.peers(self.id) {
            next_index.insert(peer.id, last_index + 1);
            match_index.insert(peer.id, 0);
        }
        let before = self.state.name();
        self.state = ServerState::Leader { next_index, match_index };
        self.heartbeat_elapsed = 0;
        self.notify(before, self.state.name());
        self.broadcast_heartbeat();
        Ok(())
    }

    /// Resamples the randomized election timeout to `[election_timeout,
    /// 2*election_timeout)`.
    pub(crate) fn resample_election_timeout(&mut self) {
        let low = self.options.election_timeout;
        self.election_timeout_rand = self.rand.gen_range(low, 2 * low);
    }
}

#[cfg(test)]
mod tests {
    use crate::raft::config::Configuration;
    use crate::raft::io::IoBackend;
    use crate::raft::message::{
        AppendEntriesArgs, AppendEntriesResult, RequestVoteArgs, RequestVoteResult,
    };
    use crate::raft::rand::FixedRand;
    use crate::raft::types::{ServerId, Term};
    use crate::raft::{Options, Raft};
    use std::rc::Rc;

    #[derive(Default)]
    struct RecordingIo {
        sent_votes: Vec<(ServerId, RequestVoteArgs)>,
        persisted: Vec<(Term, Option<ServerId>)>,
    }

    impl IoBackend for RecordingIo {
        fn persist_term_and_vote(&mut self, term: Term, voted_for: Option<ServerId>) -> crate::error::Result<()> {
            self.persisted.push((term, voted_for));
            Ok(())
        }
        fn append_log(&mut self, _request_id: u64, _entries: Vec<Rc<crate::raft::entry::LogEntry>>) {}
        fn truncate_log(&mut self, _index: u64) -> crate::error::Result<()> {
            Ok(())
        }
        fn send_request_vote(&mut self, target: ServerId, args: RequestVoteArgs) {
            self.sent_votes.push((target, args));
        }
        fn send_append_entries(&mut self, _target: ServerId, _args: AppendEntriesArgs) {}
        fn send_request_vote_result(&mut self, _target: ServerId, _result: RequestVoteResult) {}
        fn send_append_entries_result(&mut self, _target: ServerId, _result: AppendEntriesResult) {}
    }

    fn three_server_config() -> Configuration {
        let mut c = Configuration::new();
        c.add(1, "a", true).unwrap();
        c.add(2, "b", true).unwrap();
        c.add(3, "c", true).unwrap();
        c
    }

    #[test]
    fn convert_to_candidate_votes_for_self_and_solicits_peers() {
        let io: Box<dyn IoBackend> = Box::new(RecordingIo::default());
        let mut raft = Raft::init(1, Options::default(), io, Box::new(FixedRand)).unwrap();
        raft.bootstrap(three_server_config()).unwrap();

        raft.convert_to_candidate().unwrap();
        assert_eq!(raft.current_term(), 1);
        assert!(raft.state.is_candidate());
        assert_eq!(raft.voted_for, Some(1));
    }

    #[test]
    fn convert_to_leader_initializes_next_index_past_log_end() {
        let io: Box<dyn IoBackend> = Box::new(RecordingIo::default());
        let mut raft = Raft::init(1, Options::default(), io, Box::new(FixedRand)).unwrap();
        raft.bootstrap(three_server_config()).unwrap();
        raft.convert_to_candidate().unwrap();
        raft.convert_to_leader().unwrap();
        assert!(raft.state.is_leader());
        if let super::ServerState::Leader { next_index, match_index } = &raft.state {
            assert_eq!(next_index[&2], raft.log.last_index() + 1);
            assert_eq!(match_index[&2], 0);
        } else {
            panic!("expected leader state");
        }
    }

    #[test]
    fn convert_to_follower_resets_election_timer_and_clears_leader_state() {
        let io: Box<dyn IoBackend> = Box::new(RecordingIo::default());
        let mut raft = Raft::init(1, Options::default(), io, Box::new(FixedRand)).unwrap();
        raft.bootstrap(three_server_config()).unwrap();
        raft.convert_to_candidate().unwrap();
        raft.convert_to_leader().unwrap();
        raft.convert_to_follower(5, Some(2)).unwrap();
        assert!(!raft.state.is_leader());
        assert_eq!(raft.state.leader_id(), Some(2));
        assert_eq!(raft.current_term(), 5);
    }
}
