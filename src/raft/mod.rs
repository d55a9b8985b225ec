//! The replicated-consensus engine: a pure state machine driven entirely by the event
//! entry points on [`Raft`]. See the crate root docs for the overall architecture.

pub mod codec;
pub mod config;
pub mod engine;
pub mod entry;
pub mod io;
pub mod log;
pub mod message;
pub mod rand;
pub mod state;
pub mod types;

use ::log::{error, info, warn}; // the `log` crate, disambiguated from our own `log` module below

use crate::error::{Error, ErrorContext, Result};
use crate::raft::config::Configuration;
use crate::raft::entry::EntryType;
use crate::raft::io::{IoBackend, IoQueue, RequestId};
use crate::raft::log::Log;
use crate::raft::rand::RandSource;
use crate::raft::state::ServerState;
use crate::raft::types::{Index, ServerId, Term};

/// Tunable parameters, grouped and validated up front rather than set piecemeal after
/// construction (SPEC_FULL §1.1/§6).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Options {
    /// Base election timeout, in milliseconds. The server randomizes its actual
    /// timeout to `[election_timeout, 2 * election_timeout)` on every reset.
    pub election_timeout: u64,
    /// Leader heartbeat interval, in milliseconds. Must be less than
    /// `election_timeout`.
    pub heartbeat_timeout: u64,
}

impl Options {
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_timeout >= self.election_timeout {
            return Err(Error::Internal(format!(
                "heartbeat_timeout ({}) must be less than election_timeout ({})",
                self.heartbeat_timeout, self.election_timeout
            )));
        }
        Ok(())
    }
}

impl Default for Options {
    fn default() -> Self {
        Self { election_timeout: 1000, heartbeat_timeout: 500 }
    }
}

/// Emitted to the registered watcher on every state transition (SPEC_FULL §4.3/§9).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateChange {
    pub before: &'static str,
    pub after: &'static str,
    pub term: Term,
}

/// The aggregate root: one server's view of the cluster.
pub struct Raft {
    pub(crate) id: ServerId,
    pub(crate) options: Options,

    pub(crate) current_term: Term,
    pub(crate) voted_for: Option<ServerId>,
    pub(crate) log: Log,
    pub(crate) configuration: Configuration,
    pub(crate) commit_index: Index,
    pub(crate) last_applied: Index,

    pub(crate) state: ServerState,
    pub(crate) election_elapsed: u64,
    pub(crate) election_timeout_rand: u64,
    pub(crate) heartbeat_elapsed: u64,

    pub(crate) io: Box<dyn IoBackend>,
    pub(crate) rand: Box<dyn RandSource>,
    pub(crate) io_queue: IoQueue,
    /// The single in-flight log-write slot, if any (SPEC_FULL §5's "at most one
    /// `write_log` in flight" ordering contract covers both `submit` and a follower's
    /// own appends).
    pub(crate) pending_log_write: Option<RequestId>,
    /// Set once, the first time a post-bootstrap `CONFIGURATION` entry is appended
    /// (SPEC_FULL §9's "configuration changes" resolution).
    pub(crate) warned_post_bootstrap_configuration: bool,

    pub(crate) watcher: Option<Box<dyn FnMut(StateChange)>>,
    pub(crate) last_error: Option<ErrorContext>,
    pub(crate) shutdown: bool,
}

impl Raft {
    /// Constructs a server in `Follower` at term 0 with an empty log and no
    /// configuration. Performs no I/O; the only way this can fail is `options` being
    /// invalid (SPEC_FULL §4.5).
    pub fn init(
        id: ServerId,
        options: Options,
        io: Box<dyn IoBackend>,
        rand: Box<dyn RandSource>,
    ) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            id,
            options,
            current_term: 0,
            voted_for: None,
            log: Log::new(),
            configuration: Configuration::new(),
            commit_index: 0,
            last_applied: 0,
            state: ServerState::Follower { leader_id: None },
            election_elapsed: 0,
            election_timeout_rand: options.election_timeout,
            heartbeat_elapsed: 0,
            io,
            rand,
            io_queue: IoQueue::new(),
            pending_log_write: None,
            warned_post_bootstrap_configuration: false,
            watcher: None,
            last_error: None,
            shutdown: false,
        })
    }

    /// Validates `configuration`, appends it as the index-1 `CONFIGURATION` entry at
    /// term 1, and marks it committed (SPEC_FULL §4.5). Must be called exactly once,
    /// before any other event entry point, on a server whose log is still empty.
    pub fn bootstrap(&mut self, configuration: Configuration) -> Result<()> {
        self.ensure_running()?;
        if !self.log.is_empty() {
            return Err(Error::ConfigurationNotEmpty);
        }
        configuration.validate()?;
        let index = self.log.append(1, EntryType::Configuration, crate::raft::entry::Payload::owned(
            crate::raft::codec::encode_configuration(&configuration),
        ));
        debug_assert_eq!(index, 1);
        self.configuration = configuration;
        self.commit_index = 1;
        let entries = self.log.acquire(1);
        let request_id = self.io_queue.insert(crate::raft::io::IoRequestKind::AppendLog { entries: entries.clone() });
        // Unlike `submit`'s writes, bootstrap's own write is not tracked in
        // `pending_log_write`: it happens before the server takes part in the
        // protocol at all, so nothing could race it, and gating the first real
        // `submit` on its completion would serve no purpose.
        self.io.append_log(request_id, entries);
        info!("server {} bootstrapped with {} servers", self.id, self.configuration.servers.len());
        Ok(())
    }

    /// Stops the server from processing further events; idempotent. Every call to a
    /// C4 entry point after this returns [`Error::Shutdown`].
    pub fn close(&mut self) {
        if self.shutdown {
            return;
        }
        self.shutdown = true;
        self.io_queue = IoQueue::new();
        self.pending_log_write = None;
        info!("server {} closed", self.id);
    }

    /// Registers the single subscriber for `StateChange` events, replacing any
    /// previous subscriber (SPEC_FULL §6's single-callback-per-event `watch`).
    pub fn watch(&mut self, callback: impl FnMut(StateChange) + 'static) {
        self.watcher = Some(Box::new(callback));
    }

    pub fn id(&self) -> ServerId {
        self.id
    }

    pub fn current_term(&self) -> Term {
        self.current_term
    }

    pub fn commit_index(&self) -> Index {
        self.commit_index
    }

    pub fn last_error(&self) -> Option<&ErrorContext> {
        self.last_error.as_ref()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown
    }

    pub fn state_name(&self) -> &'static str {
        self.state.name()
    }

    pub(crate) fn ensure_running(&self) -> Result<()> {
        if self.shutdown {
            return Err(Error::Shutdown);
        }
        Ok(())
    }

    pub(crate) fn record_error(&mut self, err: Error) -> Error {
        let ctx = ErrorContext::new(self.state.name(), self.current_term, err.to_string());
        warn!("{ctx}");
        self.last_error = Some(ctx);
        err
    }

    pub(crate) fn fatal_io_error(&mut self, err: Error) {
        let ctx = ErrorContext::new(self.state.name(), self.current_term, format!("fatal: {err}"));
        error!("{ctx}");
        self.last_error = Some(ctx);
        self.close();
    }

    pub(crate) fn notify(&mut self, before: &'static str, after: &'static str) {
        let change = StateChange { before, after, term: self.current_term };
        info!("server {} transition {} -> {} at term {}", self.id, before, after, self.current_term);
        if let Some(watcher) = self.watcher.as_mut() {
            watcher(change);
        }
    }
}
