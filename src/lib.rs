//! A single-node core of a replicated-consensus engine implementing Raft: leader
//! election, log replication, and membership as entries in the log.
//!
//! This crate is a pure state machine. It performs no I/O, spawns no threads, and
//! reads no clock -- every side effect is delegated to a [`raft::io::IoBackend`]
//! supplied by the embedder, and every time-dependent behavior is driven by the
//! embedder calling [`raft::Raft::tick`]. The embedder owns the event loop; this
//! crate owns the protocol.
//!
//! ```text
//!         ┌─────────────┐        intents (persist, append, send)
//! events ─┤ Raft engine ├───────────────────────────────────────▶ IoBackend
//!   (tick,└─────────────┘◀───────────────────────────────────────
//!    RPCs,                     handle_io / RPC replies
//!  submit)
//! ```
//!
//! See [`raft::Raft`] for the event entry points, [`raft::io::IoBackend`] for the
//! collaborator interface the embedder must implement, and [`error::Error`] for the
//! error taxonomy.

pub mod error;
pub mod raft;

pub use error::{Error, ErrorContext, Result};
pub use raft::config::{Configuration, Server};
pub use raft::io::{IoBackend, IoRequestKind, RequestId};
pub use raft::message::{AppendEntriesArgs, AppendEntriesResult, RequestVoteArgs, RequestVoteResult};
pub use raft::rand::{RandSource, StdRand};
pub use raft::types::{Index, ServerId, Term};
pub use raft::{Options, Raft, StateChange};
