use std::fmt;

/// Every error condition the core can surface, matching the error taxonomy of the
/// canonical C raft library this crate's protocol is distilled from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// Allocation failed. Kept for API parity with the C original; ordinary Rust
    /// allocation failure aborts the process rather than raising this, since stable
    /// Rust has no fallible global allocator hook to thread through (see SPEC_FULL §9).
    Nomem,
    /// An internal invariant was violated, e.g. a duplicate I/O-request id was handed
    /// back to `handle_io`, or a caller tried to truncate below the log's first index.
    Internal(String),
    /// A server id of zero was used.
    BadServerId,
    /// A configuration already contains a server with this id.
    DupServerId,
    /// A server was added with an empty address.
    NoServerAddress,
    /// A configuration has no servers at all.
    EmptyConfiguration,
    /// `bootstrap` was called on a server whose log already has entries.
    ConfigurationNotEmpty,
    /// A wire payload failed to decode: bad version, truncated buffer, missing
    /// terminator, or duplicate/zero server id.
    Malformed,
    /// The backend reported it has no space left to persist something.
    NoSpace,
    /// A second `submit` was attempted while a previous one's log write is still
    /// in flight.
    Busy,
    /// The backend reported a second log write was attempted while one was already
    /// in flight; indicates a backend (or internal bookkeeping) bug.
    IoBusy,
    /// `submit` was called on a server that is not currently the leader.
    NotLeader,
    /// The server has been closed, or suffered a fatal error, and no longer accepts
    /// events.
    Shutdown,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Nomem => write!(f, "out of memory"),
            Error::Internal(msg) => write!(f, "internal error: {msg}"),
            Error::BadServerId => write!(f, "server ID is not valid"),
            Error::DupServerId => write!(f, "a server with the same ID already exists"),
            Error::NoServerAddress => write!(f, "server has no address"),
            Error::EmptyConfiguration => write!(f, "configuration has no servers"),
            Error::ConfigurationNotEmpty => write!(f, "configuration has servers"),
            Error::Malformed => write!(f, "encoded data is malformed"),
            Error::NoSpace => write!(f, "no space left on device"),
            Error::Busy => write!(f, "a client submit is already in progress"),
            Error::IoBusy => write!(f, "a log write request is already in progress"),
            Error::NotLeader => write!(f, "server is not the leader"),
            Error::Shutdown => write!(f, "server is shut down"),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Maximum length, in bytes, retained in an [`ErrorContext`]'s message. Keeps the
/// context bounded the way the C library's fixed `char[1024]` buffer was, without
/// literally reproducing a fixed-size byte array in a language with growable strings.
pub const ERROR_CONTEXT_MESSAGE_CAP: usize = 1024;

/// A human-readable snapshot of the server's state at the moment a caller-visible
/// error occurred, kept around for log correlation (SPEC_FULL §7).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorContext {
    pub state: &'static str,
    pub term: u64,
    pub message: String,
}

impl ErrorContext {
    pub fn new(state: &'static str, term: u64, message: impl Into<String>) -> Self {
        let mut message = message.into();
        if message.len() > ERROR_CONTEXT_MESSAGE_CAP {
            let mut cap = ERROR_CONTEXT_MESSAGE_CAP;
            while !message.is_char_boundary(cap) {
                cap -= 1;
            }
            message.truncate(cap);
        }
        Self { state, term, message }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(state={} term={}): {}", self.state, self.term, self.message)
    }
}
