//! Cluster membership: the set of servers taking part in consensus.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::raft::types::ServerId;

/// A single member of the cluster. `address` is opaque to the core; it is interpreted
/// only by the I/O backend when dialing a peer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    pub id: ServerId,
    pub address: String,
    pub voting: bool,
}

/// The ordered set of servers in the cluster, as logged in a `CONFIGURATION` entry.
/// Must have unique ids and at least one voting member.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    pub servers: Vec<Server>,
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a server to the configuration. Fails if `id` is zero, already present, or
    /// `address` is empty.
    pub fn add(&mut self, id: ServerId, address: impl Into<String>, voting: bool) -> Result<()> {
        if id == 0 {
            return Err(Error::BadServerId);
        }
        let address = address.into();
        if address.is_empty() {
            return Err(Error::NoServerAddress);
        }
        if self.servers.iter().any(|s| s.id == id) {
            return Err(Error::DupServerId);
        }
        self.servers.push(Server { id, address, voting });
        Ok(())
    }

    /// Checks that the configuration is well-formed: non-empty, at least one voting
    /// server, unique non-zero ids, and non-empty addresses. This is the set of checks
    /// `bootstrap` runs before accepting a configuration wholesale (e.g. one just
    /// decoded off the wire), as opposed to the incremental checks in [`Self::add`].
    pub fn validate(&self) -> Result<()> {
        if self.servers.is_empty() {
            return Err(Error::EmptyConfiguration);
        }
        if !self.servers.iter().any(|s| s.voting) {
            return Err(Error::EmptyConfiguration);
        }
        for (i, server) in self.servers.iter().enumerate() {
            if server.id == 0 {
                return Err(Error::BadServerId);
            }
            if server.address.is_empty() {
                return Err(Error::NoServerAddress);
            }
            if self.servers[..i].iter().any(|s| s.id == server.id) {
                return Err(Error::DupServerId);
            }
        }
        Ok(())
    }

    pub fn get(&self, id: ServerId) -> Option<&Server> {
        self.servers.iter().find(|s| s.id == id)
    }

    /// All servers other than `id`.
    pub fn peers(&self, id: ServerId) -> impl Iterator<Item = &Server> {
        self.servers.iter().filter(move |s| s.id != id)
    }

    /// The voting members of the configuration, the set counted for elections and
    /// commitment.
    pub fn voters(&self) -> impl Iterator<Item = &Server> {
        self.servers.iter().filter(|s| s.voting)
    }

    pub fn voter_count(&self) -> usize {
        self.voters().count()
    }

    pub fn is_voter(&self, id: ServerId) -> bool {
        self.get(id).is_some_and(|s| s.voting)
    }
}
