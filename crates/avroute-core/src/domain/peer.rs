//! Identity of a core (one running instance of the control plane).

use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of a core on the network.
///
/// `address` is where the core receives protocol messages; `session` is
/// generated once per process start, so a restarted core is a new peer even
/// when it comes back on the same address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId {
    pub address: SocketAddr,
    pub session: Uuid,
}

impl PeerId {
    pub fn new(address: SocketAddr, session: Uuid) -> Self {
        Self { address, session }
    }

    /// Creates an identity with a fresh random session.
    pub fn with_new_session(address: SocketAddr) -> Self {
        Self::new(address, Uuid::new_v4())
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The first group of the session UUID is enough to tell restarts apart in logs.
        let session = self.session.to_string();
        let short = session.split('-').next().unwrap_or_default();
        write!(f, "{}/{}", self.address, short)
    }
}
