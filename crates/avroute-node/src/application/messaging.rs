//! Outbound side of the peer protocol as seen by the application layer.

use avroute_core::{CoreMessage, PeerId};

/// Queues a message for delivery to a peer core.
///
/// Implementations must not block: the protocol handler and the remote
/// switchers call this from inside engine callbacks.  Delivery is best
/// effort; a message to an unreachable peer is dropped by the transport.
#[cfg_attr(test, mockall::automock)]
pub trait MessageSender: Send + Sync {
    fn send(&self, peer: PeerId, message: CoreMessage);
}
