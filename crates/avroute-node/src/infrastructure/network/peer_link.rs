//! Point-to-point UDP messaging between cores.
//!
//! Each core owns one UDP socket (the *message port*).  Every protocol
//! message after discovery travels as one datagram: the 32-byte frame header
//! (which carries the sender's session) followed by the bincode payload.
//!
//! The application layer never awaits a send.  [`OutboundQueue`] implements
//! [`MessageSender`] by pushing onto an unbounded channel; [`run_outbound`]
//! drains that channel onto a [`PeerTransport`].

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use avroute_core::protocol::SequenceCounter;
use avroute_core::{decode_message, encode_message, CoreMessage, PeerId, ProtocolError};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::messaging::MessageSender;

/// Largest datagram the link reads.
const MAX_DATAGRAM: usize = 65_507;

/// Error type for the peer link.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("bind failed on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("send to {peer} failed: {source}")]
    Send {
        peer: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("receive failed: {0}")]
    Recv(#[source] std::io::Error),
    #[error("malformed datagram from {from}: {source}")]
    Decode {
        from: SocketAddr,
        #[source]
        source: ProtocolError,
    },
    #[error("failed to encode message: {0}")]
    Encode(#[from] ProtocolError),
}

/// Sends and receives whole protocol messages.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn send(&self, peer: PeerId, message: &CoreMessage) -> Result<(), TransportError>;

    /// Waits for the next message, returning the sender's identity.
    async fn recv(&self) -> Result<(PeerId, CoreMessage), TransportError>;
}

/// [`PeerTransport`] over one tokio UDP socket.
pub struct UdpPeerLink {
    socket: UdpSocket,
    session: Uuid,
    sequence: SequenceCounter,
}

impl UdpPeerLink {
    /// Binds the message port.
    ///
    /// # Errors
    ///
    /// [`TransportError::BindFailed`] if the address is unavailable.
    pub async fn bind(addr: SocketAddr, session: Uuid) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| TransportError::BindFailed { addr, source })?;
        info!("peer link listening on UDP {addr}");
        Ok(Self {
            socket,
            session,
            sequence: SequenceCounter::new(),
        })
    }

    pub fn session(&self) -> Uuid {
        self.session
    }

    /// # Errors
    ///
    /// Returns the socket error if the local address cannot be read.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

#[async_trait]
impl PeerTransport for UdpPeerLink {
    async fn send(&self, peer: PeerId, message: &CoreMessage) -> Result<(), TransportError> {
        let bytes = encode_message(message, self.sequence.next(), self.session)?;
        self.socket
            .send_to(&bytes, peer.address)
            .await
            .map_err(|source| TransportError::Send {
                peer: peer.address,
                source,
            })?;
        Ok(())
    }

    async fn recv(&self) -> Result<(PeerId, CoreMessage), TransportError> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (len, from) = self
            .socket
            .recv_from(&mut buf)
            .await
            .map_err(TransportError::Recv)?;
        let (frame, _) =
            decode_message(&buf[..len]).map_err(|source| TransportError::Decode { from, source })?;
        Ok((PeerId::new(from, frame.session), frame.message))
    }
}

/// Non-blocking [`MessageSender`] feeding [`run_outbound`].
#[derive(Clone)]
pub struct OutboundQueue {
    tx: mpsc::UnboundedSender<(PeerId, CoreMessage)>,
}

impl OutboundQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(PeerId, CoreMessage)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl MessageSender for OutboundQueue {
    fn send(&self, peer: PeerId, message: CoreMessage) {
        if self.tx.send((peer, message)).is_err() {
            debug!(%peer, "outbound queue closed; message dropped");
        }
    }
}

/// Sends queued messages until every [`OutboundQueue`] clone is dropped.
pub async fn run_outbound<T: PeerTransport + ?Sized>(
    transport: Arc<T>,
    mut rx: mpsc::UnboundedReceiver<(PeerId, CoreMessage)>,
) {
    while let Some((peer, message)) = rx.recv().await {
        if let Err(e) = transport.send(peer, &message).await {
            warn!(%peer, "dropping {:?}: {e}", message.message_type());
        }
    }
    debug!("outbound queue drained");
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddrV4};

    fn loopback() -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0))
    }

    #[tokio::test]
    async fn test_message_arrives_with_sender_identity() {
        // Arrange
        let a = UdpPeerLink::bind(loopback(), Uuid::from_u128(1)).await.expect("bind a");
        let b = UdpPeerLink::bind(loopback(), Uuid::from_u128(2)).await.expect("bind b");
        let b_id = PeerId::new(b.local_addr().unwrap(), b.session());

        // Act
        tokio_test::assert_ok!(a.send(b_id, &CoreMessage::Disconnect).await);
        let (from, message) = tokio_test::assert_ok!(b.recv().await);

        // Assert
        assert_eq!(from, PeerId::new(a.local_addr().unwrap(), Uuid::from_u128(1)));
        assert_eq!(message, CoreMessage::Disconnect);
    }

    #[tokio::test]
    async fn test_garbage_datagram_is_a_decode_error() {
        let link = UdpPeerLink::bind(loopback(), Uuid::nil()).await.expect("bind");
        let raw = UdpSocket::bind(loopback()).await.expect("raw bind");

        raw.send_to(&[0xFF, 0x00, 0x01], link.local_addr().unwrap())
            .await
            .expect("send raw");

        assert!(matches!(link.recv().await, Err(TransportError::Decode { .. })));
    }

    #[tokio::test]
    async fn test_outbound_queue_delivers_through_transport() {
        // Arrange
        let sender = Arc::new(UdpPeerLink::bind(loopback(), Uuid::from_u128(1)).await.expect("bind"));
        let receiver = UdpPeerLink::bind(loopback(), Uuid::from_u128(2)).await.expect("bind");
        let target = PeerId::new(receiver.local_addr().unwrap(), receiver.session());
        let (queue, rx) = OutboundQueue::new();
        let pump = tokio::spawn(run_outbound(sender, rx));

        // Act
        MessageSender::send(&queue, target, CoreMessage::Disconnect);
        let (_, message) = receiver.recv().await.expect("recv");
        drop(queue);

        // Assert
        assert_eq!(message, CoreMessage::Disconnect);
        pump.await.expect("pump finishes once the queue is dropped");
    }
}
