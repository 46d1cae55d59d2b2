//! UDP broadcast discovery of peer cores.
//!
//! Every core binds the discovery port and periodically broadcasts an
//! `Announce` carrying its name and the UDP port of its peer link.  Announces
//! received from other cores become [`DiscoveryEvent`]s; the node forwards
//! them to the cost distribution handler, which starts the connection
//! handshake.
//!
//! Both the listener and the broadcaster run on dedicated threads with
//! blocking sockets, so discovery never stalls the Tokio runtime.
//!
//! # How UDP discovery works (for beginners)
//!
//! A datagram sent to the LAN broadcast address (`255.255.255.255`) reaches
//! every host on the segment.  Each core listens on the same discovery port,
//! so one broadcast tells every other core "I exist, and you can reach me on
//! this message port".  UDP may drop packets; that is fine because the
//! announce repeats every few seconds.
//!
//! # Read timeout
//!
//! The listening socket has a 500 ms read timeout.  On each timeout the
//! thread checks the `running` flag and exits once shutdown has begun.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use avroute_core::protocol::messages::AnnounceMessage;
use avroute_core::protocol::SequenceCounter;
use avroute_core::{decode_message, encode_message, CoreMessage, PeerId};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Error type for discovery service operations.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The UDP socket could not be bound.
    #[error("failed to bind discovery socket on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    /// The socket could not be configured for broadcast.
    #[error("failed to configure discovery socket: {0}")]
    Configure(#[source] std::io::Error),
    /// A discovery thread could not be started.
    #[error("failed to spawn discovery thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Settings for one core's discovery service.
#[derive(Debug, Clone)]
pub struct DiscoverySettings {
    pub core_name: String,
    /// Process session; announces carrying it are our own and are ignored.
    pub session: Uuid,
    pub discovery_port: u16,
    /// UDP port of this core's peer link, advertised to others.
    pub message_port: u16,
    pub announce_interval: Duration,
    /// Where announces are sent; the LAN broadcast address by default.
    pub broadcast_address: Ipv4Addr,
}

/// A peer core announced itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryEvent {
    /// Identity of the peer's message endpoint (not the discovery socket).
    pub peer: PeerId,
    pub announce: AnnounceMessage,
}

/// Binds the discovery port and starts the listener and broadcaster threads.
///
/// Returns a receiver of [`DiscoveryEvent`]s for other cores.
///
/// # Errors
///
/// [`DiscoveryError`] if the socket cannot be bound or configured, or a
/// thread cannot be spawned.
pub fn start_discovery(
    settings: DiscoverySettings,
    running: Arc<AtomicBool>,
) -> Result<mpsc::Receiver<DiscoveryEvent>, DiscoveryError> {
    let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, settings.discovery_port));
    let socket =
        UdpSocket::bind(addr).map_err(|source| DiscoveryError::BindFailed { addr, source })?;
    socket
        .set_read_timeout(Some(Duration::from_millis(500)))
        .map_err(DiscoveryError::Configure)?;
    socket
        .set_broadcast(true)
        .map_err(DiscoveryError::Configure)?;
    let announcer = socket.try_clone().map_err(DiscoveryError::Configure)?;

    let (tx, rx) = mpsc::channel(64);

    let session = settings.session;
    let listener_running = running.clone();
    std::thread::Builder::new()
        .name("avroute-discovery-rx".to_string())
        .spawn(move || listen_loop(socket, session, tx, listener_running))
        .map_err(DiscoveryError::Spawn)?;

    std::thread::Builder::new()
        .name("avroute-discovery-tx".to_string())
        .spawn(move || announce_loop(announcer, settings, running))
        .map_err(DiscoveryError::Spawn)?;

    info!("discovery listening on UDP {addr}");
    Ok(rx)
}

/// Receive loop executed on the listener thread.
fn listen_loop(
    socket: UdpSocket,
    session: Uuid,
    tx: mpsc::Sender<DiscoveryEvent>,
    running: Arc<AtomicBool>,
) {
    let mut buf = vec![0u8; 4096];

    while running.load(Ordering::Relaxed) {
        let (len, src) = match socket.recv_from(&mut buf) {
            Ok(pair) => pair,
            Err(e) if is_timeout_error(&e) => continue,
            Err(e) => {
                error!("discovery recv error: {e}");
                continue;
            }
        };

        match decode_message(&buf[..len]) {
            Ok((frame, _)) if frame.session == session => {}
            Ok((frame, _)) => {
                let CoreMessage::Announce(announce) = frame.message else {
                    warn!(
                        "unexpected {:?} on discovery port from {src}",
                        frame.message.message_type()
                    );
                    continue;
                };
                let Some(event) = announce_event(src, frame.session, announce) else {
                    continue;
                };
                debug!(peer = %event.peer, name = %event.announce.core_name, "announce received");
                if tx.blocking_send(event).is_err() {
                    // Receiver dropped: the node is shutting down.
                    break;
                }
            }
            Err(e) => debug!("failed to decode discovery datagram from {src}: {e}"),
        }
    }

    info!("discovery listener stopped");
}

/// Peer identity behind an announce: sender IP, advertised message port.
fn announce_event(src: SocketAddr, session: Uuid, announce: AnnounceMessage) -> Option<DiscoveryEvent> {
    if announce.message_port == 0 {
        return None;
    }
    let address = SocketAddr::new(src.ip(), announce.message_port);
    Some(DiscoveryEvent {
        peer: PeerId::new(address, session),
        announce,
    })
}

/// Broadcast loop executed on the announcer thread.
fn announce_loop(socket: UdpSocket, settings: DiscoverySettings, running: Arc<AtomicBool>) {
    let sequence = SequenceCounter::new();
    let target = SocketAddr::V4(SocketAddrV4::new(
        settings.broadcast_address,
        settings.discovery_port,
    ));
    let message = CoreMessage::Announce(AnnounceMessage {
        core_name: settings.core_name.clone(),
        message_port: settings.message_port,
    });
    let tick = Duration::from_millis(250);

    while running.load(Ordering::Relaxed) {
        match encode_message(&message, sequence.next(), settings.session) {
            Ok(bytes) => {
                if let Err(e) = socket.send_to(&bytes, target) {
                    warn!("failed to broadcast announce to {target}: {e}");
                }
            }
            Err(e) => error!("failed to encode announce: {e}"),
        }

        // Sleep in short steps so shutdown is not delayed by a full interval.
        let mut waited = Duration::ZERO;
        while waited < settings.announce_interval && running.load(Ordering::Relaxed) {
            std::thread::sleep(tick);
            waited += tick;
        }
    }

    info!("discovery broadcaster stopped");
}

/// Returns `true` for OS timeout / would-block errors that should be retried.
fn is_timeout_error(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}

// ── Tests ─────────────────────────────────────────────────────────────────────
