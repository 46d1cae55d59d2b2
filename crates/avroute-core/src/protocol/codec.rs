//! Binary codec for inter-core messages.
//!
//! Wire format:
//! ```text
//! [version:1][msg_type:1][reserved:2][payload_len:4][seq:8][session:16][payload:N]
//! ```
//! Total header size: 32 bytes.  Header integers are big-endian; the payload
//! is the bincode encoding of the message body.
//!
//! The session id identifies the sending process.  Together with the sender's
//! socket address it forms the [`crate::PeerId`] a receiver attributes the
//! message to, so a restarted core is recognised as a new peer.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::protocol::messages::{CoreMessage, MessageType, HEADER_SIZE, PROTOCOL_VERSION};

/// Errors that can occur during message encoding or decoding.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The byte slice is shorter than the minimum required length.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The message type byte in the header is not a recognized value.
    #[error("unknown message type: 0x{0:02X}")]
    UnknownMessageType(u8),

    /// The protocol version in the header is not supported.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// The payload could not be decoded as the declared message type.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The message body could not be serialized.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The encoded payload length field does not match the actual data available.
    #[error("payload length mismatch: header says {declared}, available is {available}")]
    PayloadLengthMismatch { declared: usize, available: usize },
}

/// A decoded message together with its header metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub message: CoreMessage,
    pub sequence_number: u64,
    pub session: Uuid,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a [`CoreMessage`] into a byte vector including the header.
///
/// The sequence number is **not** set by this function; pass a value from a
/// [`crate::protocol::SequenceCounter`].
///
/// # Errors
///
/// Returns [`ProtocolError::Serialization`] if the body cannot be encoded.
///
/// # Examples
///
/// ```rust
/// use avroute_core::protocol::{decode_message, encode_message, CoreMessage};
/// use uuid::Uuid;
///
/// let session = Uuid::new_v4();
/// let bytes = encode_message(&CoreMessage::Disconnect, 7, session).unwrap();
/// let (frame, consumed) = decode_message(&bytes).unwrap();
/// assert_eq!(frame.message, CoreMessage::Disconnect);
/// assert_eq!(frame.session, session);
/// assert_eq!(consumed, bytes.len());
/// ```
pub fn encode_message(
    msg: &CoreMessage,
    sequence_number: u64,
    session: Uuid,
) -> Result<Vec<u8>, ProtocolError> {
    let payload = encode_payload(msg)?;
    let payload_len = u32::try_from(payload.len())
        .map_err(|_| ProtocolError::Serialization("payload exceeds 4 GiB".to_string()))?;

    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.push(PROTOCOL_VERSION);
    buf.push(msg.message_type() as u8);
    buf.push(0x00); // reserved
    buf.push(0x00); // reserved
    buf.extend_from_slice(&payload_len.to_be_bytes());
    buf.extend_from_slice(&sequence_number.to_be_bytes());
    buf.extend_from_slice(session.as_bytes());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Decodes one message from the beginning of `bytes`.
///
/// Returns the frame and the total number of bytes consumed (header +
/// payload), so the caller can advance their read cursor.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the bytes are malformed.
pub fn decode_message(bytes: &[u8]) -> Result<(Frame, usize), ProtocolError> {
    if bytes.len() < HEADER_SIZE {
        return Err(ProtocolError::InsufficientData {
            needed: HEADER_SIZE,
            available: bytes.len(),
        });
    }

    let version = bytes[0];
    if version != PROTOCOL_VERSION {
        return Err(ProtocolError::UnsupportedVersion(version));
    }

    let msg_type_byte = bytes[1];
    let msg_type = MessageType::try_from(msg_type_byte)
        .map_err(|_| ProtocolError::UnknownMessageType(msg_type_byte))?;

    // bytes[2..4] are reserved

    let payload_len = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
    let mut seq = [0u8; 8];
    seq.copy_from_slice(&bytes[8..16]);
    let mut session = [0u8; 16];
    session.copy_from_slice(&bytes[16..32]);

    let total_needed = HEADER_SIZE + payload_len;
    if bytes.len() < total_needed {
        return Err(ProtocolError::PayloadLengthMismatch {
            declared: payload_len,
            available: bytes.len() - HEADER_SIZE,
        });
    }

    let payload = &bytes[HEADER_SIZE..total_needed];
    let message = decode_payload(msg_type, payload)?;
    Ok((
        Frame {
            message,
            sequence_number: u64::from_be_bytes(seq),
            session: Uuid::from_bytes(session),
        },
        total_needed,
    ))
}

// ── Payload encoding ──────────────────────────────────────────────────────────

fn encode_payload(msg: &CoreMessage) -> Result<Vec<u8>, ProtocolError> {
    match msg {
        CoreMessage::Announce(m) => to_bytes(m),
        CoreMessage::InitiateConnection(m) => to_bytes(m),
        CoreMessage::Disconnect => Ok(Vec::new()),
        CoreMessage::CostUpdate(m) => to_bytes(m),
        CoreMessage::RequestDevices(m) => to_bytes(m),
        CoreMessage::ShareDevices(m) => to_bytes(m),
        CoreMessage::RouteRequest(m) => to_bytes(m),
        CoreMessage::RouteComplete(m) => to_bytes(m),
        CoreMessage::UnrouteRequest(m) => to_bytes(m),
    }
}

fn to_bytes<T: Serialize>(body: &T) -> Result<Vec<u8>, ProtocolError> {
    bincode::serialize(body).map_err(|e| ProtocolError::Serialization(e.to_string()))
}

// ── Payload decoding ──────────────────────────────────────────────────────────

fn decode_payload(msg_type: MessageType, payload: &[u8]) -> Result<CoreMessage, ProtocolError> {
    match msg_type {
        MessageType::Announce => from_bytes(payload).map(CoreMessage::Announce),
        MessageType::InitiateConnection => from_bytes(payload).map(CoreMessage::InitiateConnection),
        MessageType::Disconnect => Ok(CoreMessage::Disconnect),
        MessageType::CostUpdate => from_bytes(payload).map(CoreMessage::CostUpdate),
        MessageType::RequestDevices => from_bytes(payload).map(CoreMessage::RequestDevices),
        MessageType::ShareDevices => from_bytes(payload).map(CoreMessage::ShareDevices),
        MessageType::RouteRequest => from_bytes(payload).map(CoreMessage::RouteRequest),
        MessageType::RouteComplete => from_bytes(payload).map(CoreMessage::RouteComplete),
        MessageType::UnrouteRequest => from_bytes(payload).map(CoreMessage::UnrouteRequest),
    }
}

fn from_bytes<T: DeserializeOwned>(payload: &[u8]) -> Result<T, ProtocolError> {
    bincode::deserialize(payload).map_err(|e| ProtocolError::MalformedPayload(e.to_string()))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
