//! Messages exchanged between cores.
//!
//! Discovery uses [`AnnounceMessage`] over broadcast.  Everything else flows
//! point-to-point once a peer is known: the connection handshake, the cost
//! distribution protocol, and cross-core route execution.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::endpoint::{Address, ConnectionType, DeviceId, RoomId};
use crate::domain::operation::RouteOperation;
use crate::domain::originator::{DestinationId, SourceId};

// ── Protocol constants ────────────────────────────────────────────────────────

/// Current protocol version byte.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Size of the common message header in bytes.
pub const HEADER_SIZE: usize = 32;

/// Reachability metric treated as "unreachable".
pub const MAX_COST: f32 = 16.0;

// ── Message type codes ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    // Peer lifecycle (0x00–0x0F)
    Announce = 0x01,
    InitiateConnection = 0x02,
    Disconnect = 0x03,
    // Cost distribution (0x10–0x1F)
    CostUpdate = 0x10,
    RequestDevices = 0x11,
    ShareDevices = 0x12,
    // Cross-core routing (0x20–0x2F)
    RouteRequest = 0x20,
    RouteComplete = 0x21,
    UnrouteRequest = 0x22,
}

impl TryFrom<u8> for MessageType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x01 => Ok(MessageType::Announce),
            0x02 => Ok(MessageType::InitiateConnection),
            0x03 => Ok(MessageType::Disconnect),
            0x10 => Ok(MessageType::CostUpdate),
            0x11 => Ok(MessageType::RequestDevices),
            0x12 => Ok(MessageType::ShareDevices),
            0x20 => Ok(MessageType::RouteRequest),
            0x21 => Ok(MessageType::RouteComplete),
            0x22 => Ok(MessageType::UnrouteRequest),
            _ => Err(()),
        }
    }
}

// ── Per-message payload structs ───────────────────────────────────────────────

/// Broadcast by every core so peers can find its messaging port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnounceMessage {
    pub core_name: String,
    /// UDP port of the sender's peer link.
    pub message_port: u16,
}

/// Sent by the core that discovered a peer first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitiateConnectionMessage {
    /// Id of the placeholder device the sender created for the receiver.
    pub device_id: DeviceId,
}

/// Current best cost per id, from the sender's point of view.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostUpdateMessage {
    pub source_costs: BTreeMap<SourceId, f32>,
    pub destination_costs: BTreeMap<DestinationId, f32>,
}

impl CostUpdateMessage {
    pub fn is_empty(&self) -> bool {
        self.source_costs.is_empty() && self.destination_costs.is_empty()
    }
}

/// Ids the sender saw in a cost update but does not know about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestDevicesMessage {
    pub missing_sources: Vec<SourceId>,
    pub missing_destinations: Vec<DestinationId>,
}

impl RequestDevicesMessage {
    pub fn is_empty(&self) -> bool {
        self.missing_sources.is_empty() && self.missing_destinations.is_empty()
    }
}

/// A source the sender can reach, with its cost at the sender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedSource {
    pub id: SourceId,
    pub name: String,
    pub connection_type: ConnectionType,
    pub cost: f32,
}

/// A destination the sender can reach, with its cost at the sender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedDestination {
    pub id: DestinationId,
    pub name: String,
    pub connection_type: ConnectionType,
    pub cost: f32,
}

/// Which way signal flows over a tie line, seen from the core that owns the
/// configuration entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TieLineDirection {
    /// Signal leaves this core on the tie line.
    Output,
    /// Signal arrives at this core on the tie line.
    Input,
}

impl TieLineDirection {
    pub fn reversed(self) -> Self {
        match self {
            TieLineDirection::Output => TieLineDirection::Input,
            TieLineDirection::Input => TieLineDirection::Output,
        }
    }
}

/// One end of a tie line, without the local endpoint behind it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TieLineConnector {
    /// Shared tie-line number; both cores configure the same value.
    pub address: Address,
    pub direction: TieLineDirection,
    pub connection_type: ConnectionType,
}

/// Full description of sources, destinations and tie lines.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShareDevicesMessage {
    pub sources: Vec<SharedSource>,
    pub destinations: Vec<SharedDestination>,
    pub connectors: Vec<TieLineConnector>,
}

/// Asks the receiver to make one hop across its placeholder switcher.
///
/// `operation.local_input` / `local_output` carry addresses on the sender's
/// placeholder for the receiver: tie-line numbers or originator slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRequestMessage {
    pub operation: RouteOperation,
}

/// Outcome of a [`RouteRequestMessage`], echoing the operation id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteCompleteMessage {
    pub operation_id: Uuid,
    pub success: bool,
}

/// Asks the receiver to tear down whatever feeds one placeholder output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnrouteRequestMessage {
    pub output: Address,
    pub connection_type: ConnectionType,
    pub room_id: RoomId,
}

// ── Top-level message enum ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CoreMessage {
    Announce(AnnounceMessage),
    InitiateConnection(InitiateConnectionMessage),
    Disconnect,
    CostUpdate(CostUpdateMessage),
    RequestDevices(RequestDevicesMessage),
    ShareDevices(ShareDevicesMessage),
    RouteRequest(RouteRequestMessage),
    RouteComplete(RouteCompleteMessage),
    UnrouteRequest(UnrouteRequestMessage),
}

impl CoreMessage {
    /// Returns the [`MessageType`] code for this message.
    pub fn message_type(&self) -> MessageType {
        match self {
            CoreMessage::Announce(_) => MessageType::Announce,
            CoreMessage::InitiateConnection(_) => MessageType::InitiateConnection,
            CoreMessage::Disconnect => MessageType::Disconnect,
            CoreMessage::CostUpdate(_) => MessageType::CostUpdate,
            CoreMessage::RequestDevices(_) => MessageType::RequestDevices,
            CoreMessage::ShareDevices(_) => MessageType::ShareDevices,
            CoreMessage::RouteRequest(_) => MessageType::RouteRequest,
            CoreMessage::RouteComplete(_) => MessageType::RouteComplete,
            CoreMessage::UnrouteRequest(_) => MessageType::UnrouteRequest,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_codes_round_trip() {
        for code in [0x01u8, 0x02, 0x03, 0x10, 0x11, 0x12, 0x20, 0x21, 0x22] {
            let parsed = MessageType::try_from(code).expect("known code");
            assert_eq!(parsed as u8, code);
        }
        assert!(MessageType::try_from(0x7F).is_err());
    }

    #[test]
    fn test_tie_line_direction_reverses() {
        assert_eq!(TieLineDirection::Output.reversed(), TieLineDirection::Input);
        assert_eq!(TieLineDirection::Input.reversed(), TieLineDirection::Output);
    }
}
