//! [`RouteOperation`]: one end-to-end routing intent.
//!
//! # Lifecycle (for beginners)
//!
//! ```text
//! Created ──► PathFound ──► ClaimsHeld + HopsDispatched ──► Pending(count > 0) ──► Finished
//!                                                │                                  ▲
//!                                                └──────── first hop failure ───────┘
//! ```
//!
//! The same operation value is replayed once per switcher hop, each time with
//! `local_input` / `local_output` set to that hop's addresses.  When a hop
//! crosses into another core, the operation travels inside a protocol message
//! and the receiving core answers with the *same* `id`, so the originating
//! core can correlate the completion.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::endpoint::{Address, ConnectionType, EndpointInfo, RoomId};
use super::peer::PeerId;

/// One end-to-end routing intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteOperation {
    /// Correlation token, stable for the whole life of the operation.
    pub id: Uuid,
    pub source: EndpointInfo,
    pub destination: EndpointInfo,
    pub connection_type: ConnectionType,
    pub room_id: RoomId,
    /// Input on the switcher currently being asked to route.
    pub local_input: Option<Address>,
    /// Output on the switcher currently being asked to route.
    pub local_output: Option<Address>,
    /// Core that originally requested the route; `None` for local requests.
    pub route_request_from: Option<PeerId>,
}

impl RouteOperation {
    /// Creates a new operation with a fresh correlation id.
    pub fn new(
        source: EndpointInfo,
        destination: EndpointInfo,
        connection_type: ConnectionType,
        room_id: RoomId,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            destination,
            connection_type,
            room_id,
            local_input: None,
            local_output: None,
            route_request_from: None,
        }
    }

    pub fn with_request_from(mut self, peer: PeerId) -> Self {
        self.route_request_from = Some(peer);
        self
    }

    /// Returns a copy carrying only `connection_type`, for the share of a
    /// route that travels along one path.
    pub fn for_types(&self, connection_type: ConnectionType) -> Self {
        Self {
            connection_type,
            ..self.clone()
        }
    }

    /// Returns the per-hop copy of this operation for a switcher routing
    /// `input` to `output`.
    pub fn for_hop(&self, input: Address, output: Address) -> Self {
        Self {
            local_input: Some(input),
            local_output: Some(output),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_hop_keeps_id_and_sets_local_addresses() {
        // Arrange
        let op = RouteOperation::new(
            EndpointInfo::new(1, 0, 1),
            EndpointInfo::new(9, 0, 1),
            ConnectionType::VIDEO,
            4,
        );

        // Act
        let hop = op.for_hop(3, 7);

        // Assert
        assert_eq!(hop.id, op.id);
        assert_eq!(hop.local_input, Some(3));
        assert_eq!(hop.local_output, Some(7));
        assert_eq!(op.local_input, None);
    }

    #[test]
    fn test_for_types_narrows_mask_and_keeps_id() {
        let op = RouteOperation::new(
            EndpointInfo::new(1, 0, 1),
            EndpointInfo::new(9, 0, 1),
            ConnectionType::VIDEO | ConnectionType::AUDIO,
            4,
        );

        let audio = op.for_types(ConnectionType::AUDIO);

        assert_eq!(audio.id, op.id);
        assert_eq!(audio.connection_type, ConnectionType::AUDIO);
        assert_eq!(audio.room_id, 4);
    }

    #[test]
    fn test_new_operations_get_distinct_ids() {
        let a = RouteOperation::new(
            EndpointInfo::new(1, 0, 1),
            EndpointInfo::new(2, 0, 1),
            ConnectionType::AUDIO,
            1,
        );
        let b = RouteOperation::new(a.source, a.destination, a.connection_type, a.room_id);
        assert_ne!(a.id, b.id);
    }
}
