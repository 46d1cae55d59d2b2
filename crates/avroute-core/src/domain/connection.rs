//! The [`Connection`] entity: a directed link from a source-side endpoint to a
//! destination-side endpoint.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::endpoint::{ConnectionType, DeviceId, EndpointInfo, RoomId};

/// Unique identifier of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u32);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Connections created at runtime (remote placeholders) are numbered from here
/// so they never collide with configured ids.
pub const DYNAMIC_CONNECTION_ID_BASE: u32 = 0x4000_0000;

/// A physical or logical link between a source output and a destination input.
///
/// Connections are immutable once built; identity is [`Connection::id`].
/// Restrictions are empty by default, meaning "usable by any source device /
/// any room".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub id: ConnectionId,
    pub source: EndpointInfo,
    pub destination: EndpointInfo,
    pub connection_type: ConnectionType,
    /// When non-empty, only routes originating from these source devices may use the link.
    #[serde(default)]
    pub source_device_restrictions: BTreeSet<DeviceId>,
    /// When non-empty, only these rooms may use the link.
    #[serde(default)]
    pub room_restrictions: BTreeSet<RoomId>,
}

impl Connection {
    pub fn new(
        id: ConnectionId,
        source: EndpointInfo,
        destination: EndpointInfo,
        connection_type: ConnectionType,
    ) -> Self {
        Self {
            id,
            source,
            destination,
            connection_type,
            source_device_restrictions: BTreeSet::new(),
            room_restrictions: BTreeSet::new(),
        }
    }

    pub fn with_source_device_restrictions(
        mut self,
        devices: impl IntoIterator<Item = DeviceId>,
    ) -> Self {
        self.source_device_restrictions = devices.into_iter().collect();
        self
    }

    pub fn with_room_restrictions(mut self, rooms: impl IntoIterator<Item = RoomId>) -> Self {
        self.room_restrictions = rooms.into_iter().collect();
        self
    }

    /// Returns a copy of this connection with a different source endpoint.
    ///
    /// Used when a remote placeholder is retargeted to a cheaper peer.
    pub fn retarget_source(&self, source: EndpointInfo) -> Self {
        Self {
            source,
            ..self.clone()
        }
    }

    /// Returns a copy of this connection with a different destination endpoint.
    pub fn retarget_destination(&self, destination: EndpointInfo) -> Self {
        Self {
            destination,
            ..self.clone()
        }
    }

    /// Returns `true` when routes from `source_device` may traverse this link.
    pub fn is_source_device_enabled(&self, source_device: DeviceId) -> bool {
        self.source_device_restrictions.is_empty()
            || self.source_device_restrictions.contains(&source_device)
    }

    /// Returns `true` when `room` may use this link.
    pub fn is_room_enabled(&self, room: RoomId) -> bool {
        self.room_restrictions.is_empty() || self.room_restrictions.contains(&room)
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} -> {} [{}]",
            self.id, self.source, self.destination, self.connection_type
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_connection() -> Connection {
        Connection::new(
            ConnectionId(1),
            EndpointInfo::new(1, 0, 1),
            EndpointInfo::new(2, 0, 3),
            ConnectionType::VIDEO,
        )
    }

    #[test]
    fn test_unrestricted_connection_allows_any_device_and_room() {
        let connection = make_connection();
        assert!(connection.is_source_device_enabled(99));
        assert!(connection.is_room_enabled(42));
    }

    #[test]
    fn test_restrictions_limit_devices_and_rooms() {
        let connection = make_connection()
            .with_source_device_restrictions([5])
            .with_room_restrictions([10, 11]);

        assert!(connection.is_source_device_enabled(5));
        assert!(!connection.is_source_device_enabled(6));
        assert!(connection.is_room_enabled(11));
        assert!(!connection.is_room_enabled(12));
    }

    #[test]
    fn test_retarget_source_keeps_identity_and_destination() {
        let connection = make_connection();
        let moved = connection.retarget_source(EndpointInfo::new(9, 0, 1));

        assert_eq!(moved.id, connection.id);
        assert_eq!(moved.destination, connection.destination);
        assert_eq!(moved.source.device, 9);
    }
}
