//! The connections index: every link in the local graph, queryable from both
//! ends.
//!
//! # Index layout (for beginners)
//!
//! Path discovery asks two questions thousands of times per route:
//!
//! 1. "Which connection leaves output *X* carrying video?"
//! 2. "Which connections leave control *C* at all?"
//!
//! Scanning every connection for each question would be O(n).  Instead the
//! index keeps hash maps keyed by `(endpoint, single type flag)` and by
//! control, giving O(1) lookups in both directions.  A physical port carries
//! at most one connection per discrete type, which is what makes the
//! per-flag maps unambiguous.
//!
//! Lookups accept composite masks (`VIDEO | AUDIO`): the mask is decomposed
//! into single flags, each flag is looked up, and the results are recombined.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::domain::connection::{Connection, ConnectionId};
use crate::domain::endpoint::{Address, ConnectionType, DeviceControlInfo, DeviceId, EndpointInfo};

use super::error::RoutingError;

/// Which side of a control a connection is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Connections arriving at the control's inputs.
    Input,
    /// Connections leaving the control's outputs.
    Output,
}

/// Queryable collection of [`Connection`]s.
#[derive(Debug, Default, Clone)]
pub struct ConnectionsIndex {
    connections: BTreeMap<ConnectionId, Connection>,
    outputs: HashMap<(EndpointInfo, ConnectionType), ConnectionId>,
    inputs: HashMap<(EndpointInfo, ConnectionType), ConnectionId>,
    by_source_control: HashMap<DeviceControlInfo, BTreeSet<ConnectionId>>,
    by_destination_control: HashMap<DeviceControlInfo, BTreeSet<ConnectionId>>,
}

impl ConnectionsIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    /// Iterates connections in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    /// Adds a connection.
    ///
    /// # Errors
    ///
    /// - [`RoutingError::EmptyConnectionType`] if the link carries nothing.
    /// - [`RoutingError::DuplicateConnection`] if the id is taken.
    /// - [`RoutingError::OutputInUse`] / [`RoutingError::InputInUse`] if either
    ///   port already has a connection for one of the types.
    pub fn add_connection(&mut self, connection: Connection) -> Result<(), RoutingError> {
        if connection.connection_type.is_empty() {
            return Err(RoutingError::EmptyConnectionType(connection.id));
        }
        if self.connections.contains_key(&connection.id) {
            return Err(RoutingError::DuplicateConnection(connection.id));
        }
        for flag in connection.connection_type.flags() {
            if let Some(existing) = self.outputs.get(&(connection.source, flag)) {
                return Err(RoutingError::OutputInUse {
                    endpoint: connection.source,
                    connection_type: flag,
                    existing: *existing,
                });
            }
            if let Some(existing) = self.inputs.get(&(connection.destination, flag)) {
                return Err(RoutingError::InputInUse {
                    endpoint: connection.destination,
                    connection_type: flag,
                    existing: *existing,
                });
            }
        }

        for flag in connection.connection_type.flags() {
            self.outputs.insert((connection.source, flag), connection.id);
            self.inputs.insert((connection.destination, flag), connection.id);
        }
        self.by_source_control
            .entry(connection.source.device_control())
            .or_default()
            .insert(connection.id);
        self.by_destination_control
            .entry(connection.destination.device_control())
            .or_default()
            .insert(connection.id);
        self.connections.insert(connection.id, connection);
        Ok(())
    }

    /// Removes a connection, returning it if it was indexed.
    pub fn remove_connection(&mut self, id: ConnectionId) -> Option<Connection> {
        let connection = self.connections.remove(&id)?;
        for flag in connection.connection_type.flags() {
            self.outputs.remove(&(connection.source, flag));
            self.inputs.remove(&(connection.destination, flag));
        }
        remove_from_set(
            &mut self.by_source_control,
            connection.source.device_control(),
            id,
        );
        remove_from_set(
            &mut self.by_destination_control,
            connection.destination.device_control(),
            id,
        );
        Some(connection)
    }

    /// Replaces an indexed connection with a new version carrying the same id.
    ///
    /// The old version is restored if the new one cannot be indexed.
    ///
    /// # Errors
    ///
    /// [`RoutingError::UnknownConnection`] if the id is not indexed, or any
    /// error from [`ConnectionsIndex::add_connection`].
    pub fn replace_connection(&mut self, connection: Connection) -> Result<(), RoutingError> {
        let old = self
            .remove_connection(connection.id)
            .ok_or(RoutingError::UnknownConnection(connection.id))?;
        if let Err(e) = self.add_connection(connection) {
            // The old connection was valid a moment ago, so this cannot conflict.
            let _ = self.add_connection(old);
            return Err(e);
        }
        Ok(())
    }

    /// Returns the single connection leaving `endpoint` for `connection_type`.
    ///
    /// For a composite mask, returns a connection only when one connection
    /// carries every flag of the mask.
    pub fn get_output_connection(
        &self,
        endpoint: EndpointInfo,
        connection_type: ConnectionType,
    ) -> Option<&Connection> {
        single_for_mask(&self.outputs, endpoint, connection_type)
            .and_then(|id| self.connections.get(&id))
    }

    /// Returns every connection leaving `endpoint` for any flag in the mask.
    pub fn get_output_connections(
        &self,
        endpoint: EndpointInfo,
        connection_type: ConnectionType,
    ) -> Vec<&Connection> {
        self.collect_for_flags(&self.outputs, endpoint, connection_type)
    }

    /// Returns the single connection arriving at `address` on `control`.
    pub fn get_input_connection(
        &self,
        control: DeviceControlInfo,
        address: Address,
        connection_type: ConnectionType,
    ) -> Option<&Connection> {
        let endpoint = EndpointInfo::new(control.device, control.control, address);
        single_for_mask(&self.inputs, endpoint, connection_type)
            .and_then(|id| self.connections.get(&id))
    }

    /// Returns every connection arriving at `endpoint` for any flag in the mask.
    pub fn get_input_connections(
        &self,
        endpoint: EndpointInfo,
        connection_type: ConnectionType,
    ) -> Vec<&Connection> {
        self.collect_for_flags(&self.inputs, endpoint, connection_type)
    }

    /// Returns the connections attached to `control` on the given side that
    /// carry at least one flag of `connection_type`.
    pub fn get_connections_for_control(
        &self,
        control: DeviceControlInfo,
        direction: Direction,
        connection_type: ConnectionType,
    ) -> Vec<&Connection> {
        let ids = match direction {
            Direction::Output => self.by_source_control.get(&control),
            Direction::Input => self.by_destination_control.get(&control),
        };
        ids.into_iter()
            .flatten()
            .filter_map(|id| self.connections.get(id))
            .filter(|c| c.connection_type.intersects(connection_type))
            .collect()
    }

    /// Returns the ids of every connection with either end on `device`.
    pub fn connections_for_device(&self, device: DeviceId) -> Vec<ConnectionId> {
        self.connections
            .values()
            .filter(|c| c.source.device == device || c.destination.device == device)
            .map(|c| c.id)
            .collect()
    }

    fn collect_for_flags(
        &self,
        map: &HashMap<(EndpointInfo, ConnectionType), ConnectionId>,
        endpoint: EndpointInfo,
        connection_type: ConnectionType,
    ) -> Vec<&Connection> {
        let ids: BTreeSet<ConnectionId> = connection_type
            .flags()
            .filter_map(|flag| map.get(&(endpoint, flag)).copied())
            .collect();
        ids.iter().filter_map(|id| self.connections.get(id)).collect()
    }
}

fn single_for_mask(
    map: &HashMap<(EndpointInfo, ConnectionType), ConnectionId>,
    endpoint: EndpointInfo,
    connection_type: ConnectionType,
) -> Option<ConnectionId> {
    let mut found: Option<ConnectionId> = None;
    for flag in connection_type.flags() {
        let id = *map.get(&(endpoint, flag))?;
        match found {
            None => found = Some(id),
            Some(existing) if existing == id => {}
            Some(_) => return None,
        }
    }
    found
}

fn remove_from_set(
    map: &mut HashMap<DeviceControlInfo, BTreeSet<ConnectionId>>,
    key: DeviceControlInfo,
    id: ConnectionId,
) {
    if let Some(set) = map.get_mut(&key) {
        set.remove(&id);
        if set.is_empty() {
            map.remove(&key);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn link(id: u32, from: (u32, u32), to: (u32, u32), ty: ConnectionType) -> Connection {
        Connection::new(
            ConnectionId(id),
            EndpointInfo::new(from.0, 0, from.1),
            EndpointInfo::new(to.0, 0, to.1),
            ty,
        )
    }

    #[test]
    fn test_add_and_lookup_output_connection() {
        // Arrange
        let mut index = ConnectionsIndex::new();
        index
            .add_connection(link(1, (1, 1), (2, 1), ConnectionType::VIDEO))
            .unwrap();

        // Act
        let found = index.get_output_connection(EndpointInfo::new(1, 0, 1), ConnectionType::VIDEO);

        // Assert
        assert_eq!(found.map(|c| c.id), Some(ConnectionId(1)));
        assert!(index
            .get_output_connection(EndpointInfo::new(1, 0, 1), ConnectionType::AUDIO)
            .is_none());
    }

    #[test]
    fn test_split_video_and_audio_outputs_recombine_for_composite_mask() {
        // Arrange: video and audio leave the same output on different cables.
        let mut index = ConnectionsIndex::new();
        index
            .add_connection(link(1, (1, 1), (2, 1), ConnectionType::VIDEO))
            .unwrap();
        index
            .add_connection(link(2, (1, 1), (3, 1), ConnectionType::AUDIO))
            .unwrap();
        let av = ConnectionType::VIDEO | ConnectionType::AUDIO;

        // Act
        let all = index.get_output_connections(EndpointInfo::new(1, 0, 1), av);
        let single = index.get_output_connection(EndpointInfo::new(1, 0, 1), av);

        // Assert
        assert_eq!(all.len(), 2);
        assert!(single.is_none(), "no single connection carries both flags");
    }

    #[test]
    fn test_add_rejects_second_connection_on_same_output_and_type() {
        let mut index = ConnectionsIndex::new();
        index
            .add_connection(link(1, (1, 1), (2, 1), ConnectionType::VIDEO))
            .unwrap();

        let result = index.add_connection(link(2, (1, 1), (3, 1), ConnectionType::VIDEO));

        assert!(matches!(result, Err(RoutingError::OutputInUse { .. })));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_add_rejects_duplicate_id_and_empty_type() {
        let mut index = ConnectionsIndex::new();
        index
            .add_connection(link(1, (1, 1), (2, 1), ConnectionType::VIDEO))
            .unwrap();

        assert_eq!(
            index.add_connection(link(1, (5, 1), (6, 1), ConnectionType::VIDEO)),
            Err(RoutingError::DuplicateConnection(ConnectionId(1)))
        );
        assert_eq!(
            index.add_connection(link(2, (5, 1), (6, 1), ConnectionType::NONE)),
            Err(RoutingError::EmptyConnectionType(ConnectionId(2)))
        );
    }

    #[test]
    fn test_get_input_connection_by_control_and_address() {
        let mut index = ConnectionsIndex::new();
        index
            .add_connection(link(7, (1, 1), (2, 4), ConnectionType::ALL))
            .unwrap();

        let found =
            index.get_input_connection(DeviceControlInfo::new(2, 0), 4, ConnectionType::USB);

        assert_eq!(found.map(|c| c.id), Some(ConnectionId(7)));
    }

    #[test]
    fn test_get_connections_for_control_filters_by_direction_and_type() {
        let mut index = ConnectionsIndex::new();
        index
            .add_connection(link(1, (1, 1), (2, 1), ConnectionType::VIDEO))
            .unwrap();
        index
            .add_connection(link(2, (1, 2), (3, 1), ConnectionType::AUDIO))
            .unwrap();
        index
            .add_connection(link(3, (4, 1), (1, 1), ConnectionType::VIDEO))
            .unwrap();
        let control = DeviceControlInfo::new(1, 0);

        let outputs = index.get_connections_for_control(control, Direction::Output, ConnectionType::VIDEO);
        let inputs = index.get_connections_for_control(control, Direction::Input, ConnectionType::ALL);

        assert_eq!(outputs.iter().map(|c| c.id).collect::<Vec<_>>(), vec![ConnectionId(1)]);
        assert_eq!(inputs.iter().map(|c| c.id).collect::<Vec<_>>(), vec![ConnectionId(3)]);
    }

    #[test]
    fn test_remove_connection_clears_every_index() {
        let mut index = ConnectionsIndex::new();
        index
            .add_connection(link(1, (1, 1), (2, 1), ConnectionType::VIDEO))
            .unwrap();

        let removed = index.remove_connection(ConnectionId(1));

        assert!(removed.is_some());
        assert!(index.is_empty());
        assert!(index
            .get_output_connection(EndpointInfo::new(1, 0, 1), ConnectionType::VIDEO)
            .is_none());
        assert!(index
            .get_connections_for_control(DeviceControlInfo::new(2, 0), Direction::Input, ConnectionType::ALL)
            .is_empty());
        // The freed ports can be reused.
        assert!(index
            .add_connection(link(2, (1, 1), (2, 1), ConnectionType::VIDEO))
            .is_ok());
    }

    #[test]
    fn test_replace_connection_restores_old_version_on_conflict() {
        let mut index = ConnectionsIndex::new();
        index
            .add_connection(link(1, (1, 1), (2, 1), ConnectionType::VIDEO))
            .unwrap();
        index
            .add_connection(link(2, (3, 1), (4, 1), ConnectionType::VIDEO))
            .unwrap();

        // Moving #1 onto #2's output must fail and leave #1 untouched.
        let result = index.replace_connection(link(1, (3, 1), (2, 1), ConnectionType::VIDEO));

        assert!(matches!(result, Err(RoutingError::OutputInUse { .. })));
        assert_eq!(index.get(ConnectionId(1)).unwrap().source, EndpointInfo::new(1, 0, 1));
    }

    #[test]
    fn test_connections_for_device_matches_either_end() {
        let mut index = ConnectionsIndex::new();
        index
            .add_connection(link(1, (1, 1), (2, 1), ConnectionType::VIDEO))
            .unwrap();
        index
            .add_connection(link(2, (2, 1), (3, 1), ConnectionType::VIDEO))
            .unwrap();

        assert_eq!(index.connections_for_device(2), vec![ConnectionId(1), ConnectionId(2)]);
        assert_eq!(index.connections_for_device(3), vec![ConnectionId(2)]);
    }
}
