//! Builds a core's routing graph from its configuration.

use std::sync::Arc;

use avroute_core::{ControlRegistry, RoutingError, RoutingGraph};
use tracing::info;

use crate::infrastructure::devices::register_devices;
use crate::infrastructure::storage::config::NodeConfig;

/// Registers devices and loads connections, originators, groups and static
/// routes into a new graph.
///
/// # Errors
///
/// Returns the first connection the index rejects (duplicate id, port
/// already connected, empty type).
pub fn build_graph(config: &NodeConfig) -> Result<Arc<RoutingGraph>, RoutingError> {
    let controls = Arc::new(ControlRegistry::new());
    register_devices(&controls, &config.devices);

    let graph = Arc::new(RoutingGraph::new(controls));
    graph.watch_switchers();
    graph.add_connections(config.connections.iter().cloned())?;
    for source in &config.sources {
        graph.add_source(source.clone());
    }
    for destination in &config.destinations {
        graph.add_destination(destination.clone());
    }
    for group in &config.groups {
        graph.add_destination_group(group.clone());
    }
    if !config.static_routes.is_empty() {
        graph.set_static_routes(config.static_routes.clone());
    }

    info!(
        devices = config.devices.len(),
        connections = config.connections.len(),
        sources = config.sources.len(),
        destinations = config.destinations.len(),
        static_routes = config.static_routes.len(),
        "routing graph loaded"
    );
    Ok(graph)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use avroute_core::{
        Connection, ConnectionId, ConnectionType, Destination, DestinationId, EndpointInfo,
        Source, SourceId, StaticRoute,
    };

    use crate::infrastructure::storage::config::{DeviceEntry, DeviceKind};

    fn av() -> ConnectionType {
        ConnectionType::VIDEO | ConnectionType::AUDIO
    }

    /// Camera (1) → matrix (10) in 1, matrix out 1 → projector (40).
    fn config() -> NodeConfig {
        NodeConfig {
            devices: vec![
                DeviceEntry {
                    device: 10,
                    control: 0,
                    name: "Matrix".to_string(),
                    kind: DeviceKind::Switcher,
                },
                DeviceEntry {
                    device: 40,
                    control: 0,
                    name: "Projector".to_string(),
                    kind: DeviceKind::Destination,
                },
            ],
            connections: vec![
                Connection::new(
                    ConnectionId(1),
                    EndpointInfo::new(1, 0, 1),
                    EndpointInfo::new(10, 0, 1),
                    av(),
                ),
                Connection::new(
                    ConnectionId(2),
                    EndpointInfo::new(10, 0, 1),
                    EndpointInfo::new(40, 0, 1),
                    av(),
                ),
            ],
            sources: vec![Source {
                id: SourceId(1),
                name: "Camera".to_string(),
                endpoint: EndpointInfo::new(1, 0, 1),
                connection_type: av(),
                remote: false,
            }],
            destinations: vec![Destination {
                id: DestinationId(1),
                name: "Projector".to_string(),
                endpoint: EndpointInfo::new(40, 0, 1),
                connection_type: av(),
                remote: false,
            }],
            ..NodeConfig::default()
        }
    }

    #[test]
    fn test_configured_plant_routes_end_to_end() {
        // Arrange
        let graph = build_graph(&config()).expect("valid config");

        // Act
        let routed = graph.route_source(SourceId(1), DestinationId(1), 5);

        // Assert
        assert_eq!(routed, Ok(true));
        assert_eq!(graph.usages_for_room(5).len(), 2);
    }

    #[test]
    fn test_static_route_is_applied_at_load() {
        let mut cfg = config();
        cfg.static_routes.push(StaticRoute {
            id: 1,
            source: EndpointInfo::new(1, 0, 1),
            destination: EndpointInfo::new(40, 0, 1),
            connection_type: ConnectionType::VIDEO,
        });

        let graph = build_graph(&cfg).expect("valid config");

        assert_eq!(
            graph.get_active_destination_endpoints(
                EndpointInfo::new(1, 0, 1),
                ConnectionType::VIDEO,
                false
            ),
            vec![EndpointInfo::new(40, 0, 1)]
        );
    }

    #[test]
    fn test_duplicate_connection_id_is_rejected() {
        let mut cfg = config();
        let duplicate = cfg.connections[0].clone();
        cfg.connections.push(duplicate);

        assert!(matches!(
            build_graph(&cfg),
            Err(RoutingError::DuplicateConnection(ConnectionId(1)))
        ));
    }
}
