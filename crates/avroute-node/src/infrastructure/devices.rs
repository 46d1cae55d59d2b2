//! In-process device controls for configured devices.
//!
//! Real drivers (serial matrices, IP-controlled displays) plug into the
//! engine through the control traits of `avroute-core`.  Until one is wired
//! in, every `[[devices]]` entry of the config is backed by a virtual
//! control. Switchers keep their crosspoints in memory and log each change.
//! Sources and destinations always report a live signal.

use std::collections::BTreeMap;
use std::sync::Arc;

use avroute_core::{
    Address, ConnectionType, ConnectorInfo, ControlHandle, ControlRegistry, DestinationControl,
    DeviceControlInfo, RouteChangedNotifier, RouteOperation, SourceControl, SwitchOutcome,
    SwitcherControl,
};
use parking_lot::Mutex;
use tracing::{debug, info};

use super::storage::config::{DeviceEntry, DeviceKind};

/// A matrix switcher whose crosspoints live in memory.
///
/// Each signal type breaks away on its own, so an output may take video
/// from one input and audio from another.
pub struct VirtualSwitcher {
    name: String,
    /// (output, single flag) → input
    crosspoints: Mutex<BTreeMap<(Address, ConnectionType), Address>>,
    notifier: Mutex<Option<RouteChangedNotifier>>,
}

impl VirtualSwitcher {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            crosspoints: Mutex::new(BTreeMap::new()),
            notifier: Mutex::new(None),
        }
    }

    /// Switches `output` to `input` as a front-panel operator would, then
    /// tells the engine.
    pub fn set_crosspoint(&self, input: Address, output: Address, connection_type: ConnectionType) {
        self.switch(input, output, connection_type);
        info!(
            switcher = %self.name,
            input,
            output,
            %connection_type,
            "crosspoint changed outside the engine"
        );
        let notifier = self.notifier.lock().clone();
        if let Some(notifier) = notifier {
            notifier.notify();
        }
    }

    fn switch(&self, input: Address, output: Address, connection_type: ConnectionType) {
        let mut crosspoints = self.crosspoints.lock();
        for flag in connection_type.flags() {
            crosspoints.insert((output, flag), input);
        }
    }
}

/// Adds `flag` to the connector at `address`, creating it if needed.
fn merge_connector(connectors: &mut Vec<ConnectorInfo>, address: Address, flag: ConnectionType) {
    match connectors.iter_mut().find(|c| c.address == address) {
        Some(connector) => connector.connection_type |= flag,
        None => connectors.push(ConnectorInfo::new(address, flag)),
    }
}

impl SwitcherControl for VirtualSwitcher {
    fn route(&self, operation: &RouteOperation) -> SwitchOutcome {
        let (Some(input), Some(output)) = (operation.local_input, operation.local_output) else {
            return SwitchOutcome::Completed(false);
        };
        self.switch(input, output, operation.connection_type);
        info!(
            switcher = %self.name,
            input,
            output,
            connection_type = %operation.connection_type,
            "crosspoint set"
        );
        SwitchOutcome::Completed(true)
    }

    fn clear_output(&self, output: Address, connection_type: ConnectionType) -> bool {
        let mut crosspoints = self.crosspoints.lock();
        let mut cleared = false;
        for flag in connection_type.flags() {
            cleared |= crosspoints.remove(&(output, flag)).is_some();
        }
        if cleared {
            info!(switcher = %self.name, output, %connection_type, "crosspoint cleared");
        }
        cleared
    }

    fn get_inputs(&self, output: Address, connection_type: ConnectionType) -> Vec<ConnectorInfo> {
        let crosspoints = self.crosspoints.lock();
        let mut inputs = Vec::new();
        for flag in connection_type.flags() {
            if let Some(input) = crosspoints.get(&(output, flag)) {
                merge_connector(&mut inputs, *input, flag);
            }
        }
        inputs
    }

    fn get_outputs(&self, input: Address, connection_type: ConnectionType) -> Vec<ConnectorInfo> {
        let mut outputs = Vec::new();
        for ((output, flag), routed) in self.crosspoints.lock().iter() {
            if *routed == input && connection_type.contains(*flag) {
                merge_connector(&mut outputs, *output, *flag);
            }
        }
        outputs
    }

    fn subscribe(&self, notifier: RouteChangedNotifier) {
        *self.notifier.lock() = Some(notifier);
    }
}

/// A source or destination device with no state of its own.
pub struct VirtualEndpoint;

impl SourceControl for VirtualEndpoint {
    fn outputs(&self) -> Vec<ConnectorInfo> {
        Vec::new()
    }
}

impl DestinationControl for VirtualEndpoint {
    fn inputs(&self) -> Vec<ConnectorInfo> {
        Vec::new()
    }

    fn signal_detected(&self, _input: Address, _connection_type: ConnectionType) -> bool {
        true
    }
}

/// Registers a virtual control for every configured device.
pub fn register_devices(registry: &ControlRegistry, devices: &[DeviceEntry]) {
    for entry in devices {
        let info = DeviceControlInfo::new(entry.device, entry.control);
        let handle = ControlHandle::new(info);
        let handle = match entry.kind {
            DeviceKind::Switcher => handle.with_switcher(Arc::new(VirtualSwitcher::new(&entry.name))),
            DeviceKind::Source => handle.with_source(Arc::new(VirtualEndpoint)),
            DeviceKind::Destination => handle.with_destination(Arc::new(VirtualEndpoint)),
        };
        registry.register(handle);
        debug!(device = %info, name = %entry.name, kind = ?entry.kind, "registered device");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use avroute_core::{Connection, ConnectionId, EndpointInfo, RoutingGraph, StaticRoute};

    fn hop(input: Address, output: Address, connection_type: ConnectionType) -> RouteOperation {
        RouteOperation::new(
            EndpointInfo::new(1, 0, 1),
            EndpointInfo::new(2, 0, 1),
            connection_type,
            1,
        )
        .for_hop(input, output)
    }

    #[test]
    fn test_route_then_query_both_directions() {
        // Arrange
        let switcher = VirtualSwitcher::new("matrix");

        // Act
        let outcome = switcher.route(&hop(2, 5, ConnectionType::VIDEO));

        // Assert
        assert_eq!(outcome, SwitchOutcome::Completed(true));
        assert_eq!(
            switcher.get_inputs(5, ConnectionType::VIDEO),
            vec![ConnectorInfo::new(2, ConnectionType::VIDEO)]
        );
        assert_eq!(
            switcher.get_outputs(2, ConnectionType::VIDEO),
            vec![ConnectorInfo::new(5, ConnectionType::VIDEO)]
        );
        assert!(switcher.get_inputs(5, ConnectionType::AUDIO).is_empty());
    }

    #[test]
    fn test_clearing_one_flag_keeps_the_other() {
        let switcher = VirtualSwitcher::new("matrix");
        switcher.route(&hop(2, 5, ConnectionType::VIDEO));
        switcher.route(&hop(2, 5, ConnectionType::AUDIO));

        assert!(switcher.clear_output(5, ConnectionType::VIDEO));

        assert!(switcher.get_inputs(5, ConnectionType::VIDEO).is_empty());
        assert_eq!(switcher.get_inputs(5, ConnectionType::AUDIO).len(), 1);
    }

    #[test]
    fn test_register_devices_declares_capabilities() {
        // Arrange
        let registry = ControlRegistry::new();
        let devices = vec![
            DeviceEntry {
                device: 10,
                control: 0,
                name: "Main matrix".to_string(),
                kind: DeviceKind::Switcher,
            },
            DeviceEntry {
                device: 40,
                control: 0,
                name: "Projector".to_string(),
                kind: DeviceKind::Destination,
            },
        ];

        // Act
        register_devices(&registry, &devices);

        // Assert
        assert_eq!(registry.len(), 2);
        assert!(registry.is_switcher(DeviceControlInfo::new(10, 0)));
        assert!(!registry.is_switcher(DeviceControlInfo::new(40, 0)));
    }

    #[test]
    fn test_video_and_audio_break_away_to_different_inputs() {
        let switcher = VirtualSwitcher::new("matrix");

        switcher.route(&hop(5, 1, ConnectionType::VIDEO));
        switcher.route(&hop(6, 1, ConnectionType::AUDIO));

        assert_eq!(
            switcher.get_inputs(1, ConnectionType::VIDEO | ConnectionType::AUDIO),
            vec![
                ConnectorInfo::new(5, ConnectionType::VIDEO),
                ConnectorInfo::new(6, ConnectionType::AUDIO),
            ]
        );
        assert_eq!(
            switcher.get_outputs(6, ConnectionType::AUDIO),
            vec![ConnectorInfo::new(1, ConnectionType::AUDIO)]
        );
        assert!(switcher.get_outputs(6, ConnectionType::VIDEO).is_empty());
    }

    #[test]
    fn test_panel_change_restores_static_route() {
        // Arrange: source 1 ──► matrix in 1, matrix out 1 ──► display 40
        let registry = Arc::new(ControlRegistry::new());
        let switcher = Arc::new(VirtualSwitcher::new("matrix"));
        registry.register(ControlHandle::new(DeviceControlInfo::new(10, 0)).with_switcher(switcher.clone()));
        let graph = Arc::new(RoutingGraph::new(registry));
        graph.watch_switchers();
        graph
            .add_connections([
                Connection::new(
                    ConnectionId(1),
                    EndpointInfo::new(1, 0, 1),
                    EndpointInfo::new(10, 0, 1),
                    ConnectionType::VIDEO,
                ),
                Connection::new(
                    ConnectionId(2),
                    EndpointInfo::new(10, 0, 1),
                    EndpointInfo::new(40, 0, 1),
                    ConnectionType::VIDEO,
                ),
            ])
            .unwrap();
        graph.set_static_routes(vec![StaticRoute {
            id: 1,
            source: EndpointInfo::new(1, 0, 1),
            destination: EndpointInfo::new(40, 0, 1),
            connection_type: ConnectionType::VIDEO,
        }]);
        assert_eq!(switcher.get_inputs(1, ConnectionType::VIDEO)[0].address, 1);

        // Act
        switcher.set_crosspoint(3, 1, ConnectionType::VIDEO);

        // Assert
        assert_eq!(
            switcher.get_inputs(1, ConnectionType::VIDEO),
            vec![ConnectorInfo::new(1, ConnectionType::VIDEO)]
        );
    }
}
