//! Placeholder switcher standing in for a peer core.
//!
//! Every peer `P` appears in the local graph as one switcher device,
//! `ph(P)`.  Its ports are:
//!
//! - **tie lines** (addresses below [`ORIGINATOR_ADDRESS_BASE`]): physical
//!   cables between this core and `P`, numbered the same on both cores;
//! - **originator slots** (addresses from [`ORIGINATOR_ADDRESS_BASE`] up):
//!   one input per remote source and one output per remote destination
//!   reachable through `P`.
//!
//! Routing across `ph(P)` cannot finish locally.  [`RemoteSwitcher::route`]
//! forwards the hop to `P` as a `RouteRequest` and answers
//! [`SwitchOutcome::Pending`]; the protocol handler calls
//! [`RemoteSwitcher::complete`] and the engine's `pending_route_finished`
//! when `P` replies.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use avroute_core::protocol::messages::{RouteRequestMessage, UnrouteRequestMessage};
use avroute_core::{
    Address, ConnectionType, ConnectorInfo, CoreMessage, DeviceControlInfo, DeviceId,
    DestinationControl, DestinationId, EndpointInfo, PeerId, RoomId, RouteOperation, SourceControl,
    SourceId, SwitchOutcome, SwitcherControl,
};

use super::messaging::MessageSender;

/// First device id used for placeholder and stand-in devices.
pub const PLACEHOLDER_DEVICE_ID_BASE: DeviceId = 0x7000_0000;

/// First placeholder address used for originator slots.
pub const ORIGINATOR_ADDRESS_BASE: Address = 1_000_000;

/// Placeholder input carrying remote source `id`.
pub fn source_slot(id: SourceId) -> Address {
    ORIGINATOR_ADDRESS_BASE.saturating_add(id.0)
}

/// Placeholder output feeding remote destination `id`.
pub fn destination_slot(id: DestinationId) -> Address {
    ORIGINATOR_ADDRESS_BASE.saturating_add(id.0)
}

/// Raw originator id behind a slot address, or `None` for a tie line.
pub fn originator_for_slot(address: Address) -> Option<u32> {
    address.checked_sub(ORIGINATOR_ADDRESS_BASE)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Crosspoint {
    input: Address,
    room: RoomId,
}

#[derive(Debug, Clone, Copy)]
struct Hop {
    output: Address,
    connection_type: ConnectionType,
    crosspoint: Crosspoint,
}

/// Switcher control for one peer core's placeholder device.
pub struct RemoteSwitcher {
    peer: PeerId,
    info: DeviceControlInfo,
    sender: Arc<dyn MessageSender>,
    /// Confirmed crosspoints, (output, single flag) → input.
    crosspoints: Mutex<BTreeMap<(Address, ConnectionType), Crosspoint>>,
    /// Hops sent to the peer and not yet answered, oldest first.  A route
    /// whose video and audio cross on different tie lines sends two hops
    /// under one operation id.
    in_flight: Mutex<HashMap<Uuid, VecDeque<Hop>>>,
}

impl RemoteSwitcher {
    pub fn new(peer: PeerId, device: DeviceId, sender: Arc<dyn MessageSender>) -> Self {
        Self {
            peer,
            info: DeviceControlInfo::new(device, 0),
            sender,
            crosspoints: Mutex::new(BTreeMap::new()),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn peer(&self) -> PeerId {
        self.peer
    }

    pub fn info(&self) -> DeviceControlInfo {
        self.info
    }

    /// Endpoint `address` on this placeholder.
    pub fn endpoint(&self, address: Address) -> EndpointInfo {
        EndpointInfo::new(self.info.device, self.info.control, address)
    }

    /// Records the peer's answer for the oldest hop of `operation_id`.
    ///
    /// Returns `false` if no hop of that operation is in flight here.
    pub fn complete(&self, operation_id: Uuid, success: bool) -> bool {
        let answered = {
            let mut in_flight = self.in_flight.lock();
            let Some(hops) = in_flight.get_mut(&operation_id) else {
                return false;
            };
            let answered = hops.pop_front();
            if hops.is_empty() {
                in_flight.remove(&operation_id);
            }
            answered
        };
        let Some(hop) = answered else {
            return false;
        };
        if success {
            let mut crosspoints = self.crosspoints.lock();
            for flag in hop.connection_type.flags() {
                crosspoints.insert((hop.output, flag), hop.crosspoint);
            }
        }
        true
    }

    /// Forgets every crosspoint and returns one entry per hop still waiting
    /// on the peer, which can no longer answer.
    pub fn reset(&self) -> Vec<Uuid> {
        self.crosspoints.lock().clear();
        self.in_flight
            .lock()
            .drain()
            .flat_map(|(id, hops)| std::iter::repeat(id).take(hops.len()))
            .collect()
    }

    /// Outputs with at least one flag switched.
    pub fn crosspoint_count(&self) -> usize {
        let crosspoints = self.crosspoints.lock();
        let outputs: BTreeSet<Address> = crosspoints.keys().map(|(output, _)| *output).collect();
        outputs.len()
    }
}

impl SwitcherControl for RemoteSwitcher {
    fn route(&self, operation: &RouteOperation) -> SwitchOutcome {
        let (Some(input), Some(output)) = (operation.local_input, operation.local_output) else {
            warn!(operation = %operation.id, peer = %self.peer, "hop without addresses");
            return SwitchOutcome::Completed(false);
        };
        self.in_flight.lock().entry(operation.id).or_default().push_back(Hop {
            output,
            connection_type: operation.connection_type,
            crosspoint: Crosspoint {
                input,
                room: operation.room_id,
            },
        });
        debug!(operation = %operation.id, peer = %self.peer, input, output, "forwarding hop");
        self.sender.send(
            self.peer,
            CoreMessage::RouteRequest(RouteRequestMessage {
                operation: operation.clone(),
            }),
        );
        SwitchOutcome::Pending
    }

    fn clear_output(&self, output: Address, connection_type: ConnectionType) -> bool {
        // One unroute per room, carrying only the flags that were switched.
        let mut cleared: Vec<(RoomId, ConnectionType)> = Vec::new();
        {
            let mut crosspoints = self.crosspoints.lock();
            for flag in connection_type.flags() {
                let Some(crosspoint) = crosspoints.remove(&(output, flag)) else {
                    continue;
                };
                match cleared.iter_mut().find(|(room, _)| *room == crosspoint.room) {
                    Some((_, flags)) => *flags |= flag,
                    None => cleared.push((crosspoint.room, flag)),
                }
            }
        }
        for (room_id, connection_type) in &cleared {
            self.sender.send(
                self.peer,
                CoreMessage::UnrouteRequest(UnrouteRequestMessage {
                    output,
                    connection_type: *connection_type,
                    room_id: *room_id,
                }),
            );
        }
        !cleared.is_empty()
    }

    fn get_inputs(&self, output: Address, connection_type: ConnectionType) -> Vec<ConnectorInfo> {
        let crosspoints = self.crosspoints.lock();
        let mut inputs: Vec<ConnectorInfo> = Vec::new();
        for flag in connection_type.flags() {
            let Some(crosspoint) = crosspoints.get(&(output, flag)) else {
                continue;
            };
            match inputs.iter_mut().find(|c| c.address == crosspoint.input) {
                Some(connector) => connector.connection_type |= flag,
                None => inputs.push(ConnectorInfo::new(crosspoint.input, flag)),
            }
        }
        inputs
    }

    fn get_outputs(&self, input: Address, connection_type: ConnectionType) -> Vec<ConnectorInfo> {
        let mut outputs: Vec<ConnectorInfo> = Vec::new();
        for ((output, flag), crosspoint) in self.crosspoints.lock().iter() {
            if crosspoint.input != input || !connection_type.contains(*flag) {
                continue;
            }
            match outputs.iter_mut().find(|c| c.address == *output) {
                Some(connector) => connector.connection_type |= *flag,
                None => outputs.push(ConnectorInfo::new(*output, *flag)),
            }
        }
        outputs
    }
}

// The placeholder is also where signals enter and leave this core, so path
// tracing treats it as a terminal when it is not switching.

impl SourceControl for RemoteSwitcher {
    fn outputs(&self) -> Vec<ConnectorInfo> {
        Vec::new()
    }
}

impl DestinationControl for RemoteSwitcher {
    fn inputs(&self) -> Vec<ConnectorInfo> {
        Vec::new()
    }

    fn signal_detected(&self, _input: Address, _connection_type: ConnectionType) -> bool {
        true
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::messaging::MockMessageSender;

    fn peer() -> PeerId {
        PeerId::new(([10, 0, 0, 2], 5000).into(), Uuid::from_u128(2))
    }

    fn hop(input: Address, output: Address) -> RouteOperation {
        RouteOperation::new(
            EndpointInfo::new(1, 0, 1),
            EndpointInfo::new(2, 0, 1),
            ConnectionType::VIDEO,
            4,
        )
        .for_hop(input, output)
    }

    #[test]
    fn test_slots_round_trip_and_tie_lines_are_not_slots() {
        assert_eq!(originator_for_slot(source_slot(SourceId(7))), Some(7));
        assert_eq!(originator_for_slot(destination_slot(DestinationId(0))), Some(0));
        assert_eq!(originator_for_slot(12), None);
    }

    #[test]
    fn test_route_forwards_request_and_waits() {
        // Arrange
        let mut sender = MockMessageSender::new();
        sender
            .expect_send()
            .withf(|to, message| {
                *to == peer()
                    && matches!(
                        message,
                        CoreMessage::RouteRequest(RouteRequestMessage { operation })
                            if operation.local_input == Some(3) && operation.local_output == Some(9)
                    )
            })
            .times(1)
            .return_const(());
        let switcher = RemoteSwitcher::new(peer(), PLACEHOLDER_DEVICE_ID_BASE, Arc::new(sender));

        // Act
        let outcome = switcher.route(&hop(3, 9));

        // Assert
        assert_eq!(outcome, SwitchOutcome::Pending);
        assert!(switcher.get_inputs(9, ConnectionType::VIDEO).is_empty());
    }

    #[test]
    fn test_successful_completion_records_crosspoint() {
        let mut sender = MockMessageSender::new();
        sender.expect_send().return_const(());
        let switcher = RemoteSwitcher::new(peer(), PLACEHOLDER_DEVICE_ID_BASE, Arc::new(sender));
        let operation = hop(3, 9);
        switcher.route(&operation);

        assert!(switcher.complete(operation.id, true));
        assert!(!switcher.complete(operation.id, true));

        assert_eq!(
            switcher.get_inputs(9, ConnectionType::VIDEO),
            vec![ConnectorInfo::new(3, ConnectionType::VIDEO)]
        );
        assert_eq!(
            switcher.get_outputs(3, ConnectionType::VIDEO),
            vec![ConnectorInfo::new(9, ConnectionType::VIDEO)]
        );
    }

    #[test]
    fn test_clear_output_sends_unroute_with_room() {
        // Arrange
        let mut sender = MockMessageSender::new();
        sender
            .expect_send()
            .withf(|_, message| matches!(message, CoreMessage::RouteRequest(_)))
            .return_const(());
        sender
            .expect_send()
            .withf(|_, message| {
                *message
                    == CoreMessage::UnrouteRequest(UnrouteRequestMessage {
                        output: 9,
                        connection_type: ConnectionType::VIDEO,
                        room_id: 4,
                    })
            })
            .times(1)
            .return_const(());
        let switcher = RemoteSwitcher::new(peer(), PLACEHOLDER_DEVICE_ID_BASE, Arc::new(sender));
        let operation = hop(3, 9);
        switcher.route(&operation);
        switcher.complete(operation.id, true);

        // Act / Assert
        assert!(switcher.clear_output(9, ConnectionType::VIDEO));
        assert!(!switcher.clear_output(9, ConnectionType::VIDEO));
        assert_eq!(switcher.crosspoint_count(), 0);
    }

    #[test]
    fn test_reset_returns_unanswered_operations() {
        let mut sender = MockMessageSender::new();
        sender.expect_send().return_const(());
        let switcher = RemoteSwitcher::new(peer(), PLACEHOLDER_DEVICE_ID_BASE, Arc::new(sender));
        let waiting = hop(1, 2);
        switcher.route(&waiting);

        assert_eq!(switcher.reset(), vec![waiting.id]);
        assert!(!switcher.complete(waiting.id, true));
    }

    #[test]
    fn test_hops_sharing_an_operation_complete_one_at_a_time() {
        // Arrange: video on tie line 3, audio on tie line 4, same operation.
        let mut sender = MockMessageSender::new();
        sender.expect_send().times(2).return_const(());
        let switcher = RemoteSwitcher::new(peer(), PLACEHOLDER_DEVICE_ID_BASE, Arc::new(sender));
        let video = hop(3, 9);
        let audio = video.for_types(ConnectionType::AUDIO).for_hop(4, 10);
        switcher.route(&video);
        switcher.route(&audio);

        // Act
        let first = switcher.complete(video.id, true);
        let second = switcher.complete(video.id, true);
        let third = switcher.complete(video.id, true);

        // Assert
        assert!(first && second);
        assert!(!third);
        assert_eq!(switcher.crosspoint_count(), 2);
        assert_eq!(
            switcher.get_inputs(10, ConnectionType::AUDIO),
            vec![ConnectorInfo::new(4, ConnectionType::AUDIO)]
        );
    }
}
