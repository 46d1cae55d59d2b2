//! [`RoutingGraph`]: the single authority for what is connected to what.
//!
//! # How a route is made (for beginners)
//!
//! 1. **Search.**  One breadth-first expansion from the source endpoint per
//!    signal type flag, since video and audio may run on separate cables.
//!    Only switcher controls are expanded; every other control is a leaf.
//!    Each control is settled once, by the first (fewest-hops) path to reach
//!    it.  Flags whose searches pick the same links travel together as one
//!    [`RouteLeg`].  Every flag needs a path or nothing is routed.
//! 2. **Claim.**  Every link of every leg is recorded in the usage ledger
//!    for the requesting room.  Claims are all-or-nothing.
//! 3. **Dispatch.**  Each switcher on each leg is told to connect the input
//!    the signal arrives on to the output it leaves from.  A switcher may
//!    answer later (a proxy for another core), so hops of all legs are
//!    counted in one pending entry keyed by the operation id.
//! 4. **Finish.**  [`RoutingEvent::RouteFinished`] fires exactly once: when
//!    the last hop reports success, or at the first failure.  A failed
//!    operation gives back the claims it made.
//!
//! # Locking
//!
//! Each table has its own lock.  When more than one is needed they are taken
//! in the order connections, usages.  No lock is held while a switcher is
//! asked to route or clear, and events are sent after the locks are dropped.
//!
//! # External switching
//!
//! [`RoutingGraph::watch_switchers`] hands every switcher a notifier.  A
//! switcher changed behind the engine's back (front panel, another
//! controller) calls it, and static routes through that switcher are
//! re-issued.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::connection::{Connection, ConnectionId, DYNAMIC_CONNECTION_ID_BASE};
use crate::domain::control::{ControlRegistry, SwitchOutcome};
use crate::domain::endpoint::{ConnectionType, ConnectorInfo, DeviceControlInfo, EndpointInfo, RoomId};
use crate::domain::operation::RouteOperation;
use crate::domain::originator::{
    Destination, DestinationGroup, DestinationGroupId, DestinationId, Source, SourceId,
};

use super::connections::{ConnectionsIndex, Direction};
use super::error::RoutingError;
use super::originators::OriginatorTable;
use super::static_routes::{StaticRoute, StaticRouteSet, STATIC_ROUTE_ROOM};
use super::usage::{ConnectionUsageInfo, UsageLedger};

/// Capacity of the event channel; slow subscribers see `Lagged`.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// An ordered chain of links from a source endpoint to a destination endpoint.
pub type Path = Vec<Connection>;

/// The share of a route carried by one path: the flags that travel together
/// and the links they take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteLeg {
    pub connection_type: ConnectionType,
    pub path: Path,
}

impl RouteLeg {
    fn takes_links(&self, path: &[Connection]) -> bool {
        self.path.len() == path.len() && self.path.iter().zip(path).all(|(a, b)| a.id == b.id)
    }
}

/// Adds `path` for `flag`, joining the leg that already takes the same links.
fn merge_leg(legs: &mut Vec<RouteLeg>, flag: ConnectionType, path: Path) {
    match legs.iter_mut().find(|leg| leg.takes_links(&path)) {
        Some(leg) => leg.connection_type |= flag,
        None => legs.push(RouteLeg {
            connection_type: flag,
            path,
        }),
    }
}

/// Notifications published after the graph's state has changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingEvent {
    /// A route operation reached a terminal state.
    RouteFinished { operation_id: Uuid, success: bool },
    /// A switcher's crosspoints changed.
    RouteChanged { control: DeviceControlInfo },
    ConnectionsChanged,
    SourcesChanged,
    DestinationsChanged,
    /// Claims on these connections were added or released.
    ConnectionUsageChanged { connections: Vec<ConnectionId> },
}

/// Bookkeeping for an operation whose hops have not all answered.
#[derive(Debug)]
struct PendingRoute {
    /// Hops still outstanding, plus one while hops are being dispatched.
    outstanding: usize,
    room: RoomId,
    /// Flags newly claimed by this operation, released if it fails.
    claimed: Vec<(ConnectionId, ConnectionType)>,
}

/// The routing engine.
///
/// Shared behind an `Arc`; every method takes `&self`.
pub struct RoutingGraph {
    controls: Arc<ControlRegistry>,
    connections: RwLock<ConnectionsIndex>,
    usages: Mutex<UsageLedger>,
    static_routes: Mutex<StaticRouteSet>,
    pending: Mutex<HashMap<Uuid, PendingRoute>>,
    sources: RwLock<OriginatorTable<Source>>,
    destinations: RwLock<OriginatorTable<Destination>>,
    groups: RwLock<BTreeMap<DestinationGroupId, DestinationGroup>>,
    next_connection_id: AtomicU32,
    events: broadcast::Sender<RoutingEvent>,
}

impl RoutingGraph {
    /// Creates an empty graph resolving controls through `controls`.
    pub fn new(controls: Arc<ControlRegistry>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            controls,
            connections: RwLock::new(ConnectionsIndex::new()),
            usages: Mutex::new(UsageLedger::new()),
            static_routes: Mutex::new(StaticRouteSet::new()),
            pending: Mutex::new(HashMap::new()),
            sources: RwLock::new(OriginatorTable::new()),
            destinations: RwLock::new(OriginatorTable::new()),
            groups: RwLock::new(BTreeMap::new()),
            next_connection_id: AtomicU32::new(DYNAMIC_CONNECTION_ID_BASE),
            events,
        }
    }

    pub fn controls(&self) -> &Arc<ControlRegistry> {
        &self.controls
    }

    /// Has every registered switcher, and every one registered later, report
    /// crosspoint changes made outside the engine.  Each report re-applies
    /// the static routes through that switcher.
    pub fn watch_switchers(self: &Arc<Self>) {
        let graph = Arc::downgrade(self);
        self.controls.set_route_observer(Arc::new(move |control| {
            if let Some(graph) = graph.upgrade() {
                graph.handle_switcher_route_changed(control);
            }
        }));
    }

    /// Subscribes to [`RoutingEvent`]s published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<RoutingEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: RoutingEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    // ── Connections ──────────────────────────────────────────────────────────

    /// Returns a fresh id from the dynamic range.
    pub fn allocate_connection_id(&self) -> ConnectionId {
        ConnectionId(self.next_connection_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Adds one connection and re-runs topology maintenance.
    ///
    /// # Errors
    ///
    /// [`RoutingError::UnsupportedConnectionType`] if an endpoint's control
    /// declares connectors without every type of the link, or see
    /// [`ConnectionsIndex::add_connection`].
    pub fn add_connection(&self, connection: Connection) -> Result<(), RoutingError> {
        self.check_declared_types(&connection)?;
        self.connections.write().add_connection(connection)?;
        self.connections_changed();
        Ok(())
    }

    /// Adds a batch of connections with a single maintenance pass.
    ///
    /// Connections before the first invalid one stay indexed.
    ///
    /// # Errors
    ///
    /// See [`RoutingGraph::add_connection`].
    pub fn add_connections(
        &self,
        connections: impl IntoIterator<Item = Connection>,
    ) -> Result<(), RoutingError> {
        let result = {
            let mut index = self.connections.write();
            connections
                .into_iter()
                .try_for_each(|c| {
                    self.check_declared_types(&c)?;
                    index.add_connection(c)
                })
        };
        self.connections_changed();
        result
    }

    /// Removes a connection, dropping any claims on it.
    pub fn remove_connection(&self, id: ConnectionId) -> Option<Connection> {
        let removed = self.connections.write().remove_connection(id);
        if removed.is_some() {
            self.connections_changed();
        }
        removed
    }

    /// Replaces a connection with a new version under the same id.
    ///
    /// # Errors
    ///
    /// [`RoutingError::UnsupportedConnectionType`] as for
    /// [`RoutingGraph::add_connection`], or see
    /// [`ConnectionsIndex::replace_connection`].
    pub fn replace_connection(&self, connection: Connection) -> Result<(), RoutingError> {
        self.check_declared_types(&connection)?;
        self.connections.write().replace_connection(connection)?;
        self.connections_changed();
        Ok(())
    }

    pub fn connection(&self, id: ConnectionId) -> Option<Connection> {
        self.connections.read().get(id).cloned()
    }

    /// Snapshot of every connection in id order.
    pub fn connections(&self) -> Vec<Connection> {
        self.connections.read().iter().cloned().collect()
    }

    /// Runs `f` against the index under the read lock.
    pub fn with_connections<R>(&self, f: impl FnOnce(&ConnectionsIndex) -> R) -> R {
        f(&self.connections.read())
    }

    /// A link may only carry types both of its endpoints declare.  Controls
    /// that declare no connectors are not checked.
    fn check_declared_types(&self, connection: &Connection) -> Result<(), RoutingError> {
        let ends = [
            (
                connection.source,
                self.controls.declared_output_types(connection.source),
            ),
            (
                connection.destination,
                self.controls.declared_input_types(connection.destination),
            ),
        ];
        for (endpoint, supported) in ends {
            let Some(supported) = supported else {
                continue;
            };
            if !supported.contains(connection.connection_type) {
                return Err(RoutingError::UnsupportedConnectionType {
                    connection: connection.id,
                    endpoint,
                    requested: connection.connection_type,
                    supported,
                });
            }
        }
        Ok(())
    }

    /// Purges stale claims, announces the change, resubscribes to switchers
    /// and restores static routes.
    fn connections_changed(&self) {
        let purged = {
            let connections = self.connections.read();
            self.usages.lock().remove_invalid(&connections)
        };
        self.emit(RoutingEvent::ConnectionsChanged);
        if !purged.is_empty() {
            debug!(count = purged.len(), "purged usage rows for removed connections");
            self.emit(RoutingEvent::ConnectionUsageChanged { connections: purged });
        }
        self.controls.resubscribe();
        if !self.static_routes.lock().is_empty() {
            self.update_static_routes();
        }
    }

    // ── Sources, destinations and groups ─────────────────────────────────────

    /// Adds or replaces a source, returning the previous entry.
    pub fn add_source(&self, source: Source) -> Option<Source> {
        let previous = self.sources.write().insert(source);
        self.emit(RoutingEvent::SourcesChanged);
        previous
    }

    pub fn remove_source(&self, id: SourceId) -> Option<Source> {
        let removed = self.sources.write().remove(id);
        if removed.is_some() {
            self.emit(RoutingEvent::SourcesChanged);
        }
        removed
    }

    pub fn source(&self, id: SourceId) -> Option<Source> {
        self.sources.read().get(id).cloned()
    }

    pub fn sources(&self) -> Vec<Source> {
        self.sources.read().iter().cloned().collect()
    }

    /// Adds or replaces a destination, returning the previous entry.
    pub fn add_destination(&self, destination: Destination) -> Option<Destination> {
        let previous = self.destinations.write().insert(destination);
        self.emit(RoutingEvent::DestinationsChanged);
        previous
    }

    pub fn remove_destination(&self, id: DestinationId) -> Option<Destination> {
        let removed = self.destinations.write().remove(id);
        if removed.is_some() {
            self.emit(RoutingEvent::DestinationsChanged);
        }
        removed
    }

    pub fn destination(&self, id: DestinationId) -> Option<Destination> {
        self.destinations.read().get(id).cloned()
    }

    pub fn destinations(&self) -> Vec<Destination> {
        self.destinations.read().iter().cloned().collect()
    }

    pub fn add_destination_group(&self, group: DestinationGroup) {
        self.groups.write().insert(group.id, group);
    }

    pub fn destination_group(&self, id: DestinationGroupId) -> Option<DestinationGroup> {
        self.groups.read().get(&id).cloned()
    }

    pub fn destination_groups(&self) -> Vec<DestinationGroup> {
        self.groups.read().values().cloned().collect()
    }

    // ── Usage queries ────────────────────────────────────────────────────────

    /// Snapshot of every usage row.
    pub fn usages(&self) -> Vec<ConnectionUsageInfo> {
        self.usages.lock().iter().cloned().collect()
    }

    pub fn usage(&self, connection: ConnectionId) -> Option<ConnectionUsageInfo> {
        self.usages.lock().get(connection).cloned()
    }

    /// Connections currently claimed by `room`.
    pub fn usages_for_room(&self, room: RoomId) -> Vec<ConnectionId> {
        self.usages.lock().connections_for_room(room)
    }

    /// Releases every claim `room` holds without touching switchers.
    ///
    /// Used when a room shuts down and its routes are abandoned rather than
    /// torn down.
    pub fn release_room(&self, room: RoomId) -> Vec<ConnectionId> {
        let released = self.usages.lock().remove_room_everywhere(room);
        if !released.is_empty() {
            info!(room, count = released.len(), "released room claims");
            self.emit(RoutingEvent::ConnectionUsageChanged {
                connections: released.clone(),
            });
        }
        released
    }

    // ── Path discovery ───────────────────────────────────────────────────────

    /// Returns the first available legs from `source` to `destination` for
    /// `room`, one per group of flags that share a path.
    ///
    /// `None` if any flag of `connection_type` has no candidate that is
    /// present, unrestricted and free of other sources.
    pub fn find_paths(
        &self,
        source: EndpointInfo,
        destination: EndpointInfo,
        connection_type: ConnectionType,
        room: RoomId,
    ) -> Option<Vec<RouteLeg>> {
        let connections = self.connections.read();
        let usages = self.usages.lock();
        self.search_legs(&connections, &usages, source, destination, connection_type, room)
    }

    fn search_legs(
        &self,
        index: &ConnectionsIndex,
        usages: &UsageLedger,
        source: EndpointInfo,
        destination: EndpointInfo,
        connection_type: ConnectionType,
        room: RoomId,
    ) -> Option<Vec<RouteLeg>> {
        if connection_type.is_empty() {
            return None;
        }
        let mut legs = Vec::new();
        for flag in connection_type.flags() {
            let path = self.search(index, usages, source, destination, flag, room)?;
            merge_leg(&mut legs, flag, path);
        }
        Some(legs)
    }

    /// Breadth-first search for a single flag.
    fn search(
        &self,
        index: &ConnectionsIndex,
        usages: &UsageLedger,
        source: EndpointInfo,
        destination: EndpointInfo,
        connection_type: ConnectionType,
        room: RoomId,
    ) -> Option<Path> {
        if connection_type.is_empty() {
            return None;
        }
        let usable = |link: &Connection| {
            link.connection_type.contains(connection_type)
                && link.is_source_device_enabled(source.device)
                && link.is_room_enabled(room)
                && usages.can_route_connection(link.id, source, room, connection_type)
        };

        // Only the first hop is pinned to the requested address.
        let first = index
            .get_output_connection(source, connection_type)
            .filter(|link| usable(link))?;
        if first.destination == destination {
            return Some(vec![first.clone()]);
        }

        let mut settled: HashMap<DeviceControlInfo, Path> = HashMap::new();
        settled.insert(source.device_control(), Vec::new());
        let entry = first.destination.device_control();
        settled.insert(entry, vec![first.clone()]);
        let mut queue = VecDeque::from([entry]);

        while let Some(control) = queue.pop_front() {
            if !self.controls.is_switcher(control) {
                continue;
            }
            let path = settled.get(&control).cloned().unwrap_or_default();
            for link in index.get_connections_for_control(control, Direction::Output, connection_type) {
                if !usable(link) {
                    continue;
                }
                let mut extended = path.clone();
                extended.push(link.clone());
                if link.destination == destination {
                    return Some(extended);
                }
                let next = link.destination.device_control();
                if settled.contains_key(&next) {
                    continue;
                }
                settled.insert(next, extended);
                queue.push_back(next);
            }
        }
        None
    }

    // ── Active-path tracing ──────────────────────────────────────────────────

    /// Follows the live crosspoints forward from `source`, flag by flag.
    ///
    /// Each returned leg ends at a control that is not switching the signal
    /// any further; flags that follow the same links share a leg.  With
    /// `signal_detected` set, a hop whose control reports no live signal ends
    /// the walk without producing a leg.
    pub fn find_active_paths(
        &self,
        source: EndpointInfo,
        connection_type: ConnectionType,
        signal_detected: bool,
    ) -> Vec<RouteLeg> {
        let index = self.connections.read();
        let mut legs = Vec::new();
        for flag in connection_type.flags() {
            let Some(first) = index.get_output_connection(source, flag) else {
                continue;
            };
            let mut visited = HashSet::from([first.id]);
            let mut paths = Vec::new();
            self.trace_forward(
                &index,
                vec![first.clone()],
                flag,
                signal_detected,
                &mut visited,
                &mut paths,
            );
            for path in paths {
                merge_leg(&mut legs, flag, path);
            }
        }
        legs
    }

    fn trace_forward(
        &self,
        index: &ConnectionsIndex,
        path: Path,
        connection_type: ConnectionType,
        signal_detected: bool,
        visited: &mut HashSet<ConnectionId>,
        paths: &mut Vec<Path>,
    ) {
        let Some(last) = path.last() else {
            return;
        };
        let arrival = last.destination;
        let control = arrival.device_control();
        if signal_detected
            && !self
                .controls
                .signal_detected(control, arrival.address, connection_type)
        {
            return;
        }
        let Some(switcher) = self.controls.switcher(control) else {
            paths.push(path);
            return;
        };

        let mut extended = false;
        for output in switcher.get_outputs(arrival.address, connection_type) {
            let Some(link) =
                index.get_output_connection(arrival.with_address(output.address), connection_type)
            else {
                continue;
            };
            if !visited.insert(link.id) {
                continue;
            }
            let mut next = path.clone();
            next.push(link.clone());
            self.trace_forward(index, next, connection_type, signal_detected, visited, paths);
            extended = true;
        }
        // A switcher that is also a sink (a display with selectable inputs)
        // terminates the path when it is not passing the signal on.
        if !extended
            && self
                .controls
                .get(control)
                .is_some_and(|handle| handle.destination.is_some())
        {
            paths.push(path);
        }
    }

    /// Endpoints currently receiving the signal leaving `source`.
    pub fn get_active_destination_endpoints(
        &self,
        source: EndpointInfo,
        connection_type: ConnectionType,
        signal_detected: bool,
    ) -> Vec<EndpointInfo> {
        let mut endpoints: Vec<EndpointInfo> = self
            .find_active_paths(source, connection_type, signal_detected)
            .iter()
            .filter_map(|leg| leg.path.last().map(|link| link.destination))
            .collect();
        endpoints.sort();
        endpoints.dedup();
        endpoints
    }

    /// Source endpoints whose signal currently arrives at `destination`.
    pub fn get_active_source_endpoints(
        &self,
        destination: EndpointInfo,
        connection_type: ConnectionType,
        signal_detected: bool,
    ) -> Vec<EndpointInfo> {
        let index = self.connections.read();
        let mut found = Vec::new();
        let control = destination.device_control();
        for flag in connection_type.flags() {
            if signal_detected
                && !self
                    .controls
                    .signal_detected(control, destination.address, flag)
            {
                continue;
            }
            let Some(link) = index.get_input_connection(control, destination.address, flag) else {
                continue;
            };
            let mut visited = HashSet::from([link.id]);
            self.trace_backward(&index, link, flag, signal_detected, &mut visited, &mut found);
        }
        found.sort();
        found.dedup();
        found
    }

    fn trace_backward(
        &self,
        index: &ConnectionsIndex,
        link: &Connection,
        connection_type: ConnectionType,
        signal_detected: bool,
        visited: &mut HashSet<ConnectionId>,
        found: &mut Vec<EndpointInfo>,
    ) {
        let origin = link.source;
        let control = origin.device_control();
        let Some(switcher) = self.controls.switcher(control) else {
            found.push(origin);
            return;
        };
        let inputs = switcher.get_inputs(origin.address, connection_type);
        // A switcher that is also a source originates the signal itself when
        // nothing is switched onto this output.
        if inputs.is_empty()
            && self
                .controls
                .get(control)
                .is_some_and(|handle| handle.source.is_some())
        {
            found.push(origin);
            return;
        }
        for input in inputs {
            if signal_detected
                && !self
                    .controls
                    .signal_detected(control, input.address, connection_type)
            {
                continue;
            }
            let Some(upstream) = index.get_input_connection(control, input.address, connection_type)
            else {
                continue;
            };
            if visited.insert(upstream.id) {
                self.trace_backward(index, upstream, connection_type, signal_detected, visited, found);
            }
        }
    }

    // ── Route ────────────────────────────────────────────────────────────────

    /// Routes `source` to `destination` for `room` under a new operation id.
    ///
    /// Returns `false` if no path is available or a hop fails synchronously.
    /// `true` means the route completed or is waiting on pending hops; watch
    /// for [`RoutingEvent::RouteFinished`] to learn the outcome.
    pub fn route(
        &self,
        source: EndpointInfo,
        destination: EndpointInfo,
        connection_type: ConnectionType,
        room: RoomId,
    ) -> bool {
        self.route_operation(RouteOperation::new(source, destination, connection_type, room))
    }

    /// Routes a prepared operation, keeping its id.
    pub fn route_operation(&self, operation: RouteOperation) -> bool {
        let Some((legs, claimed)) = self.claim_legs(&operation) else {
            debug!(
                operation = %operation.id,
                source = %operation.source,
                destination = %operation.destination,
                connection_type = %operation.connection_type,
                "no path available"
            );
            return false;
        };
        if !claimed.is_empty() {
            self.emit(RoutingEvent::ConnectionUsageChanged {
                connections: claimed.iter().map(|(id, _)| *id).collect(),
            });
        }
        debug!(
            operation = %operation.id,
            legs = legs.len(),
            links = legs.iter().map(|leg| leg.path.len()).sum::<usize>(),
            "dispatching route"
        );
        self.dispatch(&operation, &legs, claimed)
    }

    /// Routes a configured source to a configured destination on the types
    /// both support.
    ///
    /// # Errors
    ///
    /// [`RoutingError::UnknownSource`] / [`RoutingError::UnknownDestination`].
    pub fn route_source(
        &self,
        source: SourceId,
        destination: DestinationId,
        room: RoomId,
    ) -> Result<bool, RoutingError> {
        let source = self.source(source).ok_or(RoutingError::UnknownSource(source))?;
        let destination = self
            .destination(destination)
            .ok_or(RoutingError::UnknownDestination(destination))?;
        let connection_type = source.connection_type.intersection(destination.connection_type);
        Ok(self.route(source.endpoint, destination.endpoint, connection_type, room))
    }

    /// Routes `source` to every member of `group`; returns how many succeeded.
    ///
    /// # Errors
    ///
    /// [`RoutingError::UnknownSource`] / [`RoutingError::UnknownDestinationGroup`].
    pub fn route_to_group(
        &self,
        source: SourceId,
        group: DestinationGroupId,
        room: RoomId,
    ) -> Result<usize, RoutingError> {
        if self.source(source).is_none() {
            return Err(RoutingError::UnknownSource(source));
        }
        let group = self
            .destination_group(group)
            .ok_or(RoutingError::UnknownDestinationGroup(group))?;
        let mut routed = 0;
        for member in &group.destinations {
            match self.route_source(source, *member, room) {
                Ok(true) => routed += 1,
                Ok(false) => {}
                Err(e) => warn!(group = %group.id, error = %e, "skipping group member"),
            }
        }
        Ok(routed)
    }

    /// Finds a leg for every flag and claims each link of each leg for the
    /// operation's room.
    fn claim_legs(
        &self,
        operation: &RouteOperation,
    ) -> Option<(Vec<RouteLeg>, Vec<(ConnectionId, ConnectionType)>)> {
        let connections = self.connections.read();
        let mut usages = self.usages.lock();
        let legs = self.search_legs(
            &connections,
            &usages,
            operation.source,
            operation.destination,
            operation.connection_type,
            operation.room_id,
        )?;

        let mut claimed = Vec::new();
        for leg in &legs {
            let share = operation.for_types(leg.connection_type);
            for link in &leg.path {
                match usages.claim_connection(link.id, &share) {
                    Ok(added) if added.is_empty() => {}
                    Ok(added) => claimed.push((link.id, added)),
                    Err(e) => {
                        for (id, flags) in &claimed {
                            usages.remove_room(*id, operation.room_id, *flags);
                        }
                        warn!(operation = %operation.id, error = %e, "claim failed on a searched path");
                        return None;
                    }
                }
            }
        }
        Some((legs, claimed))
    }

    /// Asks every switcher on every leg to make its hop.
    fn dispatch(
        &self,
        operation: &RouteOperation,
        legs: &[RouteLeg],
        claimed: Vec<(ConnectionId, ConnectionType)>,
    ) -> bool {
        let id = operation.id;
        self.pending.lock().insert(
            id,
            PendingRoute {
                outstanding: 1,
                room: operation.room_id,
                claimed,
            },
        );

        for leg in legs {
            let share = operation.for_types(leg.connection_type);
            for hop in leg.path.windows(2) {
                let (inbound, outbound) = (&hop[0], &hop[1]);
                let control = inbound.destination.device_control();
                // Fails if an earlier pending hop has already reported failure.
                if !self.pending_route_started(id) {
                    return false;
                }
                let Some(switcher) = self.controls.switcher(control) else {
                    warn!(operation = %id, %control, "path crosses a control that cannot switch");
                    self.pending_route_finished(id, false);
                    return false;
                };
                let request = share.for_hop(inbound.destination.address, outbound.source.address);
                match switcher.route(&request) {
                    SwitchOutcome::Completed(true) => {
                        self.emit(RoutingEvent::RouteChanged { control });
                        self.pending_route_finished(id, true);
                    }
                    SwitchOutcome::Completed(false) => {
                        warn!(
                            operation = %id,
                            %control,
                            input = inbound.destination.address,
                            output = outbound.source.address,
                            connection_type = %leg.connection_type,
                            "switcher refused hop"
                        );
                        self.pending_route_finished(id, false);
                        return false;
                    }
                    SwitchOutcome::Pending => {
                        debug!(operation = %id, %control, "hop pending");
                    }
                }
            }
        }

        // Drop the dispatch guard; fires the success event if nothing is pending.
        self.pending_route_finished(id, true)
    }

    /// Registers one more outstanding hop for `operation_id`.
    ///
    /// Returns `false` if the operation is not in flight.
    pub fn pending_route_started(&self, operation_id: Uuid) -> bool {
        match self.pending.lock().get_mut(&operation_id) {
            Some(entry) => {
                entry.outstanding += 1;
                true
            }
            None => false,
        }
    }

    /// Reports the outcome of one outstanding hop of `operation_id`.
    ///
    /// The operation finishes when its count drains to zero or on the first
    /// failure, at which point its claims are released.  Returns `false` for
    /// an operation that is not in flight; such late reports are ignored.
    pub fn pending_route_finished(&self, operation_id: Uuid, success: bool) -> bool {
        let finished = {
            let mut pending = self.pending.lock();
            let Some(entry) = pending.get_mut(&operation_id) else {
                debug!(operation = %operation_id, "ignoring completion for finished route");
                return false;
            };
            if success {
                entry.outstanding = entry.outstanding.saturating_sub(1);
                if entry.outstanding > 0 {
                    return true;
                }
            }
            pending.remove(&operation_id)
        };

        if let Some(entry) = finished {
            if !success {
                self.roll_back(entry.room, &entry.claimed);
            }
            info!(operation = %operation_id, success, "route finished");
            self.emit(RoutingEvent::RouteFinished {
                operation_id,
                success,
            });
        }
        true
    }

    /// Returns `true` while `operation_id` has hops outstanding.
    pub fn is_route_pending(&self, operation_id: Uuid) -> bool {
        self.pending.lock().contains_key(&operation_id)
    }

    fn roll_back(&self, room: RoomId, claimed: &[(ConnectionId, ConnectionType)]) {
        if claimed.is_empty() {
            return;
        }
        {
            let mut usages = self.usages.lock();
            for (id, flags) in claimed {
                usages.remove_room(*id, room, *flags);
            }
        }
        debug!(room, count = claimed.len(), "rolled back claims of failed route");
        self.emit(RoutingEvent::ConnectionUsageChanged {
            connections: claimed.iter().map(|(id, _)| *id).collect(),
        });
    }

    // ── Unroute ──────────────────────────────────────────────────────────────

    /// Tears down `room`'s active route from `source` to `destination`.
    ///
    /// Returns `false`, changing nothing, when no active path connects them.
    pub fn unroute(
        &self,
        source: EndpointInfo,
        destination: EndpointInfo,
        connection_type: ConnectionType,
        room: RoomId,
    ) -> bool {
        let legs: Vec<RouteLeg> = self
            .find_active_paths(source, connection_type, false)
            .into_iter()
            .filter(|leg| leg.path.last().is_some_and(|link| link.destination == destination))
            .collect();
        if legs.is_empty() {
            debug!(%source, %destination, "nothing to unroute");
            return false;
        }
        for leg in &legs {
            self.tear_down(&leg.path, leg.connection_type, room);
        }
        true
    }

    /// Tears down `room`'s routes into `destination`, whatever feeds it.
    pub fn unroute_destination(
        &self,
        destination: EndpointInfo,
        connection_type: ConnectionType,
        room: RoomId,
    ) -> bool {
        let sources = self.get_active_source_endpoints(destination, connection_type, false);
        let mut any = false;
        for source in sources {
            any |= self.unroute(source, destination, connection_type, room);
        }
        any
    }

    /// Unroutes every member of `group`; returns how many were torn down.
    ///
    /// # Errors
    ///
    /// [`RoutingError::UnknownDestinationGroup`].
    pub fn unroute_group(
        &self,
        group: DestinationGroupId,
        room: RoomId,
    ) -> Result<usize, RoutingError> {
        let group = self
            .destination_group(group)
            .ok_or(RoutingError::UnknownDestinationGroup(group))?;
        let mut unrouted = 0;
        for member in &group.destinations {
            let Some(destination) = self.destination(*member) else {
                continue;
            };
            if self.unroute_destination(destination.endpoint, destination.connection_type, room) {
                unrouted += 1;
            }
        }
        Ok(unrouted)
    }

    /// Walks `path` from the destination back toward the source, releasing
    /// the room's claims and clearing switcher outputs nobody else uses.
    ///
    /// Clearing stops at the first output still claimed by another room or
    /// at a junction where the same input feeds other outputs.  Release stops
    /// at a junction whose other branches the room itself still uses.
    fn tear_down(&self, path: &[Connection], connection_type: ConnectionType, room: RoomId) {
        let mut released = Vec::new();
        let mut clearing = true;

        for i in (0..path.len()).rev() {
            let link = &path[i];
            let still_claimed = {
                let mut usages = self.usages.lock();
                if usages.remove_room(link.id, room, connection_type) {
                    released.push(link.id);
                }
                usages.is_claimed(link.id, connection_type)
            };
            if i == 0 {
                break;
            }

            let control = link.source.device_control();
            let Some(switcher) = self.controls.switcher(control) else {
                break;
            };
            if clearing && !still_claimed {
                if switcher.clear_output(link.source.address, connection_type) {
                    self.emit(RoutingEvent::RouteChanged { control });
                }
            } else {
                clearing = false;
            }

            let input = path[i - 1].destination.address;
            let others: Vec<ConnectorInfo> = switcher
                .get_outputs(input, connection_type)
                .into_iter()
                .filter(|output| output.address != link.source.address)
                .collect();
            if !others.is_empty() {
                clearing = false;
                if self.room_uses_any_output(control, &others, room, connection_type) {
                    break;
                }
            }
        }

        if !released.is_empty() {
            self.emit(RoutingEvent::ConnectionUsageChanged {
                connections: released,
            });
        }
    }

    fn room_uses_any_output(
        &self,
        control: DeviceControlInfo,
        outputs: &[ConnectorInfo],
        room: RoomId,
        connection_type: ConnectionType,
    ) -> bool {
        let connections = self.connections.read();
        let usages = self.usages.lock();
        outputs.iter().any(|output| {
            let endpoint = EndpointInfo::new(control.device, control.control, output.address);
            connections
                .get_output_connection(endpoint, connection_type)
                .is_some_and(|link| usages.is_claimed_by(link.id, room, connection_type))
        })
    }

    // ── Static routes ────────────────────────────────────────────────────────

    /// Replaces the static route set and applies it from scratch.
    pub fn set_static_routes(&self, routes: Vec<StaticRoute>) {
        self.static_routes.lock().set_routes(routes);
        self.update_static_routes();
    }

    pub fn static_routes(&self) -> Vec<StaticRoute> {
        self.static_routes.lock().routes()
    }

    /// Releases every static claim, then resolves, claims and dispatches each
    /// static route again.
    pub fn update_static_routes(&self) {
        let routes = {
            let mut set = self.static_routes.lock();
            set.clear_paths();
            set.routes()
        };
        let released = self.usages.lock().remove_room_everywhere(STATIC_ROUTE_ROOM);
        if !released.is_empty() {
            self.emit(RoutingEvent::ConnectionUsageChanged {
                connections: released,
            });
        }

        for route in routes {
            let operation = RouteOperation::new(
                route.source,
                route.destination,
                route.connection_type,
                STATIC_ROUTE_ROOM,
            );
            let Some((legs, claimed)) = self.claim_legs(&operation) else {
                warn!(route = route.id, source = %route.source, destination = %route.destination, "static route has no path");
                continue;
            };
            self.static_routes.lock().set_legs(route.id, legs.clone());
            if !claimed.is_empty() {
                self.emit(RoutingEvent::ConnectionUsageChanged {
                    connections: claimed.iter().map(|(id, _)| *id).collect(),
                });
            }
            self.dispatch(&operation, &legs, claimed);
        }
    }

    /// Re-issues every static route switched inside `control` whose
    /// crosspoint there no longer matches; returns how many were re-issued.
    pub fn reapply_static_routes_for_switcher(&self, control: DeviceControlInfo) -> usize {
        let candidates = self.static_routes.lock().routes_through(control);
        if candidates.is_empty() {
            return 0;
        }
        let Some(switcher) = self.controls.switcher(control) else {
            return 0;
        };

        let mut reissued = 0;
        for (route, legs) in candidates {
            let intact = legs.iter().all(|leg| {
                leg.path
                    .windows(2)
                    .filter(|hop| hop[0].destination.device_control() == control)
                    .all(|hop| {
                        switcher
                            .get_inputs(hop[1].source.address, leg.connection_type)
                            .iter()
                            .any(|input| input.address == hop[0].destination.address)
                    })
            });
            if intact {
                continue;
            }
            info!(route = route.id, %control, "re-applying static route");
            let operation = RouteOperation::new(
                route.source,
                route.destination,
                route.connection_type,
                STATIC_ROUTE_ROOM,
            );
            // Claims are still held, so a failure here has nothing to roll back.
            if self.dispatch(&operation, &legs, Vec::new()) {
                reissued += 1;
            }
        }
        reissued
    }

    /// Reacts to a switcher reporting a crosspoint change it did not get
    /// from the engine.
    pub fn handle_switcher_route_changed(&self, control: DeviceControlInfo) {
        self.emit(RoutingEvent::RouteChanged { control });
        self.reapply_static_routes_for_switcher(control);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
