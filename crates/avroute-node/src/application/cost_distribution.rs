//! Cost distribution protocol handler.
//!
//! Cores advertise how expensive it is to reach each source and destination
//! id, in the style of a distance-vector routing protocol.  Each core keeps
//! two [`CostTable`]s, seeded with its own sources and destinations at cost
//! 0, and wires the cheapest remote route for every other id into its
//! routing graph through the peer's placeholder switcher.
//!
//! # Peer lifecycle
//!
//! ```text
//! Announce ──► InitiateConnection + ShareDevices ──► CostUpdate (regular / triggered)
//!                                                      │
//!        Disconnect or silence past the route timeout ─┴─► rows at MAX_COST ──► deleted
//! ```
//!
//! # Driving the handler
//!
//! The handler never sleeps or spawns.  The runtime feeds it inbound
//! messages ([`CostDistributionHandler::handle_message`]), engine events
//! ([`CostDistributionHandler::handle_routing_event`]) and the clock
//! ([`CostDistributionHandler::process_timers`]).  Every entry point takes
//! `now` explicitly.
//!
//! # Locking
//!
//! Peers, the two cost tables, timers and inbound route requests each have
//! their own lock.  At most one of them is held at a time, and none is held
//! while calling into the routing graph or the message sender.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::Rng;
use tracing::{debug, info, warn};
use uuid::Uuid;

use avroute_core::protocol::messages::{
    CostUpdateMessage, InitiateConnectionMessage, RequestDevicesMessage, RouteCompleteMessage,
    ShareDevicesMessage, SharedDestination, SharedSource, TieLineConnector, TieLineDirection,
    UnrouteRequestMessage, MAX_COST,
};
use avroute_core::{
    Address, Connection, ConnectionId, ConnectionType, ControlHandle, CoreMessage, DeviceId,
    Destination, DestinationId, EndpointInfo, PeerId, RouteOperation, RoutingEvent, RoutingGraph,
    Source, SourceId,
};

use super::cost_table::{clamp_cost, CostRow, CostTable, Offer, StandIn, TableKind};
use super::messaging::MessageSender;
use super::remote_switcher::{
    destination_slot, originator_for_slot, source_slot, RemoteSwitcher, PLACEHOLDER_DEVICE_ID_BASE,
};
use super::timers::{TimerKey, TimerScheduler};

// ── Configuration ─────────────────────────────────────────────────────────────

/// Protocol periods and the per-hop cost.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProtocolTimings {
    pub regular_update: Duration,
    /// Maximum random offset applied to each regular update.
    pub update_jitter: Duration,
    pub triggered_cooldown: Duration,
    pub route_timeout: Duration,
    pub deletion_delay: Duration,
    pub hop_cost: f32,
}

impl Default for ProtocolTimings {
    fn default() -> Self {
        Self {
            regular_update: Duration::from_secs(30),
            update_jitter: Duration::from_secs(5),
            triggered_cooldown: Duration::from_secs(2),
            route_timeout: Duration::from_secs(180),
            deletion_delay: Duration::from_secs(120),
            hop_cost: 1.0,
        }
    }
}

/// A cable between a local endpoint and another core.
///
/// Both cores configure the same `address`; directions are opposite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TieLine {
    pub address: Address,
    /// Local switcher output (for `Output`) or input (for `Input`).
    pub endpoint: EndpointInfo,
    pub direction: TieLineDirection,
    pub connection_type: ConnectionType,
}

impl TieLine {
    pub fn connector(&self) -> TieLineConnector {
        TieLineConnector {
            address: self.address,
            direction: self.direction,
            connection_type: self.connection_type,
        }
    }
}

/// Read-only view of a known peer, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSummary {
    pub id: PeerId,
    pub name: String,
    pub placeholder: DeviceId,
    pub discovered: bool,
    pub tie_lines: usize,
}

struct PeerState {
    name: String,
    switcher: Arc<RemoteSwitcher>,
    discovered: bool,
    tie_connections: Vec<ConnectionId>,
}

// ── Handler ───────────────────────────────────────────────────────────────────

pub struct CostDistributionHandler {
    local: PeerId,
    name: String,
    graph: Arc<RoutingGraph>,
    sender: Arc<dyn MessageSender>,
    timings: ProtocolTimings,
    tie_lines: Vec<TieLine>,
    peers: Mutex<BTreeMap<PeerId, PeerState>>,
    sources: Mutex<CostTable>,
    destinations: Mutex<CostTable>,
    timers: Mutex<TimerScheduler>,
    /// Route requests executed for peers, awaiting their outcome: local
    /// operation id → (requesting peer, operation id on the wire).
    inbound_routes: Mutex<HashMap<Uuid, (PeerId, Uuid)>>,
    next_device: AtomicU32,
}

impl CostDistributionHandler {
    pub fn new(
        local: PeerId,
        name: impl Into<String>,
        graph: Arc<RoutingGraph>,
        sender: Arc<dyn MessageSender>,
        timings: ProtocolTimings,
        tie_lines: Vec<TieLine>,
    ) -> Self {
        Self {
            local,
            name: name.into(),
            graph,
            sender,
            timings,
            tie_lines,
            peers: Mutex::new(BTreeMap::new()),
            sources: Mutex::new(CostTable::new()),
            destinations: Mutex::new(CostTable::new()),
            timers: Mutex::new(TimerScheduler::new()),
            inbound_routes: Mutex::new(HashMap::new()),
            next_device: AtomicU32::new(PLACEHOLDER_DEVICE_ID_BASE),
        }
    }

    pub fn local_peer(&self) -> PeerId {
        self.local
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn timings(&self) -> ProtocolTimings {
        self.timings
    }

    /// Seeds the tables with local sources and destinations and arms the
    /// first regular update.
    pub fn start(&self, now: Instant) {
        self.refresh_local_originators(now);
        let first = now + self.jittered_period();
        self.timers.lock().schedule(TimerKey::RegularUpdate, first);
        info!(core = %self.local, name = %self.name, "cost distribution started");
    }

    /// Tells every connected peer that this core is going away.
    pub fn shutdown(&self) {
        for peer in self.discovered_peers() {
            self.sender.send(peer, CoreMessage::Disconnect);
        }
        info!(core = %self.local, "sent disconnect to peers");
    }

    /// Earliest instant at which [`Self::process_timers`] has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.lock().next_deadline()
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    /// Cost and next hop for a source id.
    pub fn source_cost(&self, id: SourceId) -> Option<(f32, Option<PeerId>)> {
        self.sources.lock().get(id.0).map(|row| (row.cost, row.route_to))
    }

    /// Cost and next hop for a destination id.
    pub fn destination_cost(&self, id: DestinationId) -> Option<(f32, Option<PeerId>)> {
        self.destinations
            .lock()
            .get(id.0)
            .map(|row| (row.cost, row.route_to))
    }

    /// Snapshot of one table, in id order.
    pub fn cost_rows(&self, kind: TableKind) -> Vec<(u32, CostRow)> {
        self.table(kind)
            .lock()
            .iter()
            .map(|(id, row)| (id, row.clone()))
            .collect()
    }

    pub fn peers(&self) -> Vec<PeerSummary> {
        self.peers
            .lock()
            .iter()
            .map(|(id, state)| PeerSummary {
                id: *id,
                name: state.name.clone(),
                placeholder: state.switcher.info().device,
                discovered: state.discovered,
                tie_lines: state.tie_connections.len(),
            })
            .collect()
    }

    /// Placeholder switcher standing in for `peer`, if known.
    pub fn remote_switcher(&self, peer: PeerId) -> Option<Arc<RemoteSwitcher>> {
        self.peers.lock().get(&peer).map(|state| state.switcher.clone())
    }

    // ── Inbound ──────────────────────────────────────────────────────────────

    /// Handles one message received from `from`.
    pub fn handle_message(&self, from: PeerId, message: CoreMessage, now: Instant) {
        if from == self.local {
            return;
        }
        match message {
            CoreMessage::Announce(announce) => self.handle_announce(from, &announce.core_name, now),
            CoreMessage::InitiateConnection(initiate) => {
                self.handle_initiate_connection(from, initiate, now)
            }
            CoreMessage::Disconnect => {
                info!(peer = %from, "peer disconnected");
                self.handle_disconnect(from, now);
            }
            CoreMessage::CostUpdate(update) => self.handle_cost_update(from, update, now),
            CoreMessage::RequestDevices(request) => self.handle_request_devices(from, &request),
            CoreMessage::ShareDevices(share) => self.handle_share_devices(from, share, now),
            CoreMessage::RouteRequest(request) => self.handle_route_request(from, request.operation),
            CoreMessage::RouteComplete(complete) => self.handle_route_complete(from, complete),
            CoreMessage::UnrouteRequest(request) => self.handle_unroute_request(from, request),
        }
        self.flush_triggered_update(now);
    }

    /// Reacts to routing engine notifications.
    pub fn handle_routing_event(&self, event: &RoutingEvent, now: Instant) {
        match event {
            RoutingEvent::RouteFinished {
                operation_id,
                success,
            } => self.finish_inbound_route(*operation_id, *success),
            RoutingEvent::SourcesChanged | RoutingEvent::DestinationsChanged => {
                self.refresh_local_originators(now);
                self.flush_triggered_update(now);
            }
            _ => {}
        }
    }

    fn handle_announce(&self, from: PeerId, name: &str, now: Instant) {
        let (switcher, _) = self.ensure_peer(from, Some(name), now);
        let newly_connected = {
            let mut peers = self.peers.lock();
            match peers.get_mut(&from) {
                Some(state) if !state.discovered => {
                    state.discovered = true;
                    true
                }
                _ => false,
            }
        };
        if !newly_connected {
            return;
        }
        info!(peer = %from, name, "discovered peer");
        self.sender.send(
            from,
            CoreMessage::InitiateConnection(InitiateConnectionMessage {
                device_id: switcher.info().device,
            }),
        );
        let share = self.build_share(from, None);
        self.sender.send(from, CoreMessage::ShareDevices(share));
    }

    fn handle_initiate_connection(
        &self,
        from: PeerId,
        initiate: InitiateConnectionMessage,
        now: Instant,
    ) {
        self.ensure_peer(from, None, now);
        self.mark_discovered(from);
        debug!(peer = %from, their_placeholder = initiate.device_id, "connection initiated by peer");
        let share = self.build_share(from, None);
        self.sender.send(from, CoreMessage::ShareDevices(share));
    }

    fn handle_disconnect(&self, peer: PeerId, now: Instant) {
        for kind in [TableKind::Sources, TableKind::Destinations] {
            let lost: Vec<u32> = {
                let mut table = self.table(kind).lock();
                table
                    .rows_via(peer)
                    .into_iter()
                    .filter(|id| table.force_unreachable(*id))
                    .collect()
            };
            let mut timers = self.timers.lock();
            for id in lost {
                timers.cancel(TimerKey::RouteTimeout { table: kind, id });
                let deletion = TimerKey::Deletion { table: kind, id };
                if !timers.is_scheduled(deletion) {
                    timers.schedule(deletion, now + self.timings.deletion_delay);
                }
            }
        }
        self.reset_peer(peer);
        self.retire_peer_if_unused(peer);
    }

    fn handle_cost_update(&self, from: PeerId, update: CostUpdateMessage, now: Instant) {
        if !self.is_known(from) {
            debug!(peer = %from, "cost update from unknown peer ignored");
            return;
        }
        let mut missing = RequestDevicesMessage::default();
        for (id, cost) in update.source_costs {
            let offered = cost + self.timings.hop_cost;
            if self.apply_offer(TableKind::Sources, id.0, offered, from, now) == Offer::Unknown
                && cost < MAX_COST
            {
                missing.missing_sources.push(id);
            }
        }
        for (id, cost) in update.destination_costs {
            let offered = cost + self.timings.hop_cost;
            if self.apply_offer(TableKind::Destinations, id.0, offered, from, now) == Offer::Unknown
                && cost < MAX_COST
            {
                missing.missing_destinations.push(id);
            }
        }
        if !missing.is_empty() {
            debug!(
                peer = %from,
                sources = missing.missing_sources.len(),
                destinations = missing.missing_destinations.len(),
                "requesting unknown devices"
            );
            self.sender.send(from, CoreMessage::RequestDevices(missing));
        }
    }

    fn handle_request_devices(&self, from: PeerId, request: &RequestDevicesMessage) {
        let share = self.build_share(from, Some(request));
        self.sender.send(from, CoreMessage::ShareDevices(share));
    }

    fn handle_share_devices(&self, from: PeerId, share: ShareDevicesMessage, now: Instant) {
        let (switcher, _) = self.ensure_peer(from, None, now);
        self.mark_discovered(from);
        self.connect_tie_lines(from, &switcher, &share.connectors);
        for source in share.sources {
            self.learn(
                TableKind::Sources,
                from,
                &switcher,
                source.id.0,
                source.name,
                source.connection_type,
                source.cost,
                now,
            );
        }
        for destination in share.destinations {
            self.learn(
                TableKind::Destinations,
                from,
                &switcher,
                destination.id.0,
                destination.name,
                destination.connection_type,
                destination.cost,
                now,
            );
        }
    }

    fn handle_route_request(&self, from: PeerId, operation: RouteOperation) {
        let Some(switcher) = self.remote_switcher(from) else {
            warn!(peer = %from, operation = %operation.id, "route request from unknown peer");
            self.reply_route_complete(from, operation.id, false);
            return;
        };
        let endpoints = match (operation.local_input, operation.local_output) {
            (Some(input), Some(output)) => self
                .request_source(&switcher, input)
                .zip(self.request_destination(&switcher, output)),
            _ => None,
        };
        let Some((source, destination)) = endpoints else {
            warn!(peer = %from, operation = %operation.id, "route request names unknown ports");
            self.reply_route_complete(from, operation.id, false);
            return;
        };

        // Each hop runs under its own id; a split route sends several hops
        // under the same wire id.
        let local = RouteOperation::new(
            source,
            destination,
            operation.connection_type,
            operation.room_id,
        )
        .with_request_from(from);
        let local_id = local.id;
        debug!(
            peer = %from,
            operation = %operation.id,
            local = %local_id,
            %source,
            %destination,
            "routing for peer"
        );
        self.inbound_routes
            .lock()
            .insert(local_id, (from, operation.id));
        if !self.graph.route_operation(local) {
            self.finish_inbound_route(local_id, false);
        }
    }

    fn handle_route_complete(&self, from: PeerId, complete: RouteCompleteMessage) {
        if let Some(switcher) = self.remote_switcher(from) {
            switcher.complete(complete.operation_id, complete.success);
        }
        if !self
            .graph
            .pending_route_finished(complete.operation_id, complete.success)
        {
            debug!(peer = %from, operation = %complete.operation_id, "late route completion");
        }
    }

    fn handle_unroute_request(&self, from: PeerId, request: UnrouteRequestMessage) {
        let Some(switcher) = self.remote_switcher(from) else {
            return;
        };
        let Some(destination) = self.request_destination(&switcher, request.output) else {
            debug!(peer = %from, output = request.output, "unroute for unknown output");
            return;
        };
        if !self
            .graph
            .unroute_destination(destination, request.connection_type, request.room_id)
        {
            debug!(peer = %from, %destination, "nothing to unroute for peer");
        }
    }

    // ── Timers ───────────────────────────────────────────────────────────────

    /// Fires every timer due at `now`, then sends any triggered update.
    pub fn process_timers(&self, now: Instant) {
        let due = self.timers.lock().expired(now);
        for key in due {
            match key {
                TimerKey::RouteTimeout { table, id } => self.expire_route(table, id, now),
                TimerKey::Deletion { table, id } => self.delete_row(table, id),
                TimerKey::RegularUpdate => {
                    self.send_regular_update();
                    let next = now + self.jittered_period();
                    self.timers.lock().schedule(TimerKey::RegularUpdate, next);
                }
                TimerKey::TriggeredCooldown => {}
            }
        }
        self.flush_triggered_update(now);
    }

    fn expire_route(&self, kind: TableKind, id: u32, now: Instant) {
        let peer = {
            let mut table = self.table(kind).lock();
            let peer = table.get(id).and_then(|row| row.route_to);
            table.force_unreachable(id);
            peer
        };
        let Some(peer) = peer else {
            return;
        };
        warn!(table = %kind, id, %peer, "route timed out");
        self.timers.lock().schedule(
            TimerKey::Deletion { table: kind, id },
            now + self.timings.deletion_delay,
        );
        if self.reachable_via(peer) == 0 {
            warn!(%peer, "every route through peer is unreachable");
            self.reset_peer(peer);
        }
    }

    fn delete_row(&self, kind: TableKind, id: u32) {
        let removed = {
            let mut table = self.table(kind).lock();
            let expired = table.get(id).is_some_and(|row| !row.is_reachable());
            if expired {
                table.remove(id)
            } else {
                None
            }
        };
        let Some(row) = removed else {
            return;
        };
        self.timers
            .lock()
            .cancel(TimerKey::RouteTimeout { table: kind, id });
        if let Some(stand_in) = row.stand_in {
            self.graph.remove_connection(stand_in.connection);
        }
        if !row.is_local() {
            self.remove_remote_originator(kind, id);
        }
        info!(table = %kind, id, name = %row.name, "removed unreachable entry");
        if let Some(peer) = row.route_to {
            self.retire_peer_if_unused(peer);
        }
    }

    fn jittered_period(&self) -> Duration {
        let base = self.timings.regular_update.as_secs_f64();
        let jitter = self.timings.update_jitter.as_secs_f64();
        if jitter <= 0.0 {
            return self.timings.regular_update;
        }
        let offset = rand::thread_rng().gen_range(-jitter..=jitter);
        Duration::from_secs_f64((base + offset).max(0.0))
    }

    // ── Outbound updates ─────────────────────────────────────────────────────

    fn send_regular_update(&self) {
        let peers = self.discovered_peers();
        let updates: Vec<(PeerId, CostUpdateMessage)> = peers
            .into_iter()
            .map(|peer| (peer, self.build_cost_update(peer, false)))
            .collect();
        self.sources.lock().clear_changes();
        self.destinations.lock().clear_changes();
        for (peer, update) in updates {
            self.sender.send(peer, CoreMessage::CostUpdate(update));
        }
    }

    /// Sends changed rows unless a cooldown is running; changes made during
    /// the cooldown go out together when it ends.
    fn flush_triggered_update(&self, now: Instant) {
        let changed = self.sources.lock().has_changes() || self.destinations.lock().has_changes();
        if !changed {
            return;
        }
        {
            let mut timers = self.timers.lock();
            if timers.is_scheduled(TimerKey::TriggeredCooldown) {
                return;
            }
            timers.schedule(
                TimerKey::TriggeredCooldown,
                now + self.timings.triggered_cooldown,
            );
        }
        let updates: Vec<(PeerId, CostUpdateMessage)> = self
            .discovered_peers()
            .into_iter()
            .map(|peer| (peer, self.build_cost_update(peer, true)))
            .filter(|(_, update)| !update.is_empty())
            .collect();
        self.sources.lock().clear_changes();
        self.destinations.lock().clear_changes();
        debug!(peers = updates.len(), "sending triggered update");
        for (peer, update) in updates {
            self.sender.send(peer, CoreMessage::CostUpdate(update));
        }
    }

    fn build_cost_update(&self, peer: PeerId, changed_only: bool) -> CostUpdateMessage {
        let source_costs = self
            .sources
            .lock()
            .advertisement(peer, changed_only)
            .into_iter()
            .map(|(id, cost)| (SourceId(id), cost))
            .collect();
        let destination_costs = self
            .destinations
            .lock()
            .advertisement(peer, changed_only)
            .into_iter()
            .map(|(id, cost)| (DestinationId(id), cost))
            .collect();
        CostUpdateMessage {
            source_costs,
            destination_costs,
        }
    }

    /// Everything `peer` may learn from us, optionally limited to a request.
    fn build_share(&self, peer: PeerId, only: Option<&RequestDevicesMessage>) -> ShareDevicesMessage {
        let sources = self
            .sources
            .lock()
            .iter()
            .filter(|(id, _)| only.map_or(true, |r| r.missing_sources.contains(&SourceId(*id))))
            .filter(|(_, row)| row.cost_for(peer) < MAX_COST)
            .map(|(id, row)| SharedSource {
                id: SourceId(id),
                name: row.name.clone(),
                connection_type: row.connection_type,
                cost: row.cost,
            })
            .collect();
        let destinations = self
            .destinations
            .lock()
            .iter()
            .filter(|(id, _)| {
                only.map_or(true, |r| r.missing_destinations.contains(&DestinationId(*id)))
            })
            .filter(|(_, row)| row.cost_for(peer) < MAX_COST)
            .map(|(id, row)| SharedDestination {
                id: DestinationId(id),
                name: row.name.clone(),
                connection_type: row.connection_type,
                cost: row.cost,
            })
            .collect();
        ShareDevicesMessage {
            sources,
            destinations,
            connectors: self.tie_lines.iter().map(TieLine::connector).collect(),
        }
    }

    // ── Cost table maintenance ───────────────────────────────────────────────

    fn table(&self, kind: TableKind) -> &Mutex<CostTable> {
        match kind {
            TableKind::Sources => &self.sources,
            TableKind::Destinations => &self.destinations,
        }
    }

    /// Applies an offer (hop cost included) and the timer and graph changes
    /// that follow from it.
    fn apply_offer(&self, kind: TableKind, id: u32, cost: f32, from: PeerId, now: Instant) -> Offer {
        let offer = self.table(kind).lock().offer(id, cost, from);
        let timeout = TimerKey::RouteTimeout { table: kind, id };
        let deletion = TimerKey::Deletion { table: kind, id };
        match offer {
            Offer::Refreshed { .. } => {
                let mut timers = self.timers.lock();
                timers.schedule(timeout, now + self.timings.route_timeout);
                timers.cancel(deletion);
            }
            Offer::Unreachable { changed } => {
                if changed {
                    debug!(table = %kind, id, peer = %from, "next hop reports unreachable");
                }
                let mut timers = self.timers.lock();
                timers.cancel(timeout);
                if !timers.is_scheduled(deletion) {
                    timers.schedule(deletion, now + self.timings.deletion_delay);
                }
            }
            Offer::Replaced { previous } => {
                self.retarget(kind, id, from);
                info!(
                    table = %kind,
                    id,
                    from = %previous,
                    to = %from,
                    cost = clamp_cost(cost),
                    "replaced route with cheaper peer"
                );
                let mut timers = self.timers.lock();
                timers.schedule(timeout, now + self.timings.route_timeout);
                timers.cancel(deletion);
            }
            Offer::Unknown | Offer::Local | Offer::Ignored => {}
        }
        offer
    }

    /// Handles an id shared by `from`: a new row with stand-in objects, or
    /// an offer for an existing row.
    #[allow(clippy::too_many_arguments)]
    fn learn(
        &self,
        kind: TableKind,
        from: PeerId,
        switcher: &RemoteSwitcher,
        id: u32,
        name: String,
        connection_type: ConnectionType,
        advertised: f32,
        now: Instant,
    ) {
        let cost = clamp_cost(advertised + self.timings.hop_cost);
        if self.table(kind).lock().contains(id) {
            self.apply_offer(kind, id, cost, from, now);
            return;
        }
        if cost >= MAX_COST {
            debug!(table = %kind, id, peer = %from, "ignoring unreachable shared entry");
            return;
        }
        let Some(stand_in) = self.create_stand_in(kind, id, &name, connection_type, switcher) else {
            return;
        };
        info!(table = %kind, id, %name, peer = %from, cost, "learned remote entry");
        self.table(kind).lock().insert(
            id,
            CostRow::remote(name, connection_type, cost, from, Some(stand_in)),
        );
        self.timers.lock().schedule(
            TimerKey::RouteTimeout { table: kind, id },
            now + self.timings.route_timeout,
        );
    }

    /// Keeps one cost-0 row per locally configured source and destination.
    ///
    /// Rows whose local entry disappeared become unreachable and are deleted
    /// after the deletion delay.
    fn refresh_local_originators(&self, now: Instant) {
        for kind in [TableKind::Sources, TableKind::Destinations] {
            let local = self.local_originators(kind);
            let local_ids: BTreeSet<u32> = local.iter().map(|(id, _, _)| *id).collect();
            let mut superseded = Vec::new();
            let mut orphaned = Vec::new();
            {
                let mut table = self.table(kind).lock();
                for (id, name, connection_type) in local {
                    match table.get(id) {
                        Some(row) if !row.is_local() => superseded.extend(row.stand_in),
                        _ => {}
                    }
                    if !table.get(id).is_some_and(|row| row.is_local() && row.is_reachable()) {
                        table.insert(id, CostRow::local(name, connection_type));
                    }
                }
                let gone: Vec<u32> = table
                    .iter()
                    .filter(|(id, row)| row.is_local() && !local_ids.contains(id))
                    .map(|(id, _)| id)
                    .collect();
                for id in gone {
                    if table.force_unreachable(id) {
                        orphaned.push(id);
                    }
                }
            }
            {
                let mut timers = self.timers.lock();
                for id in local_ids.iter().copied() {
                    timers.cancel(TimerKey::RouteTimeout { table: kind, id });
                    timers.cancel(TimerKey::Deletion { table: kind, id });
                }
                for id in &orphaned {
                    timers.schedule(
                        TimerKey::Deletion { table: kind, id: *id },
                        now + self.timings.deletion_delay,
                    );
                }
            }
            for stand_in in superseded {
                self.graph.remove_connection(stand_in.connection);
            }
            for id in orphaned {
                info!(table = %kind, id, "local entry removed");
            }
        }
    }

    fn local_originators(&self, kind: TableKind) -> Vec<(u32, String, ConnectionType)> {
        match kind {
            TableKind::Sources => self
                .graph
                .sources()
                .into_iter()
                .filter(|s| !s.remote)
                .map(|s| (s.id.0, s.name, s.connection_type))
                .collect(),
            TableKind::Destinations => self
                .graph
                .destinations()
                .into_iter()
                .filter(|d| !d.remote)
                .map(|d| (d.id.0, d.name, d.connection_type))
                .collect(),
        }
    }

    fn reachable_via(&self, peer: PeerId) -> usize {
        self.sources.lock().reachable_via(peer) + self.destinations.lock().reachable_via(peer)
    }

    // ── Graph wiring ─────────────────────────────────────────────────────────

    fn allocate_device_id(&self) -> DeviceId {
        self.next_device.fetch_add(1, Ordering::Relaxed)
    }

    /// Adds a stand-in device for a remote id, linked to `switcher`'s slot.
    fn create_stand_in(
        &self,
        kind: TableKind,
        id: u32,
        name: &str,
        connection_type: ConnectionType,
        switcher: &RemoteSwitcher,
    ) -> Option<StandIn> {
        let device = self.allocate_device_id();
        let endpoint = EndpointInfo::new(device, 0, 1);
        let connection = self.graph.allocate_connection_id();
        let link = match kind {
            TableKind::Sources => Connection::new(
                connection,
                endpoint,
                switcher.endpoint(source_slot(SourceId(id))),
                connection_type,
            ),
            TableKind::Destinations => Connection::new(
                connection,
                switcher.endpoint(destination_slot(DestinationId(id))),
                endpoint,
                connection_type,
            ),
        };
        if let Err(e) = self.graph.add_connection(link) {
            warn!(table = %kind, id, error = %e, "could not link remote entry");
            return None;
        }
        match kind {
            TableKind::Sources => {
                self.graph.add_source(Source {
                    id: SourceId(id),
                    name: name.to_string(),
                    endpoint,
                    connection_type,
                    remote: true,
                });
            }
            TableKind::Destinations => {
                self.graph.add_destination(Destination {
                    id: DestinationId(id),
                    name: name.to_string(),
                    endpoint,
                    connection_type,
                    remote: true,
                });
            }
        }
        Some(StandIn { device, connection })
    }

    /// Moves a row's stand-in link onto `to`'s placeholder.
    fn retarget(&self, kind: TableKind, id: u32, to: PeerId) {
        let stand_in = self.table(kind).lock().get(id).and_then(|row| row.stand_in);
        let (Some(stand_in), Some(switcher)) = (stand_in, self.remote_switcher(to)) else {
            return;
        };
        let Some(link) = self.graph.connection(stand_in.connection) else {
            return;
        };
        let moved = match kind {
            TableKind::Sources => {
                link.retarget_destination(switcher.endpoint(source_slot(SourceId(id))))
            }
            TableKind::Destinations => {
                link.retarget_source(switcher.endpoint(destination_slot(DestinationId(id))))
            }
        };
        if let Err(e) = self.graph.replace_connection(moved) {
            warn!(table = %kind, id, peer = %to, error = %e, "could not retarget remote entry");
        }
    }

    fn remove_remote_originator(&self, kind: TableKind, id: u32) {
        match kind {
            TableKind::Sources => {
                if self.graph.source(SourceId(id)).is_some_and(|s| s.remote) {
                    self.graph.remove_source(SourceId(id));
                }
            }
            TableKind::Destinations => {
                if self
                    .graph
                    .destination(DestinationId(id))
                    .is_some_and(|d| d.remote)
                {
                    self.graph.remove_destination(DestinationId(id));
                }
            }
        }
    }

    /// Links matching tie lines between this core and `from`'s placeholder.
    fn connect_tie_lines(
        &self,
        from: PeerId,
        switcher: &RemoteSwitcher,
        connectors: &[TieLineConnector],
    ) {
        let mut added = Vec::new();
        for connector in connectors {
            let Some(tie) = self.tie_lines.iter().find(|tie| {
                tie.address == connector.address && tie.direction == connector.direction.reversed()
            }) else {
                continue;
            };
            let connection_type = tie.connection_type.intersection(connector.connection_type);
            if connection_type.is_empty() {
                continue;
            }
            let remote = switcher.endpoint(tie.address);
            let (source, destination) = match tie.direction {
                TieLineDirection::Input => (remote, tie.endpoint),
                TieLineDirection::Output => (tie.endpoint, remote),
            };
            let exists = self.graph.with_connections(|index| {
                index
                    .get_output_connection(source, connection_type)
                    .is_some_and(|link| link.destination == destination)
            });
            if exists {
                continue;
            }
            let id = self.graph.allocate_connection_id();
            match self
                .graph
                .add_connection(Connection::new(id, source, destination, connection_type))
            {
                Ok(()) => {
                    info!(peer = %from, tie = tie.address, "connected tie line");
                    added.push(id);
                }
                Err(e) => warn!(peer = %from, tie = tie.address, error = %e, "could not connect tie line"),
            }
        }
        if let Some(state) = self.peers.lock().get_mut(&from) {
            state.tie_connections.extend(added);
        }
    }

    /// Source endpoint for a peer's request on our placeholder for it.
    fn request_source(&self, switcher: &RemoteSwitcher, input: Address) -> Option<EndpointInfo> {
        match originator_for_slot(input) {
            Some(id) => self.graph.source(SourceId(id)).map(|s| s.endpoint),
            None => Some(switcher.endpoint(input)),
        }
    }

    /// Destination endpoint for a peer's request on our placeholder for it.
    fn request_destination(
        &self,
        switcher: &RemoteSwitcher,
        output: Address,
    ) -> Option<EndpointInfo> {
        match originator_for_slot(output) {
            Some(id) => self.graph.destination(DestinationId(id)).map(|d| d.endpoint),
            None => Some(switcher.endpoint(output)),
        }
    }

    fn finish_inbound_route(&self, local_id: Uuid, success: bool) {
        let Some((peer, operation_id)) = self.inbound_routes.lock().remove(&local_id) else {
            return;
        };
        self.reply_route_complete(peer, operation_id, success);
    }

    fn reply_route_complete(&self, peer: PeerId, operation_id: Uuid, success: bool) {
        self.sender.send(
            peer,
            CoreMessage::RouteComplete(RouteCompleteMessage {
                operation_id,
                success,
            }),
        );
    }

    // ── Peers ────────────────────────────────────────────────────────────────

    fn is_known(&self, peer: PeerId) -> bool {
        self.peers.lock().contains_key(&peer)
    }

    fn discovered_peers(&self) -> Vec<PeerId> {
        self.peers
            .lock()
            .iter()
            .filter(|(_, state)| state.discovered)
            .map(|(id, _)| *id)
            .collect()
    }

    fn mark_discovered(&self, peer: PeerId) {
        if let Some(state) = self.peers.lock().get_mut(&peer) {
            state.discovered = true;
        }
    }

    /// Returns the placeholder for `peer`, creating and registering it first
    /// if needed.  An earlier session of the same core counts as disconnected.
    fn ensure_peer(
        &self,
        peer: PeerId,
        name: Option<&str>,
        now: Instant,
    ) -> (Arc<RemoteSwitcher>, bool) {
        let (switcher, created, stale) = {
            let mut peers = self.peers.lock();
            let stale: Vec<PeerId> = peers
                .keys()
                .filter(|p| p.address == peer.address && p.session != peer.session)
                .copied()
                .collect();
            match peers.get_mut(&peer) {
                Some(state) => {
                    if let Some(name) = name {
                        state.name = name.to_string();
                    }
                    (state.switcher.clone(), false, stale)
                }
                None => {
                    let device = self.allocate_device_id();
                    let switcher = Arc::new(RemoteSwitcher::new(peer, device, self.sender.clone()));
                    peers.insert(
                        peer,
                        PeerState {
                            name: name.unwrap_or_default().to_string(),
                            switcher: switcher.clone(),
                            discovered: false,
                            tie_connections: Vec::new(),
                        },
                    );
                    (switcher, true, stale)
                }
            }
        };
        if created {
            self.graph.controls().register(
                ControlHandle::new(switcher.info())
                    .with_switcher(switcher.clone())
                    .with_source(switcher.clone())
                    .with_destination(switcher.clone()),
            );
            info!(%peer, device = switcher.info().device, "created placeholder for peer");
        }
        for old in stale {
            info!(peer = %old, "peer restarted with a new session");
            self.handle_disconnect(old, now);
        }
        (switcher, created)
    }

    /// Marks `peer` undiscovered, unlinks its tie lines and fails every hop
    /// still waiting on it.
    fn reset_peer(&self, peer: PeerId) {
        let reset = {
            let mut peers = self.peers.lock();
            peers.get_mut(&peer).map(|state| {
                state.discovered = false;
                (
                    state.switcher.clone(),
                    std::mem::take(&mut state.tie_connections),
                )
            })
        };
        let Some((switcher, tie_connections)) = reset else {
            return;
        };
        warn!(%peer, "peer placeholder reset to undiscovered");
        for id in tie_connections {
            self.graph.remove_connection(id);
        }
        for operation_id in switcher.reset() {
            self.graph.pending_route_finished(operation_id, false);
        }
        self.inbound_routes
            .lock()
            .retain(|_, (origin, _)| *origin != peer);
    }

    /// Drops an undiscovered peer once no cost row routes through it.
    fn retire_peer_if_unused(&self, peer: PeerId) {
        let in_use = !self.sources.lock().rows_via(peer).is_empty()
            || !self.destinations.lock().rows_via(peer).is_empty();
        if in_use {
            return;
        }
        let removed = {
            let mut peers = self.peers.lock();
            let idle = peers.get(&peer).is_some_and(|state| !state.discovered);
            if idle {
                peers.remove(&peer)
            } else {
                None
            }
        };
        let Some(state) = removed else {
            return;
        };
        for id in state.tie_connections {
            self.graph.remove_connection(id);
        }
        self.graph.controls().unregister(state.switcher.info());
        info!(%peer, "retired peer placeholder");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
