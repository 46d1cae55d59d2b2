//! Connection usage ledger: which rooms hold which connections, for which
//! source, per signal type.
//!
//! # Why a ledger? (for beginners)
//!
//! Two rooms can share one matrix-switcher tie line as long as they both want
//! the *same* source on it (fan-out).  If room Y asks for a different source
//! while room X is watching something on that line, switching it would
//! silently change what room X sees.  The ledger records every claim so path
//! discovery can skip connections that are held by another source.
//!
//! Invariant: for every `(connection, type flag)` there is at most one source
//! endpoint holding a claim, shared by one or more rooms.

use std::collections::{BTreeMap, BTreeSet};

use crate::domain::connection::ConnectionId;
use crate::domain::endpoint::{ConnectionType, EndpointInfo, RoomId};
use crate::domain::operation::RouteOperation;

use super::connections::ConnectionsIndex;
use super::error::RoutingError;

/// The holder of one `(connection, type flag)` slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageClaim {
    pub source: EndpointInfo,
    pub rooms: BTreeSet<RoomId>,
}

/// Claims recorded against one connection, keyed by single type flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionUsageInfo {
    pub connection: ConnectionId,
    pub claims: BTreeMap<ConnectionType, UsageClaim>,
}

impl ConnectionUsageInfo {
    fn new(connection: ConnectionId) -> Self {
        Self {
            connection,
            claims: BTreeMap::new(),
        }
    }
}

/// Tracks claims for every connection in use.
#[derive(Debug, Default, Clone)]
pub struct UsageLedger {
    usages: BTreeMap<ConnectionId, ConnectionUsageInfo>,
}

impl UsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, connection: ConnectionId) -> Option<&ConnectionUsageInfo> {
        self.usages.get(&connection)
    }

    /// Returns the claim on `connection` for a single `flag`.
    pub fn claim(&self, connection: ConnectionId, flag: ConnectionType) -> Option<&UsageClaim> {
        self.usages
            .get(&connection)
            .and_then(|usage| usage.claims.get(&flag))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConnectionUsageInfo> {
        self.usages.values()
    }

    pub fn is_empty(&self) -> bool {
        self.usages.is_empty()
    }

    /// Returns `true` if `source` may use `connection` for every flag of
    /// `connection_type` on behalf of `room`.
    ///
    /// A slot is usable when nobody holds it or when the holder is the same
    /// source (fan-out to another room).  The requesting room does not
    /// matter: a room must unroute before it can put a new source on a line.
    pub fn can_route_connection(
        &self,
        connection: ConnectionId,
        source: EndpointInfo,
        _room: RoomId,
        connection_type: ConnectionType,
    ) -> bool {
        let Some(usage) = self.usages.get(&connection) else {
            return true;
        };
        connection_type.flags().all(|flag| {
            usage
                .claims
                .get(&flag)
                .map_or(true, |claim| claim.source == source)
        })
    }

    /// Records `operation.room_id`'s claim on `connection` for every flag of
    /// the operation's type, merging with claims for the same source.
    ///
    /// Returns the flags for which the room was not already a holder, which
    /// is exactly what has to be released to undo this call.
    ///
    /// # Errors
    ///
    /// [`RoutingError::UsageConflict`] if another source holds any of the
    /// slots; nothing is recorded in that case.
    pub fn claim_connection(
        &mut self,
        connection: ConnectionId,
        operation: &RouteOperation,
    ) -> Result<ConnectionType, RoutingError> {
        if let Some(usage) = self.usages.get(&connection) {
            for flag in operation.connection_type.flags() {
                if let Some(claim) = usage.claims.get(&flag) {
                    if claim.source != operation.source {
                        return Err(RoutingError::UsageConflict {
                            connection,
                            connection_type: flag,
                            holder: claim.source,
                        });
                    }
                }
            }
        }

        let usage = self
            .usages
            .entry(connection)
            .or_insert_with(|| ConnectionUsageInfo::new(connection));
        let mut added = ConnectionType::NONE;
        for flag in operation.connection_type.flags() {
            let inserted = usage
                .claims
                .entry(flag)
                .or_insert_with(|| UsageClaim {
                    source: operation.source,
                    rooms: BTreeSet::new(),
                })
                .rooms
                .insert(operation.room_id);
            if inserted {
                added |= flag;
            }
        }
        Ok(added)
    }

    /// Releases `room`'s claim on `connection` for every flag of the mask.
    ///
    /// A flag with no rooms left is dropped, and so is a connection with no
    /// flags left.  Returns `true` if anything changed.
    pub fn remove_room(
        &mut self,
        connection: ConnectionId,
        room: RoomId,
        connection_type: ConnectionType,
    ) -> bool {
        let Some(usage) = self.usages.get_mut(&connection) else {
            return false;
        };
        let mut changed = false;
        for flag in connection_type.flags() {
            if let Some(claim) = usage.claims.get_mut(&flag) {
                changed |= claim.rooms.remove(&room);
                if claim.rooms.is_empty() {
                    usage.claims.remove(&flag);
                }
            }
        }
        if usage.claims.is_empty() {
            self.usages.remove(&connection);
        }
        changed
    }

    /// Releases every claim held by `room`; returns the touched connections.
    pub fn remove_room_everywhere(&mut self, room: RoomId) -> Vec<ConnectionId> {
        let touched: Vec<ConnectionId> = self
            .usages
            .values()
            .filter(|usage| usage.claims.values().any(|c| c.rooms.contains(&room)))
            .map(|usage| usage.connection)
            .collect();
        for id in &touched {
            self.remove_room(*id, room, ConnectionType::ALL);
        }
        touched
    }

    /// Returns `true` if any room holds `connection` for a flag of the mask.
    pub fn is_claimed(&self, connection: ConnectionId, connection_type: ConnectionType) -> bool {
        connection_type
            .flags()
            .any(|flag| self.claim(connection, flag).is_some())
    }

    /// Returns `true` if `room` holds `connection` for a flag of the mask.
    pub fn is_claimed_by(
        &self,
        connection: ConnectionId,
        room: RoomId,
        connection_type: ConnectionType,
    ) -> bool {
        connection_type.flags().any(|flag| {
            self.claim(connection, flag)
                .is_some_and(|claim| claim.rooms.contains(&room))
        })
    }

    /// Connections currently claimed by `room`.
    pub fn connections_for_room(&self, room: RoomId) -> Vec<ConnectionId> {
        self.usages
            .values()
            .filter(|usage| usage.claims.values().any(|c| c.rooms.contains(&room)))
            .map(|usage| usage.connection)
            .collect()
    }

    /// Drops rows for connections that are no longer in `index`.
    ///
    /// Returns the ids that were purged.
    pub fn remove_invalid(&mut self, index: &ConnectionsIndex) -> Vec<ConnectionId> {
        let stale: Vec<ConnectionId> = self
            .usages
            .keys()
            .copied()
            .filter(|id| !index.contains(*id))
            .collect();
        for id in &stale {
            self.usages.remove(id);
        }
        stale
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
