//! Distance-vector cost tables.
//!
//! A core keeps one [`CostTable`] for source ids and one for destination
//! ids.  Each row says how expensive it is to reach that id and through which
//! peer (`route_to`).  Rows for the core's own sources and destinations have
//! cost 0 and no next hop.
//!
//! # How an advertisement is applied (for beginners)
//!
//! A peer says "I can reach source 7 at cost 1".  The receiver adds the
//! per-hop cost and calls [`CostTable::offer`]:
//!
//! ```text
//! no row                         → Unknown      (ask the peer to share it)
//! row is ours (route_to = None)  → Local        (never replaced)
//! offer from current next hop    → Refreshed / Unreachable
//! cheaper offer from other peer  → Replaced     (retarget placeholder links)
//! anything else                  → Ignored
//! ```
//!
//! The table only does the bookkeeping.  Timers, graph rewiring and messages
//! are the protocol handler's job.

use std::collections::BTreeMap;
use std::fmt;

use avroute_core::protocol::messages::MAX_COST;
use avroute_core::{ConnectionId, ConnectionType, DeviceId, PeerId};

/// Which of the two tables a row or timer belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TableKind {
    Sources,
    Destinations,
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableKind::Sources => f.write_str("source"),
            TableKind::Destinations => f.write_str("destination"),
        }
    }
}

/// Graph objects created locally to stand in for a remote id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StandIn {
    /// Device holding the single output (source) or input (destination).
    pub device: DeviceId,
    /// Link between the stand-in device and the next hop's placeholder.
    pub connection: ConnectionId,
}

/// One row of a cost table.
#[derive(Debug, Clone, PartialEq)]
pub struct CostRow {
    pub cost: f32,
    /// Next-hop peer; `None` for ids this core owns.
    pub route_to: Option<PeerId>,
    /// Set whenever cost or next hop changes; cleared once advertised.
    pub route_changed: bool,
    pub name: String,
    pub connection_type: ConnectionType,
    pub stand_in: Option<StandIn>,
}

impl CostRow {
    /// A row for an id configured on this core.
    pub fn local(name: impl Into<String>, connection_type: ConnectionType) -> Self {
        Self {
            cost: 0.0,
            route_to: None,
            route_changed: true,
            name: name.into(),
            connection_type,
            stand_in: None,
        }
    }

    /// A row learned from `peer`.
    pub fn remote(
        name: impl Into<String>,
        connection_type: ConnectionType,
        cost: f32,
        peer: PeerId,
        stand_in: Option<StandIn>,
    ) -> Self {
        Self {
            cost: clamp_cost(cost),
            route_to: Some(peer),
            route_changed: true,
            name: name.into(),
            connection_type,
            stand_in,
        }
    }

    pub fn is_local(&self) -> bool {
        self.route_to.is_none()
    }

    pub fn is_reachable(&self) -> bool {
        self.cost < MAX_COST
    }

    /// Cost to report to `peer`: unreachable when `peer` is our next hop.
    pub fn cost_for(&self, peer: PeerId) -> f32 {
        if self.route_to == Some(peer) {
            MAX_COST
        } else {
            self.cost
        }
    }
}

/// Clamps a cost into `[0, MAX_COST]`; NaN counts as unreachable.
pub fn clamp_cost(cost: f32) -> f32 {
    if cost.is_nan() {
        MAX_COST
    } else {
        cost.clamp(0.0, MAX_COST)
    }
}

/// What [`CostTable::offer`] did with an advertised cost.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Offer {
    /// No row for the id.
    Unknown,
    /// The id is ours; peers cannot change it.
    Local,
    /// The current next hop confirmed the route.
    Refreshed { changed: bool },
    /// The current next hop reported the id unreachable.
    Unreachable { changed: bool },
    /// A different peer offered a strictly cheaper route.
    Replaced { previous: PeerId },
    /// Not better than what we have.
    Ignored,
}

/// Cost rows keyed by raw source or destination id.
#[derive(Debug, Clone, Default)]
pub struct CostTable {
    rows: BTreeMap<u32, CostRow>,
}

impl CostTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: u32) -> Option<&CostRow> {
        self.rows.get(&id)
    }

    pub fn insert(&mut self, id: u32, row: CostRow) -> Option<CostRow> {
        self.rows.insert(id, row)
    }

    pub fn remove(&mut self, id: u32) -> Option<CostRow> {
        self.rows.remove(&id)
    }

    pub fn contains(&self, id: u32) -> bool {
        self.rows.contains_key(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &CostRow)> {
        self.rows.iter().map(|(id, row)| (*id, row))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Applies a cost offered by `from`, already including the hop cost.
    pub fn offer(&mut self, id: u32, cost: f32, from: PeerId) -> Offer {
        let cost = clamp_cost(cost);
        let Some(row) = self.rows.get_mut(&id) else {
            return Offer::Unknown;
        };
        match row.route_to {
            None => Offer::Local,
            Some(current) if current == from => {
                if cost >= MAX_COST {
                    let changed = row.cost < MAX_COST;
                    row.cost = MAX_COST;
                    row.route_changed |= changed;
                    Offer::Unreachable { changed }
                } else {
                    let changed = row.cost != cost;
                    row.cost = cost;
                    row.route_changed |= changed;
                    Offer::Refreshed { changed }
                }
            }
            Some(current) => {
                if cost < row.cost {
                    row.route_to = Some(from);
                    row.cost = cost;
                    row.route_changed = true;
                    Offer::Replaced { previous: current }
                } else {
                    Offer::Ignored
                }
            }
        }
    }

    /// Forces a row to `MAX_COST`; returns `true` if it was reachable.
    pub fn force_unreachable(&mut self, id: u32) -> bool {
        let Some(row) = self.rows.get_mut(&id) else {
            return false;
        };
        if row.cost >= MAX_COST {
            return false;
        }
        row.cost = MAX_COST;
        row.route_changed = true;
        true
    }

    /// Ids whose next hop is `peer`.
    pub fn rows_via(&self, peer: PeerId) -> Vec<u32> {
        self.rows
            .iter()
            .filter(|(_, row)| row.route_to == Some(peer))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Number of rows through `peer` that are still reachable.
    pub fn reachable_via(&self, peer: PeerId) -> usize {
        self.rows
            .values()
            .filter(|row| row.route_to == Some(peer) && row.is_reachable())
            .count()
    }

    pub fn has_changes(&self) -> bool {
        self.rows.values().any(|row| row.route_changed)
    }

    /// Costs to send to `peer`, with poison reverse applied.
    ///
    /// With `changed_only`, only rows flagged `route_changed` are included.
    pub fn advertisement(&self, peer: PeerId, changed_only: bool) -> BTreeMap<u32, f32> {
        self.rows
            .iter()
            .filter(|(_, row)| !changed_only || row.route_changed)
            .map(|(id, row)| (*id, row.cost_for(peer)))
            .collect()
    }

    pub fn clear_changes(&mut self) {
        for row in self.rows.values_mut() {
            row.route_changed = false;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
