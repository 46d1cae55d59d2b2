//! Permanent source-to-destination bindings.
//!
//! A static route is claimed under the reserved room [`STATIC_ROUTE_ROOM`] so
//! that ordinary rooms can fan out from it but never displace it.  The set
//! remembers the legs each route was last resolved to; the engine uses that
//! to decide which routes to re-issue when one switcher is changed behind its
//! back.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::domain::endpoint::{ConnectionType, DeviceControlInfo, EndpointInfo, RoomId};

use super::graph::RouteLeg;

/// Room id that owns every static-route claim.
pub const STATIC_ROUTE_ROOM: RoomId = 0;

/// A binding the engine keeps satisfied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticRoute {
    pub id: u32,
    pub source: EndpointInfo,
    pub destination: EndpointInfo,
    pub connection_type: ConnectionType,
}

/// Configured static routes plus the legs each one currently uses.
#[derive(Debug, Default)]
pub struct StaticRouteSet {
    routes: BTreeMap<u32, StaticRoute>,
    paths: HashMap<u32, Vec<RouteLeg>>,
}

impl StaticRouteSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the configured routes and forgets every resolved path.
    pub fn set_routes(&mut self, routes: impl IntoIterator<Item = StaticRoute>) {
        self.routes = routes.into_iter().map(|r| (r.id, r)).collect();
        self.paths.clear();
    }

    pub fn routes(&self) -> Vec<StaticRoute> {
        self.routes.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn legs(&self, id: u32) -> Option<&[RouteLeg]> {
        self.paths.get(&id).map(Vec::as_slice)
    }

    pub fn set_legs(&mut self, id: u32, legs: Vec<RouteLeg>) {
        if self.routes.contains_key(&id) {
            self.paths.insert(id, legs);
        }
    }

    pub fn clear_paths(&mut self) {
        self.paths.clear();
    }

    /// Routes with a resolved leg that switches inside `control`, with all
    /// of their legs.
    ///
    /// A leg switches inside a control when one link arrives at it and the
    /// next one leaves it.
    pub fn routes_through(&self, control: DeviceControlInfo) -> Vec<(StaticRoute, Vec<RouteLeg>)> {
        self.routes
            .values()
            .filter_map(|route| {
                let legs = self.paths.get(&route.id)?;
                legs.iter()
                    .any(|leg| {
                        leg.path
                            .windows(2)
                            .any(|hop| hop[0].destination.device_control() == control)
                    })
                    .then(|| (route.clone(), legs.clone()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::connection::{Connection, ConnectionId};

    fn link(id: u32, from: (u32, u32), to: (u32, u32)) -> Connection {
        Connection::new(
            ConnectionId(id),
            EndpointInfo::new(from.0, 0, from.1),
            EndpointInfo::new(to.0, 0, to.1),
            ConnectionType::VIDEO,
        )
    }

    fn video(path: Vec<Connection>) -> Vec<RouteLeg> {
        vec![RouteLeg {
            connection_type: ConnectionType::VIDEO,
            path,
        }]
    }

    fn route(id: u32) -> StaticRoute {
        StaticRoute {
            id,
            source: EndpointInfo::new(1, 0, 1),
            destination: EndpointInfo::new(4, 0, 1),
            connection_type: ConnectionType::VIDEO,
        }
    }

    #[test]
    fn test_routes_through_matches_only_switching_controls() {
        // Arrange: 1 -> switcher 2 -> switcher 3 -> 4
        let mut set = StaticRouteSet::new();
        set.set_routes([route(7)]);
        set.set_legs(
            7,
            video(vec![link(1, (1, 1), (2, 1)), link(2, (2, 1), (3, 1)), link(3, (3, 1), (4, 1))]),
        );

        // Act / Assert
        assert_eq!(set.routes_through(DeviceControlInfo::new(2, 0)).len(), 1);
        assert_eq!(set.routes_through(DeviceControlInfo::new(3, 0)).len(), 1);
        assert!(set.routes_through(DeviceControlInfo::new(4, 0)).is_empty(), "terminal is not a hop");
        assert!(set.routes_through(DeviceControlInfo::new(1, 0)).is_empty());
    }

    #[test]
    fn test_set_routes_forgets_paths() {
        let mut set = StaticRouteSet::new();
        set.set_routes([route(7)]);
        set.set_legs(7, video(vec![link(1, (1, 1), (4, 1))]));

        set.set_routes([route(7), route(8)]);

        assert_eq!(set.len(), 2);
        assert!(set.legs(7).is_none());
    }

    #[test]
    fn test_set_legs_ignores_unknown_route() {
        let mut set = StaticRouteSet::new();
        set.set_legs(9, video(vec![link(1, (1, 1), (4, 1))]));
        assert!(set.legs(9).is_none());
    }
}
