//! # avroute-core
//!
//! Shared library for AVRoute containing the routing graph engine, the
//! connection usage ledger, static-route enforcement, and the inter-core
//! protocol codec.
//!
//! It has no dependencies on sockets, device drivers or configuration files.
//! Device drivers plug in through the control traits in
//! [`domain::control`]; the node crate supplies the network transport.
//!
//! # Architecture overview (for beginners)
//!
//! AVRoute decides which source output (a laptop, a camera, a media player)
//! is switched to which destination input (a projector, a speaker zone),
//! across any number of matrix switchers.  Several independent control
//! processors ("cores") can each own part of the plant and cooperate.
//!
//! - **`domain`** – Value types: endpoints, connections, route operations,
//!   named sources and destinations, and the contracts device drivers
//!   implement.
//!
//! - **`routing`** – The engine.  [`RoutingGraph`] finds a path through the
//!   switchers, claims it for a room so nobody else can put a different
//!   source on it, tells each switcher what to do, and reports when the
//!   whole operation is finished.
//!
//! - **`protocol`** – How cores talk to each other: cost advertisements,
//!   device sharing, and route requests that cross a core boundary, encoded
//!   into a compact binary frame (32-byte header + bincode payload).

pub mod domain;
pub mod protocol;
pub mod routing;

pub use domain::connection::{Connection, ConnectionId, DYNAMIC_CONNECTION_ID_BASE};
pub use domain::control::{
    ControlHandle, ControlRegistry, DestinationControl, RouteChangedNotifier, RouteChangedObserver,
    SourceControl, SwitchOutcome, SwitcherControl,
};
pub use domain::endpoint::{
    Address, ConnectionType, ConnectorInfo, ControlId, DeviceControlInfo, DeviceId, EndpointInfo,
    RoomId,
};
pub use domain::operation::RouteOperation;
pub use domain::originator::{
    Destination, DestinationGroup, DestinationGroupId, DestinationId, Originator, Source, SourceId,
};
pub use domain::peer::PeerId;
pub use protocol::codec::{decode_message, encode_message, Frame, ProtocolError};
pub use protocol::messages::CoreMessage;
pub use routing::connections::{ConnectionsIndex, Direction};
pub use routing::error::RoutingError;
pub use routing::graph::{Path, RouteLeg, RoutingEvent, RoutingGraph};
pub use routing::static_routes::{StaticRoute, STATIC_ROUTE_ROOM};
pub use routing::usage::{ConnectionUsageInfo, UsageClaim, UsageLedger};
