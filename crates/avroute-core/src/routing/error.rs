//! Error type shared by the routing tables.
//!
//! Ordinary routing outcomes ("no path", "connection in use") are *not*
//! errors; they are `bool` / `Option` returns.  These variants cover invalid
//! topology edits and misuse of the API.

use thiserror::Error;

use crate::domain::connection::ConnectionId;
use crate::domain::endpoint::{ConnectionType, EndpointInfo};
use crate::domain::originator::{DestinationGroupId, DestinationId, SourceId};

#[derive(Debug, Error, PartialEq)]
pub enum RoutingError {
    /// A connection with this id is already indexed.
    #[error("connection {0} already exists")]
    DuplicateConnection(ConnectionId),

    /// The connection id is not indexed.
    #[error("connection {0} not found")]
    UnknownConnection(ConnectionId),

    /// Connections must carry at least one signal type.
    #[error("connection {0} has no connection type")]
    EmptyConnectionType(ConnectionId),

    /// Another connection already leaves this output for one of the types.
    #[error("output {endpoint} already used by connection {existing} for {connection_type}")]
    OutputInUse {
        endpoint: EndpointInfo,
        connection_type: ConnectionType,
        existing: ConnectionId,
    },

    /// Another connection already arrives at this input for one of the types.
    #[error("input {endpoint} already used by connection {existing} for {connection_type}")]
    InputInUse {
        endpoint: EndpointInfo,
        connection_type: ConnectionType,
        existing: ConnectionId,
    },

    /// The connection claims a type the control does not support on that port.
    #[error("connection {connection} carries {requested} but {endpoint} only supports {supported}")]
    UnsupportedConnectionType {
        connection: ConnectionId,
        endpoint: EndpointInfo,
        requested: ConnectionType,
        supported: ConnectionType,
    },

    #[error("source {0} not found")]
    UnknownSource(SourceId),

    #[error("destination {0} not found")]
    UnknownDestination(DestinationId),

    #[error("destination group {0} not found")]
    UnknownDestinationGroup(DestinationGroupId),

    /// A usage claim would displace a different source.
    #[error("connection {connection} is claimed by {holder} for {connection_type}")]
    UsageConflict {
        connection: ConnectionId,
        connection_type: ConnectionType,
        holder: EndpointInfo,
    },
}
