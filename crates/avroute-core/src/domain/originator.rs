//! Named routing endpoints: [`Source`], [`Destination`] and [`DestinationGroup`].
//!
//! Rooms and panels never talk about raw endpoints.  They pick "Blu-ray 1" or
//! "Projector" from a list; those list entries are the *originators* defined
//! here.  Each one pairs a stable numeric id (shared across cores) with the
//! endpoint where the signal leaves (source) or arrives (destination).
//!
//! The `remote` flag marks entries created from another core's advertisement
//! rather than from local configuration.  Only local entries are seeded into
//! the cost tables at cost zero.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::endpoint::{ConnectionType, EndpointInfo};

/// Identifier of a source, unique across the whole installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(pub u32);

/// Identifier of a destination, unique across the whole installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DestinationId(pub u32);

/// Identifier of a destination group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DestinationGroupId(pub u32);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for DestinationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for DestinationGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Common behaviour of sources and destinations, used by generic tables.
pub trait Originator: Clone {
    type Id: Copy + Ord + std::hash::Hash + fmt::Display;

    fn id(&self) -> Self::Id;
    fn endpoint(&self) -> EndpointInfo;
    fn connection_type(&self) -> ConnectionType;
    fn is_remote(&self) -> bool;
    fn name(&self) -> &str;
}

/// A named signal origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub id: SourceId,
    pub name: String,
    pub endpoint: EndpointInfo,
    pub connection_type: ConnectionType,
    #[serde(default)]
    pub remote: bool,
}

/// A named signal sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    pub id: DestinationId,
    pub name: String,
    pub endpoint: EndpointInfo,
    pub connection_type: ConnectionType,
    #[serde(default)]
    pub remote: bool,
}

/// A named set of destinations used for bulk route/unroute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationGroup {
    pub id: DestinationGroupId,
    pub name: String,
    pub destinations: Vec<DestinationId>,
}

impl Originator for Source {
    type Id = SourceId;

    fn id(&self) -> SourceId {
        self.id
    }
    fn endpoint(&self) -> EndpointInfo {
        self.endpoint
    }
    fn connection_type(&self) -> ConnectionType {
        self.connection_type
    }
    fn is_remote(&self) -> bool {
        self.remote
    }
    fn name(&self) -> &str {
        &self.name
    }
}

impl Originator for Destination {
    type Id = DestinationId;

    fn id(&self) -> DestinationId {
        self.id
    }
    fn endpoint(&self) -> EndpointInfo {
        self.endpoint
    }
    fn connection_type(&self) -> ConnectionType {
        self.connection_type
    }
    fn is_remote(&self) -> bool {
        self.remote
    }
    fn name(&self) -> &str {
        &self.name
    }
}
