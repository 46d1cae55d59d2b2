//! The routing engine and the tables it owns.
//!
//! - [`connections`] – the connections index.
//! - [`usage`] – which room holds which connection for which source.
//! - [`static_routes`] – bindings that are restored after topology changes.
//! - [`originators`] – id-keyed source and destination tables.
//! - [`graph`] – [`graph::RoutingGraph`], which ties the tables together and
//!   drives switchers.

pub mod connections;
pub mod error;
pub mod graph;
pub mod originators;
pub mod static_routes;
pub mod usage;
