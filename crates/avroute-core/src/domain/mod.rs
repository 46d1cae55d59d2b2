//! Domain entities for AVRoute.
//!
//! This module contains the value types that describe the physical plant and
//! routing intents.  Nothing here performs I/O; device drivers and network
//! transports live in the node crate and reach the domain only through the
//! traits in [`control`].
//!
//! # Vocabulary (for beginners)
//!
//! - An **endpoint** is one terminal on a control: `(device, control, address)`.
//! - A **connection** is a cable (or a logical link) from a source-side
//!   endpoint to a destination-side endpoint, tagged with the signal types it
//!   carries.
//! - A **switcher** (midpoint) is a control that can connect one of its inputs
//!   to one of its outputs, which is what makes multi-hop paths possible.
//! - A **route operation** is a single request to get a signal from a source
//!   endpoint to a destination endpoint for a room.

pub mod connection;
pub mod control;
pub mod endpoint;
pub mod operation;
pub mod originator;
pub mod peer;
