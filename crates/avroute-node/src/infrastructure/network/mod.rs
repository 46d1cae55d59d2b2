//! Network infrastructure for a core.
//!
//! # Sub-modules
//!
//! - **`peer_link`** – One UDP socket per core carrying framed protocol
//!   messages to and from peers, plus the non-blocking outbound queue the
//!   application layer sends through.
//!
//! - **`discovery`** – Broadcasts this core's `Announce` and listens for
//!   other cores' announces on the discovery port.  This is how cores find
//!   each other without manual IP configuration.

pub mod discovery;
pub mod peer_link;
