//! Application layer of the node: the inter-core protocol on top of the
//! routing engine.
//!
//! # What lives here? (for beginners)
//!
//! `avroute-core` knows how to route within one graph.  This layer makes
//! several cores behave like one plant:
//!
//! - It learns which sources and destinations other cores can reach and at
//!   what cost, and adds stand-ins for them to the local graph.
//! - It represents each peer core as a placeholder switcher, so a path that
//!   leaves this core is just another hop to the engine.
//! - It executes the hops peers ask of it.
//!
//! Nothing here opens a socket or reads a file.  Messages leave through the
//! [`messaging::MessageSender`] trait; the infrastructure layer supplies the
//! UDP implementation and tests supply an in-memory one.
//!
//! # Sub-modules
//!
//! - **`cost_distribution`** – The protocol handler: peer lifecycle, cost
//!   updates, timers and cross-core route requests.
//! - **`cost_table`** – Per-id cost rows and the rules for applying offers.
//! - **`remote_switcher`** – The placeholder switcher standing in for a peer.
//! - **`timers`** – Deadline bookkeeping driven by an explicit clock.
//! - **`messaging`** – The outbound message contract.
//! - **`diagnostics`** – Text tables of engine and protocol state.

pub mod cost_distribution;
pub mod cost_table;
pub mod diagnostics;
pub mod messaging;
pub mod remote_switcher;
pub mod timers;
