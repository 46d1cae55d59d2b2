//! Infrastructure layer of the node.
//!
//! Contains OS-facing adapters: UDP sockets for peer messaging and
//! discovery, configuration file storage, and the virtual device controls
//! that stand in for hardware drivers.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `avroute_core`, but MUST NOT be imported by the `application` layer.

pub mod devices;
pub mod network;
pub mod storage;
