//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module reads the core's TOML file (plant, tie lines,
//! ports, protocol timings) from the platform config directory or an
//! explicit path, falling back to defaults when no file exists yet.

pub mod config;
