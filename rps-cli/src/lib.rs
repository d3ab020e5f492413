//! # rps-cli — remote-play client front end
//!
//! Loads the client configuration, manages the host settings file,
//! provides the fixed-cadence driver that ties a `StreamingSession` to a
//! presentation surface, and the pair-and-stream flow built on top of it.

pub mod config;
pub mod driver;
pub mod flow;
