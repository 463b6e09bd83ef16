//! micro-snmpd - Minimal SNMP daemon
//!
//! A small read-only SNMP v1/v2c agent for resource-constrained UNIX hosts.
//! Serves system identity, uptime, CPU, memory, load, disk and network
//! interface metrics over UDP and TCP from a single readiness-driven thread.

pub mod config;
pub mod core;
pub mod error;
pub mod mib;
pub mod protocols;
pub mod services;
pub mod utils;

pub use error::{Error, Result};

/// Agent version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
