//! Utility modules for micro-snmpd

pub mod logger;

pub use logger::setup_logging;
