//! Protocol implementations for micro-snmpd

pub mod ber;
pub mod oid;
pub mod snmp;

pub use ber::Value;
pub use oid::Oid;
pub use snmp::{ErrorStatus, Message, PduType, VarBind, Version};
