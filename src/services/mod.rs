//! Host-facing services for micro-snmpd

pub mod collectors;
#[cfg(target_os = "linux")]
pub mod linux;

pub use collectors::{
    CpuInfo, DiskInfo, HostMetrics, IfInfo, IfStatus, LoadInfo, MemInfo, UptimeInfo, WirelessInfo,
};
#[cfg(target_os = "linux")]
pub use linux::LinuxHost;
