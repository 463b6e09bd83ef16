//! Host metric collector contract
//!
//! The MIB pulls its dynamic values through the [`HostMetrics`] trait, one
//! operation per metric group, each filling a fixed-shape record. Platform
//! modules implement the trait; the MIB never touches OS constructs
//! directly. A failed pull leaves the previous values in place - errors
//! are a logging concern, never a wire concern.

use crate::Result;

/// Uptime counters in 1/100 seconds.
///
/// `process` is derived: the first reading of the system uptime becomes
/// the origin, and later calls report the distance from it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UptimeInfo {
    pub process: u32,
    pub system: u32,
}

/// 1/5/15 minute load averages as centivalues (average * 100, truncated).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadInfo {
    pub avg: [u32; 3],
}

/// Memory figures in kibibytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemInfo {
    pub total: u64,
    pub free: u64,
    pub shared: u64,
    pub buffers: u64,
    pub cached: u64,
}

/// Accumulating CPU jiffy counters plus interrupt and context switch
/// totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuInfo {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub irqs: u64,
    pub cntxts: u64,
}

/// Per-mount disk usage in kibibytes plus ceiling-rounded use percentages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskInfo {
    pub total: u64,
    pub free: u64,
    pub used: u64,
    pub blocks_used_percent: u32,
    pub inodes_used_percent: u32,
}

/// Interface administrative/operational status per the ifTable encoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IfStatus {
    Up = 1,
    Down = 2,
    Testing = 3,
    #[default]
    Unknown = 4,
    Dormant = 5,
    NotPresent = 6,
    LowerLayerDown = 7,
}

impl IfStatus {
    pub fn wire(self) -> i32 {
        self as i32
    }
}

/// Per-interface counters and link attributes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IfInfo {
    pub rx_bytes: u64,
    pub rx_packets: u64,
    pub rx_errors: u64,
    pub rx_drops: u64,
    pub tx_bytes: u64,
    pub tx_packets: u64,
    pub tx_errors: u64,
    pub tx_drops: u64,
    pub admin_status: IfStatus,
    pub oper_status: IfStatus,
    pub mac: [u8; 6],
    pub mtu: i32,
    /// Bits per second, saturated to the Gauge32 range.
    pub speed: u32,
}

/// Wireless link quality in dBm.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WirelessInfo {
    pub signal: i32,
    pub noise: i32,
}

/// The pull contract between the MIB and the host.
pub trait HostMetrics {
    fn hostname(&mut self) -> Result<String>;
    fn uptime(&mut self) -> Result<UptimeInfo>;
    fn load(&mut self) -> Result<LoadInfo>;
    fn memory(&mut self) -> Result<MemInfo>;
    fn cpu(&mut self) -> Result<CpuInfo>;
    /// One record per requested mount point, zero-filled where a mount
    /// cannot be inspected.
    fn disks(&mut self, mounts: &[String]) -> Result<Vec<DiskInfo>>;
    /// One record per requested interface name, zero-filled for unknown
    /// interfaces (status Unknown).
    fn interfaces(&mut self, names: &[String]) -> Result<Vec<IfInfo>>;
    fn wireless(&mut self, names: &[String]) -> Result<Vec<WirelessInfo>>;
}

/// Ceiling-rounded percentage: any nonzero occupation reports at least 1%.
pub fn ceil_percent(used: u64, total: u64) -> u32 {
    if total == 0 {
        return 0;
    }
    ((used * 100 + total - 1) / total) as u32
}

/// Truncating centivalue conversion for load averages.
pub fn load_centi(avg: f64) -> u32 {
    if avg <= 0.0 {
        return 0;
    }
    (avg * 100.0) as u32
}

/// How a driver reports wireless signal/noise levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalScale {
    /// RCPI units: dBm = level / 2 - 110.
    Rcpi,
    /// 8-bit two's complement dBm: dBm = level - 256.
    Dbm,
    /// Relative quality against a driver maximum, reported as 0..100.
    Relative { max: u8 },
}

/// Normalizes a raw level reading to the value the MIB exposes.
///
/// Pure over its inputs so platform quirks can be tested without the OS.
pub fn normalize_level(level: u8, scale: SignalScale) -> i32 {
    match scale {
        SignalScale::Rcpi => (level as i32) / 2 - 110,
        SignalScale::Dbm => level as i32 - 256,
        SignalScale::Relative { max } => {
            if max == 0 {
                0
            } else {
                100 * level as i32 / max as i32
            }
        }
    }
}

/// Deterministic in-memory collector shared by unit tests across modules.
#[cfg(test)]
pub mod test_support {
    use super::*;
    use crate::{Error, Result};

    #[derive(Debug, Default)]
    pub struct FixedHost {
        /// When set, every pull fails.
        pub fail: bool,
        pub uptime: UptimeInfo,
    }

    impl FixedHost {
        pub fn new() -> Self {
            Self {
                fail: false,
                uptime: UptimeInfo {
                    process: 1234,
                    system: 8_640_000,
                },
            }
        }

        fn check(&self) -> Result<()> {
            if self.fail {
                Err(Error::collector("fixed host failing"))
            } else {
                Ok(())
            }
        }
    }

    impl HostMetrics for FixedHost {
        fn hostname(&mut self) -> Result<String> {
            self.check()?;
            Ok("testhost".to_string())
        }

        fn uptime(&mut self) -> Result<UptimeInfo> {
            self.check()?;
            Ok(self.uptime)
        }

        fn load(&mut self) -> Result<LoadInfo> {
            self.check()?;
            Ok(LoadInfo { avg: [53, 41, 33] })
        }

        fn memory(&mut self) -> Result<MemInfo> {
            self.check()?;
            Ok(MemInfo {
                total: 1_048_576,
                free: 524_288,
                shared: 1024,
                buffers: 2048,
                cached: 4096,
            })
        }

        fn cpu(&mut self) -> Result<CpuInfo> {
            self.check()?;
            Ok(CpuInfo {
                user: 100,
                nice: 200,
                system: 300,
                idle: 400,
                irqs: 500,
                cntxts: 600,
            })
        }

        fn disks(&mut self, mounts: &[String]) -> Result<Vec<DiskInfo>> {
            self.check()?;
            Ok(mounts
                .iter()
                .map(|_| DiskInfo {
                    total: 1000,
                    free: 400,
                    used: 600,
                    blocks_used_percent: 60,
                    inodes_used_percent: 5,
                })
                .collect())
        }

        fn interfaces(&mut self, names: &[String]) -> Result<Vec<IfInfo>> {
            self.check()?;
            Ok(names
                .iter()
                .enumerate()
                .map(|(i, _)| IfInfo {
                    rx_bytes: 1000 + i as u64,
                    rx_packets: 10 + i as u64,
                    rx_errors: 0,
                    rx_drops: 0,
                    tx_bytes: 2000 + i as u64,
                    tx_packets: 20 + i as u64,
                    tx_errors: 0,
                    tx_drops: 0,
                    admin_status: IfStatus::Up,
                    oper_status: IfStatus::Up,
                    mac: [0, 1, 2, 3, 4, i as u8],
                    mtu: 1500,
                    speed: 100_000_000,
                })
                .collect())
        }

        fn wireless(&mut self, names: &[String]) -> Result<Vec<WirelessInfo>> {
            self.check()?;
            Ok(names
                .iter()
                .map(|_| WirelessInfo {
                    signal: -55,
                    noise: -95,
                })
                .collect())
        }
    }
}
