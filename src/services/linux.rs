//! Linux collector backend
//!
//! Pulls every metric group from procfs/sysfs: /proc/uptime, /proc/loadavg,
//! /proc/meminfo, /proc/stat, /proc/net/dev, /proc/net/wireless and
//! /sys/class/net/<if>/*. Disk figures come from statvfs(3). All parsing
//! that does not need the OS is kept in pure functions.

use std::collections::HashMap;

use once_cell::sync::OnceCell;
use procfs::{Current, CurrentSI};

use crate::services::collectors::{
    ceil_percent, load_centi, normalize_level, CpuInfo, DiskInfo, HostMetrics, IfInfo, IfStatus,
    LoadInfo, MemInfo, SignalScale, UptimeInfo, WirelessInfo,
};
use crate::{Error, Result};

const KIB: u64 = 1024;

/// Host metrics from the running Linux kernel.
#[derive(Debug, Default)]
pub struct LinuxHost {
    uptime_origin: OnceCell<u32>,
}

impl LinuxHost {
    pub fn new() -> Self {
        Self::default()
    }
}

fn proc_err(e: procfs::ProcError) -> Error {
    Error::collector(e.to_string())
}

fn read_sysfs_net(name: &str, attribute: &str) -> Option<String> {
    std::fs::read_to_string(format!("/sys/class/net/{}/{}", name, attribute))
        .ok()
        .map(|s| s.trim().to_string())
}

/// Total interrupt count from the /proc/stat `intr` line; procfs does not
/// expose it.
fn read_interrupt_total() -> Result<u64> {
    let stat = std::fs::read_to_string("/proc/stat")?;
    for line in stat.lines() {
        if let Some(rest) = line.strip_prefix("intr ") {
            if let Some(first) = rest.split_whitespace().next() {
                return Ok(first.parse().unwrap_or(0));
            }
        }
    }
    Ok(0)
}

fn statvfs(path: &str) -> Option<libc::statvfs> {
    let c_path = std::ffi::CString::new(path).ok()?;
    let mut stats: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stats) };
    if rc == 0 {
        Some(stats)
    } else {
        None
    }
}

fn parse_mac(text: &str) -> Option<[u8; 6]> {
    let mut mac = [0u8; 6];
    let mut parts = text.split(':');
    for byte in mac.iter_mut() {
        *byte = u8::from_str_radix(parts.next()?, 16).ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(mac)
}

fn parse_flags(text: &str) -> Option<u32> {
    let hex = text.strip_prefix("0x").unwrap_or(text);
    u32::from_str_radix(hex, 16).ok()
}

/// Link status from the interface flag word, encoded for ifTable.
fn status_from_flags(flags: Option<u32>) -> (IfStatus, IfStatus) {
    let Some(flags) = flags else {
        return (IfStatus::Unknown, IfStatus::Unknown);
    };
    let up = flags & libc::IFF_UP as u32 != 0;
    let running = flags & libc::IFF_RUNNING as u32 != 0;
    if !up {
        (IfStatus::Down, IfStatus::Down)
    } else if running {
        (IfStatus::Up, IfStatus::Up)
    } else {
        (IfStatus::Up, IfStatus::LowerLayerDown)
    }
}

/// Extracts one interface's signal/noise levels from /proc/net/wireless
/// content. Negative readings are taken as dBm; positive ones are RCPI
/// units and get rescaled.
fn parse_wireless(content: &str, name: &str) -> Option<WirelessInfo> {
    for line in content.lines().skip(2) {
        let line = line.trim_start();
        let Some(rest) = line.strip_prefix(name) else {
            continue;
        };
        let Some(rest) = rest.strip_prefix(':') else {
            continue;
        };
        let mut fields = rest.split_whitespace().skip(2); // status, link quality
        let level = parse_level(fields.next()?)?;
        let noise = parse_level(fields.next()?)?;
        return Some(WirelessInfo {
            signal: rescale(level),
            noise: rescale(noise),
        });
    }
    None
}

fn parse_level(field: &str) -> Option<i32> {
    field.trim_end_matches('.').parse::<i32>().ok()
}

fn rescale(raw: i32) -> i32 {
    if raw > 0 && raw <= u8::MAX as i32 {
        normalize_level(raw as u8, SignalScale::Rcpi)
    } else {
        raw
    }
}

impl HostMetrics for LinuxHost {
    fn hostname(&mut self) -> Result<String> {
        let name = std::fs::read_to_string("/proc/sys/kernel/hostname")?;
        Ok(name.trim().to_string())
    }

    fn uptime(&mut self) -> Result<UptimeInfo> {
        // /proc/uptime has centisecond resolution; sysinfo(2) only whole
        // seconds, which is too coarse for TimeTicks.
        let system = (procfs::Uptime::current().map_err(proc_err)?.uptime * 100.0) as u32;
        let origin = *self.uptime_origin.get_or_init(|| system);
        Ok(UptimeInfo {
            process: system.saturating_sub(origin),
            system,
        })
    }

    fn load(&mut self) -> Result<LoadInfo> {
        let load = procfs::LoadAverage::current().map_err(proc_err)?;
        Ok(LoadInfo {
            avg: [
                load_centi(load.one as f64),
                load_centi(load.five as f64),
                load_centi(load.fifteen as f64),
            ],
        })
    }

    fn memory(&mut self) -> Result<MemInfo> {
        let mem = procfs::Meminfo::current().map_err(proc_err)?;
        Ok(MemInfo {
            total: mem.mem_total / KIB,
            free: mem.mem_free / KIB,
            shared: mem.shmem.unwrap_or(0) / KIB,
            buffers: mem.buffers / KIB,
            cached: mem.cached / KIB,
        })
    }

    fn cpu(&mut self) -> Result<CpuInfo> {
        let stats = procfs::KernelStats::current().map_err(proc_err)?;
        Ok(CpuInfo {
            user: stats.total.user,
            nice: stats.total.nice,
            system: stats.total.system,
            idle: stats.total.idle,
            irqs: read_interrupt_total()?,
            cntxts: stats.ctxt,
        })
    }

    fn disks(&mut self, mounts: &[String]) -> Result<Vec<DiskInfo>> {
        Ok(mounts
            .iter()
            .map(|mount| match statvfs(mount) {
                Some(fs) => {
                    let frsize = fs.f_frsize as u64;
                    let blocks = fs.f_blocks as u64;
                    let bfree = fs.f_bfree as u64;
                    let files = fs.f_files as u64;
                    let ffree = fs.f_ffree as u64;
                    DiskInfo {
                        total: blocks * frsize / KIB,
                        free: bfree * frsize / KIB,
                        used: (blocks - bfree) * frsize / KIB,
                        blocks_used_percent: ceil_percent(blocks - bfree, blocks),
                        inodes_used_percent: ceil_percent(files.saturating_sub(ffree), files),
                    }
                }
                None => DiskInfo::default(),
            })
            .collect())
    }

    fn interfaces(&mut self, names: &[String]) -> Result<Vec<IfInfo>> {
        let counters: HashMap<String, procfs::net::DeviceStatus> =
            procfs::net::dev_status().map_err(proc_err)?;

        Ok(names
            .iter()
            .map(|name| {
                let mut info = IfInfo::default();
                if let Some(dev) = counters.get(name) {
                    info.rx_bytes = dev.recv_bytes;
                    info.rx_packets = dev.recv_packets;
                    info.rx_errors = dev.recv_errs;
                    info.rx_drops = dev.recv_drop;
                    info.tx_bytes = dev.sent_bytes;
                    info.tx_packets = dev.sent_packets;
                    info.tx_errors = dev.sent_errs;
                    info.tx_drops = dev.sent_drop;
                }

                let flags = read_sysfs_net(name, "flags").and_then(|s| parse_flags(&s));
                let (admin, oper) = status_from_flags(flags);
                info.admin_status = admin;
                info.oper_status = oper;

                if let Some(mac) = read_sysfs_net(name, "address").and_then(|s| parse_mac(&s)) {
                    info.mac = mac;
                }
                if let Some(mtu) = read_sysfs_net(name, "mtu").and_then(|s| s.parse().ok()) {
                    info.mtu = mtu;
                }
                // The speed attribute is absent or -1 for links that do
                // not negotiate; it reports megabits per second.
                if let Some(mbit) = read_sysfs_net(name, "speed")
                    .and_then(|s| s.parse::<i64>().ok())
                    .filter(|v| *v > 0)
                {
                    info.speed = (mbit as u64)
                        .saturating_mul(1_000_000)
                        .min(u32::MAX as u64) as u32;
                }
                info
            })
            .collect())
    }

    fn wireless(&mut self, names: &[String]) -> Result<Vec<WirelessInfo>> {
        let content = std::fs::read_to_string("/proc/net/wireless").unwrap_or_default();
        Ok(names
            .iter()
            .map(|name| parse_wireless(&content, name).unwrap_or_default())
            .collect())
    }
}
