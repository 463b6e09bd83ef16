//! Host MIB registration and refresh
//!
//! Builds the table the dispatcher serves: the standard system group, the
//! interfaces group with one row per monitored interface, and UCD-style
//! host groups (memory, disk, load, CPU, wireless) under the private
//! subtree. Registration runs once in ascending OID order; ticks refresh
//! values in place.

use tracing::warn;

use crate::config::AgentConfig;
use crate::mib::Mib;
use crate::protocols::{Oid, Value};
use crate::services::collectors::HostMetrics;
use crate::Result;

const SYSTEM: &[u32] = &[1, 3, 6, 1, 2, 1, 1];
const IF_TABLE: &[u32] = &[1, 3, 6, 1, 2, 1, 2, 2, 1];
const UCD_MEMORY: &[u32] = &[1, 3, 6, 1, 4, 1, 2021, 4];
const UCD_DISK_TABLE: &[u32] = &[1, 3, 6, 1, 4, 1, 2021, 9, 1];
const UCD_LOAD_TABLE: &[u32] = &[1, 3, 6, 1, 4, 1, 2021, 10, 1];
const UCD_SYSTEM_STATS: &[u32] = &[1, 3, 6, 1, 4, 1, 2021, 11];
const UCD_WIRELESS_TABLE: &[u32] = &[1, 3, 6, 1, 4, 1, 2021, 13, 1];

const SYS_SERVICES: i32 = 72;

// ifTable column numbers (RFC 1213)
const IF_COLUMNS: &[u32] = &[1, 2, 3, 4, 5, 6, 7, 8, 10, 11, 13, 14, 16, 17, 19, 20];
const IF_TYPE_ETHERNET: i32 = 6;
const IF_TYPE_IEEE80211: i32 = 71;

const DISK_COLUMNS: &[u32] = &[1, 2, 6, 7, 8, 9, 10];
const LOAD_COLUMNS: &[u32] = &[1, 2, 3, 5];
const LOAD_NAMES: [&str; 3] = ["Load-1", "Load-5", "Load-15"];
const WIRELESS_COLUMNS: &[u32] = &[1, 2, 3, 4];

/// Refresh depth for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refresh {
    /// Every group is re-pulled from the host.
    Full,
    /// Only the uptime entries; the remaining groups tolerate one tick of
    /// staleness.
    Partial,
}

#[derive(Debug, Default)]
struct WarnedFlags {
    uptime: bool,
    hostname: bool,
    load: bool,
    memory: bool,
    cpu: bool,
    disk: bool,
    net: bool,
    wireless: bool,
}

/// The dispatcher-visible MIB plus its refresh machinery.
pub struct HostMib {
    mib: Mib,
    collector: Box<dyn HostMetrics + Send>,
    disks: Vec<String>,
    interfaces: Vec<String>,
    wireless: Vec<String>,
    warned: WarnedFlags,
}

fn scalar(base: &[u32], field: u32) -> Result<Oid> {
    Ok(Oid::from_slice(base)?.extend(&[field, 0]))
}

fn cell(table: &[u32], column: u32, row: usize) -> Result<Oid> {
    Ok(Oid::from_slice(table)?.extend(&[column, row as u32 + 1]))
}

fn clamp_i32(v: u64) -> i32 {
    v.min(i32::MAX as u64) as i32
}

impl HostMib {
    /// Registers every exposed object, then runs a first full refresh so
    /// the agent never serves unset values.
    pub fn build(config: &AgentConfig, collector: Box<dyn HostMetrics + Send>) -> Result<Self> {
        let mut host = Self {
            mib: Mib::new(),
            collector,
            disks: config.disks.clone(),
            interfaces: config.interfaces.clone(),
            wireless: config.wireless_interfaces.clone(),
            warned: WarnedFlags::default(),
        };
        host.register_system(config)?;
        host.register_interfaces()?;
        host.register_memory()?;
        host.register_disks()?;
        host.register_load()?;
        host.register_cpu()?;
        host.register_wireless()?;
        host.refresh(Refresh::Full)?;
        Ok(host)
    }

    pub fn mib(&self) -> &Mib {
        &self.mib
    }

    fn register_system(&mut self, config: &AgentConfig) -> Result<()> {
        let vendor: Oid = config.vendor_oid.parse()?;
        let entries: [(u32, Value); 8] = [
            (1, Value::OctetString(config.description.clone().into_bytes())),
            (2, Value::Oid(vendor)),
            (3, Value::TimeTicks(0)),
            (4, Value::OctetString(config.contact.clone().into_bytes())),
            (5, Value::OctetString(Vec::new())),
            (6, Value::OctetString(config.location.clone().into_bytes())),
            (7, Value::Integer(SYS_SERVICES)),
            (8, Value::TimeTicks(0)),
        ];
        for (field, value) in entries {
            self.mib.register(scalar(SYSTEM, field)?, value)?;
        }
        Ok(())
    }

    fn register_interfaces(&mut self) -> Result<()> {
        // Column-major registration keeps the table in OID order.
        for column in IF_COLUMNS {
            for (row, name) in self.interfaces.iter().enumerate() {
                let value = match *column {
                    1 => Value::Integer(row as i32 + 1),
                    2 => Value::OctetString(name.clone().into_bytes()),
                    3 => {
                        if self.wireless.contains(name) {
                            Value::Integer(IF_TYPE_IEEE80211)
                        } else {
                            Value::Integer(IF_TYPE_ETHERNET)
                        }
                    }
                    4 => Value::Integer(0),
                    5 => Value::Gauge32(0),
                    6 => Value::OctetString(vec![0; 6]),
                    7 | 8 => Value::Integer(0),
                    _ => Value::Counter32(0),
                };
                self.mib.register(cell(IF_TABLE, *column, row)?, value)?;
            }
        }
        Ok(())
    }

    fn register_memory(&mut self) -> Result<()> {
        for field in [5u32, 6, 13, 14, 15] {
            self.mib
                .register(scalar(UCD_MEMORY, field)?, Value::Integer(0))?;
        }
        Ok(())
    }

    fn register_disks(&mut self) -> Result<()> {
        for column in DISK_COLUMNS {
            for (row, mount) in self.disks.iter().enumerate() {
                let value = match *column {
                    1 => Value::Integer(row as i32 + 1),
                    2 => Value::OctetString(mount.clone().into_bytes()),
                    _ => Value::Integer(0),
                };
                self.mib
                    .register(cell(UCD_DISK_TABLE, *column, row)?, value)?;
            }
        }
        Ok(())
    }

    fn register_load(&mut self) -> Result<()> {
        for column in LOAD_COLUMNS {
            for row in 0..3 {
                let value = match *column {
                    1 => Value::Integer(row as i32 + 1),
                    2 => Value::OctetString(LOAD_NAMES[row].as_bytes().to_vec()),
                    3 => Value::OctetString(b"0.00".to_vec()),
                    _ => Value::Integer(0),
                };
                self.mib
                    .register(cell(UCD_LOAD_TABLE, *column, row)?, value)?;
            }
        }
        Ok(())
    }

    fn register_cpu(&mut self) -> Result<()> {
        for field in [50u32, 51, 52, 53, 59, 60] {
            self.mib
                .register(scalar(UCD_SYSTEM_STATS, field)?, Value::Counter32(0))?;
        }
        Ok(())
    }

    fn register_wireless(&mut self) -> Result<()> {
        if self.wireless.is_empty() {
            return Ok(());
        }
        for column in WIRELESS_COLUMNS {
            for (row, name) in self.wireless.iter().enumerate() {
                let value = match *column {
                    1 => Value::Integer(row as i32 + 1),
                    2 => Value::OctetString(name.clone().into_bytes()),
                    _ => Value::Integer(0),
                };
                self.mib
                    .register(cell(UCD_WIRELESS_TABLE, *column, row)?, value)?;
            }
        }
        Ok(())
    }

    /// Pulls fresh values from the collectors. A failing collector keeps
    /// its previous values; the failure is logged once until it recovers.
    pub fn refresh(&mut self, kind: Refresh) -> Result<()> {
        self.refresh_uptime()?;
        if kind == Refresh::Partial {
            return Ok(());
        }

        self.refresh_hostname()?;
        self.refresh_load()?;
        self.refresh_memory()?;
        self.refresh_cpu()?;
        self.refresh_disks()?;
        self.refresh_interfaces()?;
        self.refresh_wireless()?;
        Ok(())
    }

    fn refresh_uptime(&mut self) -> Result<()> {
        match self.collector.uptime() {
            Ok(up) => {
                self.warned.uptime = false;
                self.mib
                    .set(&scalar(SYSTEM, 3)?, Value::TimeTicks(up.process))?;
            }
            Err(e) => {
                if !self.warned.uptime {
                    warn!("uptime collector failed: {}", e);
                    self.warned.uptime = true;
                }
            }
        }
        Ok(())
    }

    fn refresh_hostname(&mut self) -> Result<()> {
        match self.collector.hostname() {
            Ok(name) => {
                self.warned.hostname = false;
                self.mib
                    .set(&scalar(SYSTEM, 5)?, Value::OctetString(name.into_bytes()))?;
            }
            Err(e) => {
                if !self.warned.hostname {
                    warn!("hostname lookup failed: {}", e);
                    self.warned.hostname = true;
                }
            }
        }
        Ok(())
    }

    fn refresh_load(&mut self) -> Result<()> {
        match self.collector.load() {
            Ok(load) => {
                self.warned.load = false;
                for (row, centi) in load.avg.iter().enumerate() {
                    let text = format!("{}.{:02}", centi / 100, centi % 100);
                    self.mib.set(
                        &cell(UCD_LOAD_TABLE, 3, row)?,
                        Value::OctetString(text.into_bytes()),
                    )?;
                    self.mib.set(
                        &cell(UCD_LOAD_TABLE, 5, row)?,
                        Value::Integer(clamp_i32(*centi as u64)),
                    )?;
                }
            }
            Err(e) => {
                if !self.warned.load {
                    warn!("load average collector failed: {}", e);
                    self.warned.load = true;
                }
            }
        }
        Ok(())
    }

    fn refresh_memory(&mut self) -> Result<()> {
        match self.collector.memory() {
            Ok(mem) => {
                self.warned.memory = false;
                let fields = [
                    (5u32, mem.total),
                    (6, mem.free),
                    (13, mem.shared),
                    (14, mem.buffers),
                    (15, mem.cached),
                ];
                for (field, v) in fields {
                    self.mib
                        .set(&scalar(UCD_MEMORY, field)?, Value::Integer(clamp_i32(v)))?;
                }
            }
            Err(e) => {
                if !self.warned.memory {
                    warn!("memory collector failed: {}", e);
                    self.warned.memory = true;
                }
            }
        }
        Ok(())
    }

    fn refresh_cpu(&mut self) -> Result<()> {
        match self.collector.cpu() {
            Ok(cpu) => {
                self.warned.cpu = false;
                let fields = [
                    (50u32, cpu.user),
                    (51, cpu.nice),
                    (52, cpu.system),
                    (53, cpu.idle),
                    (59, cpu.irqs),
                    (60, cpu.cntxts),
                ];
                for (field, v) in fields {
                    self.mib.set(
                        &scalar(UCD_SYSTEM_STATS, field)?,
                        Value::Counter32(v as u32),
                    )?;
                }
            }
            Err(e) => {
                if !self.warned.cpu {
                    warn!("CPU statistics collector failed: {}", e);
                    self.warned.cpu = true;
                }
            }
        }
        Ok(())
    }

    fn refresh_disks(&mut self) -> Result<()> {
        let records = match self.collector.disks(&self.disks) {
            Ok(r) => {
                self.warned.disk = false;
                r
            }
            Err(e) => {
                if !self.warned.disk {
                    warn!("disk collector failed: {}", e);
                    self.warned.disk = true;
                }
                return Ok(());
            }
        };

        for (row, disk) in records.iter().enumerate().take(self.disks.len()) {
            let fields = [
                (6u32, clamp_i32(disk.total)),
                (7, clamp_i32(disk.free)),
                (8, clamp_i32(disk.used)),
                (9, disk.blocks_used_percent as i32),
                (10, disk.inodes_used_percent as i32),
            ];
            for (column, v) in fields {
                self.mib
                    .set(&cell(UCD_DISK_TABLE, column, row)?, Value::Integer(v))?;
            }
        }
        Ok(())
    }

    fn refresh_interfaces(&mut self) -> Result<()> {
        let records = match self.collector.interfaces(&self.interfaces) {
            Ok(r) => {
                self.warned.net = false;
                r
            }
            Err(e) => {
                if !self.warned.net {
                    warn!("interface collector failed: {}", e);
                    self.warned.net = true;
                }
                return Ok(());
            }
        };

        for (row, net) in records.iter().enumerate().take(self.interfaces.len()) {
            self.mib
                .set(&cell(IF_TABLE, 4, row)?, Value::Integer(net.mtu))?;
            self.mib
                .set(&cell(IF_TABLE, 5, row)?, Value::Gauge32(net.speed))?;
            self.mib.set(
                &cell(IF_TABLE, 6, row)?,
                Value::OctetString(net.mac.to_vec()),
            )?;
            self.mib.set(
                &cell(IF_TABLE, 7, row)?,
                Value::Integer(net.admin_status.wire()),
            )?;
            self.mib.set(
                &cell(IF_TABLE, 8, row)?,
                Value::Integer(net.oper_status.wire()),
            )?;

            let counters = [
                (10u32, net.rx_bytes),
                (11, net.rx_packets),
                (13, net.rx_drops),
                (14, net.rx_errors),
                (16, net.tx_bytes),
                (17, net.tx_packets),
                (19, net.tx_drops),
                (20, net.tx_errors),
            ];
            for (column, v) in counters {
                self.mib
                    .set(&cell(IF_TABLE, column, row)?, Value::Counter32(v as u32))?;
            }
        }
        Ok(())
    }

    fn refresh_wireless(&mut self) -> Result<()> {
        if self.wireless.is_empty() {
            return Ok(());
        }
        let records = match self.collector.wireless(&self.wireless) {
            Ok(r) => {
                self.warned.wireless = false;
                r
            }
            Err(e) => {
                if !self.warned.wireless {
                    warn!("wireless collector failed: {}", e);
                    self.warned.wireless = true;
                }
                return Ok(());
            }
        };

        for (row, link) in records.iter().enumerate().take(self.wireless.len()) {
            self.mib.set(
                &cell(UCD_WIRELESS_TABLE, 3, row)?,
                Value::Integer(link.signal),
            )?;
            self.mib.set(
                &cell(UCD_WIRELESS_TABLE, 4, row)?,
                Value::Integer(link.noise),
            )?;
        }
        Ok(())
    }
}
