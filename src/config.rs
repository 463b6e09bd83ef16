//! Configuration management for micro-snmpd

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Process-wide configuration, assembled at startup and read-only after.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub udp_port: u16,
    pub tcp_port: u16,
    pub community: String,
    pub description: String,
    pub location: String,
    pub contact: String,
    /// Dotted OID reported as sysObjectID.
    pub vendor_oid: String,
    /// Mount points exposed in the disk table.
    pub disks: Vec<String>,
    /// Interface names exposed in the interfaces table, in row order.
    pub interfaces: Vec<String>,
    /// Subset of `interfaces` that report wireless signal/noise.
    pub wireless_interfaces: Vec<String>,
    /// Network device to bind both server sockets to, if any.
    pub listen_device: Option<String>,
    /// MIB refresh interval in seconds.
    pub timeout: u32,
    /// Require the community string to match before answering.
    pub auth: bool,
    pub family: IpFamily,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IpFamily {
    #[serde(rename = "ipv4")]
    V4,
    #[serde(rename = "ipv6")]
    V6,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogFormat {
    #[serde(rename = "compact")]
    Compact,
    #[serde(rename = "full")]
    Full,
    #[serde(rename = "json")]
    Json,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            format: LogFormat::Full,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            udp_port: 161,
            tcp_port: 161,
            community: "public".to_string(),
            description: String::new(),
            location: String::new(),
            contact: String::new(),
            vendor_oid: "1.3.6.1.4.1".to_string(),
            disks: vec!["/".to_string()],
            interfaces: Vec::new(),
            wireless_interfaces: Vec::new(),
            listen_device: None,
            timeout: 1,
            auth: false,
            family: IpFamily::V4,
            logging: LoggingConfig::default(),
        }
    }
}

/// Splits a list option on any of the separator characters, dropping
/// empty fields.
pub fn split_list(value: &str, separators: &[char]) -> Vec<String> {
    value
        .split(|c| separators.contains(&c))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl AgentConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: AgentConfig =
            toml::from_str(&contents).map_err(|e| Error::parse(format!("Invalid TOML: {}", e)))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.community.is_empty() {
            return Err(Error::parse("community string must not be empty"));
        }
        if self.timeout == 0 {
            return Err(Error::parse("timeout must be at least 1 second"));
        }
        self.vendor_oid
            .parse::<crate::protocols::Oid>()
            .map_err(|_| Error::parse(format!("invalid vendor OID '{}'", self.vendor_oid)))?;
        for name in &self.wireless_interfaces {
            if !self.interfaces.contains(name) {
                return Err(Error::parse(format!(
                    "wireless interface '{}' is not in the interface list",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Refresh interval in 1/100 second ticks.
    pub fn timeout_ticks(&self) -> u32 {
        self.timeout * 100
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = AgentConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.udp_port, 161);
        assert_eq!(config.tcp_port, 161);
        assert_eq!(config.community, "public");
        assert_eq!(config.disks, vec!["/".to_string()]);
        assert_eq!(config.timeout_ticks(), 100);
    }

    #[test]
    fn split_list_handles_all_separators() {
        assert_eq!(
            split_list("/,/var;/tmp:/home", &[',', ';', ':']),
            vec!["/", "/var", "/tmp", "/home"]
        );
        assert_eq!(split_list("eth0,eth1", &[',', ';']), vec!["eth0", "eth1"]);
        assert_eq!(split_list(",,", &[',', ';']), Vec::<String>::new());
    }

    #[test]
    fn validation_catches_bad_values() {
        let mut config = AgentConfig::default();
        config.community = String::new();
        assert!(config.validate().is_err());

        let mut config = AgentConfig::default();
        config.timeout = 0;
        assert!(config.validate().is_err());

        let mut config = AgentConfig::default();
        config.vendor_oid = "not.an.oid".to_string();
        assert!(config.validate().is_err());

        // A single arc cannot be BER-encoded as sysObjectID; it must be
        // refused at startup, not at first response.
        let mut config = AgentConfig::default();
        config.vendor_oid = "5".to_string();
        assert!(config.validate().is_err());

        let mut config = AgentConfig::default();
        config.wireless_interfaces = vec!["wlan0".to_string()];
        assert!(config.validate().is_err());
        config.interfaces = vec!["wlan0".to_string()];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn load_partial_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
udp_port = 1161
community = "private"
interfaces = ["eth0"]
auth = true

[logging]
level = "debug"
"#
        )
        .unwrap();

        let config = AgentConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.udp_port, 1161);
        assert_eq!(config.tcp_port, 161); // default survives
        assert_eq!(config.community, "private");
        assert!(config.auth);
        assert_eq!(config.logging.level, "debug");
        assert!(config.validate().is_ok());
    }
}
