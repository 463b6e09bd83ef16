//! micro-snmpd main application

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use micro_snmpd::{
    config::{split_list, AgentConfig, IpFamily, LogFormat},
    core::SnmpAgent,
    mib::HostMib,
    services::HostMetrics,
    utils::setup_logging,
};

#[derive(Parser)]
#[command(name = "micro-snmpd")]
#[command(about = "Minimal SNMP daemon for UNIX systems")]
#[command(disable_version_flag = true)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short = 'f', long = "file", value_name = "FILE")]
    file: Option<PathBuf>,

    /// UDP port to bind to, default: 161
    #[arg(short = 'p', long)]
    udp_port: Option<u16>,

    /// TCP port to bind to, default: 161
    #[arg(short = 'P', long)]
    tcp_port: Option<u16>,

    /// Community string, default: public
    #[arg(short = 'c', long)]
    community: Option<String>,

    /// System description
    #[arg(short = 'D', long)]
    description: Option<String>,

    /// System vendor OID
    #[arg(short = 'V', long)]
    vendor: Option<String>,

    /// System location
    #[arg(short = 'L', long)]
    location: Option<String>,

    /// System contact
    #[arg(short = 'C', long)]
    contact: Option<String>,

    /// Disks to monitor, separated by comma, semicolon or colon
    #[arg(short = 'd', long)]
    disks: Option<String>,

    /// Network interfaces to monitor, separated by comma or semicolon
    #[arg(short = 'i', long)]
    interfaces: Option<String>,

    /// Wireless network interfaces to monitor
    #[arg(short = 'w', long)]
    wireless_interfaces: Option<String>,

    /// Network interface to listen on, default: all
    #[arg(short = 'I', long = "listen", value_name = "IFACE")]
    listen: Option<String>,

    /// Timeout for MIB updates in seconds, default: 1
    #[arg(short = 't', long)]
    timeout: Option<u32>,

    /// Enable authentication, i.e. community string matching
    #[arg(short = 'a', long)]
    auth: bool,

    /// Run in foreground, do not detach from the controlling terminal
    #[arg(short = 'n', long)]
    foreground: bool,

    /// Use a daemon-friendly log format
    #[arg(short = 's', long)]
    syslog: bool,

    /// Verbose messages
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Use IPv4, default
    #[arg(short = '4', long)]
    use_ipv4: bool,

    /// Use IPv6
    #[arg(short = '6', long)]
    use_ipv6: bool,
}

fn apply_cli(config: &mut AgentConfig, cli: &Cli) {
    if let Some(port) = cli.udp_port {
        config.udp_port = port;
    }
    if let Some(port) = cli.tcp_port {
        config.tcp_port = port;
    }
    if let Some(community) = &cli.community {
        config.community = community.clone();
    }
    if let Some(description) = &cli.description {
        config.description = description.clone();
    }
    if let Some(vendor) = &cli.vendor {
        config.vendor_oid = vendor.clone();
    }
    if let Some(location) = &cli.location {
        config.location = location.clone();
    }
    if let Some(contact) = &cli.contact {
        config.contact = contact.clone();
    }
    if let Some(disks) = &cli.disks {
        config.disks = split_list(disks, &[',', ';', ':']);
    }
    if let Some(interfaces) = &cli.interfaces {
        config.interfaces = split_list(interfaces, &[',', ';']);
    }
    if let Some(wireless) = &cli.wireless_interfaces {
        config.wireless_interfaces = split_list(wireless, &[',', ';']);
    }
    if let Some(device) = &cli.listen {
        config.listen_device = Some(device.clone());
    }
    if let Some(timeout) = cli.timeout {
        config.timeout = timeout;
    }
    if cli.auth {
        config.auth = true;
    }
    if cli.use_ipv6 {
        config.family = IpFamily::V6;
    } else if cli.use_ipv4 {
        config.family = IpFamily::V4;
    }
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    if cli.syslog {
        config.logging.format = LogFormat::Compact;
    }
}

#[cfg(target_os = "linux")]
fn new_collector() -> anyhow::Result<Box<dyn HostMetrics + Send>> {
    Ok(Box::new(micro_snmpd::services::LinuxHost::new()))
}

#[cfg(not(target_os = "linux"))]
fn new_collector() -> anyhow::Result<Box<dyn HostMetrics + Send>> {
    anyhow::bail!("no metric collector backend for this platform")
}

#[cfg(unix)]
fn daemonize() -> anyhow::Result<()> {
    if unsafe { libc::daemon(0, 0) } != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

#[cfg(not(unix))]
fn daemonize() -> anyhow::Result<()> {
    anyhow::bail!("daemon mode is only supported on UNIX; use --foreground")
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.file {
        Some(path) => AgentConfig::load_from_file(path)
            .with_context(|| format!("failed reading config file '{}'", path.display()))?,
        None => AgentConfig::default(),
    };
    apply_cli(&mut config, &cli);
    config.validate().context("invalid configuration")?;

    if !cli.foreground {
        daemonize().context("failed daemonizing")?;
    }
    let _log_guard = setup_logging(&config.logging).context("failed initializing logging")?;

    info!("Starting {} v{}", micro_snmpd::NAME, micro_snmpd::VERSION);

    let host = HostMib::build(&config, new_collector()?).context("failed building the MIB")?;
    let mut agent = SnmpAgent::new(config, host).context("failed starting the agent")?;

    let shutdown = agent.shutdown_handle();
    ctrlc::set_handler(move || shutdown.request())
        .context("failed installing signal handlers")?;

    agent.run().context("agent terminated abnormally")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_defaults() {
        let cli = Cli::parse_from([
            "micro-snmpd",
            "-p",
            "1161",
            "-P",
            "1161",
            "-c",
            "private",
            "-D",
            "test box",
            "-L",
            "lab",
            "-C",
            "noc@example.net",
            "-d",
            "/:/var",
            "-i",
            "eth0,eth1",
            "-w",
            "wlan0;wlan1",
            "-t",
            "5",
            "-a",
            "-n",
            "-v",
        ]);
        let mut config = AgentConfig::default();
        apply_cli(&mut config, &cli);

        assert_eq!(config.udp_port, 1161);
        assert_eq!(config.tcp_port, 1161);
        assert_eq!(config.community, "private");
        assert_eq!(config.description, "test box");
        assert_eq!(config.location, "lab");
        assert_eq!(config.contact, "noc@example.net");
        assert_eq!(config.disks, vec!["/", "/var"]);
        assert_eq!(config.interfaces, vec!["eth0", "eth1"]);
        assert_eq!(config.wireless_interfaces, vec!["wlan0", "wlan1"]);
        assert_eq!(config.timeout, 5);
        assert!(config.auth);
        assert_eq!(config.logging.level, "debug");
        assert!(cli.foreground);
    }

    #[test]
    fn cli_family_selection() {
        let cli = Cli::parse_from(["micro-snmpd", "-6"]);
        let mut config = AgentConfig::default();
        apply_cli(&mut config, &cli);
        assert_eq!(config.family, IpFamily::V6);

        let cli = Cli::parse_from(["micro-snmpd", "-4"]);
        let mut config = AgentConfig::default();
        apply_cli(&mut config, &cli);
        assert_eq!(config.family, IpFamily::V4);
    }

    #[test]
    fn cli_defaults_leave_config_untouched() {
        let cli = Cli::parse_from(["micro-snmpd"]);
        let mut config = AgentConfig::default();
        apply_cli(&mut config, &cli);
        assert_eq!(config.udp_port, 161);
        assert_eq!(config.community, "public");
        assert_eq!(config.family, IpFamily::V4);
        assert!(!config.auth);
    }
}
