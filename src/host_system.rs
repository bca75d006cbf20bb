#![cfg_attr(feature = "mock", allow(dead_code, unused_imports))]

use anyhow::{Context, Result, ensure};
use log::debug;
#[cfg(feature = "mock")]
use mockall::automock;
use serde::{Deserialize, Serialize};
use std::{net::Ipv4Addr, time::Duration};
use tokio::process::Command;
use trait_variant::make;

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct AddressInfo {
    pub addr: String,
    pub prefixlen: u8,
    /// Only set for IPv4 addresses
    pub netmask: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct EthernetInfo {
    pub device: String,
    pub ipv4: Vec<AddressInfo>,
    pub ipv6: Vec<AddressInfo>,
    pub mac_address: Option<String>,
    pub default_gateway: Option<String>,
}

/// Access to the operating system the appliance runs on
#[make(Send)]
#[cfg_attr(feature = "mock", automock)]
pub trait HostSystem {
    fn os_name(&self) -> String;
    async fn fqdn(&self) -> Result<String>;
    async fn uptime(&self) -> Result<Duration>;
    async fn interfaces(&self) -> Result<Vec<String>>;
    async fn ethernet_info(&self, device: &str) -> Result<EthernetInfo>;
    async fn set_hostname(&self, hostname: &str) -> Result<()>;
    async fn restart_service(&self, service: &str) -> Result<()>;
    async fn reboot(&self) -> Result<()>;
}

#[derive(Deserialize)]
struct IpLink {
    address: Option<String>,
    #[serde(default)]
    addr_info: Vec<IpAddr>,
}

#[derive(Deserialize)]
struct IpAddr {
    family: String,
    local: String,
    prefixlen: u8,
}

#[derive(Deserialize)]
struct IpRoute {
    gateway: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LinuxHost;

impl LinuxHost {
    const PROC_UPTIME: &str = "/proc/uptime";
    const SYS_CLASS_NET: &str = "/sys/class/net";

    async fn output(program: &str, args: &[&str]) -> Result<String> {
        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .with_context(|| format!("failed to run {program}"))?;

        ensure!(
            output.status.success(),
            "{program} {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        );

        String::from_utf8(output.stdout).with_context(|| format!("{program} returned invalid utf-8"))
    }

    async fn sudo(args: &[&str]) -> Result<()> {
        debug!("sudo {}", args.join(" "));
        Self::output("sudo", args).await.map(|_| ())
    }
}

impl HostSystem for LinuxHost {
    fn os_name(&self) -> String {
        std::env::consts::OS.to_string()
    }

    async fn fqdn(&self) -> Result<String> {
        Ok(Self::output("hostname", &["--fqdn"]).await?.trim().to_string())
    }

    async fn uptime(&self) -> Result<Duration> {
        let content = tokio::fs::read_to_string(Self::PROC_UPTIME)
            .await
            .context("failed to read uptime")?;

        parse_uptime(&content)
    }

    async fn interfaces(&self) -> Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(Self::SYS_CLASS_NET)
            .await
            .context("failed to list network interfaces")?;
        let mut interfaces = Vec::new();

        while let Some(entry) = entries
            .next_entry()
            .await
            .context("failed to list network interfaces")?
        {
            interfaces.push(entry.file_name().to_string_lossy().to_string());
        }

        interfaces.sort();
        Ok(interfaces)
    }

    async fn ethernet_info(&self, device: &str) -> Result<EthernetInfo> {
        let links = Self::output("ip", &["-j", "addr", "show", "dev", device]).await?;
        let routes = Self::output("ip", &["-j", "-4", "route", "show", "default"]).await?;

        let mut info = parse_addresses(device, &links)?;
        info.default_gateway = parse_default_gateway(&routes)?;

        Ok(info)
    }

    async fn set_hostname(&self, hostname: &str) -> Result<()> {
        Self::sudo(&["hostname", "-b", hostname]).await
    }

    async fn restart_service(&self, service: &str) -> Result<()> {
        Self::sudo(&["service", service, "restart"]).await
    }

    async fn reboot(&self) -> Result<()> {
        Self::sudo(&["sync"]).await?;
        Self::sudo(&["reboot"]).await
    }
}

/// Seconds since boot from the first field of `/proc/uptime`
fn parse_uptime(content: &str) -> Result<Duration> {
    let seconds = content
        .split_whitespace()
        .next()
        .context("failed to parse uptime: empty")?
        .parse::<f64>()
        .context("failed to parse uptime")?;

    Duration::try_from_secs_f64(seconds).context("failed to parse uptime: out of range")
}

fn netmask(prefixlen: u8) -> String {
    let bits = u32::MAX
        .checked_shl(32 - u32::from(prefixlen.min(32)))
        .unwrap_or(0);
    Ipv4Addr::from(bits).to_string()
}

/// Addresses of one device from `ip -j addr show dev <device>`
fn parse_addresses(device: &str, json: &str) -> Result<EthernetInfo> {
    let links: Vec<IpLink> = serde_json::from_str(json).context("failed to parse ip addr output")?;
    let link = links
        .into_iter()
        .next()
        .with_context(|| format!("failed to find device {device}"))?;

    let mut info = EthernetInfo {
        device: device.to_string(),
        mac_address: link.address,
        ..Default::default()
    };

    for addr in link.addr_info {
        match addr.family.as_str() {
            "inet" => info.ipv4.push(AddressInfo {
                netmask: Some(netmask(addr.prefixlen)),
                addr: addr.local,
                prefixlen: addr.prefixlen,
            }),
            "inet6" => info.ipv6.push(AddressInfo {
                addr: addr.local,
                prefixlen: addr.prefixlen,
                netmask: None,
            }),
            _ => {}
        }
    }

    Ok(info)
}

fn parse_default_gateway(json: &str) -> Result<Option<String>> {
    let routes: Vec<IpRoute> =
        serde_json::from_str(json).context("failed to parse ip route output")?;

    Ok(routes.into_iter().find_map(|route| route.gateway))
}
