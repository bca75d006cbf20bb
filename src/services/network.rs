//! Ethernet configuration in `/etc/network/interfaces`

use crate::{host_system::HostSystem, services::host::is_writable};
use anyhow::{Context, Result, bail, ensure};
use log::{debug, info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{fs, net::Ipv4Addr, path::Path, sync::LazyLock};

static STANZA_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(auto|iface|source|mapping|allow-|wpa-)")
        .expect("stanza regex is valid")
});

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    Static,
    Dhcp,
}

#[derive(Debug, Serialize)]
pub struct NetworkSettings {
    pub device: String,
    /// `None` if the device has no stanza in the interfaces file
    pub connection_type: Option<ConnectionType>,
    pub ip_address: Option<String>,
    pub netmask: Option<String>,
    pub gateway: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SetNetworkRequest {
    pub connection_type: ConnectionType,
    pub ip_address: Option<Ipv4Addr>,
    pub netmask: Option<Ipv4Addr>,
    pub gateway: Option<Ipv4Addr>,
}

#[derive(Debug, Default, Serialize)]
pub struct SetNetworkResponse {
    pub warnings: Vec<String>,
}

/// The interfaces file split into stanzas
///
/// Concatenating all parts yields the original text.
#[derive(Debug, PartialEq)]
struct InterfacesFile {
    parts: Vec<String>,
}

impl InterfacesFile {
    fn parse(text: &str) -> Self {
        let mut starts: Vec<usize> = STANZA_REGEX.find_iter(text).map(|m| m.start()).collect();

        if starts.first() != Some(&0) {
            starts.insert(0, 0);
        }

        let parts = starts
            .iter()
            .zip(starts.iter().skip(1).chain([&text.len()]))
            .map(|(&start, &end)| text[start..end].to_string())
            .filter(|part| !part.is_empty())
            .collect();

        InterfacesFile { parts }
    }

    /// Stanzas mentioning `device`
    fn properties<'a>(&'a self, device: &'a str) -> impl Iterator<Item = &'a String> {
        self.parts
            .iter()
            .filter(move |part| part.split_whitespace().any(|word| word == device))
    }

    fn connection_type(&self, device: &str) -> Result<Option<ConnectionType>> {
        let mut connection_type = None;

        for stanza in self.properties(device) {
            let words: Vec<&str> = stanza.split_whitespace().collect();

            if words.contains(&"loopback") {
                bail!("Unable to configure loopback device!");
            }
            if words.contains(&"static") {
                connection_type = Some(ConnectionType::Static);
            }
            if words.contains(&"dhcp") {
                connection_type = Some(ConnectionType::Dhcp);
            }
        }

        Ok(connection_type)
    }

    fn iface_index(&self, device: &str) -> Option<usize> {
        self.parts.iter().position(|part| {
            let mut words = part.split_whitespace();
            words.next() == Some("iface")
                && words.next() == Some(device)
                && words.next() == Some("inet")
        })
    }

    /// Replace the IPv4 stanza of `device`, keeping options we do not manage
    fn set_iface(&mut self, device: &str, request: &SetNetworkRequest) -> Result<()> {
        let index = self.iface_index(device).with_context(|| {
            format!("Device {device} not found, you should use your OS tools to configure your network.")
        })?;

        let kept: Vec<&str> = self.parts[index]
            .lines()
            .skip(1)
            .filter(|line| {
                let key = line.split_whitespace().next().unwrap_or_default();
                !key.is_empty() && !matches!(key, "address" | "netmask" | "gateway")
            })
            .collect();

        let mut stanza = match request.connection_type {
            ConnectionType::Dhcp => format!("iface {device} inet dhcp\n"),
            ConnectionType::Static => {
                let (Some(address), Some(netmask)) = (request.ip_address, request.netmask) else {
                    bail!("static configuration requires ip address and netmask");
                };

                let mut stanza =
                    format!("iface {device} inet static\n    address {address}\n    netmask {netmask}\n");
                if let Some(gateway) = request.gateway {
                    stanza.push_str(&format!("    gateway {gateway}\n"));
                }
                stanza
            }
        };

        for line in kept {
            stanza.push_str(line);
            stanza.push('\n');
        }
        stanza.push('\n');

        self.parts[index] = stanza;
        Ok(())
    }

    fn to_text(&self) -> String {
        self.parts.concat()
    }
}

fn is_loopback(device: &str) -> bool {
    matches!(device, "lo" | "lo0")
}

pub struct NetworkService;

impl NetworkService {
    fn load(network_file: &Path) -> Result<InterfacesFile> {
        ensure!(
            is_writable(network_file),
            "{} is not writable!",
            network_file.display()
        );

        let text = fs::read_to_string(network_file).context("failed to read network file")?;
        Ok(InterfacesFile::parse(&text))
    }

    /// Current settings of `device`
    pub async fn settings<Host: HostSystem>(
        host: &Host,
        network_file: &Path,
        device: &str,
    ) -> Result<NetworkSettings> {
        ensure!(!is_loopback(device), "Unable to configure loopback device!");

        let file = Self::load(network_file)?;
        let connection_type = file.connection_type(device)?;

        if connection_type.is_none() {
            warn!("device {device} not found in {network_file:?}");
        }

        let info = host.ethernet_info(device).await?;
        let first = info.ipv4.first();

        Ok(NetworkSettings {
            device: device.to_string(),
            connection_type,
            ip_address: first.map(|addr| addr.addr.clone()),
            netmask: first.and_then(|addr| addr.netmask.clone()),
            gateway: info.default_gateway,
        })
    }

    /// Rewrite the stanza of `device` and restart networking
    pub async fn set_settings<Host: HostSystem>(
        host: &Host,
        network_file: &Path,
        device: &str,
        request: &SetNetworkRequest,
    ) -> Result<SetNetworkResponse> {
        debug!("set_settings() called for {device}: {request:?}");
        ensure!(!is_loopback(device), "Unable to configure loopback device!");

        let mut file = Self::load(network_file)?;
        file.connection_type(device)?;
        file.set_iface(device, request)?;

        fs::write(network_file, file.to_text()).context("failed to write network file")?;
        info!("network configuration of {device} written");

        let mut response = SetNetworkResponse::default();

        if let Err(e) = host.restart_service("networking").await {
            warn!("networking restart failed: {e:#}");
            response
                .warnings
                .push("Unable to restart networking. Please try manually.".to_string());
        }

        Ok(response)
    }
}
