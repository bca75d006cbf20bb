//! Host information, hostname and reboot

use crate::{config::HostConfig, host_system::HostSystem};
use anyhow::{Context, Result, ensure};
use log::{info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_valid::Validate;
use std::{
    fs::{self, OpenOptions},
    path::Path,
    sync::LazyLock,
    time::Duration,
};

static HOSTNAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?(\.[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?)*$")
        .expect("hostname regex is valid")
});

#[derive(Debug, Serialize)]
pub struct HostInfo {
    pub hostname: String,
    pub uptime: String,
    pub interfaces: Vec<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SetHostnameRequest {
    #[validate(min_length = 1)]
    #[validate(max_length = 253)]
    pub hostname: String,
}

/// Result of a hostname change, the change stands even with warnings
#[derive(Debug, Default, Serialize)]
pub struct HostnameUpdate {
    pub hostname: String,
    pub warnings: Vec<String>,
}

pub struct HostService;

impl HostService {
    pub async fn info<Host: HostSystem>(host: &Host) -> Result<HostInfo> {
        let os = host.os_name();
        ensure!(os == "linux", "only supported on Linux systems, not on {os}");

        Ok(HostInfo {
            hostname: host.fqdn().await?,
            uptime: format_uptime(host.uptime().await?),
            interfaces: host.interfaces().await?,
        })
    }

    /// Rename the host
    ///
    /// The old name is replaced in the hosts and hostname files, then applied
    /// to the running system. Each step that fails adds a warning.
    pub async fn set_hostname<Host: HostSystem>(
        host: &Host,
        files: &HostConfig,
        request: &SetHostnameRequest,
    ) -> Result<HostnameUpdate> {
        request.validate().context("invalid hostname")?;
        ensure!(
            HOSTNAME_REGEX.is_match(&request.hostname),
            "invalid hostname: {}",
            request.hostname
        );

        let old_hostname = host.fqdn().await?;
        let new_hostname = request.hostname.as_str();
        let mut update = HostnameUpdate {
            hostname: new_hostname.to_string(),
            ..Default::default()
        };

        info!("renaming host {old_hostname} to {new_hostname}");

        for (file, label) in [
            (&files.hosts_file, "HOSTS FILE"),
            (&files.hostname_file, "HOSTNAME FILE"),
        ] {
            if !is_writable(file) {
                update
                    .warnings
                    .push(format!("Unable to write {label}, check permissions"));
                continue;
            }

            if let Err(e) = replace_in_file(file, &old_hostname, new_hostname) {
                warn!("failed to update {file:?}: {e:#}");
                update
                    .warnings
                    .push(format!("Unable to write {label}, check permissions"));
            }
        }

        if let Err(e) = host.set_hostname(new_hostname).await {
            warn!("hostname command failed: {e:#}");
            update
                .warnings
                .push("Error setting hostname with the hostname command.".to_string());
        }

        if let Err(e) = host.restart_service("avahi-daemon").await {
            warn!("avahi-daemon restart failed: {e:#}");
            update
                .warnings
                .push("Error restarting the avahi-daemon".to_string());
        }

        Ok(update)
    }

    pub async fn reboot<Host: HostSystem>(host: &Host) -> Result<()> {
        info!("rebooting device");
        host.reboot().await.context("Unable to reboot device!")
    }
}

/// `[D day[s], ]H:MM:SS`
pub fn format_uptime(uptime: Duration) -> String {
    let total = uptime.as_secs();
    let (days, rest) = (total / 86400, total % 86400);
    let time = format!("{}:{:02}:{:02}", rest / 3600, rest % 3600 / 60, rest % 60);

    match days {
        0 => time,
        1 => format!("1 day, {time}"),
        _ => format!("{days} days, {time}"),
    }
}

pub(crate) fn is_writable(path: &Path) -> bool {
    OpenOptions::new().append(true).open(path).is_ok()
}

fn replace_in_file(path: &Path, from: &str, to: &str) -> Result<()> {
    ensure!(!from.is_empty(), "current hostname is empty");
    let content = fs::read_to_string(path).context("failed to read file")?;
    fs::write(path, content.replace(from, to)).context("failed to write file")
}
