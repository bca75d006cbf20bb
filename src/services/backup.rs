//! Settings backup and restore
//!
//! Wraps the archive format with the work that has to happen around it: after
//! a committed import the decoder configuration is recomputed from the new
//! settings and pushed to ser2sock.

use crate::{
    datastore::Datastore,
    decoder_bridge::{DecoderBridge, Ser2SockConfig},
    services::{
        archive::{self, ArchiveError, ExportedArchive, ImportSummary},
        certificate::{CertificateService, CertificateType},
        settings::SettingsStore,
    },
};
use anyhow::{Context, Result};
use log::{debug, error, info};
use std::path::Path;

/// Application state an import needs to act on
pub struct RuntimeContext<'a, Bridge: DecoderBridge> {
    pub datastore: &'a Datastore,
    pub bridge: &'a Bridge,
}

pub struct BackupService;

impl BackupService {
    const DEFAULT_DEVICE_PATH: &str = "/dev/ttyAMA0";
    const DEFAULT_BAUDRATE: u32 = 115200;
    const DEFAULT_PORT: u16 = 10000;

    pub fn export(datastore: &Datastore) -> Result<ExportedArchive, ArchiveError> {
        archive::export(datastore)
    }

    /// Replace all settings with the content of `archive`
    ///
    /// Once the import is committed its result stands: a failing decoder
    /// refresh is logged and does not turn the import into a failure.
    pub async fn import<Bridge: DecoderBridge>(
        context: &RuntimeContext<'_, Bridge>,
        archive: &[u8],
    ) -> Result<ImportSummary, ArchiveError> {
        let summary = archive::import(context.datastore, archive)?;

        match Self::refresh(context).await {
            Ok(true) => info!("decoder configuration refreshed after import"),
            Ok(false) => debug!("no ser2sock configuration path, refresh skipped"),
            Err(e) => error!("failed to refresh decoder configuration: {e:#}"),
        }

        Ok(summary)
    }

    /// Push the stored decoder settings to ser2sock and restart the session
    ///
    /// # Returns
    /// `false` if no ser2sock configuration path is set
    pub async fn refresh<Bridge: DecoderBridge>(context: &RuntimeContext<'_, Bridge>) -> Result<bool> {
        let config_dir =
            SettingsStore::value_or(context.datastore, "ser2sock_config_path", String::new())?;

        if config_dir.is_empty() {
            return Ok(false);
        }

        let config_dir = Path::new(&config_dir);
        let config = Self::ser2sock_config(context.datastore, config_dir).await?;

        context
            .bridge
            .update_config(config_dir, &config)
            .await
            .context("failed to update ser2sock configuration")?;
        context
            .bridge
            .close()
            .await
            .context("failed to close decoder session")?;
        context
            .bridge
            .init()
            .await
            .context("failed to open decoder session")?;

        Ok(true)
    }

    async fn ser2sock_config(datastore: &Datastore, config_dir: &Path) -> Result<Ser2SockConfig> {
        let device_path =
            SettingsStore::value_or(datastore, "device_path", Self::DEFAULT_DEVICE_PATH.to_string())?;
        let device_baudrate =
            SettingsStore::value_or(datastore, "device_baudrate", Self::DEFAULT_BAUDRATE)?;
        let device_port = SettingsStore::value_or(datastore, "device_port", Self::DEFAULT_PORT)?;
        let use_ssl = SettingsStore::value_or(datastore, "use_ssl", false)?;

        let (ca_cert, server_cert) = if use_ssl {
            let ca_cert = CertificateService::find_by_type(datastore, CertificateType::Ca)?;
            let server_cert = CertificateService::find_by_type(datastore, CertificateType::Server)?;

            CertificateService::save_certificate_index(datastore, config_dir)?;
            CertificateService::save_revocation_list(datastore, config_dir).await?;

            (ca_cert, server_cert)
        } else {
            (None, None)
        };

        Ok(Ser2SockConfig {
            device_path,
            device_baudrate,
            device_port,
            use_ssl,
            ca_cert,
            server_cert,
        })
    }
}
