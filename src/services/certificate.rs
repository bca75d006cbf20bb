//! Certificate store
//!
//! Reads the `certificates` table and maintains the OpenSSL CA database and
//! revocation list that ser2sock uses to authenticate clients.

use crate::{datastore::Datastore, services::archive::parse_timestamp};
use anyhow::{Context, Result, ensure};
use chrono::{NaiveDateTime, TimeDelta};
use ini::Ini;
use log::{debug, info, warn};
use rusqlite::{OptionalExtension, Row, params};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tokio::process::Command;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i64)]
pub enum CertificateType {
    Ca = 0,
    Server = 1,
    Internal = 2,
    Client = 3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i64)]
pub enum CertificateStatus {
    Active = 1,
    Revoked = 2,
    Expired = 3,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CertificateRecord {
    pub id: i64,
    pub name: String,
    pub serial_number: String,
    pub status: i64,
    pub certificate_type: i64,
    pub certificate: String,
    pub key: String,
    pub created_on: Option<NaiveDateTime>,
    pub revoked_on: Option<NaiveDateTime>,
}

impl CertificateRecord {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let timestamp = |index: usize| -> rusqlite::Result<Option<NaiveDateTime>> {
            Ok(row
                .get::<_, Option<String>>(index)?
                .and_then(|text| parse_timestamp(&text).ok()))
        };

        Ok(CertificateRecord {
            id: row.get(0)?,
            name: row.get(1)?,
            serial_number: row.get(2)?,
            status: row.get(3)?,
            certificate_type: row.get(4)?,
            certificate: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
            key: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
            created_on: timestamp(7)?,
            revoked_on: timestamp(8)?,
        })
    }

    fn index_status(&self) -> Option<char> {
        match self.status {
            s if s == CertificateStatus::Active as i64 => Some('V'),
            s if s == CertificateStatus::Revoked as i64 => Some('R'),
            s if s == CertificateStatus::Expired as i64 => Some('E'),
            _ => None,
        }
    }

    /// Serial as even length upper case hex, the way OpenSSL lists it
    fn index_serial(&self) -> String {
        let serial = match self.serial_number.trim().parse::<u128>() {
            Ok(number) => format!("{number:X}"),
            Err(_) => self.serial_number.trim().to_ascii_uppercase(),
        };

        if serial.len() % 2 == 1 {
            format!("0{serial}")
        } else {
            serial
        }
    }

    /// One line of an OpenSSL `index.txt`
    fn index_line(&self) -> Option<String> {
        let status = self.index_status()?;
        let expires_on = self.created_on? + TimeDelta::days(CertificateService::VALIDITY_DAYS);
        let revoked_on = match (status, self.revoked_on) {
            ('R', Some(revoked_on)) => index_time(&revoked_on),
            _ => String::new(),
        };

        Some(format!(
            "{status}\t{}\t{revoked_on}\t{}\tunknown\t/CN={}",
            index_time(&expires_on),
            self.index_serial(),
            self.name
        ))
    }
}

fn index_time(timestamp: &NaiveDateTime) -> String {
    timestamp.format("%y%m%d%H%M%SZ").to_string()
}

/// Service for certificate related file operations
pub struct CertificateService;

impl CertificateService {
    const VALIDITY_DAYS: i64 = 3650;
    const COLUMNS: &str = "id, name, serial_number, status, type, certificate, key, created_on, revoked_on";

    pub fn certs_dir(config_dir: &Path) -> PathBuf {
        config_dir.join("certs")
    }

    pub fn index_path(config_dir: &Path) -> PathBuf {
        Self::certs_dir(config_dir).join("certindex")
    }

    pub fn revocation_list_path(config_dir: &Path) -> PathBuf {
        config_dir.join("ser2sock.crl")
    }

    /// First certificate of the given type
    pub fn find_by_type(
        datastore: &Datastore,
        certificate_type: CertificateType,
    ) -> Result<Option<CertificateRecord>> {
        datastore.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {} FROM certificates WHERE type = ?1 ORDER BY id LIMIT 1",
                    Self::COLUMNS
                ),
                params![certificate_type as i64],
                CertificateRecord::from_row,
            )
            .optional()
            .with_context(|| format!("failed to read {certificate_type:?} certificate"))
        })
    }

    /// All certificates issued by the CA
    fn issued(datastore: &Datastore) -> Result<Vec<CertificateRecord>> {
        datastore.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM certificates WHERE type != ?1 ORDER BY id",
                    Self::COLUMNS
                ))
                .context("failed to prepare certificate query")?;

            stmt.query_map(params![CertificateType::Ca as i64], CertificateRecord::from_row)
                .context("failed to query certificates")?
                .collect::<rusqlite::Result<Vec<_>>>()
                .context("failed to read certificates")
        })
    }

    /// Write the OpenSSL CA database from the certificates table
    pub fn save_certificate_index(datastore: &Datastore, config_dir: &Path) -> Result<()> {
        let index_path = Self::index_path(config_dir);
        let mut index = String::new();

        for record in Self::issued(datastore)? {
            match record.index_line() {
                Some(line) => {
                    index.push_str(&line);
                    index.push('\n');
                }
                None => warn!(
                    "certificate {} left out of index: unknown status or creation time",
                    record.name
                ),
            }
        }

        fs::create_dir_all(Self::certs_dir(config_dir))
            .context("failed to create certificate directory")?;
        fs::write(&index_path, index).context("failed to write certificate index")?;

        debug!("certificate index written to {index_path:?}");
        Ok(())
    }

    /// Regenerate the revocation list signed by the current CA
    pub async fn save_revocation_list(datastore: &Datastore, config_dir: &Path) -> Result<()> {
        let ca = Self::find_by_type(datastore, CertificateType::Ca)?
            .context("failed to generate revocation list: no CA certificate")?;

        let certs_dir = Self::certs_dir(config_dir);
        let ca_cert_file = certs_dir.join("ca.pem");
        let ca_key_file = certs_dir.join("ca.key");
        let openssl_config = certs_dir.join("openssl.cnf");
        let crl_file = Self::revocation_list_path(config_dir);

        fs::create_dir_all(&certs_dir).context("failed to create certificate directory")?;
        fs::write(&ca_cert_file, &ca.certificate).context("failed to write CA certificate")?;
        fs::write(&ca_key_file, &ca.key).context("failed to write CA key")?;
        Self::write_openssl_config(&openssl_config, &Self::index_path(config_dir))?;

        let output = Command::new("openssl")
            .arg("ca")
            .arg("-gencrl")
            .arg("-config")
            .arg(&openssl_config)
            .arg("-cert")
            .arg(&ca_cert_file)
            .arg("-keyfile")
            .arg(&ca_key_file)
            .arg("-out")
            .arg(&crl_file)
            .output()
            .await
            .context("failed to run openssl")?;

        ensure!(
            output.status.success(),
            "failed to generate revocation list: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );

        info!("revocation list written to {crl_file:?}");
        Ok(())
    }

    fn write_openssl_config(path: &Path, index_path: &Path) -> Result<()> {
        let mut ini = Ini::new();

        ini.with_section(Some("ca")).set("default_ca", "ser2sock_ca");
        ini.with_section(Some("ser2sock_ca"))
            .set("database", index_path.to_string_lossy())
            .set("default_md", "sha256")
            .set("default_crl_days", Self::VALIDITY_DAYS.to_string());

        ini.write_to_file(path)
            .context("failed to write openssl configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn datastore() -> Datastore {
        let datastore = Datastore::in_memory().expect("should open datastore");
        datastore
            .with_conn(|conn| -> anyhow::Result<()> {
                conn.execute_batch(
                    "INSERT INTO certificates (id, name, serial_number, status, type, certificate, key, created_on, revoked_on)
                        VALUES (1, 'AlarmDecoder CA', '1', 1, 0, 'ca-pem', 'ca-key', '2020-01-01 00:00:00.000000', NULL);
                     INSERT INTO certificates (id, name, serial_number, status, type, certificate, key, created_on, revoked_on)
                        VALUES (2, 'AlarmDecoder Server', '2', 1, 1, 'server-pem', 'server-key', '2020-01-01 00:00:00.000000', NULL);
                     INSERT INTO certificates (id, name, serial_number, status, type, certificate, key, created_on, revoked_on)
                        VALUES (3, 'phone', '255', 2, 3, 'client-pem', 'client-key', '2020-06-01 12:00:00.000000', '2021-02-03 04:05:06.000000');",
                )?;
                Ok(())
            })
            .expect("should insert certificates");
        datastore
    }

    mod lookup {
        use super::*;

        #[test]
        fn find_by_type_returns_first_match() {
            let datastore = datastore();

            let ca = CertificateService::find_by_type(&datastore, CertificateType::Ca)
                .expect("should query")
                .expect("CA missing");
            assert_eq!(ca.name, "AlarmDecoder CA");
            assert_eq!(ca.key, "ca-key");

            let server = CertificateService::find_by_type(&datastore, CertificateType::Server)
                .expect("should query")
                .expect("server missing");
            assert_eq!(server.certificate, "server-pem");
        }

        #[test]
        fn find_by_type_without_match() {
            let datastore = Datastore::in_memory().unwrap();

            assert!(
                CertificateService::find_by_type(&datastore, CertificateType::Ca)
                    .expect("should query")
                    .is_none()
            );
        }
    }

    mod index {
        use super::*;

        #[test]
        fn index_lists_issued_certificates_only() {
            let datastore = datastore();
            let dir = tempfile::tempdir().unwrap();

            CertificateService::save_certificate_index(&datastore, dir.path())
                .expect("should write index");

            let index = fs::read_to_string(CertificateService::index_path(dir.path())).unwrap();
            let lines: Vec<&str> = index.lines().collect();

            assert_eq!(
                lines,
                vec![
                    "V\t291229000000Z\t\t02\tunknown\t/CN=AlarmDecoder Server",
                    "R\t300530120000Z\t210203040506Z\tFF\tunknown\t/CN=phone",
                ]
            );
        }

        #[test]
        fn serial_is_even_length_hex() {
            let mut record = CertificateRecord {
                id: 1,
                name: "x".to_string(),
                serial_number: "4096".to_string(),
                status: 1,
                certificate_type: 3,
                certificate: String::new(),
                key: String::new(),
                created_on: None,
                revoked_on: None,
            };
            assert_eq!(record.index_serial(), "1000");

            record.serial_number = "abc".to_string();
            assert_eq!(record.index_serial(), "0ABC");
        }

        #[test]
        fn record_without_creation_time_is_left_out() {
            let datastore = datastore();
            datastore
                .with_conn(|conn| -> anyhow::Result<()> {
                    conn.execute("UPDATE certificates SET created_on = NULL WHERE id = 3", [])?;
                    Ok(())
                })
                .unwrap();
            let dir = tempfile::tempdir().unwrap();

            CertificateService::save_certificate_index(&datastore, dir.path())
                .expect("should write index");

            let index = fs::read_to_string(CertificateService::index_path(dir.path())).unwrap();
            assert_eq!(index.lines().count(), 1);
        }
    }

    #[tokio::test]
    async fn revocation_list_requires_ca() {
        let datastore = Datastore::in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();

        assert!(
            CertificateService::save_revocation_list(&datastore, dir.path())
                .await
                .is_err()
        );
    }
}
