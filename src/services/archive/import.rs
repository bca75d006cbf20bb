use super::{
    ARCHIVE_PREFIX, ArchiveError, format_timestamp, parse_timestamp,
    registry::{self, Field, FieldKind, ModelDescriptor},
};
use crate::datastore::Datastore;
use flate2::read::GzDecoder;
use log::{debug, error, info, warn};
use rusqlite::{Connection, Transaction, params_from_iter, types::Value};
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use std::{io::Read, path::Path};

/// Outcome of a committed import
#[derive(Debug, Default, Serialize)]
pub struct ImportSummary {
    pub tables: Vec<ImportedTable>,
    /// Archive entries that did not match any registered model
    pub skipped_entries: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ImportedTable {
    pub table: &'static str,
    pub rows: usize,
}

struct ArchiveEntry {
    path: String,
    data: Vec<u8>,
}

/// Replace the contents of every table found in `archive`
///
/// The archive is fully decompressed and validated before the datastore is
/// touched. All table replacements share one transaction: either every
/// recognized document is committed or the datastore is left unchanged.
pub fn import(datastore: &Datastore, archive: &[u8]) -> Result<ImportSummary, ArchiveError> {
    let (entries, skipped) = read_archive(archive)?;
    let mut summary = datastore.with_conn(|conn| replace_tables(conn, &entries))?;
    summary.skipped_entries.extend(skipped);

    if !summary.skipped_entries.is_empty() {
        warn!(
            "skipped {} unrecognized archive entries: {}",
            summary.skipped_entries.len(),
            summary.skipped_entries.join(", ")
        );
    }

    info!("imported {} tables", summary.tables.len());

    Ok(summary)
}

/// Regular files of `archive` plus the paths of every other entry
fn read_archive(archive: &[u8]) -> Result<(Vec<ArchiveEntry>, Vec<String>), ArchiveError> {
    let malformed = |e: std::io::Error| ArchiveError::MalformedArchive(e.to_string());

    let mut archive = tar::Archive::new(GzDecoder::new(archive));
    let mut entries = Vec::new();
    let mut skipped = Vec::new();
    let mut has_root = false;

    for entry in archive.entries().map_err(malformed)? {
        let mut entry = entry.map_err(malformed)?;
        let path = entry
            .path()
            .map_err(malformed)?
            .to_string_lossy()
            .trim_end_matches('/')
            .to_string();

        if path == ARCHIVE_PREFIX {
            has_root = true;
            continue;
        }

        if !entry.header().entry_type().is_file() {
            debug!("ignoring non-file archive entry {path}");
            skipped.push(path);
            continue;
        }

        let mut data = Vec::new();
        entry.read_to_end(&mut data).map_err(malformed)?;
        entries.push(ArchiveEntry { path, data });
    }

    if !has_root {
        return Err(ArchiveError::MalformedArchive(format!(
            "missing {ARCHIVE_PREFIX} entry"
        )));
    }

    Ok((entries, skipped))
}

fn replace_tables(
    conn: &mut Connection,
    entries: &[ArchiveEntry],
) -> Result<ImportSummary, ArchiveError> {
    let tx = conn.transaction()?;
    let mut summary = ImportSummary::default();

    for entry in entries {
        let file_name = Path::new(&entry.path)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default();

        let Some(model) = registry::lookup(file_name) else {
            summary.skipped_entries.push(entry.path.clone());
            continue;
        };

        match replace_table(&tx, model, &entry.data) {
            Ok(rows) => {
                debug!("staged {rows} rows for {}", model.table);
                summary.tables.push(ImportedTable {
                    table: model.table,
                    rows,
                });
            }
            Err(e) => {
                error!("import of {} failed, rolling back: {e}", entry.path);

                if let Err(rollback_error) = tx.rollback() {
                    error!("failed to roll back import: {rollback_error:#}");
                }

                return Err(e);
            }
        }
    }

    tx.commit()?;

    Ok(summary)
}

fn replace_table(
    tx: &Transaction,
    model: &'static ModelDescriptor,
    document: &[u8],
) -> Result<usize, ArchiveError> {
    tx.execute(&format!("DELETE FROM {}", model.table), [])?;

    let records: Vec<Map<String, JsonValue>> =
        serde_json::from_slice(document).map_err(|source| ArchiveError::InvalidDocument {
            file_name: model.file_name,
            source,
        })?;

    for record in &records {
        let mut columns = Vec::with_capacity(record.len());
        let mut values = Vec::with_capacity(record.len());

        for (name, value) in record {
            let field = model
                .field(name)
                .ok_or_else(|| ArchiveError::UnknownField {
                    table: model.table,
                    field: name.clone(),
                })?;

            if field.kind == FieldKind::Opaque {
                continue;
            }

            values.push(to_sql_value(model, field, value)?);
            columns.push(field.name);
        }

        insert_row(tx, model.table, &columns, values)?;
    }

    Ok(records.len())
}

fn to_sql_value(
    model: &ModelDescriptor,
    field: &Field,
    value: &JsonValue,
) -> Result<Value, ArchiveError> {
    let invalid = |reason: String| ArchiveError::InvalidFieldValue {
        table: model.table,
        field: field.name.to_string(),
        reason,
    };

    // the stored credential is already hashed and must not be hashed again
    if model.is_credential(field.name) {
        return match value {
            JsonValue::Null => Ok(Value::Null),
            JsonValue::String(hash) => Ok(Value::Text(hash.clone())),
            other => Err(invalid(format!("expected a credential string, got {other}"))),
        };
    }

    match (field.kind, value) {
        (_, JsonValue::Null) => Ok(Value::Null),
        (FieldKind::Timestamp, JsonValue::String(text)) => parse_timestamp(text)
            .map(|timestamp| Value::Text(format_timestamp(&timestamp)))
            .map_err(|e| invalid(format!("{text:?} is not a timestamp: {e}"))),
        (FieldKind::Timestamp, other) => {
            Err(invalid(format!("expected a timestamp string, got {other}")))
        }
        (_, JsonValue::Bool(flag)) => Ok(Value::Integer(i64::from(*flag))),
        (_, JsonValue::Number(number)) => number
            .as_i64()
            .map(Value::Integer)
            .or_else(|| number.as_f64().map(Value::Real))
            .ok_or_else(|| invalid(format!("{number} is out of range"))),
        (_, JsonValue::String(text)) => Ok(Value::Text(text.clone())),
        (_, other) => Err(invalid(format!("nested values are not supported: {other}"))),
    }
}

fn insert_row(
    tx: &Transaction,
    table: &str,
    columns: &[&str],
    values: Vec<Value>,
) -> rusqlite::Result<()> {
    let sql = if columns.is_empty() {
        format!("INSERT INTO {table} DEFAULT VALUES")
    } else {
        let names = columns
            .iter()
            .map(|column| format!("\"{column}\""))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = (1..=columns.len())
            .map(|index| format!("?{index}"))
            .collect::<Vec<_>>()
            .join(", ");

        format!("INSERT INTO {table} ({names}) VALUES ({placeholders})")
    };

    tx.prepare_cached(&sql)?.execute(params_from_iter(values))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::{Compression, write::GzEncoder};

    fn datastore() -> Datastore {
        Datastore::in_memory().expect("should open datastore")
    }

    fn archive_with(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));

        let mut root = tar::Header::new_gnu();
        root.set_entry_type(tar::EntryType::Directory);
        root.set_size(0);
        root.set_mode(0o755);
        builder
            .append_data(&mut root, ARCHIVE_PREFIX, std::io::empty())
            .unwrap();

        for (path, content) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            builder
                .append_data(&mut header, path, content.as_bytes())
                .unwrap();
        }

        builder.into_inner().unwrap().finish().unwrap()
    }

    fn zone_names(datastore: &Datastore) -> Vec<String> {
        datastore
            .with_conn(|conn| -> anyhow::Result<Vec<String>> {
                let mut stmt = conn.prepare("SELECT name FROM zones ORDER BY id")?;
                let names = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<rusqlite::Result<Vec<String>>>()?;
                Ok(names)
            })
            .unwrap()
    }

    #[test]
    fn replaces_existing_rows() {
        let datastore = datastore();
        datastore
            .with_conn(|conn| -> anyhow::Result<()> {
                conn.execute(
                    "INSERT INTO zones (id, zone_id, name) VALUES (9, 9, 'old')",
                    [],
                )?;
                Ok(())
            })
            .unwrap();

        let archive = archive_with(&[(
            "alarmdecoder-export/zones.json",
            r#"[{"id": 1, "zone_id": 2, "name": "Garage", "description": null}]"#,
        )]);

        let summary = import(&datastore, &archive).expect("should import");

        assert_eq!(zone_names(&datastore), vec!["Garage"]);
        assert_eq!(summary.tables.len(), 1);
        assert_eq!(summary.tables[0].table, "zones");
        assert_eq!(summary.tables[0].rows, 1);
    }

    #[test]
    fn unrecognized_entries_are_skipped_and_reported() {
        let datastore = datastore();
        let archive = archive_with(&[
            ("alarmdecoder-export/zones.json", r#"[{"id": 1, "zone_id": 1, "name": "Hall"}]"#),
            ("alarmdecoder-export/zone.json", "this is not json"),
        ]);

        let summary = import(&datastore, &archive).expect("should import");

        assert_eq!(zone_names(&datastore), vec!["Hall"]);
        assert_eq!(summary.skipped_entries, vec!["alarmdecoder-export/zone.json"]);
    }

    #[test]
    fn missing_root_entry_is_malformed() {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        let content = b"[]";
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        builder
            .append_data(&mut header, "zones.json", &content[..])
            .unwrap();
        let archive = builder.into_inner().unwrap().finish().unwrap();

        let result = import(&datastore(), &archive);

        assert!(matches!(result, Err(ArchiveError::MalformedArchive(_))));
    }

    #[test]
    fn invalid_timestamp_is_rejected() {
        let archive = archive_with(&[(
            "alarmdecoder-export/user_details.json",
            r#"[{"id": 1, "created_time": "2015-01-02T03:04:05"}]"#,
        )]);

        let result = import(&datastore(), &archive);

        assert!(matches!(
            result,
            Err(ArchiveError::InvalidFieldValue { table: "user_details", ref field, .. }) if field == "created_time"
        ));
    }

    #[test]
    fn unknown_column_is_rejected() {
        let archive = archive_with(&[(
            "alarmdecoder-export/zones.json",
            r#"[{"id": 1, "zone_id": 1, "name": "Hall", "colour": "red"}]"#,
        )]);

        let result = import(&datastore(), &archive);

        assert!(matches!(result, Err(ArchiveError::UnknownField { .. })));
    }

    #[test]
    fn document_must_be_an_array_of_records() {
        let archive = archive_with(&[("alarmdecoder-export/zones.json", r#"{"id": 1}"#)]);

        let result = import(&datastore(), &archive);

        assert!(matches!(
            result,
            Err(ArchiveError::InvalidDocument {
                file_name: "zones.json",
                ..
            })
        ));
    }

    #[test]
    fn credential_is_stored_verbatim() {
        let datastore = datastore();
        let hash = "$argon2id$v=19$m=19456,t=2,p=1$c2FsdHNhbHQ$aGFzaGhhc2g";
        let users = format!(
            r#"[{{"id": 1, "name": "admin", "password": "{hash}", "role_code": 0, "status_code": 2}}]"#
        );
        let archive = archive_with(&[("alarmdecoder-export/users.json", users.as_str())]);

        import(&datastore, &archive).expect("should import");

        let stored: String = datastore
            .with_conn(|conn| -> anyhow::Result<String> {
                Ok(conn.query_row("SELECT password FROM users WHERE id = 1", [], |row| {
                    row.get(0)
                })?)
            })
            .unwrap();
        assert_eq!(stored, hash);
    }

    #[test]
    fn non_string_credential_is_rejected() {
        let archive = archive_with(&[(
            "alarmdecoder-export/users.json",
            r#"[{"id": 1, "name": "admin", "password": 1234}]"#,
        )]);

        let result = import(&datastore(), &archive);

        assert!(matches!(
            result,
            Err(ArchiveError::InvalidFieldValue { table: "users", .. })
        ));
    }

    #[test]
    fn opaque_fields_are_ignored() {
        let datastore = datastore();
        let archive = archive_with(&[(
            "alarmdecoder-export/users.json",
            r#"[{"id": 1, "name": "admin", "notifications": [1, 2]}]"#,
        )]);

        let summary = import(&datastore, &archive).expect("should import");

        assert_eq!(summary.tables[0].rows, 1);
    }
}
