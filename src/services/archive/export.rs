use super::{
    ARCHIVE_PREFIX, ArchiveError, format_timestamp, parse_timestamp,
    registry::{Field, FieldKind, MODEL_REGISTRY, ModelDescriptor},
};
use crate::datastore::Datastore;
use chrono::Local;
use flate2::{Compression, write::GzEncoder};
use log::{debug, info};
use rusqlite::{Connection, types::Value};
use serde::Serialize;
use serde_json::{Value as JsonValue, ser::PrettyFormatter};
use std::collections::BTreeMap;

/// A complete archive ready to be sent to the client
#[derive(Debug)]
pub struct ExportedArchive {
    /// Suggested download name, `alarmdecoder-export-YYYYMMDDHHMMSS.tar.gz`
    pub file_name: String,
    pub data: Vec<u8>,
}

type Record = BTreeMap<&'static str, JsonValue>;

/// Serialize every registered model into a gzip-compressed tar archive
///
/// Read-only. Any database error aborts the export, no partial archive is
/// produced. Exporting unchanged data twice yields identical bytes.
pub fn export(datastore: &Datastore) -> Result<ExportedArchive, ArchiveError> {
    let documents = datastore.with_conn(|conn| {
        MODEL_REGISTRY
            .iter()
            .map(|model| Ok((model.file_name, export_model(conn, model)?)))
            .collect::<Result<Vec<_>, ArchiveError>>()
    })?;

    let data = build_archive(&documents)?;
    let file_name = format!(
        "{ARCHIVE_PREFIX}-{}.tar.gz",
        Local::now().format("%Y%m%d%H%M%S")
    );

    info!("exported {} models into {file_name}", documents.len());

    Ok(ExportedArchive { file_name, data })
}

fn export_model(conn: &Connection, model: &ModelDescriptor) -> Result<Vec<u8>, ArchiveError> {
    let fields: Vec<&Field> = model.stored_fields().collect();
    let columns = fields
        .iter()
        .map(|field| format!("\"{}\"", field.name))
        .collect::<Vec<_>>()
        .join(", ");

    let mut stmt = conn.prepare(&format!(
        "SELECT {columns} FROM {} ORDER BY id",
        model.table
    ))?;
    let mut rows = stmt.query([])?;
    let mut records = Vec::new();

    while let Some(row) = rows.next()? {
        let mut record = Record::new();

        for (index, field) in fields.iter().enumerate() {
            let value: Value = row.get(index)?;
            record.insert(field.name, to_json(model, field, value)?);
        }

        records.push(record);
    }

    debug!("exporting {} rows from {}", records.len(), model.table);

    to_document(&records)
}

fn to_json(model: &ModelDescriptor, field: &Field, value: Value) -> Result<JsonValue, ArchiveError> {
    let invalid = |reason: String| ArchiveError::InvalidFieldValue {
        table: model.table,
        field: field.name.to_string(),
        reason,
    };

    Ok(match (field.kind, value) {
        (_, Value::Null) => JsonValue::Null,
        (FieldKind::Boolean, Value::Integer(int)) => JsonValue::Bool(int != 0),
        (FieldKind::Timestamp, Value::Text(text)) => {
            let timestamp = parse_timestamp(&text)
                .map_err(|e| invalid(format!("stored value {text:?} is not a timestamp: {e}")))?;
            JsonValue::String(format_timestamp(&timestamp))
        }
        (_, Value::Integer(int)) => JsonValue::from(int),
        (_, Value::Real(real)) => serde_json::Number::from_f64(real)
            .map(JsonValue::Number)
            .ok_or_else(|| invalid(format!("stored value {real} is not a finite number")))?,
        (_, Value::Text(text)) => JsonValue::String(text),
        (_, Value::Blob(_)) => return Err(invalid("binary values cannot be exported".into())),
    })
}

/// Sorted keys and four space indentation
fn to_document(records: &[Record]) -> Result<Vec<u8>, ArchiveError> {
    let mut document = Vec::new();
    let mut serializer =
        serde_json::Serializer::with_formatter(&mut document, PrettyFormatter::with_indent(b"    "));

    records
        .serialize(&mut serializer)
        .map_err(std::io::Error::from)?;

    Ok(document)
}

fn build_archive(documents: &[(&str, Vec<u8>)]) -> Result<Vec<u8>, ArchiveError> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));

    let mut header = entry_header(tar::EntryType::Directory, 0, 0o755);
    builder.append_data(&mut header, ARCHIVE_PREFIX, std::io::empty())?;

    for (file_name, document) in documents {
        let mut header = entry_header(tar::EntryType::Regular, document.len() as u64, 0o644);
        builder.append_data(
            &mut header,
            format!("{ARCHIVE_PREFIX}/{file_name}"),
            document.as_slice(),
        )?;
    }

    Ok(builder.into_inner()?.finish()?)
}

fn entry_header(entry_type: tar::EntryType, size: u64, mode: u32) -> tar::Header {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_size(size);
    header.set_mode(mode);
    // entries carry no timestamp so unchanged data exports to identical bytes
    header.set_mtime(0);
    header
}
