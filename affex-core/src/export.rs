//! Table-text export of the session log.
//!
//! One row per entry: `Timestamp,Event,Metadata...`. A map payload is
//! flattened into alternating key and value columns (nested maps use dotted
//! keys), a scalar payload is one column, and a missing payload is one empty
//! column. Every field is quoted with internal quotes doubled.

use crate::error::ExportError;
use crate::event::LogEntry;
use affex_timing::Clock;
use chrono::SecondsFormat;
use csv::{QuoteStyle, Terminator};
use serde_json::{Map, Value};

pub const HEADER: [&str; 3] = ["Timestamp", "Event", "Metadata"];

/// Writer for exported rows: every field quoted, rows as wide as their metadata.
fn row_writer() -> csv::Writer<Vec<u8>> {
    csv::WriterBuilder::new()
        .quote_style(QuoteStyle::Always)
        .flexible(true)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(Vec::new())
}

/// Flushes a writer built over memory and hands back its text.
pub(crate) fn into_text(writer: csv::Writer<Vec<u8>>) -> Result<String, ExportError> {
    let bytes = writer.into_inner().map_err(|e| ExportError::Io(e.into_error()))?;
    Ok(String::from_utf8(bytes)?)
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn flatten_into(map: &Map<String, Value>, prefix: &str, out: &mut Vec<String>) {
    for (key, value) in map {
        let key = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            Value::Object(inner) => flatten_into(inner, &key, out),
            other => {
                out.push(key);
                out.push(cell(other));
            }
        }
    }
}

/// Metadata columns for one row.
pub fn flatten_metadata(metadata: Option<&Value>) -> Vec<String> {
    match metadata {
        Some(Value::Object(map)) if !map.is_empty() => {
            let mut out = Vec::with_capacity(map.len() * 2);
            flatten_into(map, "", &mut out);
            out
        }
        Some(Value::Object(_)) | None => vec![String::new()],
        Some(other) => vec![cell(other)],
    }
}

pub fn entry_to_row<C: Clock>(entry: &LogEntry, clock: &C) -> Vec<String> {
    let timestamp = clock
        .wall_time(entry.timestamp)
        .to_rfc3339_opts(SecondsFormat::Micros, true);
    let mut fields = vec![timestamp, entry.kind.label().to_string()];
    fields.extend(flatten_metadata(entry.metadata.as_ref()));
    fields
}

/// Serializes entries with the header row. Pure: same input, same bytes.
pub fn write_csv<'a, C, I>(entries: I, clock: &C) -> Result<String, ExportError>
where
    C: Clock,
    I: IntoIterator<Item = &'a LogEntry>,
{
    let mut writer = row_writer();
    writer.write_record(HEADER)?;
    for entry in entries {
        writer.write_record(entry_to_row(entry, clock))?;
    }
    into_text(writer)
}

/// Reads table text into records of fields, header row included.
///
/// Rows may differ in width. Blank lines are skipped.
pub fn read_records(text: &str) -> Result<Vec<Vec<String>>, ExportError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());
    reader
        .records()
        .map(|record| -> Result<Vec<String>, ExportError> {
            Ok(record?.iter().map(String::from).collect())
        })
        .collect()
}
