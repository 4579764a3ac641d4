//! JSON and CSV rendering for audit trails and compliance reports

use serde::{Deserialize, Serialize};

use crate::audit::AuditEntry;
use crate::error::PrivacyResult;

/// Output format for exports and reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    /// Pretty-printed JSON
    #[default]
    Json,
    /// Comma-separated values
    Csv,
}

aegis_common::impl_status_conversions!(ExportFormat {
    Json => "json",
    Csv => "csv",
});

/// A row type with a fixed column order
pub trait CsvRecord {
    const HEADER: &'static [&'static str];

    /// One value per header column, in header order
    fn fields(&self) -> Vec<String>;
}

/// Pretty-printed JSON array
pub fn to_json<T: Serialize>(rows: &[T]) -> PrivacyResult<String> {
    Ok(serde_json::to_string_pretty(rows)?)
}

/// CSV with a header line and CRLF record separators
pub fn to_csv<T: CsvRecord>(rows: &[T]) -> String {
    let mut out = String::new();
    push_row(&mut out, T::HEADER.iter().copied());
    for row in rows {
        let fields = row.fields();
        push_row(&mut out, fields.iter().map(String::as_str));
    }
    out
}

fn push_row<'a>(out: &mut String, fields: impl Iterator<Item = &'a str>) {
    for (i, field) in fields.enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&quote(field));
    }
    out.push_str("\r\n");
}

/// Quote a field when it contains a delimiter, quote or line break
pub fn quote(field: &str) -> String {
    if field.contains([',', '"', '\r', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

impl CsvRecord for AuditEntry {
    const HEADER: &'static [&'static str] = &[
        "sequence",
        "id",
        "timestamp",
        "event_type",
        "severity",
        "outcome",
        "actor",
        "session_id",
        "metadata",
        "previous_checksum",
        "checksum",
    ];

    fn fields(&self) -> Vec<String> {
        let event = &self.event;
        vec![
            self.sequence.to_string(),
            event.id.to_string(),
            event.timestamp.to_rfc3339(),
            event.event_type.to_string(),
            event.severity.to_string(),
            event.outcome.to_string(),
            event.actor.clone().unwrap_or_default(),
            event.session_id.clone().unwrap_or_default(),
            serde_json::to_string(&event.metadata).unwrap_or_default(),
            self.previous_checksum.clone(),
            self.checksum.clone(),
        ]
    }
}
