//! Audit trail sinks.
//!
//! Every sink writes the same header and column order from
//! [`AuditEvent::COLUMNS`]; missing values are written as empty cells.

mod csv;
mod xlsx;

use crate::Result;
use crate::audit::AuditEvent;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Worksheet holding the rows in spreadsheet output
pub const SHEET_NAME: &str = "Audit Trail";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkFormat {
    Csv,
    Xlsx,
}

impl SinkFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            SinkFormat::Csv => "csv",
            SinkFormat::Xlsx => "xlsx",
        }
    }
}

impl std::fmt::Display for SinkFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// `destination` with the format's extension appended, unless it already
/// carries it.
pub fn output_path(destination: &Path, format: SinkFormat) -> PathBuf {
    let ext = format.extension();
    if destination
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
    {
        return destination.to_path_buf();
    }
    let mut path = OsString::from(destination.as_os_str());
    path.push(".");
    path.push(ext);
    PathBuf::from(path)
}

/// Write `records` in `format` and return the file written.
pub fn write(records: &[AuditEvent], destination: &Path, format: SinkFormat) -> Result<PathBuf> {
    let path = output_path(destination, format);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    match format {
        SinkFormat::Csv => csv::write_csv(records, &path)?,
        SinkFormat::Xlsx => xlsx::write_xlsx(records, &path)?,
    }

    tracing::info!("Wrote {} rows to {}", records.len(), path.display());
    Ok(path)
}

/// Write the same records to every requested sink. Duplicate formats are
/// written once.
pub fn write_all(
    records: &[AuditEvent],
    destination: &Path,
    formats: &[SinkFormat],
) -> Result<Vec<PathBuf>> {
    let mut written = Vec::with_capacity(formats.len());
    let mut seen = Vec::with_capacity(formats.len());
    for format in formats {
        if seen.contains(format) {
            continue;
        }
        seen.push(*format);
        written.push(write(records, destination, *format)?);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{RawAuditEvent, flatten_event};
    use calamine::{Data, Reader, Xlsx, open_workbook};
    use serde_json::json;

    fn sample() -> Vec<AuditEvent> {
        [
            json!({
                "eventDate": "2024-05-01T12:30:12.345Z",
                "actionType": "create",
                "actionUserId": "u-1",
                "auditResource": "project",
                "eventType": "ProjectCreated",
                "ipAddress": "10.0.0.1",
                "data": {"id": 42, "status": "active", "username": "alice, jr."}
            }),
            json!({
                "eventDate": "2024-04-30T08:00:00Z",
                "actionType": "login",
                "data": null
            }),
        ]
        .into_iter()
        .map(|v| flatten_event(&serde_json::from_value::<RawAuditEvent>(v).unwrap()))
        .collect()
    }

    fn expected_rows(records: &[AuditEvent]) -> Vec<Vec<String>> {
        std::iter::once(AuditEvent::COLUMNS.map(str::to_string).to_vec())
            .chain(
                records
                    .iter()
                    .map(|r| r.row().map(str::to_string).to_vec()),
            )
            .collect()
    }

    fn read_csv(path: &Path) -> Vec<Vec<String>> {
        let mut reader = ::csv::ReaderBuilder::new()
            .has_headers(false)
            .from_path(path)
            .unwrap();
        reader
            .records()
            .map(|r| r.unwrap().iter().map(str::to_string).collect())
            .collect()
    }

    fn read_xlsx(path: &Path) -> Vec<Vec<String>> {
        let mut workbook: Xlsx<_> = open_workbook(path).unwrap();
        let range = workbook.worksheet_range(SHEET_NAME).unwrap();
        range
            .rows()
            .map(|row| {
                row.iter()
                    .map(|cell| match cell {
                        Data::Empty => String::new(),
                        Data::String(s) => s.clone(),
                        other => panic!("unexpected cell {other:?}"),
                    })
                    .collect()
            })
            .collect()
    }

    #[test]
    fn test_output_path_appends_extension() {
        let base = Path::new("/tmp/out/audit_trail");
        assert_eq!(
            output_path(base, SinkFormat::Csv),
            PathBuf::from("/tmp/out/audit_trail.csv")
        );
        assert_eq!(
            output_path(Path::new("report.v2"), SinkFormat::Xlsx),
            PathBuf::from("report.v2.xlsx")
        );
        assert_eq!(
            output_path(Path::new("audit.CSV"), SinkFormat::Csv),
            PathBuf::from("audit.CSV")
        );
    }

    #[test]
    fn test_csv_and_xlsx_hold_identical_values() {
        let dir = tempfile::tempdir().unwrap();
        let records = sample();
        let written = write_all(
            &records,
            &dir.path().join("audit_trail"),
            &[SinkFormat::Csv, SinkFormat::Xlsx, SinkFormat::Csv],
        )
        .unwrap();

        assert_eq!(written.len(), 2);
        let from_csv = read_csv(&written[0]);
        let from_xlsx = read_xlsx(&written[1]);

        assert_eq!(from_csv, expected_rows(&records));
        assert_eq!(from_xlsx, from_csv);
        // Null details survive as empty strings, not missing columns
        assert_eq!(from_csv[2].len(), AuditEvent::COLUMNS.len());
        assert_eq!(from_csv[2][5], "");
    }

    #[test]
    fn test_empty_record_set_writes_header_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&[], &dir.path().join("nested/empty"), SinkFormat::Csv).unwrap();
        assert_eq!(read_csv(&path), expected_rows(&[]));

        let path = write(&[], &dir.path().join("empty"), SinkFormat::Xlsx).unwrap();
        assert_eq!(read_xlsx(&path), expected_rows(&[]));
    }
}
