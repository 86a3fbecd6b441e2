//! Plain comma-separated export/import of the attendance log.
//!
//! No quoting or escaping: ids and names are validated at enrollment to be
//! free of delimiters, and timestamps/dates never contain them.

use crate::types::{check_field, format_timestamp, AttendanceEntry, RecordError};
use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

/// Field names in declaration order.
pub const HEADER: [&str; 4] = ["id", "name", "timestamp", "date"];

#[derive(Error, Debug, PartialEq)]
pub enum CsvError {
    #[error("missing header row")]
    MissingHeader,
    #[error("unexpected header {0:?}")]
    UnexpectedHeader(String),
    #[error("line {line}: expected 4 fields, got {found}")]
    FieldCount { line: usize, found: usize },
    #[error("line {line}: {source}")]
    Field {
        line: usize,
        #[source]
        source: RecordError,
    },
    #[error("line {line}: bad timestamp {value:?}")]
    Timestamp { line: usize, value: String },
    #[error("line {line}: bad date {value:?}")]
    Date { line: usize, value: String },
    #[error("line {line}: date {date} does not match timestamp {timestamp}")]
    DateMismatch {
        line: usize,
        date: String,
        timestamp: String,
    },
}

/// Render `entries` as CSV. Returns `None` for an empty log.
pub fn to_csv(entries: &[AttendanceEntry]) -> Option<String> {
    if entries.is_empty() {
        return None;
    }
    let mut lines = Vec::with_capacity(entries.len() + 1);
    lines.push(HEADER.join(","));
    for e in entries {
        lines.push(format!(
            "{},{},{},{}",
            e.id,
            e.name,
            format_timestamp(&e.timestamp),
            e.date_iso()
        ));
    }
    Some(lines.join("\n"))
}

/// Parse CSV produced by [`to_csv`]. Blank lines are skipped.
pub fn from_csv(text: &str) -> Result<Vec<AttendanceEntry>, CsvError> {
    let mut lines = text
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim_end_matches('\r')))
        .filter(|(_, l)| !l.trim().is_empty());

    let (_, header) = lines.next().ok_or(CsvError::MissingHeader)?;
    if header.split(',').map(str::trim).ne(HEADER.iter().copied()) {
        return Err(CsvError::UnexpectedHeader(header.to_string()));
    }

    lines.map(|(line, row)| parse_row(line, row)).collect()
}

fn parse_row(line: usize, row: &str) -> Result<AttendanceEntry, CsvError> {
    let fields: Vec<&str> = row.split(',').collect();
    let [id, name, timestamp, date] = fields[..] else {
        return Err(CsvError::FieldCount {
            line,
            found: fields.len(),
        });
    };
    for (field, value) in [("id", id), ("name", name)] {
        check_field(field, value).map_err(|source| CsvError::Field { line, source })?;
    }

    // Entries are stored at millisecond precision; finer input would not survive a reload.
    let ts = DateTime::parse_from_rfc3339(timestamp)
        .ok()
        .map(|t| t.with_timezone(&Utc))
        .filter(|t| t.timestamp_subsec_nanos() % 1_000_000 == 0)
        .ok_or_else(|| CsvError::Timestamp {
            line,
            value: timestamp.to_string(),
        })?;
    let day = NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|_| CsvError::Date {
        line,
        value: date.to_string(),
    })?;
    if ts.date_naive() != day {
        return Err(CsvError::DateMismatch {
            line,
            date: date.to_string(),
            timestamp: timestamp.to_string(),
        });
    }

    Ok(AttendanceEntry {
        id: id.to_string(),
        name: name.to_string(),
        timestamp: ts,
        date: day,
    })
}

/// Default export file name for a report generated on `day`.
pub fn report_file_name(day: NaiveDate) -> String {
    format!("attendance_report_{}.csv", day.format("%Y-%m-%d"))
}
