//! Read-side views over the attendance log.

use crate::types::AttendanceEntry;
use chrono::NaiveDate;
use serde::Serialize;

/// Filter for browsing attendance entries.
#[derive(Debug, Clone, Default)]
pub struct RecordQuery {
    /// Case-insensitive substring of the name or the id.
    pub search: Option<String>,
    /// Exact calendar day.
    pub date: Option<NaiveDate>,
}

impl RecordQuery {
    pub fn matches(&self, entry: &AttendanceEntry) -> bool {
        let search_ok = match self.search.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(term) => {
                let term = term.to_lowercase();
                entry.name.to_lowercase().contains(&term) || entry.id.to_lowercase().contains(&term)
            }
        };
        let date_ok = self.date.map_or(true, |d| entry.date == d);
        search_ok && date_ok
    }

    /// Matching entries, newest first.
    pub fn apply<'a>(&self, entries: &'a [AttendanceEntry]) -> Vec<&'a AttendanceEntry> {
        entries.iter().rev().filter(|e| self.matches(e)).collect()
    }
}

/// Headline counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub enrolled: usize,
    pub present_today: usize,
    pub total_entries: usize,
}

pub fn summarize(enrolled: usize, entries: &[AttendanceEntry], today: NaiveDate) -> Summary {
    Summary {
        enrolled,
        present_today: entries.iter().filter(|e| e.date == today).count(),
        total_entries: entries.len(),
    }
}
