//! Storage contracts for enrolled identities and the attendance log,
//! plus an in-memory implementation.

use crate::types::{AttendanceEntry, IdentityRecord};
use chrono::NaiveDate;
use thiserror::Error;

/// Collection holding enrolled identities.
pub const REGISTRATIONS: &str = "registrations";
/// Collection holding attendance entries.
pub const ATTENDANCE: &str = "attendance";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("identity {0:?} is already enrolled")]
    DuplicateId(String),
    #[error("{id:?} already has an attendance entry for {date}")]
    DuplicateEntry { id: String, date: NaiveDate },
    #[error("corrupt {collection} row: {reason}")]
    Corrupt {
        collection: &'static str,
        reason: String,
    },
    #[error("storage backend: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Enrolled identities. Records are immutable once added.
pub trait EnrollmentStore {
    /// Add a record. Fails with [`StoreError::DuplicateId`] if the id exists.
    fn add(&mut self, record: IdentityRecord) -> Result<(), StoreError>;

    /// All records, in enrollment order.
    fn list_enrolled(&self) -> Result<Vec<IdentityRecord>, StoreError>;
}

/// Append-only attendance log.
pub trait AttendanceLog {
    fn append(&mut self, entry: AttendanceEntry) -> Result<(), StoreError>;

    /// The entry for `id` on `date`, if one was recorded.
    fn list_for_date(&self, id: &str, date: NaiveDate)
        -> Result<Option<AttendanceEntry>, StoreError>;

    /// All entries, in insertion order.
    fn list_entries(&self) -> Result<Vec<AttendanceEntry>, StoreError>;

    /// Append `entry` unless its `(id, date)` pair is already present.
    ///
    /// Returns the existing entry when one is found. Backends shared between
    /// writers override this to run the check and the append atomically.
    fn record_once(
        &mut self,
        entry: AttendanceEntry,
    ) -> Result<Option<AttendanceEntry>, StoreError> {
        if let Some(existing) = self.list_for_date(&entry.id, entry.date)? {
            return Ok(Some(existing));
        }
        self.append(entry)?;
        Ok(None)
    }
}

/// Both collections behind one handle.
pub trait Storage: EnrollmentStore + AttendanceLog {
    /// Empty both collections.
    fn clear_all(&mut self) -> Result<(), StoreError>;
}

/// Process-local store, for tests and throwaway sessions.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    identities: Vec<IdentityRecord>,
    entries: Vec<AttendanceEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EnrollmentStore for MemoryStore {
    fn add(&mut self, record: IdentityRecord) -> Result<(), StoreError> {
        if self.identities.iter().any(|r| r.id == record.id) {
            return Err(StoreError::DuplicateId(record.id));
        }
        self.identities.push(record);
        Ok(())
    }

    fn list_enrolled(&self) -> Result<Vec<IdentityRecord>, StoreError> {
        Ok(self.identities.clone())
    }
}

impl AttendanceLog for MemoryStore {
    fn append(&mut self, entry: AttendanceEntry) -> Result<(), StoreError> {
        self.entries.push(entry);
        Ok(())
    }

    fn list_for_date(
        &self,
        id: &str,
        date: NaiveDate,
    ) -> Result<Option<AttendanceEntry>, StoreError> {
        Ok(self
            .entries
            .iter()
            .find(|e| e.id == id && e.date == date)
            .cloned())
    }

    fn list_entries(&self) -> Result<Vec<AttendanceEntry>, StoreError> {
        Ok(self.entries.clone())
    }
}

impl Storage for MemoryStore {
    fn clear_all(&mut self) -> Result<(), StoreError> {
        self.identities.clear();
        self.entries.clear();
        Ok(())
    }
}
