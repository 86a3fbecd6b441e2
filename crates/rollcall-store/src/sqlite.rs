use chrono::{DateTime, NaiveDate, Utc};
use rollcall_core::store::{ATTENDANCE, REGISTRATIONS};
use rollcall_core::types::format_timestamp;
use rollcall_core::{
    AttendanceEntry, AttendanceLog, EnrollmentStore, IdentityRecord, Signature, Storage,
    StoreError,
};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::time::Duration;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS registrations (
    seq       INTEGER PRIMARY KEY AUTOINCREMENT,
    id        TEXT NOT NULL UNIQUE,
    name      TEXT NOT NULL,
    signature BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS attendance (
    seq       INTEGER PRIMARY KEY AUTOINCREMENT,
    id        TEXT NOT NULL,
    name      TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    date      TEXT NOT NULL,
    UNIQUE (id, date)
);
";

const DATE_FORMAT: &str = "%Y-%m-%d";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed [`Storage`].
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open or create a database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(backend)?;
        let mode: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .map_err(backend)?;
        tracing::debug!(journal_mode = %mode, "configured sqlite");
        let store = Self::init(conn)?;
        tracing::info!(path = %path.display(), "opened attendance database");
        Ok(store)
    }

    /// Private in-memory database, mostly for tests.
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory().map_err(backend)?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(BUSY_TIMEOUT).map_err(backend)?;
        conn.execute_batch(SCHEMA_SQL).map_err(backend)?;
        Ok(Self { conn })
    }
}

fn backend(e: rusqlite::Error) -> StoreError {
    StoreError::Backend(Box::new(e))
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation)
}

fn corrupt(collection: &'static str, reason: impl ToString) -> StoreError {
    StoreError::Corrupt {
        collection,
        reason: reason.to_string(),
    }
}

type EntryRow = (String, String, String, String);

fn entry_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EntryRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn decode_entry((id, name, timestamp, date): EntryRow) -> Result<AttendanceEntry, StoreError> {
    let timestamp = DateTime::parse_from_rfc3339(&timestamp)
        .map_err(|e| corrupt(ATTENDANCE, format!("timestamp {timestamp:?}: {e}")))?
        .with_timezone(&Utc);
    let date = NaiveDate::parse_from_str(&date, DATE_FORMAT)
        .map_err(|e| corrupt(ATTENDANCE, format!("date {date:?}: {e}")))?;
    Ok(AttendanceEntry {
        id,
        name,
        timestamp,
        date,
    })
}

fn select_for_date(
    conn: &Connection,
    id: &str,
    date: NaiveDate,
) -> Result<Option<AttendanceEntry>, StoreError> {
    let row = conn
        .query_row(
            "SELECT id, name, timestamp, date FROM attendance WHERE id = ?1 AND date = ?2",
            params![id, date.format(DATE_FORMAT).to_string()],
            entry_from_row,
        )
        .optional()
        .map_err(backend)?;
    row.map(decode_entry).transpose()
}

fn insert_entry(conn: &Connection, entry: &AttendanceEntry) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO attendance (id, name, timestamp, date) VALUES (?1, ?2, ?3, ?4)",
        params![
            entry.id,
            entry.name,
            format_timestamp(&entry.timestamp),
            entry.date.format(DATE_FORMAT).to_string(),
        ],
    )
    .map_err(|e| {
        if is_constraint_violation(&e) {
            StoreError::DuplicateEntry {
                id: entry.id.clone(),
                date: entry.date,
            }
        } else {
            backend(e)
        }
    })?;
    Ok(())
}

impl EnrollmentStore for SqliteStore {
    fn add(&mut self, record: IdentityRecord) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO registrations (id, name, signature) VALUES (?1, ?2, ?3)",
                params![record.id, record.name, record.signature.to_le_bytes()],
            )
            .map_err(|e| {
                if is_constraint_violation(&e) {
                    StoreError::DuplicateId(record.id.clone())
                } else {
                    backend(e)
                }
            })?;
        Ok(())
    }

    fn list_enrolled(&self) -> Result<Vec<IdentityRecord>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, signature FROM registrations ORDER BY seq")
            .map_err(backend)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Vec<u8>>(2)?,
                ))
            })
            .map_err(backend)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(backend)?;

        rows.into_iter()
            .map(|(id, name, blob)| {
                let signature = Signature::from_le_bytes(&blob)
                    .map_err(|e| corrupt(REGISTRATIONS, format!("{id}: {e}")))?;
                Ok(IdentityRecord {
                    id,
                    name,
                    signature,
                })
            })
            .collect()
    }
}

impl AttendanceLog for SqliteStore {
    fn append(&mut self, entry: AttendanceEntry) -> Result<(), StoreError> {
        insert_entry(&self.conn, &entry)
    }

    fn list_for_date(
        &self,
        id: &str,
        date: NaiveDate,
    ) -> Result<Option<AttendanceEntry>, StoreError> {
        select_for_date(&self.conn, id, date)
    }

    fn list_entries(&self) -> Result<Vec<AttendanceEntry>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, timestamp, date FROM attendance ORDER BY seq")
            .map_err(backend)?;
        let rows = stmt
            .query_map([], entry_from_row)
            .map_err(backend)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(backend)?;
        rows.into_iter().map(decode_entry).collect()
    }

    /// Check and insert under one write lock.
    fn record_once(
        &mut self,
        entry: AttendanceEntry,
    ) -> Result<Option<AttendanceEntry>, StoreError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(backend)?;

        if let Some(existing) = select_for_date(&tx, &entry.id, entry.date)? {
            return Ok(Some(existing));
        }
        insert_entry(&tx, &entry)?;
        tx.commit().map_err(backend)?;
        Ok(None)
    }
}

impl Storage for SqliteStore {
    fn clear_all(&mut self) -> Result<(), StoreError> {
        let tx = self.conn.transaction().map_err(backend)?;
        let identities = tx
            .execute("DELETE FROM registrations", [])
            .map_err(backend)?;
        let entries = tx.execute("DELETE FROM attendance", []).map_err(backend)?;
        tx.commit().map_err(backend)?;
        tracing::info!(identities, entries, "cleared all data");
        Ok(())
    }
}
