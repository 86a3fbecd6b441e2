//! rollcall-store: Durable storage for enrolled identities and attendance.
//!
//! Both collections live in one SQLite database. The `(id, date)` pair is
//! unique in the attendance table, so stations sharing a database file
//! cannot record the same person twice on one day.

pub mod sqlite;

pub use sqlite::SqliteStore;
