//! rollcall-core: Face-signature matching and daily attendance bookkeeping.
//!
//! Signatures come from an external embedding model (128-dim vectors).
//! This crate decides which enrolled identity a signature belongs to and
//! whether that identity still needs to be marked present today.

pub mod attendance;
pub mod capture;
pub mod csv;
pub mod records;
pub mod store;
pub mod types;

pub use attendance::{enroll, mark_attendance, EnrollError, EnrollOutcome, Identity, MarkOutcome};
pub use capture::{CaptureAdapter, CaptureError, Frame};
pub use store::{AttendanceLog, EnrollmentStore, MemoryStore, Storage, StoreError};
pub use types::{
    AttendanceEntry, EuclideanMatcher, IdentityRecord, MatchResult, Matcher, RecordError,
    Signature, SignatureError, DISTANCE_THRESHOLD, SIGNATURE_DIM,
};
