//! Enrollment and the match-then-mark decision procedure.

use crate::store::{AttendanceLog, EnrollmentStore, StoreError};
use crate::types::{AttendanceEntry, IdentityRecord, Matcher, RecordError, Signature};
use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;

/// Who was recognized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
    pub name: String,
}

impl From<&IdentityRecord> for Identity {
    fn from(r: &IdentityRecord) -> Self {
        Self {
            id: r.id.clone(),
            name: r.name.clone(),
        }
    }
}

/// Result of one capture-and-mark cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum MarkOutcome {
    /// Nobody is enrolled yet.
    NoEnrollments,
    /// The capture adapter found no face.
    NoFaceDetected,
    /// No enrolled signature is close enough.
    NoMatch { best_distance: Option<f32> },
    /// Recognized, but already present today. `entry` is the earlier one.
    AlreadyMarked {
        identity: Identity,
        entry: AttendanceEntry,
    },
    /// Recognized and recorded.
    Marked {
        identity: Identity,
        entry: AttendanceEntry,
        distance: f32,
    },
}

impl MarkOutcome {
    pub fn is_marked(&self) -> bool {
        matches!(self, MarkOutcome::Marked { .. })
    }

    pub fn identity(&self) -> Option<&Identity> {
        match self {
            MarkOutcome::AlreadyMarked { identity, .. } | MarkOutcome::Marked { identity, .. } => {
                Some(identity)
            }
            _ => None,
        }
    }
}

impl fmt::Display for MarkOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarkOutcome::NoEnrollments => write!(f, "no faces registered in the system"),
            MarkOutcome::NoFaceDetected => {
                write!(f, "no face detected; look directly at the camera")
            }
            MarkOutcome::NoMatch { .. } => write!(f, "face not recognized; register first"),
            MarkOutcome::AlreadyMarked { identity, .. } => {
                write!(f, "{} has already marked attendance today", identity.name)
            }
            MarkOutcome::Marked { identity, .. } => {
                write!(f, "attendance marked for {}", identity.name)
            }
        }
    }
}

/// Match `probe` against the enrolled gallery and record attendance.
///
/// The gallery is checked before the probe, so an empty store reports
/// [`MarkOutcome::NoEnrollments`] whatever was captured. Only the
/// [`MarkOutcome::Marked`] path writes to the log.
pub fn mark_attendance<S, M>(
    storage: &mut S,
    matcher: &M,
    probe: Option<&Signature>,
    threshold: f32,
    now: DateTime<Utc>,
) -> Result<MarkOutcome, StoreError>
where
    S: EnrollmentStore + AttendanceLog + ?Sized,
    M: Matcher + ?Sized,
{
    let gallery = storage.list_enrolled()?;
    if gallery.is_empty() {
        return Ok(MarkOutcome::NoEnrollments);
    }

    let Some(probe) = probe else {
        return Ok(MarkOutcome::NoFaceDetected);
    };

    let result = matcher.compare(probe, &gallery, threshold);
    tracing::debug!(
        gallery = gallery.len(),
        matched = result.matched,
        distance = ?result.distance,
        "compared probe against gallery"
    );

    let (Some(idx), Some(distance)) = (result.index, result.distance) else {
        return Ok(MarkOutcome::NoMatch {
            best_distance: result.distance,
        });
    };

    let record = &gallery[idx];
    let identity = Identity::from(record);
    let entry = AttendanceEntry::new(&record.id, &record.name, now);
    let date = entry.date;

    match storage.record_once(entry.clone()) {
        Ok(None) => {
            tracing::info!(id = %identity.id, name = %identity.name, distance, "attendance marked");
            Ok(MarkOutcome::Marked {
                identity,
                entry,
                distance,
            })
        }
        Ok(Some(existing)) => {
            tracing::info!(id = %identity.id, %date, "already marked today");
            Ok(MarkOutcome::AlreadyMarked {
                identity,
                entry: existing,
            })
        }
        // A concurrent writer got there between the check and the insert.
        Err(StoreError::DuplicateEntry { id, date }) => match storage.list_for_date(&id, date)? {
            Some(existing) => Ok(MarkOutcome::AlreadyMarked {
                identity,
                entry: existing,
            }),
            None => Err(StoreError::DuplicateEntry { id, date }),
        },
        Err(e) => Err(e),
    }
}

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("invalid identity: {0}")]
    Record(#[from] RecordError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of an enrollment attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum EnrollOutcome {
    Enrolled(IdentityRecord),
    /// No signature could be extracted; nothing was written.
    NoFaceDetected,
}

/// Enroll `name` with the captured `signature`, generating an id if none is given.
pub fn enroll<S>(
    store: &mut S,
    id: Option<String>,
    name: &str,
    signature: Option<Signature>,
) -> Result<EnrollOutcome, EnrollError>
where
    S: EnrollmentStore + ?Sized,
{
    let Some(signature) = signature else {
        tracing::warn!(name, "enrollment aborted: no face detected");
        return Ok(EnrollOutcome::NoFaceDetected);
    };

    let record = IdentityRecord::new(id, name, signature)?;
    store.add(record.clone())?;
    tracing::info!(id = %record.id, name = %record.name, "identity enrolled");
    Ok(EnrollOutcome::Enrolled(record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::tests::{record, sig_at};
    use crate::types::{EuclideanMatcher, DISTANCE_THRESHOLD};
    use chrono::TimeZone;

    fn morning() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 4, 8, 30, 0).unwrap()
    }

    fn mark(store: &mut MemoryStore, probe: Option<&Signature>, now: DateTime<Utc>) -> MarkOutcome {
        mark_attendance(store, &EuclideanMatcher, probe, DISTANCE_THRESHOLD, now).unwrap()
    }

    #[test]
    fn test_exact_match_then_already_marked() {
        let v = sig_at(0, 0.3);
        let mut store = MemoryStore::new();
        store.add(record("E1", "Alice", v.clone())).unwrap();

        let first = mark(&mut store, Some(&v), morning());
        let MarkOutcome::Marked {
            identity,
            entry,
            distance,
        } = &first
        else {
            panic!("expected Marked, got {first:?}");
        };
        assert_eq!(identity.name, "Alice");
        assert_eq!(entry.id, "E1");
        assert_eq!(*distance, 0.0);

        let second = mark(&mut store, Some(&v), morning() + chrono::Duration::hours(3));
        let MarkOutcome::AlreadyMarked { identity, entry: earlier } = &second else {
            panic!("expected AlreadyMarked, got {second:?}");
        };
        assert_eq!(identity.id, "E1");
        assert_eq!(earlier, entry);

        assert_eq!(store.list_entries().unwrap().len(), 1);
    }

    #[test]
    fn test_marks_again_next_day() {
        let v = sig_at(0, 0.3);
        let mut store = MemoryStore::new();
        store.add(record("E1", "Alice", v.clone())).unwrap();

        assert!(mark(&mut store, Some(&v), morning()).is_marked());
        assert!(mark(&mut store, Some(&v), morning() + chrono::Duration::days(1)).is_marked());
        assert_eq!(store.list_entries().unwrap().len(), 2);
    }

    #[test]
    fn test_no_enrollments_regardless_of_probe() {
        let mut store = MemoryStore::new();
        assert_eq!(
            mark(&mut store, Some(&sig_at(0, 0.0)), morning()),
            MarkOutcome::NoEnrollments
        );
        assert_eq!(mark(&mut store, None, morning()), MarkOutcome::NoEnrollments);
    }

    #[test]
    fn test_no_face_detected() {
        let mut store = MemoryStore::new();
        store.add(record("E1", "Alice", sig_at(0, 0.0))).unwrap();
        assert_eq!(mark(&mut store, None, morning()), MarkOutcome::NoFaceDetected);
        assert!(store.list_entries().unwrap().is_empty());
    }

    #[test]
    fn test_far_probe_is_no_match() {
        let mut store = MemoryStore::new();
        store.add(record("E1", "Alice", sig_at(0, 0.0))).unwrap();

        let outcome = mark(&mut store, Some(&sig_at(0, 0.8)), morning());
        let MarkOutcome::NoMatch { best_distance } = outcome else {
            panic!("expected NoMatch, got {outcome:?}");
        };
        assert!((best_distance.unwrap() - 0.8).abs() < 1e-6);
        assert!(store.list_entries().unwrap().is_empty());
    }

    #[test]
    fn test_every_record_at_or_beyond_threshold() {
        let mut store = MemoryStore::new();
        store.add(record("E1", "Alice", sig_at(0, 0.6))).unwrap();
        store.add(record("E2", "Bob", sig_at(1, 0.7))).unwrap();
        store.add(record("E3", "Carol", sig_at(2, 2.0))).unwrap();

        let outcome = mark(&mut store, Some(&sig_at(0, 0.0)), morning());
        assert!(matches!(outcome, MarkOutcome::NoMatch { .. }));
    }

    #[test]
    fn test_unique_minimum_is_chosen() {
        let mut store = MemoryStore::new();
        store.add(record("E1", "Alice", sig_at(0, 0.5))).unwrap();
        store.add(record("E2", "Bob", sig_at(1, 0.2))).unwrap();
        store.add(record("E3", "Carol", sig_at(2, 0.4))).unwrap();

        let outcome = mark(&mut store, Some(&sig_at(0, 0.0)), morning());
        assert_eq!(outcome.identity().map(|i| i.id.as_str()), Some("E2"));
    }

    #[test]
    fn test_dedup_is_per_identity() {
        let mut store = MemoryStore::new();
        let alice = sig_at(0, 1.0);
        let bob = sig_at(1, 1.0);
        store.add(record("E1", "Alice", alice.clone())).unwrap();
        store.add(record("E2", "Bob", bob.clone())).unwrap();

        assert!(mark(&mut store, Some(&alice), morning()).is_marked());
        assert!(mark(&mut store, Some(&bob), morning()).is_marked());
        assert_eq!(store.list_entries().unwrap().len(), 2);
    }

    #[test]
    fn test_enroll_no_face_leaves_store_untouched() {
        let mut store = MemoryStore::new();
        store.add(record("E1", "Alice", sig_at(0, 0.0))).unwrap();

        let outcome = enroll(&mut store, Some("E2".into()), "Bob", None).unwrap();
        assert_eq!(outcome, EnrollOutcome::NoFaceDetected);
        assert_eq!(store.list_enrolled().unwrap().len(), 1);
    }

    #[test]
    fn test_enroll_rejects_duplicate_id() {
        let mut store = MemoryStore::new();
        enroll(&mut store, Some("E1".into()), "Alice", Some(sig_at(0, 0.0))).unwrap();
        let err = enroll(&mut store, Some("E1".into()), "Bob", Some(sig_at(1, 0.0))).unwrap_err();
        assert!(matches!(err, EnrollError::Store(StoreError::DuplicateId(_))));
    }

    #[test]
    fn test_outcome_messages() {
        let identity = Identity {
            id: "E1".into(),
            name: "Alice".into(),
        };
        let entry = AttendanceEntry::new("E1", "Alice", morning());
        let marked = MarkOutcome::Marked {
            identity: identity.clone(),
            entry: entry.clone(),
            distance: 0.1,
        };
        assert_eq!(marked.to_string(), "attendance marked for Alice");
        let again = MarkOutcome::AlreadyMarked { identity, entry };
        assert_eq!(again.to_string(), "Alice has already marked attendance today");
    }
}
