use chrono::{DateTime, NaiveDate, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Dimensionality of signatures produced by the embedding model.
pub const SIGNATURE_DIM: usize = 128;

/// Euclidean distance below which two signatures are the same person.
pub const DISTANCE_THRESHOLD: f32 = 0.6;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SignatureError {
    #[error("expected {SIGNATURE_DIM}-dim signature, got {0}")]
    Dimension(usize),
    #[error("signature component {index} is not finite")]
    NonFinite { index: usize },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordError {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },
    #[error("{field} contains a delimiter character: {value:?}")]
    Delimiter { field: &'static str, value: String },
}

/// Face signature: a fixed-length vector from the embedding model.
///
/// Construction rejects vectors of the wrong length, so two signatures
/// can always be compared component by component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct Signature(Vec<f32>);

impl Signature {
    pub fn new(values: Vec<f32>) -> Result<Self, SignatureError> {
        if values.len() != SIGNATURE_DIM {
            return Err(SignatureError::Dimension(values.len()));
        }
        if let Some(index) = values.iter().position(|v| !v.is_finite()) {
            return Err(SignatureError::NonFinite { index });
        }
        Ok(Self(values))
    }

    pub fn values(&self) -> &[f32] {
        &self.0
    }

    /// Euclidean distance between two signatures.
    pub fn distance(&self, other: &Signature) -> f32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Little-endian byte encoding, 4 bytes per component.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.0.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    pub fn from_le_bytes(bytes: &[u8]) -> Result<Self, SignatureError> {
        if bytes.len() % 4 != 0 {
            return Err(SignatureError::Dimension(bytes.len() / 4));
        }
        let values = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Self::new(values)
    }
}

impl TryFrom<Vec<f32>> for Signature {
    type Error = SignatureError;

    fn try_from(values: Vec<f32>) -> Result<Self, Self::Error> {
        Self::new(values)
    }
}

impl From<Signature> for Vec<f32> {
    fn from(sig: Signature) -> Self {
        sig.0
    }
}

/// An enrolled person.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub id: String,
    pub name: String,
    pub signature: Signature,
}

impl IdentityRecord {
    /// Build a record, generating a UUID when no id is supplied.
    pub fn new(
        id: Option<String>,
        name: impl Into<String>,
        signature: Signature,
    ) -> Result<Self, RecordError> {
        let id = match id {
            Some(id) => id.trim().to_string(),
            None => uuid::Uuid::new_v4().to_string(),
        };
        let name = name.into().trim().to_string();
        check_field("id", &id)?;
        check_field("name", &name)?;
        Ok(Self {
            id,
            name,
            signature,
        })
    }
}

// Entries are exported as undelimited CSV, so ids and names must not
// contain separators.
pub(crate) fn check_field(field: &'static str, value: &str) -> Result<(), RecordError> {
    if value.is_empty() {
        return Err(RecordError::Empty { field });
    }
    if value.contains([',', '\n', '\r']) {
        return Err(RecordError::Delimiter {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// One identity marked present on one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceEntry {
    pub id: String,
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub date: NaiveDate,
}

impl AttendanceEntry {
    /// Create an entry stamped at `now`, truncated to milliseconds so the
    /// ISO-8601 text form round-trips exactly.
    pub fn new(id: impl Into<String>, name: impl Into<String>, now: DateTime<Utc>) -> Self {
        let timestamp = now.trunc_subsecs(3);
        Self {
            id: id.into(),
            name: name.into(),
            timestamp,
            date: timestamp.date_naive(),
        }
    }

    /// ISO-8601 instant, e.g. `2025-03-04T08:15:30.250Z`.
    pub fn timestamp_iso(&self) -> String {
        format_timestamp(&self.timestamp)
    }

    /// ISO-8601 calendar day, e.g. `2025-03-04`.
    pub fn date_iso(&self) -> String {
        self.date.format("%Y-%m-%d").to_string()
    }
}

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Result of comparing a probe signature against the enrolled gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    /// Distance to the closest record (`None` for an empty gallery).
    pub distance: Option<f32>,
    /// Gallery index of the matched record (if any).
    pub index: Option<usize>,
}

/// Strategy for comparing a probe signature against a gallery of enrolled faces.
pub trait Matcher {
    fn compare(&self, probe: &Signature, gallery: &[IdentityRecord], threshold: f32) -> MatchResult;
}

/// Nearest-neighbour matcher over Euclidean distance.
///
/// Scans every record and keeps the global minimum; the minimum is accepted
/// only when strictly below `threshold`. Equal distances keep the earlier
/// record.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(&self, probe: &Signature, gallery: &[IdentityRecord], threshold: f32) -> MatchResult {
        let mut best: Option<(usize, f32)> = None;

        for (i, record) in gallery.iter().enumerate() {
            let dist = probe.distance(&record.signature);
            match best {
                Some((_, best_dist)) if dist >= best_dist => {}
                _ => best = Some((i, dist)),
            }
        }

        match best {
            Some((idx, dist)) if dist < threshold => MatchResult {
                matched: true,
                distance: Some(dist),
                index: Some(idx),
            },
            _ => MatchResult {
                matched: false,
                distance: best.map(|(_, d)| d),
                index: None,
            },
        }
    }
}
