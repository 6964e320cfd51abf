//! Narration segments.
//!
//! A [`SegmentRecord`] is one raw entry of the map file; a [`Segment`] is a
//! validated record that may be synthesized and rendered.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::timestamp::{parse_range, TimestampError};

/// Raw map entry, tolerant of missing fields and numeric values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SegmentRecord {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub start_time: Option<Value>,
    #[serde(default)]
    pub end_time: Option<Value>,
    #[serde(default)]
    pub explanation_text: Option<String>,
    /// Set when the entry could not be read as a record at all.
    #[serde(skip)]
    pub malformed: Option<String>,
}

/// One validated narration unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub id: String,
    /// Source start, seconds
    pub start: f64,
    /// Source end, seconds
    pub end: f64,
    pub text: String,
}

/// Why a record was left out of the render.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    Malformed(String),
    MissingTimestamp,
    BadTimestamp(TimestampError),
    EmptyText,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::Malformed(detail) => write!(f, "malformed entry: {}", detail),
            SkipReason::MissingTimestamp => write!(f, "missing timestamp"),
            SkipReason::BadTimestamp(e) => write!(f, "{}", e),
            SkipReason::EmptyText => write!(f, "empty narration text"),
        }
    }
}

/// A record that did not survive validation.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedRecord {
    pub index: usize,
    pub id: String,
    pub reason: SkipReason,
}

fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl SegmentRecord {
    /// Placeholder for an entry that failed to deserialize. It keeps the
    /// entry's position so validation reports it as skipped.
    pub fn malformed(detail: impl Into<String>) -> Self {
        Self {
            malformed: Some(detail.into()),
            ..Self::default()
        }
    }

    /// Identifier, falling back to the positional index.
    pub fn resolved_id(&self, index: usize) -> String {
        self.id
            .as_ref()
            .and_then(value_as_text)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| index.to_string())
    }

    /// Validate into a renderable [`Segment`].
    pub fn validate(&self, index: usize) -> Result<Segment, SkipReason> {
        if let Some(detail) = &self.malformed {
            return Err(SkipReason::Malformed(detail.clone()));
        }
        let start = self.start_time.as_ref().and_then(value_as_text);
        let end = self.end_time.as_ref().and_then(value_as_text);
        let (Some(start), Some(end)) = (start, end) else {
            return Err(SkipReason::MissingTimestamp);
        };

        let (start, end) = parse_range(&start, &end).map_err(SkipReason::BadTimestamp)?;

        let text = self
            .explanation_text
            .as_deref()
            .map(str::trim)
            .unwrap_or_default();
        if text.is_empty() {
            return Err(SkipReason::EmptyText);
        }

        Ok(Segment {
            id: self.resolved_id(index),
            start,
            end,
            text: text.to_string(),
        })
    }
}

impl Segment {
    /// Source slice duration in seconds.
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// Filesystem-safe form of the id.
    pub fn file_stem(&self) -> String {
        self.id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }
}

/// Validate records in map order, splitting them into usable segments and skips.
pub fn validate_records(records: &[SegmentRecord]) -> (Vec<Segment>, Vec<SkippedRecord>) {
    let mut segments = Vec::with_capacity(records.len());
    let mut skipped = Vec::new();

    for (index, record) in records.iter().enumerate() {
        match record.validate(index) {
            Ok(segment) => segments.push(segment),
            Err(reason) => skipped.push(SkippedRecord {
                index,
                id: record.resolved_id(index),
                reason,
            }),
        }
    }

    (segments, skipped)
}
