//! Job definitions for queue processing.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ModelError, ModelResult};

/// Unique identifier for a job, derived from submitter and submission time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Build an id from the submitter and submission timestamp.
    pub fn derive(submitter: &str, submitted_at: DateTime<Utc>) -> Self {
        let who: String = submitter
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        let who = if who.is_empty() { "anon".to_string() } else { who };
        Self(format!("{}_{}", who, submitted_at.timestamp_micros()))
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where the source video comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum VideoSource {
    /// Fetched by the resilient downloader.
    RemoteLink(Url),
    /// Fetched through the transport from an opaque media handle.
    InboundMedia(String),
}

impl VideoSource {
    pub fn describe(&self) -> &'static str {
        match self {
            VideoSource::RemoteLink(_) => "remote link",
            VideoSource::InboundMedia(_) => "inbound media",
        }
    }
}

/// One end-to-end render request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,

    pub video_source: VideoSource,

    /// Segment map already persisted by the collector
    pub map_path: PathBuf,

    /// Sanitized destination basename, `.mp4` included
    pub output_name: String,

    pub submitter: String,

    /// Where terminal messages and deliveries go
    pub notify_target: String,

    /// Message handle used for progress text
    pub status_handle: String,

    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn new(
        submitter: impl Into<String>,
        video_source: VideoSource,
        map_path: impl Into<PathBuf>,
        output_name: impl Into<String>,
    ) -> Self {
        let submitter = submitter.into();
        let created_at = Utc::now();
        Self {
            id: JobId::derive(&submitter, created_at),
            video_source,
            map_path: map_path.into(),
            output_name: output_name.into(),
            notify_target: submitter.clone(),
            status_handle: submitter.clone(),
            submitter,
            created_at,
        }
    }

    pub fn with_notify_target(mut self, target: impl Into<String>) -> Self {
        self.notify_target = target.into();
        self
    }

    pub fn with_status_handle(mut self, handle: impl Into<String>) -> Self {
        self.status_handle = handle.into();
        self
    }
}

/// Turn a user-supplied name into a safe `.mp4` basename.
///
/// Spaces become `_`, path separators are dropped.
pub fn sanitize_output_name(raw: &str) -> ModelResult<String> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| *c != '/' && *c != '\\' && !c.is_control())
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect();

    let stem = cleaned
        .strip_suffix(".mp4")
        .unwrap_or(&cleaned)
        .trim_matches('.');
    if stem.is_empty() {
        return Err(ModelError::InvalidName(raw.to_string()));
    }

    Ok(format!("{}.mp4", stem))
}

/// Accept only absolute `http`/`https` links.
pub fn validate_link(raw: &str) -> ModelResult<Url> {
    let url = Url::parse(raw.trim()).map_err(|e| ModelError::InvalidLink(e.to_string()))?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(url),
        scheme => Err(ModelError::InvalidLink(format!(
            "unsupported scheme '{}'",
            scheme
        ))),
    }
}
