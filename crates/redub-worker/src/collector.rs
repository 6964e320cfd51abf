//! Per-submitter request collection.
//!
//! A submitter supplies three things in order (map, video, output name)
//! and gets a [`Job`] back once all of them are present.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info};

use redub_models::{sanitize_output_name, validate_link, Job, VideoSource};

use crate::error::WorkerResult;

/// Where a submitter is in the request flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStage {
    AwaitingMap,
    AwaitingVideo { map_path: PathBuf },
    AwaitingName { map_path: PathBuf, source: VideoSource },
    Submitted,
}

/// Result of feeding one input to the collector.
#[derive(Debug)]
pub enum CollectorReply {
    /// Input accepted, ask for the next one.
    Prompt(String),
    /// Input refused, stage unchanged.
    Rejected(String),
    /// Request complete.
    Ready(Job),
}

pub const START_PROMPT: &str = "👋 Send the segment map (.json file).";
const VIDEO_PROMPT: &str = "✅ Map received. Now send the video file or an http(s) link.";
const NAME_PROMPT: &str = "✅ Video received. What should the output be called?";
const NOT_STARTED: &str = "Send /start to begin a new request.";

/// Volatile session table, keyed by submitter.
#[derive(Debug)]
pub struct SessionCollector {
    inbox_dir: PathBuf,
    sessions: HashMap<String, SessionStage>,
}

impl SessionCollector {
    pub fn new(inbox_dir: impl Into<PathBuf>) -> Self {
        Self {
            inbox_dir: inbox_dir.into(),
            sessions: HashMap::new(),
        }
    }

    /// Current stage, `None` when the submitter never ran `/start`.
    pub fn stage(&self, submitter: &str) -> Option<&SessionStage> {
        self.sessions.get(submitter)
    }

    /// Begin (or restart) a request.
    pub fn start(&mut self, submitter: &str) -> String {
        self.sessions
            .insert(submitter.to_string(), SessionStage::AwaitingMap);
        debug!(submitter, "Session started");
        START_PROMPT.to_string()
    }

    /// Accept the map document at `source`, copying it into the inbox.
    pub async fn submit_map(
        &mut self,
        submitter: &str,
        file_name: &str,
        source: &Path,
    ) -> WorkerResult<CollectorReply> {
        match self.sessions.get(submitter) {
            Some(SessionStage::AwaitingMap) => {}
            Some(_) => return Ok(CollectorReply::Rejected("A map was already received.".to_string())),
            None => return Ok(CollectorReply::Rejected(NOT_STARTED.to_string())),
        }

        if !file_name.to_ascii_lowercase().ends_with(".json") {
            return Ok(CollectorReply::Rejected(
                "❌ The map must be a .json file.".to_string(),
            ));
        }

        tokio::fs::create_dir_all(&self.inbox_dir).await?;
        let stored = self.inbox_dir.join(format!(
            "{}_{}_map.json",
            safe_prefix(submitter),
            Utc::now().timestamp_micros()
        ));
        tokio::fs::copy(source, &stored).await?;
        info!(submitter, map = %stored.display(), "Map persisted");

        self.sessions.insert(
            submitter.to_string(),
            SessionStage::AwaitingVideo { map_path: stored },
        );
        Ok(CollectorReply::Prompt(VIDEO_PROMPT.to_string()))
    }

    /// Accept a remote link as the video source.
    pub fn submit_link(&mut self, submitter: &str, raw: &str) -> CollectorReply {
        match validate_link(raw) {
            Ok(url) => self.accept_video(submitter, VideoSource::RemoteLink(url)),
            Err(_) => {
                if !matches!(self.sessions.get(submitter), Some(SessionStage::AwaitingVideo { .. })) {
                    return self.wrong_stage(submitter);
                }
                CollectorReply::Rejected(
                    "❌ Invalid link. It must start with http:// or https://".to_string(),
                )
            }
        }
    }

    /// Accept media uploaded through the transport.
    pub fn submit_media(&mut self, submitter: &str, handle: &str) -> CollectorReply {
        self.accept_video(submitter, VideoSource::InboundMedia(handle.to_string()))
    }

    fn accept_video(&mut self, submitter: &str, source: VideoSource) -> CollectorReply {
        let Some(SessionStage::AwaitingVideo { map_path }) = self.sessions.get(submitter) else {
            return self.wrong_stage(submitter);
        };
        let map_path = map_path.clone();
        debug!(submitter, source = source.describe(), "Video source received");
        self.sessions.insert(
            submitter.to_string(),
            SessionStage::AwaitingName { map_path, source },
        );
        CollectorReply::Prompt(NAME_PROMPT.to_string())
    }

    /// Accept the output name and complete the request.
    pub fn submit_name(&mut self, submitter: &str, raw: &str) -> CollectorReply {
        let Some(SessionStage::AwaitingName { .. }) = self.sessions.get(submitter) else {
            return self.wrong_stage(submitter);
        };

        let output_name = match sanitize_output_name(raw) {
            Ok(name) => name,
            Err(_) => return CollectorReply::Rejected("❌ Please send a non-empty name.".to_string()),
        };

        let Some(SessionStage::AwaitingName { map_path, source }) = self
            .sessions
            .insert(submitter.to_string(), SessionStage::Submitted)
        else {
            return self.wrong_stage(submitter);
        };

        let job = Job::new(submitter, source, map_path, output_name);
        info!(submitter, job_id = %job.id, output = %job.output_name, "Request complete");
        CollectorReply::Ready(job)
    }

    fn wrong_stage(&self, submitter: &str) -> CollectorReply {
        let hint = match self.sessions.get(submitter) {
            None | Some(SessionStage::Submitted) => NOT_STARTED,
            Some(SessionStage::AwaitingMap) => START_PROMPT,
            Some(SessionStage::AwaitingVideo { .. }) => VIDEO_PROMPT,
            Some(SessionStage::AwaitingName { .. }) => NAME_PROMPT,
        };
        CollectorReply::Rejected(hint.to_string())
    }
}

fn safe_prefix(submitter: &str) -> String {
    let cleaned: String = submitter
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "anon".to_string()
    } else {
        cleaned
    }
}
