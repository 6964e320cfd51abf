//! Line-oriented control loop for the console binary.

use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info};

use redub_queue::PipelineScheduler;

use crate::aggregator::render_status;
use crate::collector::{CollectorReply, SessionCollector, SessionStage};
use crate::error::WorkerResult;
use crate::transport::Transport;

/// One parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Start,
    /// Administrative kill switch: clear the queue, stop the running job.
    Cancel,
    Status,
    Input(String),
}

pub fn parse_line(line: &str) -> Option<ConsoleCommand> {
    let line = line.trim();
    match line {
        "" => None,
        "/start" => Some(ConsoleCommand::Start),
        "/cancel" => Some(ConsoleCommand::Cancel),
        "/status" => Some(ConsoleCommand::Status),
        other => Some(ConsoleCommand::Input(other.to_string())),
    }
}

fn looks_like_link(text: &str) -> bool {
    text.contains("://")
}

/// Console submitter session wired to the scheduler.
pub struct ConsoleSession {
    submitter: String,
    collector: SessionCollector,
    scheduler: PipelineScheduler,
    transport: Arc<dyn Transport>,
}

impl ConsoleSession {
    pub fn new(
        submitter: impl Into<String>,
        collector: SessionCollector,
        scheduler: PipelineScheduler,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            submitter: submitter.into(),
            collector,
            scheduler,
            transport,
        }
    }

    /// Read commands until EOF.
    pub async fn run<R: AsyncBufRead + Unpin>(&mut self, reader: R) -> WorkerResult<()> {
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            self.handle_line(&line).await?;
        }
        debug!("Console input closed");
        Ok(())
    }

    pub async fn handle_line(&mut self, line: &str) -> WorkerResult<()> {
        let Some(command) = parse_line(line) else {
            return Ok(());
        };

        let reply = match command {
            ConsoleCommand::Start => self.collector.start(&self.submitter),
            ConsoleCommand::Cancel => {
                let discarded = self.scheduler.cancel_all();
                info!(discarded, "Operator cancelled all jobs");
                format!("🛑 Queue cleared ({} waiting job(s) discarded), running job stopped.", discarded)
            }
            ConsoleCommand::Status => self.status_text(),
            ConsoleCommand::Input(text) => self.handle_input(&text).await?,
        };

        self.transport.notify(&self.submitter, &reply).await
    }

    async fn handle_input(&mut self, text: &str) -> WorkerResult<String> {
        let reply = match self.collector.stage(&self.submitter) {
            Some(SessionStage::AwaitingMap) => {
                let path = Path::new(text);
                let file_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                if !path.is_file() {
                    return Ok(format!("❌ No such file: {}", text));
                }
                self.collector
                    .submit_map(&self.submitter, &file_name, path)
                    .await?
            }
            Some(SessionStage::AwaitingVideo { .. }) if looks_like_link(text) => {
                self.collector.submit_link(&self.submitter, text)
            }
            Some(SessionStage::AwaitingVideo { .. }) => {
                if !Path::new(text).is_file() {
                    return Ok(format!(
                        "❌ No such file: {}. Send a video path or an http(s) link.",
                        text
                    ));
                }
                self.collector.submit_media(&self.submitter, text)
            }
            _ => self.collector.submit_name(&self.submitter, text),
        };

        Ok(match reply {
            CollectorReply::Prompt(text) | CollectorReply::Rejected(text) => text,
            CollectorReply::Ready(job) => {
                let name = job.output_name.clone();
                let position = self.scheduler.enqueue(job);
                if position == 1 && !self.scheduler.is_processing() {
                    format!("📥 {} queued, starting now.", name)
                } else {
                    format!("📥 {} queued at position {}.", name, position)
                }
            }
        })
    }

    fn status_text(&self) -> String {
        let status = self.scheduler.status();
        let mut text = format!("📋 {} job(s) waiting", status.queued);
        match (status.current, status.progress) {
            (Some(job_id), Some(progress)) if !progress.status_text.is_empty() => {
                text.push_str(&format!("\n▶️ {}\n{}", job_id, render_status(&progress)));
            }
            (Some(job_id), _) => text.push_str(&format!("\n▶️ {}", job_id)),
            (None, _) => text.push_str("\nNo job running."),
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use redub_media::TransferObserver;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        replies: Mutex<Vec<String>>,
    }

    impl Recording {
        fn last(&self) -> String {
            self.replies.lock().unwrap().last().cloned().unwrap_or_default()
        }
    }

    #[async_trait]
    impl Transport for Recording {
        async fn notify(&self, _handle: &str, text: &str) -> WorkerResult<()> {
            self.replies.lock().unwrap().push(text.to_string());
            Ok(())
        }

        async fn deliver(
            &self,
            _destination: &str,
            _file: &Path,
            _thumbnail: Option<&Path>,
            _caption: &str,
            _progress: &dyn TransferObserver,
        ) -> WorkerResult<()> {
            Ok(())
        }

        async fn fetch_media(
            &self,
            _handle: &str,
            _dest: &Path,
            _progress: &dyn TransferObserver,
        ) -> WorkerResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_parse_line() {
        assert_eq!(parse_line("  /start "), Some(ConsoleCommand::Start));
        assert_eq!(parse_line("/cancel"), Some(ConsoleCommand::Cancel));
        assert_eq!(parse_line("/status"), Some(ConsoleCommand::Status));
        assert_eq!(parse_line(""), None);
        assert_eq!(
            parse_line("my video"),
            Some(ConsoleCommand::Input("my video".to_string()))
        );
    }

    #[tokio::test]
    async fn test_console_flow_enqueues_and_cancels() {
        let dir = tempfile::tempdir().unwrap();
        let map = dir.path().join("segments.json");
        tokio::fs::write(&map, "[]").await.unwrap();

        let transport = Arc::new(Recording::default());
        let scheduler = PipelineScheduler::new();
        let mut session = ConsoleSession::new(
            "console",
            SessionCollector::new(dir.path().join("inbox")),
            scheduler.clone(),
            transport.clone(),
        );

        let script = format!(
            "/start\n{}\nhttps://cdn.example.com/video.mp4\nFinal Cut\n/status\n",
            map.display()
        );
        session.run(script.as_bytes()).await.unwrap();

        assert_eq!(scheduler.queue_len(), 1);
        let replies = transport.replies.lock().unwrap().clone();
        assert!(replies.iter().any(|r| r.contains("Final_Cut.mp4 queued")));
        assert!(transport.last().contains("1 job(s) waiting"));

        session.handle_line("/cancel").await.unwrap();
        assert_eq!(scheduler.queue_len(), 0);
        assert!(transport.last().contains("1 waiting job(s) discarded"));
    }

    #[tokio::test]
    async fn test_missing_paths_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(Recording::default());
        let mut session = ConsoleSession::new(
            "console",
            SessionCollector::new(dir.path()),
            PipelineScheduler::new(),
            transport.clone(),
        );

        session.handle_line("/start").await.unwrap();
        session.handle_line("/nonexistent/map.json").await.unwrap();
        assert!(transport.last().contains("No such file"));
    }

    #[tokio::test]
    async fn test_input_before_start_asks_for_start() {
        let transport = Arc::new(Recording::default());
        let mut session = ConsoleSession::new(
            "console",
            SessionCollector::new("/tmp/unused"),
            PipelineScheduler::new(),
            transport.clone(),
        );

        session.handle_line("hello").await.unwrap();
        assert!(transport.last().contains("/start"));
    }
}
