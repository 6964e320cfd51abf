//! End-to-end job pipeline.
//!
//! fetch video -> load map -> Phase A synthesis -> Phase B batch render ->
//! Phase C merge -> deliver -> cleanup. Every exit path sends exactly one
//! terminal message to the submitter and removes the job's scratch files.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{info, warn, Instrument};

use redub_media::{
    clamp_to_source, generate_thumbnail, merge_artifacts, probe_video, remove_if_exists, BatchRenderer,
    MediaError, ResilientDownloader, TransferObserver,
};
use redub_models::{
    load_segment_map, validate_records, HealStage, Job, ProgressSink, SharedRunState, VideoSource,
};
use redub_queue::{JobHandler, JobOutcome};

use crate::aggregator::ProgressAggregator;
use crate::config::WorkerConfig;
use crate::error::{JobError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics::record_job;
use crate::synthesis::synthesize_segments;
use crate::transport::Transport;
use crate::tts::SpeechSynthesizer;
use crate::workspace::JobWorkspace;

pub const DONE_MESSAGE: &str = "✨ Job done! Send /start for another one.";
const CRASH_MESSAGE: &str = "❌ Internal error while processing this job.";

/// Forwards transfer and phase progress to the run state and the status handle.
struct StatusReporter<'a> {
    transport: &'a dyn Transport,
    handle: &'a str,
    state: &'a SharedRunState,
}

#[async_trait]
impl<'a> TransferObserver for StatusReporter<'a> {
    async fn on_progress(&self, status_text: String, percent: f64) {
        self.state.set_status(status_text.clone());
        self.state.set_percent(percent);
        if let Err(e) = self.transport.notify(self.handle, &status_text).await {
            warn!(error = %e, "Status update failed");
        }
    }
}

fn ensure_running(state: &SharedRunState) -> Result<(), JobError> {
    if state.is_cancelled() {
        Err(JobError::Cancelled)
    } else {
        Ok(())
    }
}

/// The [`JobHandler`] that re-dubs one video.
pub struct RedubPipeline {
    config: WorkerConfig,
    transport: Arc<dyn Transport>,
    tts: Arc<dyn SpeechSynthesizer>,
    downloader: ResilientDownloader,
}

impl RedubPipeline {
    pub fn new(
        config: WorkerConfig,
        transport: Arc<dyn Transport>,
        tts: Arc<dyn SpeechSynthesizer>,
    ) -> WorkerResult<Self> {
        let downloader = ResilientDownloader::new(config.downloader.to_settings())?;
        Ok(Self {
            config,
            transport,
            tts,
            downloader,
        })
    }

    async fn notify(&self, handle: &str, text: &str) {
        if let Err(e) = self.transport.notify(handle, text).await {
            warn!(handle, error = %e, "Notification failed");
        }
    }

    async fn fetch_video(
        &self,
        job: &Job,
        workspace: &JobWorkspace,
        state: &SharedRunState,
        reporter: &StatusReporter<'_>,
    ) -> Result<PathBuf, JobError> {
        let dest = workspace.input_video();
        match &job.video_source {
            VideoSource::RemoteLink(url) => {
                match self
                    .downloader
                    .download(url, &dest, state.cancel_token(), reporter)
                    .await
                {
                    Some(strategy) => info!(strategy = strategy.as_str(), "Video downloaded"),
                    None if state.is_cancelled() => return Err(JobError::Cancelled),
                    None => return Err(JobError::transfer("every download strategy failed")),
                }
            }
            VideoSource::InboundMedia(handle) => {
                if let Err(e) = self.transport.fetch_media(handle, &dest, reporter).await {
                    ensure_running(state)?;
                    return Err(JobError::input(format!("the video could not be received: {}", e)));
                }
            }
        }
        Ok(dest)
    }

    async fn execute(
        &self,
        job: &Job,
        state: &SharedRunState,
        workspace: &JobWorkspace,
        logger: &JobLogger,
    ) -> Result<(), JobError> {
        let reporter = StatusReporter {
            transport: self.transport.as_ref(),
            handle: &job.status_handle,
            state,
        };

        state.set_status("🚀 Fetching video");
        self.notify(&job.status_handle, "🚀 Job started, fetching video...").await;
        let source = self.fetch_video(job, workspace, state, &reporter).await?;
        ensure_running(state)?;

        let loaded = load_segment_map(&job.map_path).await?;
        if loaded.stage != HealStage::Strict {
            logger.log_warning(&format!("map repaired ({})", loaded.stage.as_str()));
        }
        let (segments, skipped) = validate_records(&loaded.records);
        for skip in &skipped {
            warn!(index = skip.index, segment = %skip.id, reason = %skip.reason, "Skipping segment");
        }
        if segments.is_empty() {
            return Err(JobError::input("the map contains no usable segments"));
        }
        logger.log_progress(&format!(
            "{} segments loaded, {} skipped",
            segments.len(),
            skipped.len()
        ));

        let report = synthesize_segments(
            &segments,
            &workspace.audio_dir(),
            self.tts.as_ref(),
            state,
            self.config.synthesis_report_every,
            &reporter,
        )
        .await?;
        if report.renderable.is_empty() {
            return Err(JobError::Synthesis("no narration could be synthesized".to_string()));
        }
        ensure_running(state)?;

        let info = probe_video(&source).await.map_err(|e| match e {
            MediaError::FfprobeNotFound | MediaError::Cancelled => JobError::from(e),
            other => JobError::input(format!("the video could not be read: {}", other)),
        })?;
        let renderable = clamp_to_source(
            report.renderable,
            info.duration,
            self.config.render.min_clip_secs,
        );
        if renderable.is_empty() {
            return Err(JobError::input("every segment lies past the end of the video"));
        }

        let render_logger = logger.for_phase("render");
        render_logger.log_start(&format!("{} renderable segments", renderable.len()));
        state.set_status("🎬 Rendering");
        let aggregator = ProgressAggregator::spawn(
            state.clone(),
            self.transport.clone(),
            job.status_handle.clone(),
            self.config.aggregator_interval,
        );
        let renderer = BatchRenderer::new(self.config.render.to_settings(), workspace.root());
        let sink: Arc<dyn ProgressSink> = Arc::new(state.clone());
        let rendered = renderer
            .render_all(&source, &renderable, state.cancel_token(), sink)
            .await;
        aggregator.abort();
        let artifacts = rendered?;
        render_logger.log_completion(&format!("{} batches", artifacts.len()));

        state.set_status("🧩 Merging");
        self.notify(&job.status_handle, "🧩 Merging batches...").await;
        let output = workspace.output_path(&job.output_name);
        merge_artifacts(&artifacts, &output, &workspace.manifest_path(), state.cancel_token())
            .await?;
        ensure_running(state)?;

        let thumb = workspace.thumbnail_path();
        let thumbnail = match generate_thumbnail(&output, &thumb).await {
            Ok(()) => Some(thumb.as_path()),
            Err(e) => {
                logger.log_warning(&format!("thumbnail failed: {}", e));
                None
            }
        };

        let caption = format!("{} is ready!", job.output_name.trim_end_matches(".mp4"));
        self.transport
            .deliver(&job.notify_target, &output, thumbnail, &caption, &reporter)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl JobHandler for RedubPipeline {
    async fn handle(&self, job: Job, state: SharedRunState) -> JobOutcome {
        let logger = JobLogger::new(&job.id, "pipeline");
        let span = logger.create_span();

        async {
            let started = Instant::now();
            logger.log_start(&format!(
                "{} -> {}",
                job.video_source.describe(),
                job.output_name
            ));

            let result = match JobWorkspace::create(&self.config.work_dir, &job.id).await {
                Ok(workspace) => {
                    let result = self.execute(&job, &state, &workspace, &logger).await;
                    workspace.cleanup().await;
                    result
                }
                Err(e) => Err(JobError::resource(format!("cannot create workspace: {}", e))),
            };
            remove_if_exists(&job.map_path).await;

            // A failure that raced the kill switch is still a stop.
            let result = result.map_err(|e| if state.is_cancelled() { JobError::Cancelled } else { e });

            let outcome = match result {
                Ok(()) => {
                    logger.log_completion(&job.output_name);
                    self.notify(&job.notify_target, DONE_MESSAGE).await;
                    JobOutcome::Completed
                }
                Err(e) => {
                    if e.is_cancelled() {
                        logger.log_progress("stopped by operator");
                    } else {
                        logger.log_error(&format!("{} ({})", e, e.kind()));
                    }
                    self.notify(&job.notify_target, &e.user_message()).await;
                    if e.is_cancelled() {
                        JobOutcome::Cancelled
                    } else {
                        JobOutcome::Failed(e.to_string())
                    }
                }
            };

            record_job(outcome.as_str(), started.elapsed().as_secs_f64());
            outcome
        }
        .instrument(span)
        .await
    }

    async fn on_crash(&self, job: &Job, reason: &str) {
        JobLogger::new(&job.id, "pipeline").log_error(reason);
        remove_if_exists(&job.map_path).await;
        let _ = tokio::fs::remove_dir_all(self.config.work_dir.join(job.id.as_str())).await;
        self.notify(&job.notify_target, CRASH_MESSAGE).await;
        record_job("failed", 0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::Mutex;

    use crate::error::{WorkerError, WorkerResult};

    #[derive(Default)]
    struct RecordingTransport {
        messages: Mutex<Vec<(String, String)>>,
        delivered: Mutex<Vec<(String, String)>>,
    }

    impl RecordingTransport {
        fn to(&self, handle: &str) -> Vec<String> {
            self.messages
                .lock()
                .unwrap()
                .iter()
                .filter(|(h, _)| h == handle)
                .map(|(_, t)| t.clone())
                .collect()
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn notify(&self, handle: &str, text: &str) -> WorkerResult<()> {
            self.messages
                .lock()
                .unwrap()
                .push((handle.to_string(), text.to_string()));
            Ok(())
        }

        async fn deliver(
            &self,
            destination: &str,
            file: &Path,
            _thumbnail: Option<&Path>,
            caption: &str,
            _progress: &dyn TransferObserver,
        ) -> WorkerResult<()> {
            assert!(file.exists());
            self.delivered
                .lock()
                .unwrap()
                .push((destination.to_string(), caption.to_string()));
            Ok(())
        }

        async fn fetch_media(
            &self,
            handle: &str,
            dest: &Path,
            _progress: &dyn TransferObserver,
        ) -> WorkerResult<()> {
            tokio::fs::copy(handle, dest)
                .await
                .map_err(|e| WorkerError::transport(e.to_string()))?;
            Ok(())
        }
    }

    /// Fails every segment.
    struct BrokenTts;

    #[async_trait]
    impl SpeechSynthesizer for BrokenTts {
        async fn synthesize(&self, _text: &str, _target: &Path) -> WorkerResult<()> {
            Err(WorkerError::synthesis("provider down"))
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        transport: Arc<RecordingTransport>,
        pipeline: RedubPipeline,
    }

    fn fixture(tts: Arc<dyn SpeechSynthesizer>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let mut config = WorkerConfig {
            work_dir: dir.path().join("work"),
            output_dir: dir.path().join("out"),
            inbox_dir: dir.path().join("inbox"),
            ..Default::default()
        };
        config.downloader.aria2_binary = Some(PathBuf::from("/nonexistent/aria2c"));
        let transport = Arc::new(RecordingTransport::default());
        let pipeline = RedubPipeline::new(config, transport.clone(), tts).unwrap();
        Fixture {
            dir,
            transport,
            pipeline,
        }
    }

    async fn job_with(fx: &Fixture, map: &str, source: VideoSource) -> Job {
        let map_path = fx.dir.path().join("map.json");
        tokio::fs::write(&map_path, map).await.unwrap();
        Job::new("alice", source, map_path, "final.mp4").with_status_handle("status")
    }

    async fn local_video(fx: &Fixture) -> VideoSource {
        let video = fx.dir.path().join("upload.mp4");
        tokio::fs::write(&video, b"not really a video").await.unwrap();
        VideoSource::InboundMedia(video.to_string_lossy().into_owned())
    }

    const GOOD_MAP: &str =
        r#"[{"id":"1","start_time":"0:00","end_time":"0:02","explanation_text":"hello"}]"#;

    fn assert_cleaned(fx: &Fixture, job: &Job) {
        assert!(!fx.dir.path().join("work").join(job.id.as_str()).exists());
        assert!(!job.map_path.exists());
    }

    #[tokio::test]
    async fn test_hopeless_map_is_input_error() {
        let fx = fixture(Arc::new(BrokenTts));
        let source = local_video(&fx).await;
        let job = job_with(&fx, r#"[{"start_time": "#, source).await;

        let outcome = fx.pipeline.handle(job.clone(), SharedRunState::new()).await;

        assert!(matches!(outcome, JobOutcome::Failed(_)));
        let terminal = fx.transport.to("alice");
        assert_eq!(terminal.len(), 1);
        assert!(terminal[0].starts_with("❌ Invalid input"));
        assert_cleaned(&fx, &job);
    }

    #[tokio::test]
    async fn test_cancelled_job_reports_stopped() {
        let fx = fixture(Arc::new(BrokenTts));
        let source = local_video(&fx).await;
        let job = job_with(&fx, GOOD_MAP, source).await;
        let state = SharedRunState::new();
        state.cancel();

        let outcome = fx.pipeline.handle(job.clone(), state).await;

        assert_eq!(outcome, JobOutcome::Cancelled);
        let terminal = fx.transport.to("alice");
        assert_eq!(terminal.len(), 1);
        assert!(terminal[0].contains("stopped by operator"));
        assert_cleaned(&fx, &job);
    }

    #[tokio::test]
    async fn test_missing_inbound_media_is_input_error() {
        let fx = fixture(Arc::new(BrokenTts));
        let job = job_with(
            &fx,
            GOOD_MAP,
            VideoSource::InboundMedia("/nonexistent/upload.mp4".to_string()),
        )
        .await;

        let outcome = fx.pipeline.handle(job.clone(), SharedRunState::new()).await;

        assert!(matches!(outcome, JobOutcome::Failed(_)));
        let terminal = fx.transport.to("alice");
        assert_eq!(terminal.len(), 1);
        assert!(terminal[0].contains("Invalid input"));
        assert_cleaned(&fx, &job);
    }

    #[tokio::test]
    async fn test_unreachable_link_is_transfer_error() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fx = fixture(Arc::new(BrokenTts));
        let url = url::Url::parse(&format!("{}/video.mp4", server.uri())).unwrap();
        let job = job_with(&fx, GOOD_MAP, VideoSource::RemoteLink(url)).await;

        let outcome = fx.pipeline.handle(job.clone(), SharedRunState::new()).await;

        assert!(matches!(outcome, JobOutcome::Failed(_)));
        let terminal = fx.transport.to("alice");
        assert_eq!(terminal.len(), 1);
        assert!(terminal[0].contains("Could not fetch the video"));
        assert_cleaned(&fx, &job);
    }

    #[tokio::test]
    async fn test_all_synthesis_failures_end_job() {
        let fx = fixture(Arc::new(BrokenTts));
        let source = local_video(&fx).await;
        let job = job_with(&fx, GOOD_MAP, source).await;

        let outcome = fx.pipeline.handle(job.clone(), SharedRunState::new()).await;

        let JobOutcome::Failed(reason) = outcome else {
            panic!("expected failure");
        };
        assert!(reason.contains("Synthesis"));
        let terminal = fx.transport.to("alice");
        assert_eq!(terminal.len(), 1);
        assert!(terminal[0].contains("Narration failed"));
        assert!(!fx.transport.to("status").is_empty());
        assert_cleaned(&fx, &job);
    }

    #[tokio::test]
    async fn test_crash_notifies_and_cleans() {
        let fx = fixture(Arc::new(BrokenTts));
        let source = local_video(&fx).await;
        let job = job_with(&fx, GOOD_MAP, source).await;

        fx.pipeline.on_crash(&job, "handler panicked").await;

        assert_eq!(fx.transport.to("alice"), vec![CRASH_MESSAGE.to_string()]);
        assert!(!job.map_path.exists());
    }

    /// Writes a sine tone whose length grows with the text.
    struct ToneTts;

    #[async_trait]
    impl SpeechSynthesizer for ToneTts {
        async fn synthesize(&self, text: &str, target: &Path) -> WorkerResult<()> {
            let secs = (text.len() as f64 / 4.0).max(1.0);
            let status = tokio::process::Command::new("ffmpeg")
                .args(["-y", "-loglevel", "error", "-f", "lavfi", "-i"])
                .arg(format!("sine=frequency=440:duration={}", secs))
                .arg(target)
                .status()
                .await?;
            if status.success() {
                Ok(())
            } else {
                Err(WorkerError::synthesis("ffmpeg tone generation failed"))
            }
        }
    }

    #[tokio::test]
    #[ignore = "requires ffmpeg and ffprobe"]
    async fn test_end_to_end_render_and_delivery() {
        let fx = fixture(Arc::new(ToneTts));
        let video = fx.dir.path().join("source.mp4");
        let status = tokio::process::Command::new("ffmpeg")
            .args(["-y", "-loglevel", "error", "-f", "lavfi", "-i", "testsrc=duration=20:size=320x240:rate=24"])
            .arg(&video)
            .status()
            .await
            .unwrap();
        assert!(status.success());

        let map = r#"[
            {"id":"1","start_time":"0:00","end_time":"0:04","explanation_text":"short"},
            {"id":"2","start_time":"0:04","end_time":"0:05","explanation_text":"a rather long narration line"},
            {"id":"3","start_time":"0:06","end_time":"0:06","explanation_text":"bad range"},
            {"id":"4","start_time":"0:08","end_time":"0:12","explanation_text":""}
        ]"#;
        let job = job_with(
            &fx,
            map,
            VideoSource::InboundMedia(video.to_string_lossy().into_owned()),
        )
        .await;

        let outcome = fx.pipeline.handle(job.clone(), SharedRunState::new()).await;

        assert_eq!(outcome, JobOutcome::Completed);
        let delivered = fx.transport.delivered.lock().unwrap().clone();
        assert_eq!(delivered, vec![("alice".to_string(), "final is ready!".to_string())]);
        assert_eq!(fx.transport.to("alice"), vec![DONE_MESSAGE.to_string()]);
        assert_cleaned(&fx, &job);
    }
}
