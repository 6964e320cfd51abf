//! Batch rendering (Phase B).
//!
//! Renderable segments are split into fixed-size contiguous batches. Each batch
//! is rendered by a single FFmpeg invocation: the source video is opened once
//! over the window the batch covers, every clip is cut from it and fitted to
//! its narration, the narration replaces the original audio, and the clips are
//! concatenated in map order into one intermediate file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use redub_models::{CancelToken, EncodingConfig, ProgressSink, Segment};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::fit::{plan_fit, ClipPlan, FitThresholds};
use crate::probe::probe_duration;

/// Default number of segments per batch.
pub const DEFAULT_BATCH_SIZE: usize = 10;

const AUDIO_FORMAT: &str = "aformat=sample_rates=44100:channel_layouts=stereo";

/// Renderer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderSettings {
    pub batch_size: usize,
    pub thresholds: FitThresholds,
    pub encoding: EncodingConfig,
    /// Per-batch encode timeout
    pub timeout_secs: Option<u64>,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            thresholds: FitThresholds::default(),
            encoding: EncodingConfig::default(),
            timeout_secs: None,
        }
    }
}

/// A segment whose narration has been synthesized.
#[derive(Debug, Clone)]
pub struct RenderableSegment {
    pub segment: Segment,
    pub audio_path: PathBuf,
}

/// A contiguous slice of renderable segments.
#[derive(Debug, Clone, Copy)]
pub struct BatchDescriptor<'a> {
    /// Zero-based batch position
    pub index: usize,
    pub segments: &'a [RenderableSegment],
}

/// Drop segments that start past the end of the source and clamp the rest to it.
///
/// A non-positive `source_secs` means the duration is unknown and leaves the
/// segments untouched.
pub fn clamp_to_source(
    segments: Vec<RenderableSegment>,
    source_secs: f64,
    min_clip_secs: f64,
) -> Vec<RenderableSegment> {
    if source_secs <= 0.0 {
        return segments;
    }

    segments
        .into_iter()
        .filter_map(|mut item| {
            let seg = &mut item.segment;
            if seg.start + min_clip_secs > source_secs {
                warn!(segment = %seg.id, start = seg.start, source_secs, "Segment starts past the end of the video, skipping");
                return None;
            }
            if seg.end > source_secs {
                debug!(segment = %seg.id, end = seg.end, source_secs, "Clamping segment to the end of the video");
                seg.end = source_secs;
            }
            Some(item)
        })
        .collect()
}

/// Split into batches of `batch_size`, preserving order.
pub fn partition(segments: &[RenderableSegment], batch_size: usize) -> Vec<BatchDescriptor<'_>> {
    segments
        .chunks(batch_size.max(1))
        .enumerate()
        .map(|(index, segments)| BatchDescriptor { index, segments })
        .collect()
}

/// One clip inside a planned batch.
#[derive(Debug, Clone)]
pub struct PlannedClip {
    pub segment_id: String,
    /// Slice start relative to the batch window
    pub offset: f64,
    pub plan: ClipPlan,
    pub audio_path: PathBuf,
}

/// A batch with durations probed and every clip fitted.
#[derive(Debug, Clone)]
pub struct BatchPlan {
    pub index: usize,
    pub window_start: f64,
    pub window_secs: f64,
    pub clips: Vec<PlannedClip>,
}

impl BatchPlan {
    /// Build from already-known audio durations. Unfittable clips are dropped.
    pub fn from_durations(
        index: usize,
        items: &[(&RenderableSegment, f64)],
        thresholds: &FitThresholds,
    ) -> Option<Self> {
        let fitted: Vec<(&RenderableSegment, ClipPlan)> = items
            .iter()
            .filter_map(|(item, audio_secs)| {
                match plan_fit(item.segment.duration(), *audio_secs, thresholds) {
                    Ok(plan) => Some((*item, plan)),
                    Err(reason) => {
                        warn!(segment = %item.segment.id, %reason, "Skipping clip");
                        None
                    }
                }
            })
            .collect();

        if fitted.is_empty() {
            return None;
        }

        let window_start = fitted
            .iter()
            .map(|(item, _)| item.segment.start)
            .fold(f64::INFINITY, f64::min);
        let window_end = fitted
            .iter()
            .map(|(item, _)| item.segment.end)
            .fold(f64::NEG_INFINITY, f64::max);

        let clips = fitted
            .into_iter()
            .map(|(item, plan)| PlannedClip {
                segment_id: item.segment.id.clone(),
                offset: item.segment.start - window_start,
                plan,
                audio_path: item.audio_path.clone(),
            })
            .collect();

        Some(Self {
            index,
            window_start,
            window_secs: window_end - window_start,
            clips,
        })
    }

    /// Probe narration durations and fit every clip of a batch.
    ///
    /// Clips whose audio cannot be probed are dropped. Returns `None` when
    /// nothing usable is left.
    pub async fn probe(batch: &BatchDescriptor<'_>, thresholds: &FitThresholds) -> Option<Self> {
        let mut items = Vec::with_capacity(batch.segments.len());
        for item in batch.segments {
            match probe_duration(&item.audio_path).await {
                Ok(secs) => items.push((item, secs)),
                Err(e) => warn!(segment = %item.segment.id, error = %e, "Audio probe failed, skipping clip"),
            }
        }
        Self::from_durations(batch.index, &items, thresholds)
    }

    /// Rendered length of the batch in seconds.
    pub fn output_secs(&self) -> f64 {
        self.clips.iter().map(|c| c.plan.output_secs()).sum()
    }

    /// Complete `-filter_complex` graph. Input 0 is the source window,
    /// inputs `1..=n` are the narration files in clip order.
    pub fn filter_graph(&self) -> String {
        let n = self.clips.len();
        let mut chains = Vec::with_capacity(n * 2 + 2);

        if n == 1 {
            chains.push("[0:v]null[src0]".to_string());
        } else {
            let outs: String = (0..n).map(|i| format!("[src{i}]")).collect();
            chains.push(format!("[0:v]split={n}{outs}"));
        }

        for (i, clip) in self.clips.iter().enumerate() {
            chains.push(clip.plan.video_filter(&format!("src{i}"), clip.offset, &format!("v{i}")));
            chains.push(format!("[{}:a]{},asetpts=PTS-STARTPTS[a{i}]", i + 1, AUDIO_FORMAT));
        }

        let pairs: String = (0..n).map(|i| format!("[v{i}][a{i}]")).collect();
        chains.push(format!("{pairs}concat=n={n}:v=1:a=1[outv][outa]"));

        chains.join(";")
    }

    pub fn command(
        &self,
        source: &Path,
        output: &Path,
        encoding: &EncodingConfig,
    ) -> FfmpegCommand {
        let mut cmd = FfmpegCommand::new(source, output)
            .seek(self.window_start)
            .duration(self.window_secs);
        for clip in &self.clips {
            cmd = cmd.add_input(&clip.audio_path);
        }
        cmd.filter_complex(self.filter_graph())
            .map("[outv]")
            .map("[outa]")
            .encoding(encoding)
            .output_args(["-pix_fmt", "yuv420p"])
    }
}

/// Renders every batch of a job into intermediate files.
pub struct BatchRenderer {
    settings: RenderSettings,
    work_dir: PathBuf,
}

impl BatchRenderer {
    pub fn new(settings: RenderSettings, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            settings,
            work_dir: work_dir.into(),
        }
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    /// Intermediate files live in their own directory so no output name can
    /// alias one.
    fn artifact_dir(&self) -> PathBuf {
        self.work_dir.join("batches")
    }

    fn artifact_path(&self, index: usize) -> PathBuf {
        self.artifact_dir().join(format!("batch_{:03}.mp4", index))
    }

    /// Render all batches in order, returning the intermediate artifacts.
    ///
    /// Empty batches are omitted. Fails with [`MediaError::NothingRendered`]
    /// when no batch produced output; already written artifacts are removed
    /// on any failure.
    pub async fn render_all(
        &self,
        source: &Path,
        segments: &[RenderableSegment],
        cancel: &CancelToken,
        sink: Arc<dyn ProgressSink>,
    ) -> MediaResult<Vec<PathBuf>> {
        let batches = partition(segments, self.settings.batch_size);
        let total_batches = batches.len();
        info!(segments = segments.len(), batches = total_batches, "Starting batch render");

        let mut plans = Vec::with_capacity(total_batches);
        for batch in &batches {
            if cancel.is_cancelled() {
                return Err(MediaError::Cancelled);
            }
            match BatchPlan::probe(batch, &self.settings.thresholds).await {
                Some(plan) => plans.push(plan),
                None => warn!(batch = batch.index + 1, "Batch has no usable clips, omitting"),
            }
        }

        if plans.is_empty() {
            return Err(MediaError::NothingRendered);
        }
        tokio::fs::create_dir_all(self.artifact_dir()).await?;

        let total_secs: f64 = plans.iter().map(BatchPlan::output_secs).sum();
        let mut done_secs = 0.0;
        let mut artifacts = Vec::with_capacity(plans.len());

        for plan in &plans {
            let result = self
                .render_one(source, plan, total_batches, done_secs, total_secs, cancel, sink.clone())
                .await;
            match result {
                Ok(path) => {
                    done_secs += plan.output_secs();
                    artifacts.push(path);
                }
                Err(e) => {
                    let partial = self.artifact_path(plan.index);
                    remove_quietly(&partial).await;
                    for path in &artifacts {
                        remove_quietly(path).await;
                    }
                    return Err(e);
                }
            }
        }

        Ok(artifacts)
    }

    #[allow(clippy::too_many_arguments)]
    async fn render_one(
        &self,
        source: &Path,
        plan: &BatchPlan,
        total_batches: usize,
        done_secs: f64,
        total_secs: f64,
        cancel: &CancelToken,
        sink: Arc<dyn ProgressSink>,
    ) -> MediaResult<PathBuf> {
        if cancel.is_cancelled() {
            return Err(MediaError::Cancelled);
        }

        let output = self.artifact_path(plan.index);
        let label = format!("Rendering batch {}/{}", plan.index + 1, total_batches);
        sink.report(done_secs, total_secs, &label);

        let cmd = plan.command(source, &output, &self.settings.encoding);
        let mut runner = FfmpegRunner::new().with_cancel(cancel.clone());
        if let Some(secs) = self.settings.timeout_secs {
            runner = runner.with_timeout(secs);
        }

        let started = Instant::now();
        debug!(batch = plan.index + 1, clips = plan.clips.len(), "Encoding batch");

        let batch_secs = plan.output_secs();
        let progress_label = label.clone();
        runner
            .run_with_progress(&cmd, move |progress| {
                let current = done_secs + progress.out_time_secs().min(batch_secs);
                sink.report(current, total_secs, &progress_label);
            })
            .await?;

        let elapsed = started.elapsed();
        metrics::histogram!("redub_batch_encode_seconds").record(elapsed.as_secs_f64());
        info!(
            batch = plan.index + 1,
            clips = plan.clips.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Batch rendered"
        );

        Ok(output)
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove artifact");
        }
    }
}
