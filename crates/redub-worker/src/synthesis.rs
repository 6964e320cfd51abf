//! Phase A: narration synthesis.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use redub_media::{RenderableSegment, TransferObserver};
use redub_models::{Segment, SharedRunState};

use crate::error::JobError;
use crate::metrics::record_synthesis;
use crate::tts::SpeechSynthesizer;

/// What Phase A produced.
#[derive(Debug, Default)]
pub struct SynthesisReport {
    /// Segments with audio, in map order
    pub renderable: Vec<RenderableSegment>,
    pub cached: usize,
    pub synthesized: usize,
    pub failed: usize,
}

/// Cache location for one narration stem.
pub fn audio_path(audio_dir: &Path, stem: &str) -> PathBuf {
    audio_dir.join(format!("audio_{}.wav", stem))
}

/// Reserve a cache stem for `segment`. Ids that fold onto an already used
/// stem get their map position appended.
fn claim_stem(used: &mut HashSet<String>, segment: &Segment, index: usize) -> String {
    let base = segment.file_stem();
    let mut stem = base.clone();
    let mut suffix = index;
    while !used.insert(stem.clone()) {
        stem = format!("{}_{}", base, suffix);
        suffix += 1;
    }
    stem
}

async fn is_cached(path: &Path) -> bool {
    matches!(tokio::fs::metadata(path).await, Ok(meta) if meta.is_file() && meta.len() > 0)
}

/// Synthesize narration for every segment, in order.
///
/// Segments whose synthesis fails are dropped from the result. Only
/// cancellation aborts the phase.
pub async fn synthesize_segments(
    segments: &[Segment],
    audio_dir: &Path,
    tts: &dyn SpeechSynthesizer,
    state: &SharedRunState,
    report_every: usize,
    observer: &dyn TransferObserver,
) -> Result<SynthesisReport, JobError> {
    let total = segments.len();
    let report_every = report_every.max(1);
    let mut report = SynthesisReport::default();
    let mut stems = HashSet::with_capacity(total);

    for (index, segment) in segments.iter().enumerate() {
        if state.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        if index % report_every == 0 {
            let text = format!("🎙️ Synthesizing {} of {}", index + 1, total);
            state.set_units(index as u64, total as u64, text.clone());
            observer.on_progress(text, state.snapshot().percent).await;
        }

        if segment.text.trim().is_empty() {
            report.failed += 1;
            continue;
        }

        let stem = claim_stem(&mut stems, segment, index);
        if stem != segment.file_stem() {
            debug!(segment = %segment.id, stem = %stem, "Segment id clashes with an earlier one");
        }
        let target = audio_path(audio_dir, &stem);
        if is_cached(&target).await {
            debug!(segment = %segment.id, "Reusing cached narration");
            report.cached += 1;
        } else {
            match tts.synthesize(&segment.text, &target).await {
                Ok(()) if is_cached(&target).await => report.synthesized += 1,
                Ok(()) => {
                    warn!(segment = %segment.id, "Synthesis produced no audio, excluding segment");
                    let _ = tokio::fs::remove_file(&target).await;
                    report.failed += 1;
                    continue;
                }
                Err(e) => {
                    warn!(segment = %segment.id, error = %e, "Synthesis failed, excluding segment");
                    report.failed += 1;
                    continue;
                }
            }
        }

        report.renderable.push(RenderableSegment {
            segment: segment.clone(),
            audio_path: target,
        });
    }

    state.set_units(total as u64, total as u64, format!("🎙️ Synthesized {} of {}", report.renderable.len(), total));
    record_synthesis((report.synthesized + report.cached) as u64, report.failed as u64);
    info!(
        renderable = report.renderable.len(),
        cached = report.cached,
        synthesized = report.synthesized,
        failed = report.failed,
        "Synthesis phase finished"
    );

    Ok(report)
}
