//! Fitting a source slice to its narration audio.
//!
//! With `ratio = audio / slice`:
//! - `ratio <= 1.0`: play the slice and cut it at the audio length
//! - `ratio <= speed_limit`: slow the slice so it lasts exactly as long
//! - otherwise: loop the slice `ceil(ratio)` times and cut at the audio length

use serde::{Deserialize, Serialize};

/// Default upper ratio for slowing down instead of looping.
pub const DEFAULT_SPEED_LIMIT: f64 = 1.5;
/// Default minimum source slice, in seconds.
pub const DEFAULT_MIN_CLIP_SECS: f64 = 0.1;

/// Tuning knobs for [`plan_fit`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitThresholds {
    /// Ratios up to this value are slowed down, above it looped
    pub speed_limit: f64,
    /// Slices shorter than this are skipped
    pub min_clip_secs: f64,
}

impl Default for FitThresholds {
    fn default() -> Self {
        Self {
            speed_limit: DEFAULT_SPEED_LIMIT,
            min_clip_secs: DEFAULT_MIN_CLIP_SECS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FitStrategy {
    Truncate,
    /// Stretch presentation timestamps by `factor` (the ratio)
    SlowDown { factor: f64 },
    Loop { copies: u32 },
}

/// Why a clip cannot be planned.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FitSkip {
    EmptySlice,
    SliceTooShort,
    NoAudio,
}

impl std::fmt::Display for FitSkip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FitSkip::EmptySlice => "source slice is empty",
            FitSkip::SliceTooShort => "source slice is below the minimum duration",
            FitSkip::NoAudio => "audio has no duration",
        };
        f.write_str(s)
    }
}

/// How one clip will be rendered.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipPlan {
    pub slice_secs: f64,
    pub audio_secs: f64,
    pub ratio: f64,
    pub strategy: FitStrategy,
}

pub fn plan_fit(
    slice_secs: f64,
    audio_secs: f64,
    thresholds: &FitThresholds,
) -> Result<ClipPlan, FitSkip> {
    if !slice_secs.is_finite() || slice_secs <= 0.0 {
        return Err(FitSkip::EmptySlice);
    }
    if slice_secs < thresholds.min_clip_secs {
        return Err(FitSkip::SliceTooShort);
    }
    if !audio_secs.is_finite() || audio_secs <= 0.0 {
        return Err(FitSkip::NoAudio);
    }

    let ratio = audio_secs / slice_secs;
    let strategy = if ratio <= 1.0 {
        FitStrategy::Truncate
    } else if ratio <= thresholds.speed_limit {
        FitStrategy::SlowDown { factor: ratio }
    } else {
        FitStrategy::Loop {
            copies: ratio.ceil() as u32,
        }
    };

    Ok(ClipPlan {
        slice_secs,
        audio_secs,
        ratio,
        strategy,
    })
}

impl ClipPlan {
    /// Rendered clip duration. Always the audio duration.
    pub fn output_secs(&self) -> f64 {
        self.audio_secs
    }

    /// Duration produced before the final cut.
    pub fn raw_secs(&self) -> f64 {
        match self.strategy {
            FitStrategy::Truncate => self.slice_secs,
            FitStrategy::SlowDown { factor } => self.slice_secs * factor,
            FitStrategy::Loop { copies } => self.slice_secs * copies as f64,
        }
    }

    /// Video filter chain for this clip.
    ///
    /// `input` is a filter label carrying the source window, `offset` the
    /// slice start inside that window, `output` the label to produce.
    pub fn video_filter(&self, input: &str, offset: f64, output: &str) -> String {
        let a = self.audio_secs;
        let v = self.slice_secs;
        match self.strategy {
            FitStrategy::Truncate => format!(
                "[{input}]trim=start={offset:.3}:duration={a:.3},setpts=PTS-STARTPTS[{output}]"
            ),
            FitStrategy::SlowDown { factor } => format!(
                "[{input}]trim=start={offset:.3}:duration={v:.3},setpts=(PTS-STARTPTS)*{factor:.6},trim=duration={a:.3}[{output}]"
            ),
            FitStrategy::Loop { copies } => {
                let parts: Vec<String> = (0..copies).map(|i| format!("[{output}_l{i}]")).collect();
                format!(
                    "[{input}]trim=start={offset:.3}:duration={v:.3},setpts=PTS-STARTPTS,split={copies}{outs};{outs}concat=n={copies}:v=1:a=0,trim=duration={a:.3},setpts=PTS-STARTPTS[{output}]",
                    outs = parts.concat(),
                )
            }
        }
    }
}
