//! Render encoding settings.

use serde::{Deserialize, Serialize};

/// Default video codec (H.264)
pub const DEFAULT_VIDEO_CODEC: &str = "libx264";
/// Default audio codec
pub const DEFAULT_AUDIO_CODEC: &str = "aac";
/// Default encoding preset
pub const DEFAULT_PRESET: &str = "ultrafast";
/// Default output frame rate
pub const DEFAULT_FPS: u32 = 24;
/// Default encoder thread count
pub const DEFAULT_THREADS: u32 = 4;

/// Thumbnail extraction offset
pub const THUMBNAIL_TIMESTAMP: &str = "00:00:01";
pub const THUMBNAIL_SCALE_WIDTH: u32 = 320;

/// Deterministic encoder settings applied to every batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodingConfig {
    #[serde(default = "default_video_codec")]
    pub codec: String,

    #[serde(default = "default_preset")]
    pub preset: String,

    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,

    /// Constant output frame rate
    #[serde(default = "default_fps")]
    pub fps: u32,

    #[serde(default = "default_threads")]
    pub threads: u32,
}

fn default_video_codec() -> String {
    DEFAULT_VIDEO_CODEC.to_string()
}
fn default_preset() -> String {
    DEFAULT_PRESET.to_string()
}
fn default_audio_codec() -> String {
    DEFAULT_AUDIO_CODEC.to_string()
}
fn default_fps() -> u32 {
    DEFAULT_FPS
}
fn default_threads() -> u32 {
    DEFAULT_THREADS
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            codec: default_video_codec(),
            preset: default_preset(),
            audio_codec: default_audio_codec(),
            fps: DEFAULT_FPS,
            threads: DEFAULT_THREADS,
        }
    }
}

impl EncodingConfig {
    pub fn with_preset(mut self, preset: impl Into<String>) -> Self {
        self.preset = preset.into();
        self
    }

    pub fn with_threads(mut self, threads: u32) -> Self {
        self.threads = threads.max(1);
        self
    }

    /// Convert to FFmpeg output arguments.
    pub fn to_ffmpeg_args(&self) -> Vec<String> {
        vec![
            "-c:v".to_string(),
            self.codec.clone(),
            "-preset".to_string(),
            self.preset.clone(),
            "-r".to_string(),
            self.fps.to_string(),
            "-threads".to_string(),
            self.threads.to_string(),
            "-c:a".to_string(),
            self.audio_codec.clone(),
        ]
    }
}
