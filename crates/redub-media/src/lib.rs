#![deny(unreachable_patterns)]
//! FFmpeg orchestration for the redub pipeline.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building with multi-input support
//! - Progress parsing from `-progress pipe:2` and progress text rendering
//! - Cancellation through [`redub_models::CancelToken`]
//! - Clip fitting, batch rendering and stream-copy merging
//! - A resilient downloader (aria2c with an HTTP fallback)

pub mod batch;
pub mod command;
pub mod download;
pub mod error;
pub mod fit;
pub mod fs_utils;
pub mod merge;
pub mod probe;
pub mod progress;
pub mod thumbnail;

pub use batch::{clamp_to_source, partition, BatchDescriptor, BatchPlan, BatchRenderer, RenderSettings, RenderableSegment};
pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use download::{
    DownloadStrategy, DownloaderSettings, NoopObserver, ResilientDownloader, TransferObserver,
};
pub use error::{MediaError, MediaResult};
pub use fit::{plan_fit, ClipPlan, FitSkip, FitStrategy, FitThresholds};
pub use fs_utils::{move_file, remove_if_exists};
pub use merge::merge_artifacts;
pub use probe::{probe_duration, probe_media, probe_video, MediaInfo};
pub use progress::{format_elapsed, render_bar, transfer_status, FfmpegProgress};
pub use thumbnail::generate_thumbnail;
