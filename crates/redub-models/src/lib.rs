//! Shared data models for the redub pipeline.
//!
//! This crate provides:
//! - Narration segments and their validation
//! - The auto-healing segment map loader
//! - Jobs and video sources
//! - Encoding configuration
//! - Run state, cancellation and progress reporting

pub mod encoding;
pub mod error;
pub mod job;
pub mod run_state;
pub mod segment;
pub mod segment_map;
pub mod timestamp;

pub use encoding::EncodingConfig;
pub use error::{ModelError, ModelResult};
pub use job::{sanitize_output_name, validate_link, Job, JobId, VideoSource};
pub use run_state::{CancelToken, ProgressSink, ProgressSnapshot, SharedRunState};
pub use segment::{validate_records, Segment, SegmentRecord, SkipReason, SkippedRecord};
pub use segment_map::{heal_and_parse, load_segment_map, HealStage, LoadedMap};
pub use timestamp::{parse_timestamp, TimestampError};
