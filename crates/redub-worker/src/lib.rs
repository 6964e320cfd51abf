//! Re-dubbing worker.
//!
//! This crate provides:
//! - The job pipeline (fetch, synthesize, render, merge, deliver)
//! - Text-to-speech and transport seams
//! - Render progress aggregation
//! - Per-submitter request collection and the console control surface

pub mod aggregator;
pub mod collector;
pub mod config;
pub mod console;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod synthesis;
pub mod transport;
pub mod tts;
pub mod workspace;

pub use aggregator::ProgressAggregator;
pub use collector::{CollectorReply, SessionCollector, SessionStage};
pub use config::WorkerConfig;
pub use console::{ConsoleCommand, ConsoleSession};
pub use error::{JobError, WorkerError, WorkerResult};
pub use logging::JobLogger;
pub use pipeline::RedubPipeline;
pub use transport::{ConsoleTransport, Transport};
pub use tts::{HttpSynthesizer, SpeechSynthesizer};
pub use workspace::JobWorkspace;
