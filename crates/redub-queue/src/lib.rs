//! In-process job queue.
//!
//! This crate provides:
//! - A volatile FIFO of render jobs with non-blocking enqueue
//! - A single consumer loop that runs one job at a time
//! - An operator kill switch that drains the queue and cancels the live job

pub mod error;
pub mod scheduler;

pub use error::{QueueError, QueueResult};
pub use scheduler::{JobHandler, JobOutcome, PipelineScheduler, SchedulerStatus};
