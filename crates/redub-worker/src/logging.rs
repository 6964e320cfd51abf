//! Structured job logging utilities.

use tracing::{error, info, warn, Span};

use redub_models::JobId;

/// Logs job lifecycle events with the job id and phase attached.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    phase: String,
}

impl JobLogger {
    pub fn new(job_id: &JobId, phase: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            phase: phase.to_string(),
        }
    }

    /// Same job, different phase.
    pub fn for_phase(&self, phase: &str) -> Self {
        Self {
            job_id: self.job_id.clone(),
            phase: phase.to_string(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(job_id = %self.job_id, phase = %self.phase, "Job started: {}", message);
    }

    pub fn log_progress(&self, message: &str) {
        info!(job_id = %self.job_id, phase = %self.phase, "Job progress: {}", message);
    }

    pub fn log_warning(&self, message: &str) {
        warn!(job_id = %self.job_id, phase = %self.phase, "Job warning: {}", message);
    }

    pub fn log_error(&self, message: &str) {
        error!(job_id = %self.job_id, phase = %self.phase, "Job error: {}", message);
    }

    pub fn log_completion(&self, message: &str) {
        info!(job_id = %self.job_id, phase = %self.phase, "Job completed: {}", message);
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn phase(&self) -> &str {
        &self.phase
    }

    /// Span covering the whole job.
    pub fn create_span(&self) -> Span {
        tracing::info_span!("job", job_id = %self.job_id, phase = %self.phase)
    }
}
