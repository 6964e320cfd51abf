//! Worker metrics.

use std::net::SocketAddr;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::{WorkerError, WorkerResult};

pub const JOBS_TOTAL: &str = "redub_jobs_total";
pub const JOB_DURATION_SECONDS: &str = "redub_job_duration_seconds";
pub const SEGMENTS_SYNTHESIZED: &str = "redub_segments_synthesized_total";
pub const SEGMENTS_SKIPPED: &str = "redub_segments_skipped_total";

/// Serve Prometheus metrics on `0.0.0.0:port`.
pub fn install_exporter(port: u16) -> WorkerResult<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::config_error(format!("metrics exporter: {}", e)))
}

pub fn record_job(outcome: &'static str, duration_secs: f64) {
    counter!(JOBS_TOTAL, "outcome" => outcome).increment(1);
    histogram!(JOB_DURATION_SECONDS, "outcome" => outcome).record(duration_secs);
}

pub fn record_synthesis(synthesized: u64, skipped: u64) {
    counter!(SEGMENTS_SYNTHESIZED).increment(synthesized);
    counter!(SEGMENTS_SKIPPED).increment(skipped);
}
