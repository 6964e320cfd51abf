//! Render progress aggregator.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use redub_media::render_bar;
use redub_models::{ProgressSnapshot, SharedRunState};

use crate::transport::Transport;

/// Text pushed to the status handle for a snapshot.
pub fn render_status(snapshot: &ProgressSnapshot) -> String {
    format!("{}\n{}", snapshot.status_text, render_bar(snapshot.percent))
}

/// Periodically pushes the run state's progress to the transport.
///
/// Dropping or [`abort`](Self::abort)ing it stops the task without waiting.
pub struct ProgressAggregator {
    task: JoinHandle<()>,
}

impl ProgressAggregator {
    pub fn spawn(
        state: SharedRunState,
        transport: Arc<dyn Transport>,
        handle: String,
        interval: Duration,
    ) -> Self {
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut last_sent = String::new();

            loop {
                ticker.tick().await;
                let snapshot = state.snapshot();
                if snapshot.status_text.is_empty() {
                    continue;
                }

                let text = render_status(&snapshot);
                if text == last_sent {
                    continue;
                }

                match transport.notify(&handle, &text).await {
                    Ok(()) => {
                        debug!(percent = snapshot.percent, "Pushed render progress");
                        last_sent = text;
                    }
                    Err(e) => warn!(error = %e, "Progress update failed"),
                }
            }
        });

        Self { task }
    }

    pub fn abort(self) {
        self.task.abort();
    }
}

impl Drop for ProgressAggregator {
    fn drop(&mut self) {
        self.task.abort();
    }
}
