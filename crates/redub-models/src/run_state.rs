//! State shared between the running job and its observers.
//!
//! Exactly one [`SharedRunState`] is live at a time. The job writes progress
//! into it, the aggregator reads it, and the operator's kill switch flips its
//! [`CancelToken`]. Values are advisory display state; readers only ever see
//! the latest snapshot.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Monotonic cancellation flag (false to true, never back).
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Raise the flag. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_if_modified(|cancelled| {
            if *cancelled {
                false
            } else {
                *cancelled = true;
                true
            }
        });
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the flag is raised.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only returns on cancel.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Raw receiver, for runners that select on `changed()`.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Latest progress of the running job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub status_text: String,
    /// 0.0 ..= 100.0
    pub percent: f64,
    pub current_unit: u64,
    pub total_units: u64,
}

/// Capability for anything that can absorb progress reports.
///
/// `current` and `total` share a unit chosen by the caller (seconds of
/// encoded media, bytes, segments).
pub trait ProgressSink: Send + Sync {
    fn report(&self, current: f64, total: f64, label: &str);
}

/// Run state of the current job.
#[derive(Debug, Clone)]
pub struct SharedRunState {
    cancel: CancelToken,
    progress: Arc<watch::Sender<ProgressSnapshot>>,
}

impl Default for SharedRunState {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedRunState {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ProgressSnapshot::default());
        Self {
            cancel: CancelToken::new(),
            progress: Arc::new(tx),
        }
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.progress.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.progress.subscribe()
    }

    /// Replace the status text, keeping the numbers.
    pub fn set_status(&self, text: impl Into<String>) {
        let text = text.into();
        self.progress.send_modify(|snap| snap.status_text = text);
    }

    /// Set unit counters and status text; percent is derived from them.
    pub fn set_units(&self, current: u64, total: u64, text: impl Into<String>) {
        let text = text.into();
        self.progress.send_modify(|snap| {
            snap.current_unit = current;
            snap.total_units = total;
            snap.percent = percent_of(current as f64, total as f64);
            snap.status_text = text;
        });
    }

    pub fn set_percent(&self, percent: f64) {
        self.progress
            .send_modify(|snap| snap.percent = percent.clamp(0.0, 100.0));
    }
}

impl ProgressSink for SharedRunState {
    fn report(&self, current: f64, total: f64, label: &str) {
        let percent = percent_of(current, total);
        self.progress.send_modify(|snap| {
            snap.percent = percent;
            if snap.status_text != label {
                snap.status_text = label.to_string();
            }
        });
    }
}

fn percent_of(current: f64, total: f64) -> f64 {
    if total <= 0.0 || !current.is_finite() || !total.is_finite() {
        return 0.0;
    }
    (current / total * 100.0).clamp(0.0, 100.0)
}
