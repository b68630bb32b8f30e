//! Progress coalescing for a single worker.

use std::time::Duration;
use tokio::time::Instant;

use crate::types::Progress;

/// Tracks item progress and decides when a report is due
///
/// Reports are spaced at least `interval` apart. A change that arrives
/// inside the window is held back and [`ProgressTracker::flush_deadline`]
/// says when it should be sent at the latest.
#[derive(Debug)]
pub(crate) struct ProgressTracker {
    current: Progress,
    reported: Progress,
    last_report: Option<Instant>,
    interval: Duration,
    /// Item limit, 0 = unlimited
    limit: u64,
}

impl ProgressTracker {
    pub(crate) fn new(start: Progress, interval: Duration, limit: u64) -> Self {
        Self {
            current: start,
            reported: start,
            last_report: None,
            interval,
            limit,
        }
    }

    pub(crate) fn current(&self) -> Progress {
        self.current
    }

    /// Items already delivered, handed to the backend as `resume_from`
    pub(crate) fn completed(&self) -> u64 {
        self.current.completed
    }

    /// The backend announced a total
    pub(crate) fn set_total(&mut self, total: u64) {
        let total = if self.limit > 0 && total > self.limit {
            self.limit
        } else {
            total
        };
        if total > 0 {
            self.current.total = total.max(self.current.completed);
        }
    }

    /// One more item finished
    pub(crate) fn item_done(&mut self) {
        self.current.completed += 1;
        if self.current.is_known() && self.current.completed > self.current.total {
            self.current.total = self.current.completed;
        }
    }

    /// Whether there is anything not yet reported
    pub(crate) fn is_dirty(&self) -> bool {
        self.current != self.reported
    }

    /// A report is due now: something changed and the window has elapsed
    pub(crate) fn is_due(&self, now: Instant) -> bool {
        self.is_dirty()
            && self
                .last_report
                .is_none_or(|last| now.duration_since(last) >= self.interval)
    }

    /// When a held-back change must be flushed
    pub(crate) fn flush_deadline(&self) -> Option<Instant> {
        if !self.is_dirty() {
            return None;
        }
        Some(match self.last_report {
            Some(last) => last + self.interval,
            None => Instant::now(),
        })
    }

    /// Take the value to report and restart the window
    pub(crate) fn take(&mut self, now: Instant) -> Progress {
        self.reported = self.current;
        self.last_report = Some(now);
        self.current
    }
}
