//! Shutdown coordination.

use std::sync::atomic::Ordering;
use std::time::Duration;

use crate::types::TaskEvent;

use super::DownloadController;

impl DownloadController {
    /// Gracefully shut down the controller
    ///
    /// This method performs a graceful shutdown sequence:
    /// 1. Stops accepting new submissions
    /// 2. Cancels every Queued task and signals every active worker
    /// 3. Waits up to `runtime.cancel_grace` for workers to stop
    /// 4. Emits [`TaskEvent::Shutdown`]
    ///
    /// Workers still running after the grace period are left alone and logged.
    /// Calling this more than once is harmless.
    pub async fn shutdown(&self) {
        tracing::info!("Initiating graceful shutdown");

        self.accepting_new.store(false, Ordering::SeqCst);
        tracing::info!("Stopped accepting new tasks");

        let touched = self.manager.request_cancel_all().await;
        tracing::debug!(count = touched.len(), "Cancelled all unfinished tasks");

        let grace = self.config.runtime.cancel_grace;
        match tokio::time::timeout(grace, self.wait_for_active_tasks()).await {
            Ok(()) => tracing::info!("All workers stopped"),
            Err(_) => {
                let remaining = self.manager.active_count().await;
                tracing::error!(
                    remaining,
                    grace_ms = grace.as_millis() as u64,
                    "Workers still running after the cancel grace period"
                );
            }
        }

        // No receivers is fine
        self.event_tx.send(TaskEvent::Shutdown).ok();
        tracing::info!("Graceful shutdown complete");
    }

    /// Whether [`shutdown`](Self::shutdown) has been called
    pub fn is_shutting_down(&self) -> bool {
        !self.accepting_new.load(Ordering::SeqCst)
    }

    async fn wait_for_active_tasks(&self) {
        loop {
            let active_count = self.manager.active_count().await;
            if active_count == 0 {
                return;
            }
            tracing::debug!(active_count, "Waiting for workers to stop");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}
