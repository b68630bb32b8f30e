//! Task control: cancel, pause, resume, remove and their bulk variants.

use crate::error::Result;
use crate::manager::CancelDisposition;
use crate::types::TaskId;

use super::DownloadController;

impl DownloadController {
    /// Cancel a task
    ///
    /// A Queued task is cancelled on the spot and never runs. For a Running or
    /// Paused task the worker is signalled and reports Cancelled at its next
    /// checkpoint (between items, while waiting on the backend, during retry
    /// backoff, or while paused); this call does not wait for that. If the
    /// worker has not stopped after `runtime.cancel_grace` a fault is logged.
    ///
    /// Cancelling an already Cancelled task is a no-op.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`](crate::Error::NotFound) for an unknown ID
    /// - [`Error::InvalidState`](crate::Error::InvalidState) if the task
    ///   already Completed or Failed
    pub async fn cancel(&self, id: &TaskId) -> Result<()> {
        match self.manager.request_cancel(id).await? {
            CancelDisposition::Cancelled => {
                tracing::info!(task_id = %id, "queued task cancelled");
            }
            CancelDisposition::Signalled => {
                tracing::info!(task_id = %id, "cancellation requested");
                self.spawn_cancel_watchdog(id.clone());
            }
            CancelDisposition::AlreadyCancelled => {}
        }
        Ok(())
    }

    /// Pause a running task
    ///
    /// The worker finishes the item in flight, flushes its progress and parks
    /// without using CPU. The task keeps its concurrency slot. Pausing an
    /// already Paused task is a no-op.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`](crate::Error::InvalidState) unless the task is
    /// Running or Paused; [`Error::NotFound`](crate::Error::NotFound) for an
    /// unknown ID.
    pub async fn pause(&self, id: &TaskId) -> Result<()> {
        if self.manager.set_paused(id, true).await? {
            tracing::info!(task_id = %id, "task paused");
        }
        Ok(())
    }

    /// Resume a paused task from where it stopped
    ///
    /// Resuming a Running task is a no-op.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`](crate::Error::InvalidState) for Queued and
    /// terminal tasks; [`Error::NotFound`](crate::Error::NotFound) for an
    /// unknown ID.
    pub async fn resume(&self, id: &TaskId) -> Result<()> {
        if self.manager.set_paused(id, false).await? {
            tracing::info!(task_id = %id, "task resumed");
        }
        Ok(())
    }

    /// Remove a Queued or finished task from the registry
    ///
    /// Active tasks must be cancelled first.
    pub async fn remove(&self, id: &TaskId) -> Result<()> {
        self.manager.remove(id).await
    }

    /// Pause every Running task, returning how many were paused
    pub async fn pause_all(&self) -> usize {
        let count = self.manager.set_paused_all(true).await;
        tracing::info!(count, "paused all running tasks");
        count
    }

    /// Resume every Paused task, returning how many were resumed
    pub async fn resume_all(&self) -> usize {
        let count = self.manager.set_paused_all(false).await;
        tracing::info!(count, "resumed all paused tasks");
        count
    }

    /// Cancel every Queued, Running and Paused task
    ///
    /// Returns how many tasks were cancelled or signalled.
    pub async fn cancel_all(&self) -> usize {
        let touched = self.manager.request_cancel_all().await;
        let mut count = 0;
        for (id, disposition) in touched {
            match disposition {
                CancelDisposition::Signalled => {
                    self.spawn_cancel_watchdog(id);
                    count += 1;
                }
                CancelDisposition::Cancelled => count += 1,
                CancelDisposition::AlreadyCancelled => {}
            }
        }
        tracing::info!(count, "cancelled all tasks");
        count
    }
}
