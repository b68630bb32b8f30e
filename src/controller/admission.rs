//! Worker spawning, slot backfill and the cancel watchdog.

use std::sync::atomic::Ordering;

use crate::error::{FailureKind, TaskFailure};
use crate::manager::Admission;
use crate::types::{Progress, TaskId};
use crate::worker::{Outcome, Worker, WorkerContext, WorkerOutcome};

use super::DownloadController;

impl DownloadController {
    /// Start workers for queued tasks while slots are free
    pub(crate) async fn pump(&self) {
        if !self.accepting_new.load(Ordering::SeqCst) {
            return;
        }
        while let Some(admission) = self.manager.admit_next().await {
            self.spawn_supervisor(admission);
        }
    }

    fn worker_context(&self) -> WorkerContext {
        WorkerContext {
            manager: self.manager.clone(),
            backend: self.backend.clone(),
            config: self.config.clone(),
        }
    }

    /// Run the worker on its own task, record its outcome, then backfill
    fn spawn_supervisor(&self, admission: Admission) {
        let controller = self.clone();
        tokio::spawn(async move {
            let id = admission.id.clone();
            let worker = Worker::new(controller.worker_context(), admission);

            // A panicking worker must still release its slot
            let WorkerOutcome { outcome, progress } = match tokio::spawn(worker.run()).await {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(task_id = %id, error = %e, "worker aborted");
                    WorkerOutcome {
                        outcome: Outcome::Failed(TaskFailure {
                            kind: FailureKind::Unknown,
                            message: format!("worker aborted: {}", e),
                            attempts: controller
                                .manager
                                .get(&id)
                                .await
                                .map(|s| s.attempts)
                                .unwrap_or_default(),
                        }),
                        progress: Progress::default(),
                    }
                }
            };

            let state = outcome.state();
            if let Err(e) = controller
                .manager
                .mark(&id, state, Some(progress), outcome.into_failure())
                .await
            {
                tracing::error!(task_id = %id, state = %state, error = %e, "could not record task outcome");
            }

            controller.pump().await;
        });
    }

    /// Log a fault if a signalled worker has not stopped within the grace period
    ///
    /// The worker is never killed; this only makes a stuck backend visible.
    pub(crate) fn spawn_cancel_watchdog(&self, id: TaskId) {
        let manager = self.manager.clone();
        let grace = self.config.runtime.cancel_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if !manager.is_finished(&id).await {
                tracing::error!(
                    task_id = %id,
                    grace_ms = grace.as_millis() as u64,
                    "worker did not stop within the cancel grace period"
                );
            }
        });
    }
}
