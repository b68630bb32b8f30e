//! Task execution
//!
//! A worker drives one admitted task against the fetch backend:
//! - [`progress`] - Progress coalescing
//!
//! The worker owns the retry loop, the per-item timeout and cooperative
//! pause/cancel. It reports progress, titles and messages to the
//! [`TaskManager`] as it goes but never decides the terminal state on the
//! registry itself; it returns a [`WorkerOutcome`] and the controller
//! records it.

mod progress;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::backend::{FetchBackend, FetchEvent, FetchOptions, FetchRequest, ItemStream};
use crate::config::Config;
use crate::error::{BackendError, TaskFailure};
use crate::manager::{Admission, TaskManager};
use crate::retry::{Backoff, IsRetryable, sleep_unless_cancelled};
use crate::task::TaskRequest;
use crate::types::{Progress, TaskId, TaskState};

use progress::ProgressTracker;

/// How a worker finished
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Outcome {
    Completed,
    Failed(TaskFailure),
    Cancelled,
}

impl Outcome {
    pub(crate) fn state(&self) -> TaskState {
        match self {
            Outcome::Completed => TaskState::Completed,
            Outcome::Failed(_) => TaskState::Failed,
            Outcome::Cancelled => TaskState::Cancelled,
        }
    }

    pub(crate) fn into_failure(self) -> Option<TaskFailure> {
        match self {
            Outcome::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Outcome plus the last progress the worker saw
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct WorkerOutcome {
    pub(crate) outcome: Outcome,
    pub(crate) progress: Progress,
}

/// How one backend attempt ended
#[derive(Debug)]
enum AttemptEnd {
    Finished,
    Cancelled,
    TimedOut,
    Error(BackendError),
}

/// Shared handles a worker needs
#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub(crate) manager: TaskManager,
    pub(crate) backend: Arc<dyn FetchBackend>,
    pub(crate) config: Arc<Config>,
}

/// Executes one admitted task
pub(crate) struct Worker {
    ctx: WorkerContext,
    id: TaskId,
    request: TaskRequest,
    options: FetchOptions,
    cancel: CancellationToken,
    pause: watch::Receiver<bool>,
    tracker: ProgressTracker,
}

impl Worker {
    pub(crate) fn new(ctx: WorkerContext, admission: Admission) -> Self {
        let options = FetchOptions::effective(&ctx.config, &admission.request.overrides);
        let tracker = ProgressTracker::new(
            admission.progress,
            ctx.config.runtime.progress_interval,
            options.max_counts,
        );
        Self {
            id: admission.id,
            request: admission.request,
            cancel: admission.cancel,
            pause: admission.pause,
            options,
            tracker,
            ctx,
        }
    }

    /// Run until the task completes, fails for good, or is cancelled
    pub(crate) async fn run(mut self) -> WorkerOutcome {
        tracing::info!(
            task_id = %self.id,
            platform = %self.request.platform,
            mode = %self.request.mode,
            source = %self.request.source,
            backend = self.ctx.backend.name(),
            "task started"
        );

        let outcome = self.run_attempts().await;

        // Latest progress goes out before the terminal transition
        self.flush().await;

        match &outcome {
            Outcome::Completed => tracing::info!(
                task_id = %self.id,
                completed = self.tracker.current().completed,
                "task completed"
            ),
            Outcome::Failed(failure) => tracing::warn!(
                task_id = %self.id,
                kind = %failure.kind,
                attempts = failure.attempts,
                error = %failure.message,
                "task failed"
            ),
            Outcome::Cancelled => tracing::info!(task_id = %self.id, "task cancelled"),
        }

        WorkerOutcome {
            outcome,
            progress: self.tracker.current(),
        }
    }

    async fn run_attempts(&mut self) -> Outcome {
        let mut backoff = Backoff::new(&self.ctx.config.retry);
        let window = self.options.timeout;

        loop {
            if !self.wait_while_paused().await {
                return Outcome::Cancelled;
            }

            let attempts = match self.ctx.manager.record_attempt(&self.id).await {
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!(task_id = %self.id, error = %e, "task vanished from registry");
                    return Outcome::Cancelled;
                }
            };

            match self.attempt(window).await {
                AttemptEnd::Finished => return Outcome::Completed,
                AttemptEnd::Cancelled => return Outcome::Cancelled,
                AttemptEnd::TimedOut => {
                    return Outcome::Failed(TaskFailure::timeout(window, attempts));
                }
                AttemptEnd::Error(e) => {
                    let delay = if e.is_retryable() {
                        backoff.next_delay()
                    } else {
                        None
                    };
                    let Some(delay) = delay else {
                        return Outcome::Failed(TaskFailure::from_backend(&e, attempts));
                    };

                    tracing::warn!(
                        task_id = %self.id,
                        attempt = attempts,
                        retries_left = backoff.remaining(),
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient backend error, retrying"
                    );
                    if !sleep_unless_cancelled(delay, &self.cancel).await {
                        return Outcome::Cancelled;
                    }
                }
            }
        }
    }

    /// One backend attempt, resuming after the items already delivered
    async fn attempt(&mut self, window: Duration) -> AttemptEnd {
        let request = FetchRequest {
            task_id: self.id.clone(),
            platform: self.request.platform,
            mode: self.request.mode,
            source: self.request.source.clone(),
            options: self.options.clone(),
            resume_from: self.tracker.completed(),
        };

        let opened = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return AttemptEnd::Cancelled,
            opened = tokio::time::timeout(window, self.ctx.backend.fetch(&request)) => opened,
        };
        let mut stream: ItemStream = match opened {
            Err(_) => return AttemptEnd::TimedOut,
            Ok(Err(e)) => return AttemptEnd::Error(e),
            Ok(Ok(stream)) => stream,
        };

        // Only a backend event or a resume moves the inactivity deadline
        let mut silent_until = Instant::now() + window;
        loop {
            let flush_at = self.tracker.flush_deadline();
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return AttemptEnd::Cancelled,
                _ = paused(&mut self.pause) => {
                    // Stream is not polled while paused
                    if !self.wait_while_paused().await {
                        return AttemptEnd::Cancelled;
                    }
                    silent_until = Instant::now() + window;
                    continue;
                }
                _ = sleep_until(flush_at), if flush_at.is_some() => {
                    self.flush().await;
                    continue;
                }
                next = tokio::time::timeout_at(silent_until, stream.next()) => next,
            };

            match next {
                Err(_) => return AttemptEnd::TimedOut,
                Ok(None) => return AttemptEnd::Finished,
                Ok(Some(Err(e))) => return AttemptEnd::Error(e),
                Ok(Some(Ok(event))) => {
                    silent_until = Instant::now() + window;
                    self.handle(event).await;
                }
            }
        }
    }

    async fn handle(&mut self, event: FetchEvent) {
        match event {
            FetchEvent::Resolved { total, title } => {
                self.tracker.set_total(total);
                if let Some(title) = title.filter(|t| !t.trim().is_empty()) {
                    if let Err(e) = self.ctx.manager.set_title(&self.id, title).await {
                        tracing::debug!(task_id = %self.id, error = %e, "could not set title");
                    }
                }
            }
            FetchEvent::UserResolved { user_id, nickname } => {
                if let Err(e) = self.ctx.manager.set_user(&self.id, user_id, nickname).await {
                    tracing::debug!(task_id = %self.id, error = %e, "could not record user");
                }
            }
            FetchEvent::Item(item) => {
                self.tracker.item_done();
                tracing::debug!(task_id = %self.id, item = %item.name, "item fetched");
            }
            FetchEvent::Message(message) => {
                if let Err(e) = self.ctx.manager.post_message(&self.id, message).await {
                    tracing::debug!(task_id = %self.id, error = %e, "could not relay message");
                }
            }
        }

        if self.tracker.is_due(Instant::now()) {
            self.flush().await;
        }
    }

    /// Send any unreported progress
    async fn flush(&mut self) {
        if !self.tracker.is_dirty() {
            return;
        }
        let progress = self.tracker.take(Instant::now());
        if let Err(e) = self.ctx.manager.report_progress(&self.id, progress).await {
            tracing::debug!(task_id = %self.id, error = %e, "progress report rejected");
        }
    }

    /// Park while paused; returns `false` if cancelled first
    async fn wait_while_paused(&mut self) -> bool {
        if !*self.pause.borrow() {
            return !self.cancel.is_cancelled();
        }

        self.flush().await;
        tracing::debug!(task_id = %self.id, "task paused");

        let pause = &mut self.pause;
        let resumed = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = async { pause.wait_for(|p| !*p).await.is_ok() } => true,
        };
        if resumed {
            tracing::debug!(task_id = %self.id, "task resumed");
        }
        resumed
    }
}

/// Resolves once the pause flag is set; never if the sender is gone
async fn paused(pause: &mut watch::Receiver<bool>) {
    if pause.wait_for(|p| *p).await.is_err() {
        std::future::pending::<()>().await;
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
