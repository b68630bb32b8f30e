//! Task registry
//!
//! [`TaskManager`] owns every task and is the only place task state changes.
//! All mutations go through one `tokio::sync::Mutex`, and the matching
//! [`TaskEvent`] is sent while that lock is still held, so subscribers see
//! each task's events in the order the mutations happened.
//!
//! Pause and cancel flags live next to the task they control. Flipping a flag
//! and recording the new state happen under the same lock, so a worker can
//! never observe one without the other.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, broadcast, watch};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, FailureKind, Result, TaskFailure};
use crate::task::{Task, TaskRequest, TaskSnapshot};
use crate::types::{Progress, TaskEvent, TaskId, TaskState, TaskStatistics};


/// Cooperative control handles for one task
#[derive(Debug)]
struct TaskControl {
    cancel: CancellationToken,
    pause: watch::Sender<bool>,
}

impl TaskControl {
    fn new() -> Self {
        let (pause, _rx) = watch::channel(false);
        Self {
            cancel: CancellationToken::new(),
            pause,
        }
    }
}

#[derive(Debug)]
struct Entry {
    task: Task,
    control: TaskControl,
}

#[derive(Debug, Default)]
struct Registry {
    tasks: HashMap<TaskId, Entry>,
    /// Submission order, used for listing and FIFO admission
    order: Vec<TaskId>,
}

impl Registry {
    fn entry(&self, id: &TaskId) -> Result<&Entry> {
        self.tasks.get(id).ok_or_else(|| Error::not_found(id))
    }

    fn entry_mut(&mut self, id: &TaskId) -> Result<&mut Entry> {
        self.tasks.get_mut(id).ok_or_else(|| Error::not_found(id))
    }

    fn active_count(&self) -> usize {
        self.tasks
            .values()
            .filter(|e| e.task.state().is_active())
            .count()
    }

    fn ordered(&self) -> impl Iterator<Item = &Entry> {
        self.order.iter().filter_map(|id| self.tasks.get(id))
    }

    fn drop_where(&mut self, pred: impl Fn(TaskState) -> bool) -> Vec<TaskId> {
        let doomed: Vec<TaskId> = self
            .ordered()
            .filter(|e| pred(e.task.state()))
            .map(|e| e.task.id().clone())
            .collect();
        for id in &doomed {
            self.tasks.remove(id);
        }
        self.order.retain(|id| self.tasks.contains_key(id));
        doomed
    }
}

/// A task just moved from Queued to Running, with what its worker needs
#[derive(Debug)]
pub struct Admission {
    /// Task ID
    pub id: TaskId,
    /// The validated request
    pub request: TaskRequest,
    /// Progress already recorded (zero for a fresh task)
    pub progress: Progress,
    /// Fires when the task is cancelled
    pub cancel: CancellationToken,
    /// `true` while the task is paused
    pub pause: watch::Receiver<bool>,
}

/// Result of a cancel request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancelDisposition {
    /// The task was Queued and is now Cancelled
    Cancelled,
    /// The worker was signalled and will report Cancelled
    Signalled,
    /// The task was already Cancelled
    AlreadyCancelled,
}

/// Registry of tasks (cloneable, all fields are Arc-wrapped)
#[derive(Clone)]
pub struct TaskManager {
    registry: Arc<Mutex<Registry>>,
    event_tx: broadcast::Sender<TaskEvent>,
    max_concurrency: usize,
}

impl TaskManager {
    /// Create an empty registry admitting at most `max_concurrency` active tasks
    pub fn new(max_concurrency: usize, event_tx: broadcast::Sender<TaskEvent>) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
            event_tx,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Maximum number of Running + Paused tasks
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Subscribe to registry events
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.event_tx.subscribe()
    }

    fn emit(&self, event: TaskEvent) {
        // No receivers is fine
        self.event_tx.send(event).ok();
    }

    fn emit_updated(&self, task: &Task) {
        self.emit(TaskEvent::Updated {
            id: task.id().clone(),
            state: task.state(),
            progress: task.progress(),
            failure: task.failure().cloned(),
        });
    }

    /// Register a Queued task and return its ID
    ///
    /// The request is stored as given; callers validate it first.
    pub async fn add(&self, request: TaskRequest) -> TaskId {
        let id = TaskId::generate();
        let mut registry = self.registry.lock().await;

        self.emit(TaskEvent::Added {
            id: id.clone(),
            platform: request.platform,
            mode: request.mode,
            source: request.source.clone(),
        });
        registry.order.push(id.clone());
        registry.tasks.insert(
            id.clone(),
            Entry {
                task: Task::new(id.clone(), request),
                control: TaskControl::new(),
            },
        );

        tracing::debug!(task_id = %id, "task added");
        id
    }

    /// Remove a task that is not active
    pub async fn remove(&self, id: &TaskId) -> Result<()> {
        let mut registry = self.registry.lock().await;
        let state = registry.entry(id)?.task.state();
        if state.is_active() {
            return Err(Error::invalid_state(id, "remove", state));
        }

        registry.tasks.remove(id);
        registry.order.retain(|other| other != id);
        self.emit(TaskEvent::Removed { id: id.clone() });

        tracing::debug!(task_id = %id, state = %state, "task removed");
        Ok(())
    }

    /// Point-in-time copy of every task, in submission order
    pub async fn list(&self) -> Vec<TaskSnapshot> {
        let registry = self.registry.lock().await;
        registry.ordered().map(|e| e.task.snapshot()).collect()
    }

    /// Tasks currently in `state`, in submission order
    pub async fn list_by_state(&self, state: TaskState) -> Vec<TaskSnapshot> {
        let registry = self.registry.lock().await;
        registry
            .ordered()
            .filter(|e| e.task.state() == state)
            .map(|e| e.task.snapshot())
            .collect()
    }

    /// Snapshot of one task
    pub async fn get(&self, id: &TaskId) -> Result<TaskSnapshot> {
        let registry = self.registry.lock().await;
        Ok(registry.entry(id)?.task.snapshot())
    }

    /// Task counts per state
    pub async fn statistics(&self) -> TaskStatistics {
        let registry = self.registry.lock().await;
        let mut stats = TaskStatistics::default();
        for entry in registry.tasks.values() {
            stats.record(entry.task.state());
        }
        stats
    }

    /// Drop Completed tasks, returning how many were removed
    pub async fn clear_finished(&self) -> usize {
        self.clear(|state| state == TaskState::Completed).await
    }

    /// Drop every terminal task, returning how many were removed
    pub async fn clear_terminal(&self) -> usize {
        self.clear(|state| state.is_terminal()).await
    }

    async fn clear(&self, pred: impl Fn(TaskState) -> bool) -> usize {
        let mut registry = self.registry.lock().await;
        let removed = registry.drop_where(pred);
        for id in &removed {
            self.emit(TaskEvent::Removed { id: id.clone() });
        }
        if !removed.is_empty() {
            tracing::debug!(count = removed.len(), "cleared finished tasks");
        }
        removed.len()
    }

    /// Move the oldest Queued task to Running if a slot is free
    pub async fn admit_next(&self) -> Option<Admission> {
        let mut registry = self.registry.lock().await;
        if registry.active_count() >= self.max_concurrency {
            return None;
        }

        let id = registry
            .ordered()
            .find(|e| e.task.state() == TaskState::Queued)
            .map(|e| e.task.id().clone())?;

        let entry = registry.tasks.get_mut(&id)?;
        if let Err(e) = entry.task.transition("start", TaskState::Running) {
            tracing::error!(task_id = %id, error = %e, "queued task refused to start");
            return None;
        }
        self.emit_updated(&entry.task);

        tracing::debug!(task_id = %id, "task admitted");
        Some(Admission {
            id,
            request: entry.task.request().clone(),
            progress: entry.task.progress(),
            cancel: entry.control.cancel.clone(),
            pause: entry.control.pause.subscribe(),
        })
    }

    /// Apply a validated state change with optional progress and failure
    ///
    /// Marking `Failed` without a failure records an unclassified one so every
    /// failed task carries a message. Marking `Completed` after a cancel was
    /// signalled records `Cancelled` instead. Progress-only updates that change nothing
    /// emit no event.
    pub async fn mark(
        &self,
        id: &TaskId,
        state: TaskState,
        progress: Option<Progress>,
        failure: Option<TaskFailure>,
    ) -> Result<()> {
        let mut registry = self.registry.lock().await;
        let entry = registry.entry_mut(id)?;

        // A cancel accepted before the outcome is recorded wins over completion
        let state = if state == TaskState::Completed && entry.control.cancel.is_cancelled() {
            tracing::debug!(task_id = %id, "completion overridden by pending cancel");
            TaskState::Cancelled
        } else {
            state
        };
        let task = &mut entry.task;

        task.check_transition("mark", state)?;
        let before = (task.state(), task.progress());

        if let Some(progress) = progress {
            task.apply_progress(progress)?;
        }
        if state == TaskState::Failed {
            let attempts = task.attempts();
            task.set_failure(failure.unwrap_or_else(|| TaskFailure {
                kind: FailureKind::Unknown,
                message: "task failed without a reported cause".to_string(),
                attempts,
            }));
        }
        task.transition("mark", state)?;

        if (task.state(), task.progress()) != before || state == TaskState::Failed {
            self.emit_updated(task);
        }
        if state.is_terminal() {
            tracing::debug!(task_id = %id, state = %state, "task finished");
        }
        Ok(())
    }

    /// Record progress without changing state
    ///
    /// Uses whatever active state the task is in, so a worker reporting
    /// progress never races a concurrent pause.
    pub async fn report_progress(&self, id: &TaskId, progress: Progress) -> Result<()> {
        let mut registry = self.registry.lock().await;
        let task = &mut registry.entry_mut(id)?.task;

        let before = task.progress();
        task.apply_progress(progress)?;
        if task.progress() != before {
            self.emit_updated(task);
        }
        Ok(())
    }

    /// Count one backend attempt, returning the new total
    pub async fn record_attempt(&self, id: &TaskId) -> Result<u32> {
        let mut registry = self.registry.lock().await;
        Ok(registry.entry_mut(id)?.task.record_attempt())
    }

    /// Set the display title and announce it
    pub async fn set_title(&self, id: &TaskId, title: String) -> Result<()> {
        let mut registry = self.registry.lock().await;
        let task = &mut registry.entry_mut(id)?.task;
        task.set_title(title.clone());
        self.emit(TaskEvent::TitleChanged {
            id: id.clone(),
            title,
        });
        Ok(())
    }

    /// Record the account behind the task and announce it
    ///
    /// A non-empty nickname also becomes the display title.
    pub async fn set_user(
        &self,
        id: &TaskId,
        user_id: String,
        nickname: Option<String>,
    ) -> Result<()> {
        let mut registry = self.registry.lock().await;
        let task = &mut registry.entry_mut(id)?.task;
        task.set_user_id(user_id.clone());
        let nickname = nickname.filter(|n| !n.trim().is_empty());
        if let Some(nickname) = &nickname {
            task.set_title(nickname.clone());
        }
        self.emit(TaskEvent::UserResolved {
            id: id.clone(),
            user_id,
            nickname,
        });
        Ok(())
    }

    /// Record a backend message and relay it
    pub async fn post_message(&self, id: &TaskId, message: String) -> Result<()> {
        let mut registry = self.registry.lock().await;
        let task = &mut registry.entry_mut(id)?.task;
        task.set_message(message.clone());
        self.emit(TaskEvent::Message {
            id: id.clone(),
            message,
        });
        Ok(())
    }

    /// Cancel a task
    ///
    /// Queued tasks are cancelled on the spot. Active tasks get their token
    /// cancelled and stay in their current state until the worker reports.
    pub async fn request_cancel(&self, id: &TaskId) -> Result<CancelDisposition> {
        let mut registry = self.registry.lock().await;
        let entry = registry.entry_mut(id)?;
        self.cancel_entry(entry)
    }

    fn cancel_entry(&self, entry: &mut Entry) -> Result<CancelDisposition> {
        match entry.task.state() {
            TaskState::Queued => {
                entry.task.transition("cancel", TaskState::Cancelled)?;
                entry.control.cancel.cancel();
                self.emit_updated(&entry.task);
                Ok(CancelDisposition::Cancelled)
            }
            TaskState::Running | TaskState::Paused => {
                entry.control.cancel.cancel();
                Ok(CancelDisposition::Signalled)
            }
            TaskState::Cancelled => Ok(CancelDisposition::AlreadyCancelled),
            state @ (TaskState::Completed | TaskState::Failed) => {
                Err(Error::invalid_state(entry.task.id(), "cancel", state))
            }
        }
    }

    /// Cancel every non-terminal task
    ///
    /// Returns what happened to each task that was touched.
    pub async fn request_cancel_all(&self) -> Vec<(TaskId, CancelDisposition)> {
        let mut registry = self.registry.lock().await;
        let Registry { tasks, order } = &mut *registry;

        let mut touched = Vec::new();
        for id in order.iter() {
            let Some(entry) = tasks.get_mut(id) else {
                continue;
            };
            if entry.task.state().is_terminal() {
                continue;
            }
            if let Ok(disposition) = self.cancel_entry(entry) {
                touched.push((id.clone(), disposition));
            }
        }
        touched
    }

    /// Pause (`true`) or resume (`false`) a task
    ///
    /// Returns whether anything changed; asking for the state the task is
    /// already in is a no-op.
    pub async fn set_paused(&self, id: &TaskId, paused: bool) -> Result<bool> {
        let mut registry = self.registry.lock().await;
        let entry = registry.entry_mut(id)?;
        self.pause_entry(entry, paused)
    }

    fn pause_entry(&self, entry: &mut Entry, paused: bool) -> Result<bool> {
        let (operation, from, to) = if paused {
            ("pause", TaskState::Running, TaskState::Paused)
        } else {
            ("resume", TaskState::Paused, TaskState::Running)
        };

        let state = entry.task.state();
        if state == to {
            return Ok(false);
        }
        if state != from {
            return Err(Error::invalid_state(entry.task.id(), operation, state));
        }

        entry.task.transition(operation, to)?;
        entry.control.pause.send_replace(paused);
        self.emit_updated(&entry.task);
        Ok(true)
    }

    /// Pause or resume every task that can be, returning how many changed
    pub async fn set_paused_all(&self, paused: bool) -> usize {
        let mut registry = self.registry.lock().await;
        let Registry { tasks, order } = &mut *registry;

        let mut changed = 0;
        for id in order.iter() {
            let Some(entry) = tasks.get_mut(id) else {
                continue;
            };
            if let Ok(true) = self.pause_entry(entry, paused) {
                changed += 1;
            }
        }
        changed
    }

    /// Number of Running + Paused tasks
    pub async fn active_count(&self) -> usize {
        self.registry.lock().await.active_count()
    }

    /// Whether the task is in a terminal state (missing counts as terminal)
    pub async fn is_finished(&self, id: &TaskId) -> bool {
        let registry = self.registry.lock().await;
        registry
            .tasks
            .get(id)
            .is_none_or(|e| e.task.state().is_terminal())
    }
}
