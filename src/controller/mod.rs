//! UI-facing controller split into focused submodules.
//!
//! The `DownloadController` struct and its methods are organized by domain:
//! - [`submit`] - Request validation and admission
//! - [`control`] - Task control (cancel/pause/resume/remove, bulk variants)
//! - [`admission`] - Worker spawning, slot backfill and the cancel watchdog
//! - [`lifecycle`] - Graceful shutdown
//! - [`listener`] - Callback-style event delivery

mod admission;
mod control;
mod lifecycle;
pub(crate) mod listener;
mod submit;


use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use tokio::sync::broadcast;

use crate::backend::FetchBackend;
use crate::config::Config;
use crate::error::Result;
use crate::manager::TaskManager;
use crate::task::TaskSnapshot;
use crate::types::{TaskEvent, TaskId, TaskState, TaskStatistics};

/// Main controller instance (cloneable - all fields are Arc-wrapped)
///
/// Owns the task registry and spawns one worker per admitted task. Every
/// method returns promptly; long-running work happens on worker tasks.
#[derive(Clone)]
pub struct DownloadController {
    /// Task registry
    pub(crate) manager: TaskManager,
    /// Read-only configuration snapshot
    pub(crate) config: Arc<Config>,
    /// Fetch backend shared by all workers
    pub(crate) backend: Arc<dyn FetchBackend>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<TaskEvent>,
    /// Cleared once shutdown starts
    pub(crate) accepting_new: Arc<AtomicBool>,
}

impl DownloadController {
    /// Create a controller from a configuration snapshot and a backend
    ///
    /// Must be called from within a tokio runtime; workers are spawned on it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) if the snapshot is invalid.
    pub fn new(config: Config, backend: Arc<dyn FetchBackend>) -> Result<Self> {
        config.validate()?;

        let (event_tx, _rx) = broadcast::channel(config.runtime.event_buffer);
        let manager = TaskManager::new(config.max_concurrency(), event_tx.clone());

        tracing::info!(
            max_tasks = config.max_concurrency(),
            backend = backend.name(),
            "download controller ready"
        );

        Ok(Self {
            manager,
            config: Arc::new(config),
            backend,
            event_tx,
            accepting_new: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Subscribe to task events
    ///
    /// Each subscriber gets its own receiver. A subscriber that falls more
    /// than `runtime.event_buffer` events behind receives `Lagged` and
    /// should re-read [`list`](Self::list).
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.event_tx.subscribe()
    }

    /// The configuration snapshot this controller runs with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Every task, in submission order
    pub async fn list(&self) -> Vec<TaskSnapshot> {
        self.manager.list().await
    }

    /// Tasks in one state
    pub async fn list_by_state(&self, state: TaskState) -> Vec<TaskSnapshot> {
        self.manager.list_by_state(state).await
    }

    /// One task
    pub async fn get(&self, id: &TaskId) -> Result<TaskSnapshot> {
        self.manager.get(id).await
    }

    /// Task counts per state
    pub async fn statistics(&self) -> TaskStatistics {
        self.manager.statistics().await
    }

    /// Drop Completed tasks from the registry
    pub async fn clear_finished(&self) -> usize {
        self.manager.clear_finished().await
    }

    /// Drop every Completed, Failed and Cancelled task from the registry
    pub async fn clear_terminal(&self) -> usize {
        self.manager.clear_terminal().await
    }
}
