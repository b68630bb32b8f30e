//! Callback-style event delivery.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::types::TaskEvent;

use super::DownloadController;

/// Receives task events, e.g. a UI adapter that forwards them to widgets
///
/// Called from a dedicated tokio task, one event at a time and in the
/// order events were emitted. Implementations should return quickly.
pub trait TaskEventListener: Send + Sync + 'static {
    /// Handle one event
    fn on_task_event(&self, event: &TaskEvent);
}

impl<F> TaskEventListener for F
where
    F: Fn(&TaskEvent) + Send + Sync + 'static,
{
    fn on_task_event(&self, event: &TaskEvent) {
        self(event)
    }
}

impl DownloadController {
    /// Deliver every future event to `listener`
    ///
    /// Delivery stops after [`TaskEvent::Shutdown`] or when the returned
    /// handle is aborted.
    pub fn attach_listener(&self, listener: Arc<dyn TaskEventListener>) -> JoinHandle<()> {
        let mut rx = self.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        listener.on_task_event(&event);
                        if matches!(event, TaskEvent::Shutdown) {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "event listener lagged behind, events dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}
