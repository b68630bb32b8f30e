//! Common test utilities for taskdl integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use taskdl::{
    BackendError, Config, DownloadController, FetchBackend, FetchEvent, FetchRequest, FetchedItem,
    ItemStream, TaskEvent, TaskId, TaskSnapshot, TaskState,
};

/// Backend that yields `total` items named after the source, one every `delay`
///
/// The first `failures` fetches are refused with a network error.
pub struct CountingBackend {
    total: u64,
    delay: Duration,
    failures: usize,
    calls: AtomicUsize,
}

impl CountingBackend {
    pub fn new(total: u64, delay: Duration) -> Self {
        Self {
            total,
            delay,
            failures: 0,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing_first(mut self, failures: usize) -> Self {
        self.failures = failures;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl FetchBackend for CountingBackend {
    async fn fetch(&self, request: &FetchRequest) -> Result<ItemStream, BackendError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(BackendError::network(format!("refused attempt {}", call + 1)));
        }

        let total = match request.options.max_counts {
            0 => self.total,
            limit => self.total.min(limit),
        };
        let delay = self.delay;
        let source = request.source.clone();
        let resolved = futures::stream::once(async move {
            Ok::<_, BackendError>(FetchEvent::Resolved { total, title: None })
        });
        let items = futures::stream::iter(request.resume_from..total).then(move |n| {
            let name = format!("{}#{}", source, n);
            async move {
                tokio::time::sleep(delay).await;
                Ok(FetchEvent::Item(FetchedItem::named(name)))
            }
        });
        Ok(resolved.chain(items).boxed())
    }

    fn name(&self) -> &str {
        "counting"
    }
}

/// Config with short timings suitable for tests
pub fn fast_config(max_tasks: usize) -> Config {
    let mut config = Config::default();
    config.download.max_tasks = max_tasks;
    config.download.timeout = Duration::from_secs(2);
    config.retry.initial_delay = Duration::from_millis(10);
    config.retry.max_delay = Duration::from_millis(40);
    config.retry.jitter = false;
    config.runtime.progress_interval = Duration::from_millis(20);
    config.runtime.cancel_grace = Duration::from_secs(1);
    config
}

/// Poll until the task reaches `state`, panicking after two seconds
pub async fn wait_for_state(
    controller: &DownloadController,
    id: &TaskId,
    state: TaskState,
) -> TaskSnapshot {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let snapshot = controller.get(id).await.expect("task should exist");
        if snapshot.state == state {
            return snapshot;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "task {} stuck in {:?} waiting for {:?}",
            id,
            snapshot.state,
            state
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Everything currently buffered on a subscription
pub fn drain(events: &mut tokio::sync::broadcast::Receiver<TaskEvent>) -> Vec<TaskEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

pub fn shared(backend: CountingBackend) -> Arc<CountingBackend> {
    Arc::new(backend)
}
