//! Shared test helpers: scripted fetch backends, fast test configs and
//! polling utilities.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;

use crate::backend::{FetchBackend, FetchEvent, FetchRequest, FetchedItem, ItemStream};
use crate::config::Config;
use crate::error::BackendError;
use crate::task::TaskRequest;
use crate::types::{DownloadMode, Platform};

/// One scripted backend action
#[derive(Clone, Debug)]
pub(crate) enum Step {
    Resolve { total: u64, title: Option<String> },
    User { user_id: String, nickname: Option<String> },
    Item(String),
    Message(String),
    Sleep(Duration),
    Fail(BackendError),
    /// Never yield again
    Hang,
}

/// What one attempt does
#[derive(Clone, Debug)]
pub(crate) enum Script {
    /// `fetch` itself fails
    Refuse(BackendError),
    /// `fetch` succeeds and the stream plays these steps
    Play(Vec<Step>),
}

/// Backend that plays one script per attempt
///
/// Once the queued scripts run out, `fallback` is played for every further
/// attempt. Every request is recorded so tests can check `resume_from`.
pub(crate) struct ScriptedBackend {
    scripts: Mutex<VecDeque<Script>>,
    fallback: Script,
    requests: Mutex<Vec<FetchRequest>>,
}

impl ScriptedBackend {
    pub(crate) fn new(fallback: Script) -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            fallback,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Play `script` before falling back
    pub(crate) fn then(self, script: Script) -> Self {
        self.scripts.lock().unwrap().push_back(script);
        self
    }

    pub(crate) fn requests(&self) -> Vec<FetchRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn attempts(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl FetchBackend for ScriptedBackend {
    async fn fetch(&self, request: &FetchRequest) -> Result<ItemStream, BackendError> {
        self.requests.lock().unwrap().push(request.clone());
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        let steps = match script {
            Script::Refuse(e) => return Err(e),
            Script::Play(steps) => steps,
        };

        let stream = futures::stream::unfold(steps.into_iter(), |mut steps| async move {
            loop {
                let event = match steps.next()? {
                    Step::Sleep(d) => {
                        tokio::time::sleep(d).await;
                        continue;
                    }
                    Step::Hang => std::future::pending().await,
                    Step::Resolve { total, title } => Ok(FetchEvent::Resolved { total, title }),
                    Step::User { user_id, nickname } => {
                        Ok(FetchEvent::UserResolved { user_id, nickname })
                    }
                    Step::Item(name) => Ok(FetchEvent::Item(FetchedItem::named(name))),
                    Step::Message(m) => Ok(FetchEvent::Message(m)),
                    Step::Fail(e) => Err(e),
                };
                return Some((event, steps));
            }
        });
        Ok(stream.boxed())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// `n` items, each preceded by `delay`, after announcing the total
pub(crate) fn items(n: u64, delay: Duration) -> Vec<Step> {
    let mut steps = vec![Step::Resolve {
        total: n,
        title: None,
    }];
    for i in 0..n {
        steps.push(Step::Sleep(delay));
        steps.push(Step::Item(format!("item-{}", i)));
    }
    steps
}

/// Backend that delivers `n` items `delay` apart on every attempt
pub(crate) fn steady_backend(n: u64, delay: Duration) -> Arc<ScriptedBackend> {
    Arc::new(ScriptedBackend::new(Script::Play(items(n, delay))))
}

/// Config with short timings so tests run quickly
pub(crate) fn test_config(max_tasks: usize) -> Config {
    let mut config = Config::default();
    config.download.max_tasks = max_tasks;
    config.download.timeout = Duration::from_secs(2);
    config.retry.max_attempts = 3;
    config.retry.initial_delay = Duration::from_millis(10);
    config.retry.max_delay = Duration::from_millis(50);
    config.retry.jitter = false;
    config.runtime.progress_interval = Duration::from_millis(20);
    config.runtime.cancel_grace = Duration::from_secs(1);
    config
}

pub(crate) fn request(source: &str) -> TaskRequest {
    TaskRequest::new(Platform::Douyin, DownloadMode::Post, source)
}

/// Backend whose tasks finish only when the test releases them
///
/// Each attempt announces one item, then waits until [`GatedBackend::release`]
/// is called for its source.
#[derive(Default)]
pub(crate) struct GatedBackend {
    gates: Mutex<std::collections::HashMap<String, Arc<tokio::sync::Notify>>>,
}

impl GatedBackend {
    fn gate(&self, source: &str) -> Arc<tokio::sync::Notify> {
        self.gates
            .lock()
            .unwrap()
            .entry(source.to_string())
            .or_default()
            .clone()
    }

    /// Let the task for `source` deliver its item and finish
    pub(crate) fn release(&self, source: &str) {
        self.gate(source).notify_one();
    }
}

#[async_trait::async_trait]
impl FetchBackend for GatedBackend {
    async fn fetch(&self, request: &FetchRequest) -> Result<ItemStream, BackendError> {
        let gate = self.gate(&request.source);
        let stream = futures::stream::once(async {
            Ok::<_, BackendError>(FetchEvent::Resolved {
                total: 1,
                title: None,
            })
        })
        .chain(futures::stream::once(async move {
            gate.notified().await;
            Ok(FetchEvent::Item(FetchedItem::named("gated")))
        }));
        Ok(stream.boxed())
    }

    fn name(&self) -> &str {
        "gated"
    }
}

/// Backend whose stream cancels its own task while reporting the end
///
/// One item is delivered; the poll that ends the stream first calls
/// `cancel` on the controller, so the cancel lands after the backend is done
/// but before the outcome is recorded.
#[derive(Default)]
pub(crate) struct CancelOnDrainBackend {
    controller: std::sync::OnceLock<crate::controller::DownloadController>,
    cancel_accepted: Arc<Mutex<Option<bool>>>,
}

impl CancelOnDrainBackend {
    pub(crate) fn attach(&self, controller: crate::controller::DownloadController) {
        let _ = self.controller.set(controller);
    }

    /// Whether the in-stream cancel returned `Ok`, once it ran
    pub(crate) fn cancel_accepted(&self) -> Option<bool> {
        *self.cancel_accepted.lock().unwrap()
    }
}

#[async_trait::async_trait]
impl FetchBackend for CancelOnDrainBackend {
    async fn fetch(&self, request: &FetchRequest) -> Result<ItemStream, BackendError> {
        let controller = self.controller.get().cloned().expect("controller attached");
        let accepted = self.cancel_accepted.clone();
        let id = request.task_id.clone();

        let stream = futures::stream::unfold(0u8, move |step| {
            let controller = controller.clone();
            let accepted = accepted.clone();
            let id = id.clone();
            async move {
                match step {
                    0 => Some((
                        Ok::<_, BackendError>(FetchEvent::Resolved {
                            total: 1,
                            title: None,
                        }),
                        1,
                    )),
                    1 => Some((Ok(FetchEvent::Item(FetchedItem::named("last"))), 2)),
                    _ => {
                        let result = controller.cancel(&id).await;
                        *accepted.lock().unwrap() = Some(result.is_ok());
                        None
                    }
                }
            }
        });
        Ok(stream.boxed())
    }
}

/// Backend that panics inside `fetch`
pub(crate) struct PanickingBackend;

#[async_trait::async_trait]
impl FetchBackend for PanickingBackend {
    async fn fetch(&self, _request: &FetchRequest) -> Result<ItemStream, BackendError> {
        panic!("backend bug");
    }
}

pub(crate) fn controller(
    config: Config,
    backend: Arc<dyn FetchBackend>,
) -> crate::controller::DownloadController {
    crate::controller::DownloadController::new(config, backend).unwrap()
}

/// Poll until the task reaches `state`, panicking after two seconds
pub(crate) async fn wait_for_state(
    controller: &crate::controller::DownloadController,
    id: &crate::types::TaskId,
    state: crate::types::TaskState,
) -> crate::task::TaskSnapshot {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let snapshot = controller.get(id).await.unwrap();
        if snapshot.state == state {
            return snapshot;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "task {} stuck in {} waiting for {}",
            id,
            snapshot.state,
            state
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Every event received so far
pub(crate) fn drain(
    rx: &mut tokio::sync::broadcast::Receiver<crate::types::TaskEvent>,
) -> Vec<crate::types::TaskEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// States from `Updated` events for one task, in order
pub(crate) fn states_of(
    events: &[crate::types::TaskEvent],
    id: &crate::types::TaskId,
) -> Vec<crate::types::TaskState> {
    events
        .iter()
        .filter_map(|e| match e {
            crate::types::TaskEvent::Updated { id: eid, state, .. } if eid == id => Some(*state),
            _ => None,
        })
        .collect()
}
