use super::*;
use crate::error::{BackendError, FailureKind};
use crate::test_helpers::{Script, ScriptedBackend, Step, items, request, steady_backend, test_config};
use crate::types::TaskEvent;
use tokio::sync::broadcast;

struct Harness {
    manager: TaskManager,
    events: broadcast::Receiver<TaskEvent>,
    config: Arc<Config>,
}

fn harness(config: Config) -> Harness {
    let (event_tx, events) = broadcast::channel(1024);
    Harness {
        manager: TaskManager::new(config.max_concurrency(), event_tx),
        events,
        config: Arc::new(config),
    }
}

impl Harness {
    async fn admit(&self, backend: Arc<dyn FetchBackend>) -> (TaskId, Worker) {
        let id = self.manager.add(request("user")).await;
        let admission = self.manager.admit_next().await.unwrap();
        let ctx = WorkerContext {
            manager: self.manager.clone(),
            backend,
            config: self.config.clone(),
        };
        (id, Worker::new(ctx, admission))
    }

    fn progress_events(&mut self) -> Vec<Progress> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            if let TaskEvent::Updated { progress, .. } = event {
                out.push(progress);
            }
        }
        out
    }
}

#[tokio::test]
async fn completes_and_reports_final_progress() {
    let mut h = harness(test_config(1));
    let (id, worker) = h.admit(steady_backend(5, Duration::from_millis(1))).await;

    let result = worker.run().await;
    assert_eq!(result.outcome, Outcome::Completed);
    assert_eq!(result.progress, Progress::new(5, 5));
    assert_eq!(
        h.manager.get(&id).await.unwrap().progress,
        Progress::new(5, 5),
        "final progress is flushed before the worker returns"
    );

    let reported = h.progress_events();
    for pair in reported.windows(2) {
        assert!(
            pair[1].completed >= pair[0].completed,
            "progress went backwards: {:?}",
            reported
        );
    }
}

#[tokio::test]
async fn progress_events_are_coalesced() {
    let mut config = test_config(1);
    config.runtime.progress_interval = Duration::from_secs(10);
    let mut h = harness(config);
    let (_id, worker) = h.admit(steady_backend(50, Duration::ZERO)).await;
    h.progress_events();

    worker.run().await;

    // First change goes out at once, the rest is held until the final flush
    let reported = h.progress_events();
    assert!(
        reported.len() <= 3,
        "expected coalesced progress, got {} events",
        reported.len()
    );
    assert_eq!(reported.last(), Some(&Progress::new(50, 50)));
}

#[tokio::test]
async fn retries_network_errors_and_resumes_from_completed() {
    let backend = Arc::new(
        ScriptedBackend::new(Script::Play(items(4, Duration::ZERO)))
            .then(Script::Play(vec![
                Step::Resolve {
                    total: 4,
                    title: None,
                },
                Step::Item("a".into()),
                Step::Item("b".into()),
                Step::Fail(BackendError::network("connection reset")),
            ]))
            .then(Script::Refuse(BackendError::network("HTTP 503"))),
    );
    let h = harness(test_config(1));
    let (id, worker) = h.admit(backend.clone()).await;

    let result = worker.run().await;
    assert_eq!(result.outcome, Outcome::Completed);

    let resume: Vec<u64> = backend.requests().iter().map(|r| r.resume_from).collect();
    assert_eq!(resume, vec![0, 2, 2]);
    assert_eq!(h.manager.get(&id).await.unwrap().attempts, 3);
}

#[tokio::test]
async fn parse_errors_are_not_retried() {
    let backend = Arc::new(ScriptedBackend::new(Script::Refuse(BackendError::parse(
        "unexpected response shape",
    ))));
    let h = harness(test_config(1));
    let (_id, worker) = h.admit(backend.clone()).await;

    let result = worker.run().await;
    match result.outcome {
        Outcome::Failed(failure) => {
            assert_eq!(failure.kind, FailureKind::Parse);
            assert_eq!(failure.attempts, 1);
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(backend.attempts(), 1);
}

#[tokio::test]
async fn gives_up_after_retry_budget() {
    let backend = Arc::new(ScriptedBackend::new(Script::Refuse(BackendError::network(
        "DNS failure",
    ))));
    let h = harness(test_config(1));
    let (_id, worker) = h.admit(backend.clone()).await;

    let result = worker.run().await;
    match result.outcome {
        Outcome::Failed(failure) => {
            assert_eq!(failure.kind, FailureKind::Network);
            assert_eq!(failure.attempts, 4, "one try plus three retries");
            assert!(failure.message.contains("DNS"));
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(backend.attempts(), 4);
}

#[tokio::test]
async fn silent_backend_times_out_without_retry() {
    let mut config = test_config(1);
    config.download.timeout = Duration::from_millis(100);
    let backend = Arc::new(ScriptedBackend::new(Script::Play(vec![Step::Hang])));
    let h = harness(config);
    let (_id, worker) = h.admit(backend.clone()).await;

    let result = worker.run().await;
    match result.outcome {
        Outcome::Failed(failure) => assert_eq!(failure.kind, FailureKind::Timeout),
        other => panic!("expected timeout, got {:?}", other),
    }
    assert_eq!(backend.attempts(), 1);
}

#[tokio::test]
async fn progress_flush_does_not_extend_the_timeout() {
    let mut config = test_config(1);
    config.download.timeout = Duration::from_millis(400);
    config.runtime.progress_interval = Duration::from_millis(350);
    let backend = Arc::new(ScriptedBackend::new(Script::Play(vec![
        Step::Item("1".into()),
        Step::Sleep(Duration::from_millis(20)),
        // Held back until the flush deadline, which falls inside the silence
        Step::Item("2".into()),
        Step::Hang,
    ])));
    let h = harness(config);
    let (id, worker) = h.admit(backend).await;

    let started = tokio::time::Instant::now();
    let result = worker.run().await;
    let elapsed = started.elapsed();

    match result.outcome {
        Outcome::Failed(failure) => assert_eq!(failure.kind, FailureKind::Timeout),
        other => panic!("expected timeout, got {:?}", other),
    }
    assert!(
        elapsed < Duration::from_millis(650),
        "timeout counted from the flush instead of the last item: {:?}",
        elapsed
    );
    assert_eq!(h.manager.get(&id).await.unwrap().progress.completed, 2);
}

#[tokio::test]
async fn cancel_interrupts_a_hanging_backend() {
    let backend = Arc::new(ScriptedBackend::new(Script::Play(vec![Step::Hang])));
    let h = harness(test_config(1));
    let (id, worker) = h.admit(backend).await;

    let handle = tokio::spawn(worker.run());
    tokio::time::sleep(Duration::from_millis(50)).await;
    h.manager.request_cancel(&id).await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("worker should stop promptly")
        .unwrap();
    assert_eq!(result.outcome, Outcome::Cancelled);
}

#[tokio::test]
async fn cancel_during_backoff_stops_retrying() {
    let mut config = test_config(1);
    config.retry.initial_delay = Duration::from_secs(10);
    config.retry.max_delay = Duration::from_secs(10);
    let backend = Arc::new(ScriptedBackend::new(Script::Refuse(BackendError::network(
        "reset",
    ))));
    let h = harness(config);
    let (id, worker) = h.admit(backend.clone()).await;

    let handle = tokio::spawn(worker.run());
    tokio::time::sleep(Duration::from_millis(50)).await;
    h.manager.request_cancel(&id).await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result.outcome, Outcome::Cancelled);
    assert_eq!(backend.attempts(), 1);
}

#[tokio::test]
async fn pause_parks_the_worker_and_resume_continues() {
    let h = harness(test_config(1));
    let (id, worker) = h
        .admit(steady_backend(10, Duration::from_millis(20)))
        .await;

    let handle = tokio::spawn(worker.run());
    tokio::time::sleep(Duration::from_millis(70)).await;
    h.manager.set_paused(&id, true).await.unwrap();

    // Let any in-flight report land, then make sure nothing moves
    tokio::time::sleep(Duration::from_millis(60)).await;
    let parked = h.manager.get(&id).await.unwrap().progress;
    tokio::time::sleep(Duration::from_millis(150)).await;
    let still = h.manager.get(&id).await.unwrap();
    assert_eq!(still.state, TaskState::Paused);
    assert_eq!(still.progress, parked, "no progress while paused");
    assert!(parked.completed < 10);

    h.manager.set_paused(&id, false).await.unwrap();
    let result = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result.outcome, Outcome::Completed);
    assert_eq!(result.progress, Progress::new(10, 10));
}

#[tokio::test]
async fn cancel_wins_over_pause() {
    let h = harness(test_config(1));
    let (id, worker) = h
        .admit(steady_backend(10, Duration::from_millis(20)))
        .await;

    let handle = tokio::spawn(worker.run());
    tokio::time::sleep(Duration::from_millis(30)).await;
    h.manager.set_paused(&id, true).await.unwrap();
    h.manager.request_cancel(&id).await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result.outcome, Outcome::Cancelled);
}

#[tokio::test]
async fn titles_and_messages_reach_the_registry() {
    let backend = Arc::new(ScriptedBackend::new(Script::Play(vec![
        Step::Resolve {
            total: 1,
            title: Some("某人".into()),
        },
        Step::Message("page 1 of 1".into()),
        Step::Item("only".into()),
    ])));
    let h = harness(test_config(1));
    let (id, worker) = h.admit(backend).await;

    worker.run().await;
    let snapshot = h.manager.get(&id).await.unwrap();
    assert_eq!(snapshot.title.as_deref(), Some("某人"));
    assert_eq!(snapshot.last_message.as_deref(), Some("page 1 of 1"));
}

#[tokio::test]
async fn resolved_user_reaches_the_registry() {
    let backend = Arc::new(ScriptedBackend::new(Script::Play(vec![
        Step::User {
            user_id: "MS4wLjABAAAA".into(),
            nickname: None,
        },
        Step::Item("only".into()),
    ])));
    let h = harness(test_config(1));
    let (id, worker) = h.admit(backend).await;

    assert_eq!(worker.run().await.outcome, Outcome::Completed);
    let snapshot = h.manager.get(&id).await.unwrap();
    assert_eq!(snapshot.user_id.as_deref(), Some("MS4wLjABAAAA"));
    assert_eq!(snapshot.title, None);
}

#[tokio::test]
async fn effective_options_reach_the_backend() {
    let backend = steady_backend(1, Duration::ZERO);
    let h = harness(test_config(1));
    let id = h
        .manager
        .add(request("user").with_overrides(crate::task::TaskOverrides {
            max_counts: Some(7),
            ..Default::default()
        }))
        .await;
    let admission = h.manager.admit_next().await.unwrap();
    let ctx = WorkerContext {
        manager: h.manager.clone(),
        backend: backend.clone(),
        config: h.config.clone(),
    };
    Worker::new(ctx, admission).run().await;

    let sent = &backend.requests()[0];
    assert_eq!(sent.task_id, id);
    assert_eq!(sent.options.max_counts, 7);
    assert_eq!(sent.options.naming_template, "{create}_{desc}");
}
