//! Console front end example
//!
//! This example drives the controller the way a desktop shell would:
//! - Installing the tracing subscriber
//! - Routing platforms to (simulated) fetch backends
//! - Printing task events as they arrive
//! - Pausing, resuming and cancelling tasks
//! - Shutting down on Ctrl+C, or after the demo tasks settle

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use taskdl::{
    BackendError, Config, DownloadController, FetchBackend, FetchEvent, FetchRequest, FetchedItem,
    ItemStream, Platform, PlatformRouter, TaskEvent, TaskRequest, TaskState, init_tracing,
    run_with_shutdown,
};

/// Pretends to page through a user's posts
struct SimulatedBackend {
    items: u64,
    delay: Duration,
}

#[async_trait::async_trait]
impl FetchBackend for SimulatedBackend {
    async fn fetch(&self, request: &FetchRequest) -> Result<ItemStream, BackendError> {
        let total = match request.options.max_counts {
            0 => self.items,
            limit => self.items.min(limit),
        };
        let delay = self.delay;
        let title = format!("{} ({})", request.source, request.platform);
        let head = futures::stream::iter([
            Ok::<_, BackendError>(FetchEvent::Message(format!(
                "resolving {}",
                request.source
            ))),
            Ok(FetchEvent::UserResolved {
                user_id: request.source.clone(),
                nickname: None,
            }),
            Ok(FetchEvent::Resolved {
                total,
                title: Some(title),
            }),
        ]);
        let items = futures::stream::iter(request.resume_from..total).then(move |n| async move {
            tokio::time::sleep(delay).await;
            Ok(FetchEvent::Item(FetchedItem::named(format!("item_{:03}.mp4", n + 1))))
        });
        Ok(head.chain(items).boxed())
    }

    fn name(&self) -> &str {
        "simulated"
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = Config::default();
    config.download.max_tasks = 2;
    config.runtime.progress_interval = Duration::from_millis(250);
    init_tracing(config.log_level)?;

    let router = PlatformRouter::new()
        .with(
            Platform::Douyin,
            Arc::new(SimulatedBackend {
                items: 12,
                delay: Duration::from_millis(150),
            }),
        )
        .with(
            Platform::TikTok,
            Arc::new(SimulatedBackend {
                items: 8,
                delay: Duration::from_millis(200),
            }),
        );

    let controller = DownloadController::new(config, Arc::new(router))?;

    controller.attach_listener(Arc::new(|event: &TaskEvent| match event {
        TaskEvent::Added { id, platform, mode, source } => {
            println!("+ {} queued: {} {} {}", id, platform, mode, source);
        }
        TaskEvent::Updated {
            id,
            state,
            progress,
            failure,
        } => match failure {
            Some(failure) => println!("x {} {}: {}", id, state, failure),
            None => println!(
                "~ {} {} {}/{} ({:.0}%)",
                id,
                state,
                progress.completed,
                progress.total,
                progress.percent().unwrap_or(0.0)
            ),
        },
        TaskEvent::TitleChanged { id, title } => println!("# {} is \"{}\"", id, title),
        TaskEvent::UserResolved { id, user_id, .. } => println!("@ {} belongs to {}", id, user_id),
        TaskEvent::Message { id, message } => println!("i {} {}", id, message),
        TaskEvent::Removed { id } => println!("- {} removed", id),
        TaskEvent::Shutdown => println!("controller shut down"),
    }));

    let first = controller
        .submit(TaskRequest::parse(
            "douyin",
            "post",
            "长按复制此条消息 https://v.douyin.com/iRNBho6u/ 打开抖音搜索",
        )?)
        .await?;
    let second = controller
        .submit(TaskRequest::parse("tiktok", "like", "@someone")?)
        .await?;
    let third = controller
        .submit(TaskRequest::parse("douyin", "like", "MS4wLjABAAAA")?)
        .await?;

    tokio::time::sleep(Duration::from_millis(600)).await;
    controller.pause(&first).await?;
    tokio::time::sleep(Duration::from_millis(600)).await;
    controller.resume(&first).await?;
    controller.cancel(&second).await?;

    let watcher = controller.clone();
    let settled = async move {
        loop {
            let stats = watcher.statistics().await;
            if stats.queued + stats.running + stats.paused == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    };

    tokio::select! {
        _ = settled => {
            for snapshot in controller.list().await {
                println!("{} -> {:?}", snapshot.id, snapshot.state);
            }
            let done = controller.list_by_state(TaskState::Completed).await;
            println!("{} completed, third task {}", done.len(), third);
            controller.shutdown().await;
        }
        _ = run_with_shutdown(controller.clone()) => {}
    }

    Ok(())
}
