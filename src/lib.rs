//! # taskdl
//!
//! Orchestration core for a multi-platform media downloader.
//!
//! ## Design Philosophy
//!
//! taskdl is designed to be:
//! - **UI-agnostic** - A desktop shell, CLI or web front end drives it the same way
//! - **Bounded** - At most `max_tasks` downloads hold a worker at any time
//! - **Cooperative** - Pause and cancel are requests the worker honors at
//!   well-defined checkpoints; nothing is killed
//! - **Event-driven** - Consumers subscribe to events, no polling required
//!
//! Platform scraping is not part of this crate. A [`FetchBackend`] turns a
//! request into a stream of fetched items; the controller handles queueing,
//! retries, timeouts, pause/resume/cancel and progress reporting around it.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use taskdl::{Config, DownloadController, FetchBackend, TaskRequest};
//!
//! # async fn example(backend: Arc<dyn FetchBackend>) -> Result<(), Box<dyn std::error::Error>> {
//! let controller = DownloadController::new(Config::default(), backend)?;
//!
//! // Subscribe to events
//! let mut events = controller.subscribe();
//! tokio::spawn(async move {
//!     while let Ok(event) = events.recv().await {
//!         println!("Event: {:?}", event);
//!     }
//! });
//!
//! let id = controller
//!     .submit(TaskRequest::parse("tiktok", "post", "https://www.tiktok.com/@someone")?)
//!     .await?;
//! controller.pause(&id).await?;
//! controller.resume(&id).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Fetch backend seam
pub mod backend;
/// Configuration types
pub mod config;
/// UI-facing controller (decomposed into focused submodules)
pub mod controller;
/// Error types
pub mod error;
/// Tracing subscriber setup
pub mod logging;
/// Task registry
pub mod manager;
/// Retry logic with exponential backoff
pub mod retry;
/// Task requests and snapshots
pub mod task;
/// Core types and events
pub mod types;

mod worker;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

// Re-export commonly used types
pub use backend::{
    FetchBackend, FetchEvent, FetchOptions, FetchRequest, FetchedItem, ItemStream, PlatformRouter,
};
pub use config::{Config, DownloadConfig, LogLevel, ProxyConfig, RetryConfig, RuntimeConfig};
pub use controller::DownloadController;
pub use controller::listener::TaskEventListener;
pub use error::{
    BackendError, BackendErrorKind, Error, FailureKind, Result, TaskFailure, ValidationError,
};
pub use logging::init_tracing;
pub use manager::{Admission, CancelDisposition, TaskManager};
pub use task::{TaskOverrides, TaskRequest, TaskSnapshot};
pub use types::{
    DownloadMode, Platform, Progress, TaskEvent, TaskId, TaskState, TaskStatistics,
};

/// Helper function to run the controller with graceful signal handling.
///
/// Waits for a termination signal and then calls the controller's `shutdown()` method.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use taskdl::{Config, DownloadController, FetchBackend, run_with_shutdown};
///
/// # async fn example(backend: Arc<dyn FetchBackend>) -> Result<(), Box<dyn std::error::Error>> {
/// let controller = DownloadController::new(Config::default(), backend)?;
///
/// // Run with automatic signal handling
/// run_with_shutdown(controller).await;
/// # Ok(())
/// # }
/// ```
pub async fn run_with_shutdown(controller: DownloadController) {
    wait_for_signal().await;
    controller.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), Ok(mut sigint)) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            sigint.recv().await;
            tracing::info!("Received SIGINT signal (Ctrl+C)");
        }
        (Ok(mut sigterm), Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            sigterm.recv().await;
            tracing::info!("Received SIGTERM signal");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "Could not register any signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
