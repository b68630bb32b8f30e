//! Fetch backend seam
//!
//! The orchestration core never talks to a platform directly. A worker
//! hands a [`FetchRequest`] to a [`FetchBackend`] and consumes the returned
//! [`ItemStream`]: a `Resolved` event once the item count is known, one
//! `Item` per finished artifact, and free-form `Message`s. The stream ending
//! means success; an `Err` item ends the attempt.
//!
//! A backend may use as many connections internally as
//! [`FetchOptions::max_connections`] allows. It should honor
//! [`FetchRequest::resume_from`] by skipping items already delivered in an
//! earlier attempt.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::BackendError;
use crate::task::TaskOverrides;
use crate::types::{DownloadMode, Platform, TaskId};

/// Stream of backend events for one attempt
pub type ItemStream = BoxStream<'static, Result<FetchEvent, BackendError>>;

/// Abstraction over platform fetchers, enabling testability
#[async_trait::async_trait]
pub trait FetchBackend: Send + Sync {
    /// Start fetching; the returned stream drives the attempt
    async fn fetch(&self, request: &FetchRequest) -> Result<ItemStream, BackendError>;

    /// Short name used in logs
    fn name(&self) -> &str {
        "backend"
    }
}

/// Everything a backend needs for one attempt
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FetchRequest {
    /// Task the attempt belongs to
    pub task_id: TaskId,
    /// Target platform
    pub platform: Platform,
    /// What to download
    pub mode: DownloadMode,
    /// Normalized URL or user identifier
    pub source: String,
    /// Effective options for this task
    pub options: FetchOptions,
    /// Items already delivered by previous attempts
    pub resume_from: u64,
}

/// Config snapshot merged with a task's overrides
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FetchOptions {
    /// Output directory
    pub path: PathBuf,
    /// File naming template
    pub naming_template: String,
    /// Maximum file name length
    pub file_name_length: usize,
    /// Item limit, 0 = unlimited
    pub max_counts: u64,
    /// Connections the backend may open
    pub max_connections: usize,
    /// Items per page request
    pub page_counts: usize,
    /// Request timeout
    pub timeout: Duration,
    /// Proxy URL when the proxy is enabled
    pub proxy: Option<String>,
}

impl FetchOptions {
    /// Merge per-task overrides over the config snapshot
    pub fn effective(config: &Config, overrides: &TaskOverrides) -> Self {
        let download = &config.download;
        Self {
            path: overrides
                .path
                .clone()
                .unwrap_or_else(|| download.path.clone()),
            naming_template: overrides
                .naming_template
                .clone()
                .unwrap_or_else(|| download.naming_template.clone()),
            file_name_length: download.file_name_length,
            max_counts: overrides.max_counts.unwrap_or(download.max_counts),
            max_connections: overrides
                .max_connections
                .unwrap_or(download.max_connections),
            page_counts: download.page_counts,
            timeout: download.timeout,
            proxy: config.proxy.effective_address().map(str::to_string),
        }
    }
}

/// A single event from a backend stream
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FetchEvent {
    /// The backend learned how many items there are and/or a display title
    Resolved {
        /// Total item count, 0 if still unknown
        total: u64,
        /// Display title (nickname, collection name)
        title: Option<String>,
    },
    /// The backend identified the account behind the source
    UserResolved {
        /// Platform user ID (sec_uid, uid, screen name)
        user_id: String,
        /// Display name, if known
        nickname: Option<String>,
    },
    /// One item finished
    Item(FetchedItem),
    /// Human-readable status text
    Message(String),
}

/// A finished artifact
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchedItem {
    /// Item name (title or platform ID)
    pub name: String,
    /// Where it was written, if the backend wrote a file
    pub path: Option<PathBuf>,
}

impl FetchedItem {
    /// Item with a name and no path
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: None,
        }
    }
}

/// Dispatches requests to one backend per platform
#[derive(Default, Clone)]
pub struct PlatformRouter {
    backends: HashMap<Platform, Arc<dyn FetchBackend>>,
}

impl PlatformRouter {
    /// Empty router
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the backend for a platform
    pub fn with(mut self, platform: Platform, backend: Arc<dyn FetchBackend>) -> Self {
        self.backends.insert(platform, backend);
        self
    }

    /// Platforms with a registered backend
    pub fn platforms(&self) -> Vec<Platform> {
        Platform::ALL
            .into_iter()
            .filter(|p| self.backends.contains_key(p))
            .collect()
    }
}

#[async_trait::async_trait]
impl FetchBackend for PlatformRouter {
    async fn fetch(&self, request: &FetchRequest) -> Result<ItemStream, BackendError> {
        match self.backends.get(&request.platform) {
            Some(backend) => {
                tracing::debug!(
                    task_id = %request.task_id,
                    platform = %request.platform,
                    backend = backend.name(),
                    "routing fetch request"
                );
                backend.fetch(request).await
            }
            None => Err(BackendError::unknown(format!(
                "no backend registered for platform {}",
                request.platform
            ))),
        }
    }

    fn name(&self) -> &str {
        "router"
    }
}
