//! Task entity: immutable request plus runtime state.
//!
//! A [`Task`] only knows how to apply transitions consistently; it never
//! decides when to transition. That is the worker's and controller's job.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::OnceLock;

use crate::error::{Error, Result, TaskFailure, ValidationError};
use crate::types::{DownloadMode, Platform, Progress, TaskId, TaskState};

/// Per-task overrides of the config snapshot
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOverrides {
    /// Maximum number of items to fetch for this task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_counts: Option<u64>,
    /// Backend connections for this task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<usize>,
    /// Output file naming template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub naming_template: Option<String>,
    /// Output directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// A user's download request, fixed once submitted
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Target platform
    pub platform: Platform,
    /// What to download
    pub mode: DownloadMode,
    /// URL, share text containing a URL, or a user identifier
    pub source: String,
    /// Optional display title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Per-task option overrides
    #[serde(default)]
    pub overrides: TaskOverrides,
}

impl TaskRequest {
    /// Create a request with no overrides
    pub fn new(platform: Platform, mode: DownloadMode, source: impl Into<String>) -> Self {
        Self {
            platform,
            mode,
            source: source.into(),
            title: None,
            overrides: TaskOverrides::default(),
        }
    }

    /// Create a request from the names a UI combobox would hand over
    pub fn parse(
        platform: &str,
        mode: &str,
        source: impl Into<String>,
    ) -> std::result::Result<Self, ValidationError> {
        Ok(Self::new(platform.parse()?, mode.parse()?, source))
    }

    /// Set the display title
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Replace the overrides
    pub fn with_overrides(mut self, overrides: TaskOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Validate the request and return it with a normalized source
    ///
    /// Share text such as `"7.43 复制打开抖音 https://v.douyin.com/abc/ ..."`
    /// is reduced to the embedded URL. Anything without a URL is treated as a
    /// plain identifier and only trimmed.
    pub fn validated(&self) -> std::result::Result<TaskRequest, ValidationError> {
        if !self.platform.supports(self.mode) {
            return Err(ValidationError::UnsupportedMode {
                platform: self.platform,
                mode: self.mode,
            });
        }

        let source = normalize_source(&self.source)?;

        let overrides = &self.overrides;
        if overrides.max_counts == Some(0) {
            return Err(ValidationError::NonPositive {
                field: "max_counts",
            });
        }
        if overrides.max_connections == Some(0) {
            return Err(ValidationError::NonPositive {
                field: "max_connections",
            });
        }
        if overrides
            .naming_template
            .as_deref()
            .is_some_and(|t| t.trim().is_empty())
        {
            return Err(ValidationError::EmptyOverride {
                field: "naming_template",
            });
        }
        if overrides
            .path
            .as_ref()
            .is_some_and(|p| p.as_os_str().is_empty())
        {
            return Err(ValidationError::EmptyOverride { field: "path" });
        }

        Ok(TaskRequest {
            source,
            title: self
                .title
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string),
            ..self.clone()
        })
    }
}

fn url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        #[allow(clippy::expect_used)]
        Regex::new(r"[A-Za-z][A-Za-z0-9+.-]*://[^\s，。！？、]+").expect("URL pattern is valid")
    })
}

/// Reduce a raw source to a URL or trimmed identifier
fn normalize_source(raw: &str) -> std::result::Result<String, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptySource);
    }

    let Some(found) = url_pattern().find(trimmed) else {
        return Ok(trimmed.to_string());
    };

    let candidate = found.as_str();
    let parsed = url::Url::parse(candidate).map_err(|e| ValidationError::InvalidUrl {
        source_url: candidate.to_string(),
        reason: e.to_string(),
    })?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(ValidationError::InvalidUrl {
                source_url: candidate.to_string(),
                reason: format!("unsupported scheme {}", other),
            });
        }
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(ValidationError::InvalidUrl {
            source_url: candidate.to_string(),
            reason: "missing host".to_string(),
        });
    }
    Ok(candidate.to_string())
}

/// Point-in-time copy of a task, safe to hand to the UI
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    /// Task ID
    pub id: TaskId,
    /// The (normalized) request
    pub request: TaskRequest,
    /// Display title; the request title or one resolved by the backend
    pub title: Option<String>,
    /// Lifecycle state
    pub state: TaskState,
    /// Item progress
    pub progress: Progress,
    /// Failure summary when `state` is Failed
    pub failure: Option<TaskFailure>,
    /// Backend attempts made so far
    pub attempts: u32,
    /// Platform user ID resolved by the backend
    pub user_id: Option<String>,
    /// Most recent backend message
    pub last_message: Option<String>,
    /// When the task was added
    pub created_at: DateTime<Utc>,
    /// When the task first started running
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal state
    pub finished_at: Option<DateTime<Utc>>,
}

/// A registered task
#[derive(Debug, Clone)]
pub(crate) struct Task {
    id: TaskId,
    request: TaskRequest,
    title: Option<String>,
    state: TaskState,
    progress: Progress,
    failure: Option<TaskFailure>,
    attempts: u32,
    user_id: Option<String>,
    last_message: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl Task {
    /// New Queued task
    pub(crate) fn new(id: TaskId, request: TaskRequest) -> Self {
        Self {
            id,
            title: request.title.clone(),
            request,
            state: TaskState::Queued,
            progress: Progress::default(),
            failure: None,
            attempts: 0,
            user_id: None,
            last_message: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub(crate) fn id(&self) -> &TaskId {
        &self.id
    }

    pub(crate) fn request(&self) -> &TaskRequest {
        &self.request
    }

    pub(crate) fn state(&self) -> TaskState {
        self.state
    }

    pub(crate) fn progress(&self) -> Progress {
        self.progress
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.attempts
    }

    pub(crate) fn failure(&self) -> Option<&TaskFailure> {
        self.failure.as_ref()
    }

    /// Reject `next` unless the state machine allows it
    pub(crate) fn check_transition(&self, operation: &str, next: TaskState) -> Result<()> {
        if self.state.can_transition_to(next) {
            Ok(())
        } else {
            Err(Error::invalid_state(&self.id, operation, self.state))
        }
    }

    /// Apply a state change, stamping start/finish times
    pub(crate) fn transition(&mut self, operation: &str, next: TaskState) -> Result<()> {
        self.check_transition(operation, next)?;

        let now = Utc::now();
        if next == TaskState::Running && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.finished_at = Some(now);
            if next == TaskState::Completed && !self.progress.is_known() {
                self.progress.total = self.progress.completed;
            }
        }
        self.state = next;
        Ok(())
    }

    /// Merge a progress report
    ///
    /// The numerator never moves backwards and the denominator is raised if
    /// the backend delivers more items than it announced, so
    /// `completed <= total` holds whenever `total` is known.
    pub(crate) fn apply_progress(&mut self, update: Progress) -> Result<()> {
        if !self.state.is_active() {
            return Err(Error::invalid_state(
                &self.id,
                "update progress of",
                self.state,
            ));
        }

        let completed = self.progress.completed.max(update.completed);
        let mut total = if update.total > 0 {
            update.total
        } else {
            self.progress.total
        };
        if total > 0 && completed > total {
            total = completed;
        }
        self.progress = Progress { completed, total };
        Ok(())
    }

    pub(crate) fn set_failure(&mut self, failure: TaskFailure) {
        self.failure = Some(failure);
    }

    pub(crate) fn set_title(&mut self, title: String) {
        self.title = Some(title);
    }

    pub(crate) fn set_user_id(&mut self, user_id: String) {
        self.user_id = Some(user_id);
    }

    pub(crate) fn set_message(&mut self, message: String) {
        self.last_message = Some(message);
    }

    pub(crate) fn record_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    pub(crate) fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id.clone(),
            request: self.request.clone(),
            title: self.title.clone(),
            state: self.state,
            progress: self.progress,
            failure: self.failure.clone(),
            attempts: self.attempts,
            user_id: self.user_id.clone(),
            last_message: self.last_message.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}
