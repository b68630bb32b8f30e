//! Core types for taskdl

use serde::{Deserialize, Serialize};

use crate::error::{TaskFailure, ValidationError};

/// Unique identifier for a task
///
/// Opaque string assigned at submission (a UUID v4) and never reused.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Generate a fresh identifier
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Supported content platforms
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Douyin
    Douyin,
    /// TikTok
    TikTok,
    /// Weibo
    Weibo,
    /// Twitter / X
    Twitter,
}

impl Platform {
    /// Every platform in the catalogue
    pub const ALL: [Platform; 4] = [
        Platform::Douyin,
        Platform::TikTok,
        Platform::Weibo,
        Platform::Twitter,
    ];

    /// Stable lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Douyin => "douyin",
            Platform::TikTok => "tiktok",
            Platform::Weibo => "weibo",
            Platform::Twitter => "twitter",
        }
    }

    /// Modes this platform's backend offers
    pub fn modes(&self) -> &'static [DownloadMode] {
        use DownloadMode::*;
        match self {
            Platform::Douyin => &[One, Post, Like, Collection, Music, Mix, Live],
            Platform::TikTok => &[One, Post, Like, Collect, Mix, Search, Live],
            Platform::Weibo => &[One, Post],
            Platform::Twitter => &[One, Post, Like, Bookmark],
        }
    }

    /// Whether `mode` is available on this platform
    pub fn supports(&self, mode: DownloadMode) -> bool {
        self.modes().contains(&mode)
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Platform {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "douyin" => Ok(Platform::Douyin),
            "tiktok" => Ok(Platform::TikTok),
            "weibo" => Ok(Platform::Weibo),
            "twitter" | "x" => Ok(Platform::Twitter),
            _ => Err(ValidationError::UnknownPlatform(s.to_string())),
        }
    }
}

/// What a task downloads
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadMode {
    /// A single item
    One,
    /// A user's timeline / posts
    Post,
    /// A user's likes list
    Like,
    /// A user's saved collection (Douyin)
    Collection,
    /// A user's saved collection (TikTok)
    Collect,
    /// Items using a given music track
    Music,
    /// A mix / playlist
    Mix,
    /// A live stream recording
    Live,
    /// Search results
    Search,
    /// Bookmarks
    Bookmark,
}

impl DownloadMode {
    /// Stable lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadMode::One => "one",
            DownloadMode::Post => "post",
            DownloadMode::Like => "like",
            DownloadMode::Collection => "collection",
            DownloadMode::Collect => "collect",
            DownloadMode::Music => "music",
            DownloadMode::Mix => "mix",
            DownloadMode::Live => "live",
            DownloadMode::Search => "search",
            DownloadMode::Bookmark => "bookmark",
        }
    }

    /// Whether the mode fetches exactly one item
    pub fn is_single(&self) -> bool {
        matches!(self, DownloadMode::One)
    }
}

impl std::fmt::Display for DownloadMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DownloadMode {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        let mode = match normalized.as_str() {
            "one" => DownloadMode::One,
            "post" => DownloadMode::Post,
            "like" => DownloadMode::Like,
            "collection" => DownloadMode::Collection,
            "collect" => DownloadMode::Collect,
            "music" => DownloadMode::Music,
            "mix" => DownloadMode::Mix,
            "live" => DownloadMode::Live,
            "search" => DownloadMode::Search,
            "bookmark" => DownloadMode::Bookmark,
            _ => return Err(ValidationError::UnknownMode(s.to_string())),
        };
        Ok(mode)
    }
}

/// Task lifecycle state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Admitted to the registry, waiting for a concurrency slot
    Queued,
    /// A worker is executing the task
    Running,
    /// The worker is parked until resumed or cancelled
    Paused,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
    /// Stopped on user request
    Cancelled,
}

impl TaskState {
    /// Terminal states accept no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }

    /// Running and Paused hold a worker and a concurrency slot
    pub fn is_active(&self) -> bool {
        matches!(self, TaskState::Running | TaskState::Paused)
    }

    /// Whether the state machine allows moving from `self` to `next`
    ///
    /// Same-state moves are allowed only for Running and Paused, where they
    /// carry progress updates.
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Queued, Running)
                | (Queued, Cancelled)
                | (Running, Running)
                | (Running, Paused)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Paused, Paused)
                | (Paused, Running)
                | (Paused, Completed)
                | (Paused, Failed)
                | (Paused, Cancelled)
        )
    }

    /// Stable lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Queued => "queued",
            TaskState::Running => "running",
            TaskState::Paused => "paused",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Item-level progress of a task
///
/// `total == 0` means the backend has not resolved the item count yet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// Items fetched so far
    pub completed: u64,
    /// Items expected (0 = unknown)
    pub total: u64,
}

impl Progress {
    /// Create a progress value
    pub fn new(completed: u64, total: u64) -> Self {
        Self { completed, total }
    }

    /// Whether the denominator is known
    pub fn is_known(&self) -> bool {
        self.total > 0
    }

    /// Percentage in `0.0..=100.0`, or `None` while the total is unknown
    pub fn percent(&self) -> Option<f32> {
        if self.total == 0 {
            None
        } else {
            Some((self.completed as f32 / self.total as f32) * 100.0)
        }
    }
}

/// Event emitted during the task lifecycle
///
/// Events for a single task are delivered in the order the underlying
/// registry mutations happened. Ordering across tasks is unspecified.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEvent {
    /// Task added to the registry (state Queued)
    Added {
        /// Task ID
        id: TaskId,
        /// Platform of the request
        platform: Platform,
        /// Mode of the request
        mode: DownloadMode,
        /// Normalized source
        source: String,
    },

    /// State and/or progress changed
    Updated {
        /// Task ID
        id: TaskId,
        /// State after the change
        state: TaskState,
        /// Progress after the change
        progress: Progress,
        /// Failure summary (present when `state` is Failed)
        #[serde(skip_serializing_if = "Option::is_none")]
        failure: Option<TaskFailure>,
    },

    /// Backend resolved a display title (e.g., the user's nickname)
    TitleChanged {
        /// Task ID
        id: TaskId,
        /// New title
        title: String,
    },

    /// Backend identified the account behind the source
    UserResolved {
        /// Task ID
        id: TaskId,
        /// Platform user ID
        user_id: String,
        /// Display name, if known
        #[serde(skip_serializing_if = "Option::is_none")]
        nickname: Option<String>,
    },

    /// Human-readable backend message
    Message {
        /// Task ID
        id: TaskId,
        /// Message text
        message: String,
    },

    /// Task removed from the registry
    Removed {
        /// Task ID
        id: TaskId,
    },

    /// The controller finished shutting down
    Shutdown,
}

impl TaskEvent {
    /// ID of the task this event is about (None for global events)
    pub fn task_id(&self) -> Option<&TaskId> {
        match self {
            TaskEvent::Added { id, .. }
            | TaskEvent::Updated { id, .. }
            | TaskEvent::TitleChanged { id, .. }
            | TaskEvent::UserResolved { id, .. }
            | TaskEvent::Message { id, .. }
            | TaskEvent::Removed { id } => Some(id),
            TaskEvent::Shutdown => None,
        }
    }
}

/// Task counts per state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatistics {
    /// Number of registered tasks
    pub total: usize,
    /// Waiting for a slot
    pub queued: usize,
    /// Executing
    pub running: usize,
    /// Parked by the user
    pub paused: usize,
    /// Finished successfully
    pub completed: usize,
    /// Finished with an error
    pub failed: usize,
    /// Stopped on request
    pub cancelled: usize,
}

impl TaskStatistics {
    /// Count one task in the given state
    pub(crate) fn record(&mut self, state: TaskState) {
        self.total += 1;
        match state {
            TaskState::Queued => self.queued += 1,
            TaskState::Running => self.running += 1,
            TaskState::Paused => self.paused += 1,
            TaskState::Completed => self.completed += 1,
            TaskState::Failed => self.failed += 1,
            TaskState::Cancelled => self.cancelled += 1,
        }
    }

    /// Tasks currently holding a concurrency slot
    pub fn active(&self) -> usize {
        self.running + self.paused
    }
}
