//! Task record, route labels and the status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TaskError;

/// Task identifier. Every queue entry, correlation row and API call keys on it.
pub type TaskId = Uuid;

/// Submission priority, highest first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum Priority {
    #[serde(rename = "VIP")]
    Vip,
    High,
    Normal,
    #[default]
    Low,
}

impl Priority {
    /// All priorities in scan order (highest first).
    pub const ALL: [Priority; 4] = [Self::Vip, Self::High, Self::Normal, Self::Low];

    /// Expedited lanes are served by fast-tier workers only.
    pub fn is_expedited(&self) -> bool {
        matches!(self, Self::Vip | Self::High)
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Vip => "vip",
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        };
        write!(f, "{s}")
    }
}

/// Selects a queue: `(priority, pool, optional bot affinity)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouteLabel {
    #[serde(default)]
    pub priority: Priority,
    pub pool: String,
    /// Set once a worker claims the task; follow-ups return to that identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_id: Option<String>,
}

impl RouteLabel {
    pub fn shared(priority: Priority, pool: impl Into<String>) -> Self {
        Self {
            priority,
            pool: pool.into(),
            bot_id: None,
        }
    }

    pub fn private(priority: Priority, pool: impl Into<String>, bot_id: impl Into<String>) -> Self {
        Self {
            priority,
            pool: pool.into(),
            bot_id: Some(bot_id.into()),
        }
    }
}

/// Quadrant of a generated grid, numbered left-to-right, top-to-bottom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ImagePosition {
    LeftTop = 1,
    RightTop = 2,
    LeftBottom = 3,
    RightBottom = 4,
}

impl ImagePosition {
    pub fn index(&self) -> u8 {
        *self as u8
    }
}

impl TryFrom<u8> for ImagePosition {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::LeftTop),
            2 => Ok(Self::RightTop),
            3 => Ok(Self::LeftBottom),
            4 => Ok(Self::RightBottom),
            other => Err(format!("image position must be 1-4, got {other}")),
        }
    }
}

impl From<ImagePosition> for u8 {
    fn from(p: ImagePosition) -> Self {
        p.index()
    }
}

/// What the worker must send for this task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Command {
    New { prompt: String },
    Variation { position: ImagePosition },
    Upscale { position: ImagePosition },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::New { .. } => "New",
            Self::Variation { .. } => "Variation",
            Self::Upscale { .. } => "Upscale",
        }
    }

    /// Protocol action verb for follow-up commands.
    pub fn action(&self) -> Option<(&'static str, u8)> {
        match self {
            Self::New { .. } => None,
            Self::Variation { position } => Some(("variation", position.index())),
            Self::Upscale { position } => Some(("upsample", position.index())),
        }
    }
}

/// Task status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Queued, waiting for a worker.
    New,
    /// Dispatched; the service is working on it.
    Pending,
    Success,
    Failure,
}

impl TaskStatus {
    /// Check if this status allows moving to `target`.
    pub fn can_transition_to(&self, target: TaskStatus) -> bool {
        use TaskStatus::*;

        matches!(
            (self, target),
            // Still queued (dispatch failed before the service saw it)
            (New, New) | (New, Pending) | (New, Failure) |
            // Progress updates and the retry path back to the queue
            (Pending, Pending) | (Pending, Success) | (Pending, Failure) | (Pending, New) |
            // Follow-up command re-attached to a finished task
            (Success, New)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::New => "new",
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failure => "failure",
        };
        write!(f, "{s}")
    }
}

/// Finished asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deliverable {
    pub url: String,
    pub filename: String,
}

impl Deliverable {
    /// Asset id the service expects in follow-up action ids: last `_` segment
    /// of the filename without its extension.
    pub fn asset_id(&self) -> &str {
        asset_id_from_filename(&self.filename)
    }
}

pub fn asset_id_from_filename(filename: &str) -> &str {
    let last = filename.rsplit('_').next().unwrap_or(filename);
    last.split('.').next().unwrap_or(last)
}

/// Asset a follow-up command acts on: the message carrying the grid and its file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceAsset {
    pub message_id: String,
    pub filename: String,
}

/// A unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub route: RouteLabel,
    pub command: Command,
    /// Prompt of the generation this task started from. Follow-ups keep it.
    pub prompt: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub progress: Option<u8>,
    /// Present only while `status` is `Success`.
    #[serde(default)]
    pub deliverable: Option<Deliverable>,
    #[serde(default)]
    pub error: Option<String>,
    /// Protocol message currently tracked for this task.
    #[serde(default)]
    pub protocol_message_id: Option<String>,
    /// Grid a pending follow-up acts on.
    #[serde(default)]
    pub source: Option<SourceAsset>,
    /// Times the task was returned to the queue.
    #[serde(default)]
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// A fresh generation task.
    pub fn generate(id: TaskId, prompt: impl Into<String>, route: RouteLabel) -> Self {
        let prompt = prompt.into();
        let now = Utc::now();
        Self {
            id,
            route,
            command: Command::New {
                prompt: prompt.clone(),
            },
            prompt,
            status: TaskStatus::New,
            progress: None,
            deliverable: None,
            error: None,
            protocol_message_id: None,
            source: None,
            attempts: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_generation(&self) -> bool {
        matches!(self.command, Command::New { .. })
    }

    /// Move to `status`, validating the transition.
    pub fn transition_to(&mut self, status: TaskStatus) -> Result<(), TaskError> {
        if !self.status.can_transition_to(status) {
            return Err(TaskError::InvalidTransition {
                id: self.id,
                from: self.status.to_string(),
                to: status.to_string(),
            });
        }
        self.status = status;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Record the service acknowledging the task.
    pub fn mark_pending(&mut self, message_id: Option<String>) -> Result<(), TaskError> {
        self.transition_to(TaskStatus::Pending)?;
        self.progress = Some(0);
        if message_id.is_some() {
            self.protocol_message_id = message_id;
        }
        Ok(())
    }

    pub fn mark_success(&mut self, deliverable: Deliverable) -> Result<(), TaskError> {
        self.transition_to(TaskStatus::Success)?;
        self.progress = Some(100);
        self.deliverable = Some(deliverable);
        self.source = None;
        Ok(())
    }

    pub fn mark_failure(&mut self, reason: impl Into<String>) -> Result<(), TaskError> {
        self.transition_to(TaskStatus::Failure)?;
        self.error = Some(reason.into());
        Ok(())
    }

    /// Progress update; never moves a task backwards out of `Pending`.
    pub fn set_progress(&mut self, progress: u8) -> Result<(), TaskError> {
        self.transition_to(TaskStatus::Pending)?;
        self.progress = Some(progress.min(100));
        Ok(())
    }

    /// Return the task to the shared queue: affinity dropped, status `New`.
    ///
    /// Fails with `RetryLimitExceeded` once `attempts` reaches `cap`.
    pub fn requeue(&mut self, cap: u32) -> Result<(), TaskError> {
        if self.status.is_terminal() {
            return Err(TaskError::InvalidTransition {
                id: self.id,
                from: self.status.to_string(),
                to: TaskStatus::New.to_string(),
            });
        }
        if self.attempts >= cap {
            return Err(TaskError::RetryLimitExceeded {
                id: self.id,
                attempts: self.attempts,
            });
        }
        self.transition_to(TaskStatus::New)?;
        self.attempts += 1;
        self.route.bot_id = None;
        self.progress = None;
        Ok(())
    }

    /// Re-attach a follow-up command to a finished task.
    ///
    /// Keeps the bot affinity so the identity that owns the grid runs it.
    pub fn reattach(&mut self, command: Command, priority: Priority) -> Result<(), TaskError> {
        if command.action().is_none() {
            return Err(TaskError::InvalidFlow {
                id: self.id,
                reason: "only follow-up commands can be re-attached".to_string(),
            });
        }
        let (Some(deliverable), Some(message_id)) =
            (self.deliverable.as_ref(), self.protocol_message_id.as_ref())
        else {
            return Err(TaskError::InvalidFlow {
                id: self.id,
                reason: "task has no finished asset".to_string(),
            });
        };
        let source = SourceAsset {
            message_id: message_id.clone(),
            filename: deliverable.filename.clone(),
        };
        self.transition_to(TaskStatus::New)?;
        self.source = Some(source);
        self.deliverable = None;
        self.command = command;
        self.route.priority = priority;
        self.progress = Some(0);
        self.error = None;
        self.attempts = 0;
        Ok(())
    }

    /// Public view served by the status endpoint.
    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            priority: self.route.priority,
            command: self.command.clone(),
            status: self.status,
            progress: self.progress,
            deliverable: self.deliverable.clone(),
            error: self.error.clone(),
        }
    }
}

/// Task view without correlation internals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub priority: Priority,
    pub command: Command,
    pub status: TaskStatus,
    pub progress: Option<u8>,
    pub deliverable: Option<Deliverable>,
    pub error: Option<String>,
}
