//! Core task types and retry policy.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use reportdesk_core::{ReportId, UserId};

/// Unique task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Side-effect kind, used for routing and for the per-kind retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskKind {
    #[serde(rename = "notify")]
    Notify,
    #[serde(rename = "invalidate-cache")]
    InvalidateCache,
    #[serde(rename = "generate-preview")]
    GeneratePreview,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Notify => "notify",
            TaskKind::InvalidateCache => "invalidate-cache",
            TaskKind::GeneratePreview => "generate-preview",
        }
    }

    /// Attempt budget before the task is dead-lettered.
    pub fn max_attempts(&self) -> u32 {
        match self {
            TaskKind::Notify => 3,
            TaskKind::InvalidateCache => 2,
            TaskKind::GeneratePreview => 3,
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A kind string no handler exists for.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown task kind: {0}")]
pub struct UnknownTaskKind(pub String);

impl std::str::FromStr for TaskKind {
    type Err = UnknownTaskKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "notify" => Ok(TaskKind::Notify),
            "invalidate-cache" => Ok(TaskKind::InvalidateCache),
            "generate-preview" => Ok(TaskKind::GeneratePreview),
            other => Err(UnknownTaskKind(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyPayload {
    pub report_id: ReportId,
    pub recipient_id: UserId,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheInvalidationPayload {
    pub report_id: ReportId,
    pub keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewPayload {
    pub report_id: ReportId,
}

/// Typed payload; the variant determines the task kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload")]
pub enum TaskPayload {
    #[serde(rename = "notify")]
    Notify(NotifyPayload),
    #[serde(rename = "invalidate-cache")]
    InvalidateCache(CacheInvalidationPayload),
    #[serde(rename = "generate-preview")]
    GeneratePreview(PreviewPayload),
}

impl TaskPayload {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskPayload::Notify(_) => TaskKind::Notify,
            TaskPayload::InvalidateCache(_) => TaskKind::InvalidateCache,
            TaskPayload::GeneratePreview(_) => TaskKind::GeneratePreview,
        }
    }

    pub fn report_id(&self) -> ReportId {
        match self {
            TaskPayload::Notify(p) => p.report_id,
            TaskPayload::InvalidateCache(p) => p.report_id,
            TaskPayload::GeneratePreview(p) => p.report_id,
        }
    }
}

/// Task execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    /// Queued, waiting for the driver
    Pending,
    /// Handler currently running
    Processing,
    /// Finished successfully
    Completed,
    /// Last attempt failed; waiting out its backoff
    Failed,
    /// Attempts exhausted; parked for inspection
    DeadLetter,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::DeadLetter)
    }
}

/// Exponential backoff: `unit * 2^attempts`.
///
/// With the default one-second unit, the wait after the n-th failed attempt is
/// `2^n` seconds.
pub fn backoff_delay(attempts: u32, unit: Duration) -> Duration {
    2u32.checked_pow(attempts)
        .and_then(|factor| unit.checked_mul(factor))
        .unwrap_or(Duration::MAX)
}

/// What the driver should do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Wait, then reinsert at the head of the queue.
    Retry { attempts: u32 },
    /// Budget exhausted.
    DeadLetter { attempts: u32 },
}

/// A background side-effect task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    #[serde(flatten)]
    pub payload: TaskPayload,
    pub status: TaskStatus,
    /// Failed attempts so far (a success does not count).
    pub attempts: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Task {
    /// Create a pending task with the kind-specific attempt budget.
    pub fn new(payload: TaskPayload, now: DateTime<Utc>) -> Self {
        let max_attempts = payload.kind().max_attempts();
        Self {
            id: TaskId::new(),
            payload,
            status: TaskStatus::Pending,
            attempts: 0,
            max_attempts,
            created_at: now,
            completed_at: None,
            last_error: None,
        }
    }

    /// Override the attempt budget.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn kind(&self) -> TaskKind {
        self.payload.kind()
    }

    pub fn mark_processing(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        self.status = TaskStatus::Processing;
    }

    pub fn mark_pending(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        self.status = TaskStatus::Pending;
    }

    pub fn mark_completed(&mut self, now: DateTime<Utc>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = TaskStatus::Completed;
        self.completed_at = Some(now);
    }

    /// Record a failed attempt and decide between retry and dead letter.
    pub fn mark_failed(&mut self, error: impl Into<String>) -> FailureOutcome {
        if self.status.is_terminal() {
            return FailureOutcome::DeadLetter {
                attempts: self.attempts,
            };
        }

        self.attempts += 1;
        self.last_error = Some(error.into());

        if self.attempts >= self.max_attempts {
            self.status = TaskStatus::DeadLetter;
            FailureOutcome::DeadLetter {
                attempts: self.attempts,
            }
        } else {
            self.status = TaskStatus::Failed;
            FailureOutcome::Retry {
                attempts: self.attempts,
            }
        }
    }
}

/// Entry in the dead-letter collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub task: Task,
    pub dead_lettered_at: DateTime<Utc>,
}

impl DeadLetterEntry {
    pub fn new(task: Task, at: DateTime<Utc>) -> Self {
        Self {
            task,
            dead_lettered_at: at,
        }
    }
}
