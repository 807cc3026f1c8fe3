//! Task domain model.
//!
//! Only id/text/status/code are consumed by reference resolution; scheduling
//! rules live outside this crate.

use crate::model::ref_code::RefCode;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable task identifier.
pub type TaskId = Uuid;

/// Task lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created but not started.
    #[default]
    Todo,
    /// Work is in progress.
    InProgress,
    /// Completed successfully.
    Done,
    /// No longer actionable.
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::InProgress => "in_progress",
            Self::Done => "done",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "todo" => Some(Self::Todo),
            "in_progress" => Some(Self::InProgress),
            "done" => Some(Self::Done),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// Canonical task record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub text: String,
    pub status: TaskStatus,
    /// Epoch milliseconds; carried opaquely.
    pub due_at: Option<i64>,
    pub ref_code: RefCode,
    pub updated_at: i64,
}

/// Creation request for a task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewTask {
    pub text: String,
    pub status: TaskStatus,
    pub due_at: Option<i64>,
    pub ref_code: Option<RefCode>,
}

impl NewTask {
    pub fn with_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn with_ref_code(mut self, code: RefCode) -> Self {
        self.ref_code = Some(code);
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }
}

impl Task {
    pub fn from_new(request: NewTask, ref_code: RefCode, updated_at: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: request.text,
            status: request.status,
            due_at: request.due_at,
            ref_code,
            updated_at,
        }
    }
}
