//! Cluster → project → task hierarchy.
//!
//! # Invariants
//! - A project belongs to exactly one cluster and owns exactly one chat.
//! - A cluster owns at most one company chat, possibly created lazily.
//! - Task progress stays within `0..=100`.

use crate::model::chat::ChatId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type ClusterId = Uuid;
pub type ProjectId = Uuid;
pub type TaskId = Uuid;

pub const MAX_TASK_PROGRESS: u8 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: ClusterId,
    pub name: String,
    /// Unique human-facing join code.
    pub code: String,
    pub chat_id: Option<ChatId>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub cluster_id: ClusterId,
    pub name: String,
    pub chat_id: ChatId,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub project_id: ProjectId,
    pub title: String,
    pub priority: TaskPriority,
    pub progress: u8,
    pub status: TaskStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Input for creating a task row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    pub project_id: ProjectId,
    pub title: String,
    pub priority: TaskPriority,
    pub progress: u8,
    pub status: TaskStatus,
}

impl NewTask {
    pub fn new(project_id: ProjectId, title: impl Into<String>) -> Self {
        Self {
            project_id,
            title: title.into(),
            priority: TaskPriority::default(),
            progress: 0,
            status: TaskStatus::default(),
        }
    }
}
