//! Notification feed records.
//!
//! The originating entity is held as a weak `(kind, id)` reference: it is not
//! a foreign key and may outlive its referent.

use crate::model::chat::Message;
use crate::model::org::Task;
use crate::model::user::UserId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type NotificationId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Mention,
    Assignment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Task,
    Message,
}

/// Weak reference to the entity a notification is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: Uuid,
}

impl EntityRef {
    pub fn task(id: Uuid) -> Self {
        Self {
            kind: EntityKind::Task,
            id,
        }
    }

    pub fn message(id: Uuid) -> Self {
        Self {
            kind: EntityKind::Message,
            id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub user_id: UserId,
    pub source_user_id: Option<UserId>,
    pub entity: EntityRef,
    pub kind: NotificationKind,
    pub text: String,
    pub is_read: bool,
    pub created_at: i64,
}

/// Notification to be written, before it gets an id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNotification {
    pub user_id: UserId,
    pub source_user_id: Option<UserId>,
    pub entity: EntityRef,
    pub kind: NotificationKind,
    pub text: String,
}

/// Result of lazily resolving a notification's weak reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedSource {
    Task(Task),
    Message(Message),
    /// The referent no longer exists.
    Unavailable,
}
