//! Chats, messages and per-recipient receipts.
//!
//! # Invariants
//! - Messages are immutable after creation except `is_deleted`/`updated_at`.
//! - Within one chat, messages are ordered by `(created_at, seq)`.
//! - A receipt never belongs to the message author.
//! - `read_at`, once set, never changes; when both timestamps are set,
//!   `delivered_at <= read_at`.

use crate::model::user::UserId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type ChatId = Uuid;
pub type MessageId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
    /// Owned by exactly one project.
    Project,
    /// Company-wide chat owned by a cluster.
    Company,
    /// Explicit member list, no owning unit.
    Direct,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub id: ChatId,
    pub kind: ChatKind,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    File,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    /// Monotonic insertion sequence; breaks `created_at` ties.
    pub seq: i64,
    pub chat_id: ChatId,
    pub author_id: UserId,
    pub kind: MessageKind,
    pub content: String,
    pub is_deleted: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Message to be written; the id is allocated by the caller so mention
/// notifications can reference it inside the same transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub author_id: UserId,
    pub kind: MessageKind,
    pub content: String,
}

/// Delivery/read state of one message for one recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub message_id: MessageId,
    pub user_id: UserId,
    /// `None` while the fan-out obligation is still pending.
    pub delivered_at: Option<i64>,
    pub read_at: Option<i64>,
}

impl ReadReceipt {
    pub fn is_read(&self) -> bool {
        self.read_at.is_some()
    }
}

/// Paging options for chat history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MessageListQuery {
    /// Only messages with `seq` strictly lower than this cursor.
    pub before_seq: Option<i64>,
    /// Defaults to 50, clamped to 200.
    pub limit: Option<u32>,
    pub include_deleted: bool,
}
