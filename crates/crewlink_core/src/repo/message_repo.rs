//! Message and read-receipt persistence.
//!
//! # Responsibility
//! - Persist a message together with its fan-out receipts and mention
//!   notifications in a single transaction.
//! - Apply first-wins delivery/read transitions on receipts.
//! - Compute unread counts and per-recipient delivery status.
//!
//! # Invariants
//! - Fan-out is all-or-nothing: a message is never visible without its
//!   receipts.
//! - `created_at` never decreases within a chat, so `(created_at, seq)` is a
//!   total order consistent with insertion.
//! - `delivered_at` and `read_at` are written only while NULL.
//! - A receipt is read only after it was delivered, and `read_at` is clamped
//!   so that `delivered_at <= read_at`.

use crate::db::now_epoch_ms;
use crate::model::chat::{
    ChatId, Message, MessageId, MessageListQuery, NewMessage, ReadReceipt,
};
use crate::model::notification::NewNotification;
use crate::model::user::UserId;
use crate::repo::columns::{
    bool_column, enum_column, ensure_connection_ready, message_kind_to_db,
    parse_message_kind, uuid_column,
};
use crate::repo::notification_repo::insert_notification;
use crate::repo::{RepoError, RepoResult};
use rusqlite::types::Value;
use rusqlite::{
    params, params_from_iter, Connection, OptionalExtension, Row, Transaction, TransactionBehavior,
};

const MESSAGES_DEFAULT_LIMIT: u32 = 50;
const MESSAGES_LIMIT_MAX: u32 = 200;

const MESSAGE_SELECT_SQL: &str = "SELECT
    seq,
    id,
    chat_id,
    author_id,
    kind,
    content,
    is_deleted,
    created_at,
    updated_at
FROM messages";

/// Repository interface for messages and receipts.
pub trait MessageRepository {
    /// Inserts the message, one pending receipt per recipient and the given
    /// notifications, atomically.
    fn insert_message(
        &self,
        message: &NewMessage,
        recipients: &[UserId],
        notifications: &[NewNotification],
    ) -> RepoResult<Message>;
    fn get_message(&self, id: MessageId) -> RepoResult<Option<Message>>;
    fn list_messages(&self, chat_id: ChatId, query: &MessageListQuery)
        -> RepoResult<Vec<Message>>;
    fn soft_delete_message(&self, id: MessageId) -> RepoResult<()>;
    fn get_receipt(&self, message_id: MessageId, user_id: UserId)
        -> RepoResult<Option<ReadReceipt>>;
    /// Returns `true` when this call performed the first delivery.
    fn mark_delivered(&self, message_id: MessageId, user_id: UserId, at: i64) -> RepoResult<bool>;
    /// Returns `true` when this call performed the first read. Fails with
    /// `NotDelivered` while the receipt is missing or still pending.
    fn mark_read(&self, message_id: MessageId, user_id: UserId, at: i64) -> RepoResult<bool>;
    /// Reads every delivered but unread message from others in the chat;
    /// returns how many receipts transitioned.
    fn mark_chat_read(&self, chat_id: ChatId, user_id: UserId, at: i64) -> RepoResult<usize>;
    fn unread_count(&self, chat_id: ChatId, user_id: UserId) -> RepoResult<u64>;
    /// Receipts of one message, unread recipients first, then latest reads.
    fn delivery_status(&self, message_id: MessageId) -> RepoResult<Vec<ReadReceipt>>;
}

/// SQLite-backed message repository.
pub struct SqliteMessageRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteMessageRepository<'conn> {
    /// Creates repository from migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn)?;
        Ok(Self { conn })
    }
}

impl MessageRepository for SqliteMessageRepository<'_> {
    fn insert_message(
        &self,
        message: &NewMessage,
        recipients: &[UserId],
        notifications: &[NewNotification],
    ) -> RepoResult<Message> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;

        let last_created_at: i64 = tx.query_row(
            "SELECT COALESCE(MAX(created_at), 0) FROM messages WHERE chat_id = ?1;",
            [message.chat_id.to_string()],
            |row| row.get(0),
        )?;
        let created_at = now_epoch_ms().max(last_created_at);

        tx.execute(
            "INSERT INTO messages (
                id,
                chat_id,
                author_id,
                kind,
                content,
                is_deleted,
                created_at,
                updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?6);",
            params![
                message.id.to_string(),
                message.chat_id.to_string(),
                message.author_id.to_string(),
                message_kind_to_db(message.kind),
                message.content,
                created_at,
            ],
        )?;

        {
            let mut fan_out = tx.prepare_cached(
                "INSERT INTO read_receipts (message_id, user_id, delivered_at, read_at)
                 VALUES (?1, ?2, NULL, NULL);",
            )?;
            for recipient in recipients.iter().filter(|id| **id != message.author_id) {
                fan_out.execute(params![message.id.to_string(), recipient.to_string()])?;
            }
        }

        for notification in notifications {
            insert_notification(&tx, notification, created_at)?;
        }

        let stored = load_message(&tx, message.id)?.ok_or(RepoError::NotFound {
            entity: "message",
            id: message.id,
        })?;
        tx.commit()?;
        Ok(stored)
    }

    fn get_message(&self, id: MessageId) -> RepoResult<Option<Message>> {
        load_message(self.conn, id)
    }

    fn list_messages(
        &self,
        chat_id: ChatId,
        query: &MessageListQuery,
    ) -> RepoResult<Vec<Message>> {
        let mut sql = format!("{MESSAGE_SELECT_SQL} WHERE chat_id = ?");
        let mut bind_values: Vec<Value> = vec![Value::Text(chat_id.to_string())];

        if !query.include_deleted {
            sql.push_str(" AND is_deleted = 0");
        }
        if let Some(before_seq) = query.before_seq {
            sql.push_str(" AND seq < ?");
            bind_values.push(Value::Integer(before_seq));
        }

        // Newest page first, then flipped back to chronological order.
        sql.push_str(" ORDER BY created_at DESC, seq DESC LIMIT ?");
        bind_values.push(Value::Integer(i64::from(normalize_message_limit(
            query.limit,
        ))));

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut messages = Vec::new();
        while let Some(row) = rows.next()? {
            messages.push(parse_message_row(row)?);
        }
        messages.reverse();
        Ok(messages)
    }

    fn soft_delete_message(&self, id: MessageId) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE messages
             SET is_deleted = 1,
                 updated_at = ?2
             WHERE id = ?1;",
            params![id.to_string(), now_epoch_ms()],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound {
                entity: "message",
                id,
            });
        }
        Ok(())
    }

    fn get_receipt(
        &self,
        message_id: MessageId,
        user_id: UserId,
    ) -> RepoResult<Option<ReadReceipt>> {
        let mut stmt = self.conn.prepare(
            "SELECT message_id, user_id, delivered_at, read_at
             FROM read_receipts
             WHERE message_id = ?1
               AND user_id = ?2;",
        )?;
        let mut rows = stmt.query(params![message_id.to_string(), user_id.to_string()])?;
        match rows.next()? {
            Some(row) => Ok(Some(parse_receipt_row(row)?)),
            None => Ok(None),
        }
    }

    fn mark_delivered(&self, message_id: MessageId, user_id: UserId, at: i64) -> RepoResult<bool> {
        let changed = self.conn.execute(
            "INSERT INTO read_receipts (message_id, user_id, delivered_at, read_at)
             VALUES (?1, ?2, ?3, NULL)
             ON CONFLICT(message_id, user_id) DO UPDATE
             SET delivered_at = excluded.delivered_at
             WHERE read_receipts.delivered_at IS NULL;",
            params![message_id.to_string(), user_id.to_string(), at],
        )?;
        Ok(changed > 0)
    }

    fn mark_read(&self, message_id: MessageId, user_id: UserId, at: i64) -> RepoResult<bool> {
        let delivered_at: Option<i64> = self
            .conn
            .query_row(
                "SELECT delivered_at
                 FROM read_receipts
                 WHERE message_id = ?1
                   AND user_id = ?2;",
                params![message_id.to_string(), user_id.to_string()],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        if delivered_at.is_none() {
            return Err(RepoError::NotDelivered {
                message_id,
                user_id,
            });
        }

        let changed = self.conn.execute(
            "UPDATE read_receipts
             SET read_at = MAX(?3, delivered_at)
             WHERE message_id = ?1
               AND user_id = ?2
               AND read_at IS NULL
               AND delivered_at IS NOT NULL;",
            params![message_id.to_string(), user_id.to_string(), at],
        )?;
        Ok(changed > 0)
    }

    fn mark_chat_read(&self, chat_id: ChatId, user_id: UserId, at: i64) -> RepoResult<usize> {
        let changed = self.conn.execute(
            "UPDATE read_receipts
             SET read_at = MAX(?3, delivered_at)
             WHERE user_id = ?2
               AND read_at IS NULL
               AND delivered_at IS NOT NULL
               AND message_id IN (
                 SELECT m.id
                 FROM messages m
                 WHERE m.chat_id = ?1
                   AND m.author_id <> ?2
                   AND m.is_deleted = 0
               );",
            params![chat_id.to_string(), user_id.to_string(), at],
        )?;
        Ok(changed)
    }

    fn unread_count(&self, chat_id: ChatId, user_id: UserId) -> RepoResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*)
             FROM messages m
             WHERE m.chat_id = ?1
               AND m.author_id <> ?2
               AND m.is_deleted = 0
               AND NOT EXISTS (
                 SELECT 1
                 FROM read_receipts r
                 WHERE r.message_id = m.id
                   AND r.user_id = ?2
                   AND r.read_at IS NOT NULL
               );",
            params![chat_id.to_string(), user_id.to_string()],
            |row| row.get(0),
        )?;
        u64::try_from(count)
            .map_err(|_| RepoError::InvalidData(format!("negative unread count `{count}`")))
    }

    fn delivery_status(&self, message_id: MessageId) -> RepoResult<Vec<ReadReceipt>> {
        let mut stmt = self.conn.prepare(
            "SELECT message_id, user_id, delivered_at, read_at
             FROM read_receipts
             WHERE message_id = ?1
             ORDER BY (read_at IS NULL) DESC, read_at DESC, user_id ASC;",
        )?;
        let mut rows = stmt.query([message_id.to_string()])?;
        let mut receipts = Vec::new();
        while let Some(row) = rows.next()? {
            receipts.push(parse_receipt_row(row)?);
        }
        Ok(receipts)
    }
}

/// Clamps a requested page size to `1..=MESSAGES_LIMIT_MAX`.
pub fn normalize_message_limit(limit: Option<u32>) -> u32 {
    limit
        .unwrap_or(MESSAGES_DEFAULT_LIMIT)
        .clamp(1, MESSAGES_LIMIT_MAX)
}

pub(crate) fn load_message(conn: &Connection, id: MessageId) -> RepoResult<Option<Message>> {
    let mut stmt = conn.prepare(&format!("{MESSAGE_SELECT_SQL} WHERE id = ?1;"))?;
    let mut rows = stmt.query([id.to_string()])?;
    match rows.next()? {
        Some(row) => Ok(Some(parse_message_row(row)?)),
        None => Ok(None),
    }
}

fn parse_message_row(row: &Row<'_>) -> RepoResult<Message> {
    Ok(Message {
        id: uuid_column(row, "id")?,
        seq: row.get("seq")?,
        chat_id: uuid_column(row, "chat_id")?,
        author_id: uuid_column(row, "author_id")?,
        kind: enum_column(row, "kind", parse_message_kind)?,
        content: row.get("content")?,
        is_deleted: bool_column(row, "is_deleted")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn parse_receipt_row(row: &Row<'_>) -> RepoResult<ReadReceipt> {
    Ok(ReadReceipt {
        message_id: uuid_column(row, "message_id")?,
        user_id: uuid_column(row, "user_id")?,
        delivered_at: row.get("delivered_at")?,
        read_at: row.get("read_at")?,
    })
}
