//! Notification feed and task-assignment persistence.
//!
//! # Responsibility
//! - Store notifications and flip their read flag.
//! - Record task assignments and emit assignment notifications for the
//!   assignees that were actually added.
//! - Resolve a notification's weak entity reference on demand.
//!
//! # Invariants
//! - Notifications are never deduplicated.
//! - `is_read` only moves from false to true.
//! - An assignment notification is written in the same transaction as the
//!   assignment row it announces.

use crate::db::now_epoch_ms;
use crate::model::notification::{
    EntityKind, EntityRef, NewNotification, Notification, NotificationId, ResolvedSource,
};
use crate::model::org::TaskId;
use crate::model::user::UserId;
use crate::repo::columns::{
    bool_column, entity_kind_to_db, enum_column, ensure_connection_ready,
    notification_kind_to_db, optional_uuid_column, parse_entity_kind, parse_notification_kind,
    uuid_column,
};
use crate::repo::entity_repo::{ensure_active_user, load_task, load_user};
use crate::repo::message_repo::load_message;
use crate::repo::{RepoError, RepoResult};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row, Transaction, TransactionBehavior};
use uuid::Uuid;

const FEED_DEFAULT_LIMIT: u32 = 50;
const FEED_LIMIT_MAX: u32 = 500;

const NOTIFICATION_SELECT_SQL: &str = "SELECT
    id,
    user_id,
    source_user_id,
    entity_kind,
    entity_id,
    kind,
    text,
    is_read,
    created_at
FROM notifications";

/// Repository interface for notifications and task assignments.
pub trait NotificationRepository {
    fn insert_notification(&self, notification: &NewNotification) -> RepoResult<Notification>;
    fn get_notification(&self, id: NotificationId) -> RepoResult<Option<Notification>>;
    /// Returns `true` when this call flipped the flag.
    fn mark_read(&self, id: NotificationId) -> RepoResult<bool>;
    /// Newest first.
    fn list_for_user(
        &self,
        user_id: UserId,
        unread_only: bool,
        limit: Option<u32>,
    ) -> RepoResult<Vec<Notification>>;
    fn unread_count(&self, user_id: UserId) -> RepoResult<u64>;
    fn mark_all_read(&self, user_id: UserId) -> RepoResult<usize>;
    /// Assigns each notification's target to the task. Only targets that were
    /// not yet assigned get their notification written; their ids are
    /// returned.
    fn assign_task(
        &self,
        task_id: TaskId,
        notifications: &[NewNotification],
    ) -> RepoResult<Vec<UserId>>;
    fn unassign_task(&self, task_id: TaskId, user_id: UserId) -> RepoResult<bool>;
    fn list_assignees(&self, task_id: TaskId) -> RepoResult<Vec<UserId>>;
    fn resolve_source(&self, entity: EntityRef) -> RepoResult<ResolvedSource>;
}

/// SQLite-backed notification repository.
pub struct SqliteNotificationRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteNotificationRepository<'conn> {
    /// Creates repository from migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn)?;
        Ok(Self { conn })
    }
}

impl NotificationRepository for SqliteNotificationRepository<'_> {
    fn insert_notification(&self, notification: &NewNotification) -> RepoResult<Notification> {
        let users = std::iter::once(notification.user_id).chain(notification.source_user_id);
        for user_id in users {
            if load_user(self.conn, user_id)?.is_none() {
                return Err(RepoError::NotFound {
                    entity: "user",
                    id: user_id,
                });
            }
        }
        insert_notification(self.conn, notification, now_epoch_ms())
    }

    fn get_notification(&self, id: NotificationId) -> RepoResult<Option<Notification>> {
        load_notification(self.conn, id)
    }

    fn mark_read(&self, id: NotificationId) -> RepoResult<bool> {
        let changed = self.conn.execute(
            "UPDATE notifications SET is_read = 1 WHERE id = ?1 AND is_read = 0;",
            [id.to_string()],
        )?;
        Ok(changed > 0)
    }

    fn list_for_user(
        &self,
        user_id: UserId,
        unread_only: bool,
        limit: Option<u32>,
    ) -> RepoResult<Vec<Notification>> {
        let mut sql = format!("{NOTIFICATION_SELECT_SQL} WHERE user_id = ?");
        let mut bind_values: Vec<Value> = vec![Value::Text(user_id.to_string())];
        if unread_only {
            sql.push_str(" AND is_read = 0");
        }
        sql.push_str(" ORDER BY created_at DESC, rowid DESC LIMIT ?");
        bind_values.push(Value::Integer(i64::from(
            limit.unwrap_or(FEED_DEFAULT_LIMIT).clamp(1, FEED_LIMIT_MAX),
        )));

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut notifications = Vec::new();
        while let Some(row) = rows.next()? {
            notifications.push(parse_notification_row(row)?);
        }
        Ok(notifications)
    }

    fn unread_count(&self, user_id: UserId) -> RepoResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND is_read = 0;",
            [user_id.to_string()],
            |row| row.get(0),
        )?;
        u64::try_from(count)
            .map_err(|_| RepoError::InvalidData(format!("negative unread count `{count}`")))
    }

    fn mark_all_read(&self, user_id: UserId) -> RepoResult<usize> {
        let changed = self.conn.execute(
            "UPDATE notifications SET is_read = 1 WHERE user_id = ?1 AND is_read = 0;",
            [user_id.to_string()],
        )?;
        Ok(changed)
    }

    fn assign_task(
        &self,
        task_id: TaskId,
        notifications: &[NewNotification],
    ) -> RepoResult<Vec<UserId>> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        if load_task(&tx, task_id)?.is_none() {
            return Err(RepoError::NotFound {
                entity: "task",
                id: task_id,
            });
        }

        let now = now_epoch_ms();
        let mut assigned = Vec::new();
        for notification in notifications {
            let user_id = notification.user_id;
            ensure_active_user(&tx, user_id)?;
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO task_assignments (task_id, user_id, assigned_at)
                 VALUES (?1, ?2, ?3);",
                params![task_id.to_string(), user_id.to_string(), now],
            )?;
            if inserted == 0 {
                continue;
            }
            insert_notification(&tx, notification, now)?;
            assigned.push(user_id);
        }
        tx.commit()?;
        Ok(assigned)
    }

    fn unassign_task(&self, task_id: TaskId, user_id: UserId) -> RepoResult<bool> {
        let changed = self.conn.execute(
            "DELETE FROM task_assignments WHERE task_id = ?1 AND user_id = ?2;",
            params![task_id.to_string(), user_id.to_string()],
        )?;
        Ok(changed > 0)
    }

    fn list_assignees(&self, task_id: TaskId) -> RepoResult<Vec<UserId>> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id
             FROM task_assignments
             WHERE task_id = ?1
             ORDER BY assigned_at ASC, user_id ASC;",
        )?;
        let mut rows = stmt.query([task_id.to_string()])?;
        let mut users = Vec::new();
        while let Some(row) = rows.next()? {
            users.push(uuid_column(row, "user_id")?);
        }
        Ok(users)
    }

    fn resolve_source(&self, entity: EntityRef) -> RepoResult<ResolvedSource> {
        let resolved = match entity.kind {
            EntityKind::Task => load_task(self.conn, entity.id)?.map(ResolvedSource::Task),
            EntityKind::Message => load_message(self.conn, entity.id)?.map(ResolvedSource::Message),
        };
        Ok(resolved.unwrap_or(ResolvedSource::Unavailable))
    }
}

/// Writes one notification row; usable inside a caller's transaction.
pub(crate) fn insert_notification(
    conn: &Connection,
    notification: &NewNotification,
    created_at: i64,
) -> RepoResult<Notification> {
    let id = Uuid::new_v4();
    conn.execute(
        "INSERT INTO notifications (
            id,
            user_id,
            source_user_id,
            entity_kind,
            entity_id,
            kind,
            text,
            is_read,
            created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8);",
        params![
            id.to_string(),
            notification.user_id.to_string(),
            notification.source_user_id.map(|source| source.to_string()),
            entity_kind_to_db(notification.entity.kind),
            notification.entity.id.to_string(),
            notification_kind_to_db(notification.kind),
            notification.text,
            created_at,
        ],
    )?;

    Ok(Notification {
        id,
        user_id: notification.user_id,
        source_user_id: notification.source_user_id,
        entity: notification.entity,
        kind: notification.kind,
        text: notification.text.clone(),
        is_read: false,
        created_at,
    })
}

fn load_notification(conn: &Connection, id: NotificationId) -> RepoResult<Option<Notification>> {
    let mut stmt = conn.prepare(&format!("{NOTIFICATION_SELECT_SQL} WHERE id = ?1;"))?;
    let mut rows = stmt.query([id.to_string()])?;
    match rows.next()? {
        Some(row) => Ok(Some(parse_notification_row(row)?)),
        None => Ok(None),
    }
}

fn parse_notification_row(row: &Row<'_>) -> RepoResult<Notification> {
    Ok(Notification {
        id: uuid_column(row, "id")?,
        user_id: uuid_column(row, "user_id")?,
        source_user_id: optional_uuid_column(row, "source_user_id")?,
        entity: EntityRef {
            kind: enum_column(row, "entity_kind", parse_entity_kind)?,
            id: uuid_column(row, "entity_id")?,
        },
        kind: enum_column(row, "kind", parse_notification_kind)?,
        text: row.get("text")?,
        is_read: bool_column(row, "is_read")?,
        created_at: row.get("created_at")?,
    })
}
