//! Entity store: users, clusters, projects, tasks and chats.
//!
//! # Responsibility
//! - Provide the creation/read primitives the core needs from the CRUD layer.
//! - Own the cascade-delete routines for clusters and projects.
//!
//! # Invariants
//! - A project and its chat are created in one transaction.
//! - A cluster's company chat is created at most once.
//! - Deleting a cluster/project leaves no orphaned project, task, chat,
//!   message, receipt or membership row.

use crate::db::now_epoch_ms;
use crate::model::chat::{Chat, ChatId, ChatKind};
use crate::model::membership::ChatRole;
use crate::model::org::{
    Cluster, ClusterId, NewTask, Project, ProjectId, Task, TaskId, MAX_TASK_PROGRESS,
};
use crate::model::user::{NewUser, User, UserId};
use crate::repo::columns::{
    bool_column, chat_kind_to_db, chat_role_to_db, enum_column, ensure_connection_ready,
    optional_uuid_column, parse_chat_kind, parse_task_priority, parse_task_status,
    task_priority_to_db, task_status_to_db, uuid_column,
};
use crate::repo::{RepoError, RepoResult};
use log::info;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use uuid::Uuid;

/// Repository interface for organizational entities.
pub trait EntityRepository {
    fn create_user(&self, user: &NewUser) -> RepoResult<User>;
    fn get_user(&self, id: UserId) -> RepoResult<Option<User>>;
    /// Soft-deactivates a user; the row is kept for referential integrity.
    fn deactivate_user(&self, id: UserId) -> RepoResult<()>;
    fn create_cluster(&self, name: &str, code: &str) -> RepoResult<Cluster>;
    fn get_cluster(&self, id: ClusterId) -> RepoResult<Option<Cluster>>;
    /// Returns the cluster's company chat, creating it on first use.
    fn ensure_cluster_chat(&self, id: ClusterId) -> RepoResult<ChatId>;
    fn create_project(&self, cluster_id: ClusterId, name: &str) -> RepoResult<Project>;
    fn get_project(&self, id: ProjectId) -> RepoResult<Option<Project>>;
    fn create_task(&self, task: &NewTask) -> RepoResult<Task>;
    fn get_task(&self, id: TaskId) -> RepoResult<Option<Task>>;
    /// Creates a direct chat; `creator` becomes chat admin, `others` members.
    fn create_direct_chat(&self, creator: UserId, others: &[UserId]) -> RepoResult<Chat>;
    fn get_chat(&self, id: ChatId) -> RepoResult<Option<Chat>>;
    fn delete_cluster(&self, id: ClusterId) -> RepoResult<()>;
    fn delete_project(&self, id: ProjectId) -> RepoResult<()>;
}

/// SQLite-backed entity repository.
pub struct SqliteEntityRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteEntityRepository<'conn> {
    /// Creates repository from migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn)?;
        Ok(Self { conn })
    }
}

impl EntityRepository for SqliteEntityRepository<'_> {
    fn create_user(&self, user: &NewUser) -> RepoResult<User> {
        let id = Uuid::new_v4();
        let now = now_epoch_ms();
        self.conn.execute(
            "INSERT INTO users (
                id,
                display_name,
                email,
                credential_hash,
                is_active,
                created_at,
                updated_at
            ) VALUES (?1, ?2, ?3, ?4, 1, ?5, ?5);",
            params![
                id.to_string(),
                user.display_name.trim(),
                user.email.trim(),
                user.credential_hash,
                now,
            ],
        )?;
        load_user(self.conn, id)?.ok_or(RepoError::NotFound { entity: "user", id })
    }

    fn get_user(&self, id: UserId) -> RepoResult<Option<User>> {
        load_user(self.conn, id)
    }

    fn deactivate_user(&self, id: UserId) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE users
             SET is_active = 0,
                 updated_at = ?2
             WHERE id = ?1;",
            params![id.to_string(), now_epoch_ms()],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound { entity: "user", id });
        }
        Ok(())
    }

    fn create_cluster(&self, name: &str, code: &str) -> RepoResult<Cluster> {
        let id = Uuid::new_v4();
        let now = now_epoch_ms();
        self.conn.execute(
            "INSERT INTO clusters (id, name, code, chat_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, NULL, ?4, ?4);",
            params![id.to_string(), name, code, now],
        )?;
        load_cluster(self.conn, id)?.ok_or(RepoError::NotFound {
            entity: "cluster",
            id,
        })
    }

    fn get_cluster(&self, id: ClusterId) -> RepoResult<Option<Cluster>> {
        load_cluster(self.conn, id)
    }

    fn ensure_cluster_chat(&self, id: ClusterId) -> RepoResult<ChatId> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let cluster = load_cluster(&tx, id)?.ok_or(RepoError::NotFound {
            entity: "cluster",
            id,
        })?;
        if let Some(chat_id) = cluster.chat_id {
            return Ok(chat_id);
        }

        let now = now_epoch_ms();
        let chat_id = insert_chat(&tx, ChatKind::Company, now)?;
        tx.execute(
            "UPDATE clusters
             SET chat_id = ?2,
                 updated_at = ?3
             WHERE id = ?1;",
            params![id.to_string(), chat_id.to_string(), now],
        )?;
        tx.commit()?;

        info!("event=cluster_chat_create module=entity status=ok cluster_id={id} chat_id={chat_id}");
        Ok(chat_id)
    }

    fn create_project(&self, cluster_id: ClusterId, name: &str) -> RepoResult<Project> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        if load_cluster(&tx, cluster_id)?.is_none() {
            return Err(RepoError::NotFound {
                entity: "cluster",
                id: cluster_id,
            });
        }

        let id = Uuid::new_v4();
        let now = now_epoch_ms();
        let chat_id = insert_chat(&tx, ChatKind::Project, now)?;
        tx.execute(
            "INSERT INTO projects (id, cluster_id, name, chat_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5);",
            params![
                id.to_string(),
                cluster_id.to_string(),
                name,
                chat_id.to_string(),
                now,
            ],
        )?;
        tx.commit()?;

        load_project(self.conn, id)?.ok_or(RepoError::NotFound {
            entity: "project",
            id,
        })
    }

    fn get_project(&self, id: ProjectId) -> RepoResult<Option<Project>> {
        load_project(self.conn, id)
    }

    fn create_task(&self, task: &NewTask) -> RepoResult<Task> {
        if task.progress > MAX_TASK_PROGRESS {
            return Err(RepoError::InvalidData(format!(
                "task progress {} exceeds {MAX_TASK_PROGRESS}",
                task.progress
            )));
        }
        if load_project(self.conn, task.project_id)?.is_none() {
            return Err(RepoError::NotFound {
                entity: "project",
                id: task.project_id,
            });
        }

        let id = Uuid::new_v4();
        let now = now_epoch_ms();
        self.conn.execute(
            "INSERT INTO tasks (
                id,
                project_id,
                title,
                priority,
                progress,
                status,
                created_at,
                updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7);",
            params![
                id.to_string(),
                task.project_id.to_string(),
                task.title,
                task_priority_to_db(task.priority),
                i64::from(task.progress),
                task_status_to_db(task.status),
                now,
            ],
        )?;
        load_task(self.conn, id)?.ok_or(RepoError::NotFound { entity: "task", id })
    }

    fn get_task(&self, id: TaskId) -> RepoResult<Option<Task>> {
        load_task(self.conn, id)
    }

    fn create_direct_chat(&self, creator: UserId, others: &[UserId]) -> RepoResult<Chat> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let now = now_epoch_ms();
        let chat_id = insert_chat(&tx, ChatKind::Direct, now)?;

        let members = std::iter::once((creator, ChatRole::Admin))
            .chain(others.iter().map(|user| (*user, ChatRole::Member)));
        for (user_id, role) in members {
            ensure_active_user(&tx, user_id)?;
            tx.execute(
                "INSERT OR IGNORE INTO chat_members (chat_id, user_id, role, joined_at)
                 VALUES (?1, ?2, ?3, ?4);",
                params![
                    chat_id.to_string(),
                    user_id.to_string(),
                    chat_role_to_db(role),
                    now,
                ],
            )?;
        }
        tx.commit()?;

        load_chat(self.conn, chat_id)?.ok_or(RepoError::NotFound {
            entity: "chat",
            id: chat_id,
        })
    }

    fn get_chat(&self, id: ChatId) -> RepoResult<Option<Chat>> {
        load_chat(self.conn, id)
    }

    fn delete_cluster(&self, id: ClusterId) -> RepoResult<()> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let cluster = load_cluster(&tx, id)?.ok_or(RepoError::NotFound {
            entity: "cluster",
            id,
        })?;

        let mut owned_chats = list_project_chats(&tx, id)?;
        owned_chats.extend(cluster.chat_id);

        // Projects, tasks, assignments and memberships go with the cluster row.
        tx.execute("DELETE FROM clusters WHERE id = ?1;", [id.to_string()])?;
        // Messages, receipts and chat members go with each chat row.
        for chat_id in &owned_chats {
            tx.execute("DELETE FROM chats WHERE id = ?1;", [chat_id.to_string()])?;
        }
        tx.commit()?;

        info!(
            "event=cluster_delete module=entity status=ok cluster_id={} chats_removed={}",
            id,
            owned_chats.len()
        );
        Ok(())
    }

    fn delete_project(&self, id: ProjectId) -> RepoResult<()> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let project = load_project(&tx, id)?.ok_or(RepoError::NotFound {
            entity: "project",
            id,
        })?;

        tx.execute("DELETE FROM projects WHERE id = ?1;", [id.to_string()])?;
        tx.execute(
            "DELETE FROM chats WHERE id = ?1;",
            [project.chat_id.to_string()],
        )?;
        tx.commit()?;

        info!("event=project_delete module=entity status=ok project_id={id}");
        Ok(())
    }
}

fn insert_chat(conn: &Connection, kind: ChatKind, now: i64) -> RepoResult<ChatId> {
    let chat_id = Uuid::new_v4();
    conn.execute(
        "INSERT INTO chats (id, kind, created_at, updated_at) VALUES (?1, ?2, ?3, ?3);",
        params![chat_id.to_string(), chat_kind_to_db(kind), now],
    )?;
    Ok(chat_id)
}

fn list_project_chats(conn: &Connection, cluster_id: ClusterId) -> RepoResult<Vec<ChatId>> {
    let mut stmt = conn.prepare(
        "SELECT chat_id
         FROM projects
         WHERE cluster_id = ?1;",
    )?;
    let mut rows = stmt.query([cluster_id.to_string()])?;
    let mut ids = Vec::new();
    while let Some(row) = rows.next()? {
        ids.push(uuid_column(row, "chat_id")?);
    }
    Ok(ids)
}

/// Fails unless `user_id` names an active user.
pub(crate) fn ensure_active_user(conn: &Connection, user_id: UserId) -> RepoResult<()> {
    let active: Option<i64> = conn
        .query_row(
            "SELECT is_active FROM users WHERE id = ?1;",
            [user_id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    match active {
        None => Err(RepoError::NotFound {
            entity: "user",
            id: user_id,
        }),
        Some(1) => Ok(()),
        Some(_) => Err(RepoError::InactiveUser(user_id)),
    }
}

pub(crate) fn load_user(conn: &Connection, id: UserId) -> RepoResult<Option<User>> {
    let mut stmt = conn.prepare(
        "SELECT
            id,
            display_name,
            email,
            credential_hash,
            is_active,
            created_at,
            updated_at
         FROM users
         WHERE id = ?1;",
    )?;
    let mut rows = stmt.query([id.to_string()])?;
    match rows.next()? {
        Some(row) => Ok(Some(parse_user_row(row)?)),
        None => Ok(None),
    }
}

pub(crate) fn load_cluster(conn: &Connection, id: ClusterId) -> RepoResult<Option<Cluster>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, code, chat_id, created_at, updated_at
         FROM clusters
         WHERE id = ?1;",
    )?;
    let mut rows = stmt.query([id.to_string()])?;
    match rows.next()? {
        Some(row) => Ok(Some(Cluster {
            id: uuid_column(row, "id")?,
            name: row.get("name")?,
            code: row.get("code")?,
            chat_id: optional_uuid_column(row, "chat_id")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })),
        None => Ok(None),
    }
}

pub(crate) fn load_project(conn: &Connection, id: ProjectId) -> RepoResult<Option<Project>> {
    let mut stmt = conn.prepare(
        "SELECT id, cluster_id, name, chat_id, created_at, updated_at
         FROM projects
         WHERE id = ?1;",
    )?;
    let mut rows = stmt.query([id.to_string()])?;
    match rows.next()? {
        Some(row) => Ok(Some(Project {
            id: uuid_column(row, "id")?,
            cluster_id: uuid_column(row, "cluster_id")?,
            name: row.get("name")?,
            chat_id: uuid_column(row, "chat_id")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })),
        None => Ok(None),
    }
}

pub(crate) fn load_task(conn: &Connection, id: TaskId) -> RepoResult<Option<Task>> {
    let mut stmt = conn.prepare(
        "SELECT
            id,
            project_id,
            title,
            priority,
            progress,
            status,
            created_at,
            updated_at
         FROM tasks
         WHERE id = ?1;",
    )?;
    let mut rows = stmt.query([id.to_string()])?;
    match rows.next()? {
        Some(row) => Ok(Some(parse_task_row(row)?)),
        None => Ok(None),
    }
}

pub(crate) fn load_chat(conn: &Connection, id: ChatId) -> RepoResult<Option<Chat>> {
    let mut stmt = conn.prepare(
        "SELECT id, kind, created_at, updated_at
         FROM chats
         WHERE id = ?1;",
    )?;
    let mut rows = stmt.query([id.to_string()])?;
    match rows.next()? {
        Some(row) => Ok(Some(Chat {
            id: uuid_column(row, "id")?,
            kind: enum_column(row, "kind", parse_chat_kind)?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })),
        None => Ok(None),
    }
}

fn parse_user_row(row: &Row<'_>) -> RepoResult<User> {
    Ok(User {
        id: uuid_column(row, "id")?,
        display_name: row.get("display_name")?,
        email: row.get("email")?,
        credential_hash: row.get("credential_hash")?,
        is_active: bool_column(row, "is_active")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn parse_task_row(row: &Row<'_>) -> RepoResult<Task> {
    let progress: i64 = row.get("progress")?;
    let progress = u8::try_from(progress)
        .ok()
        .filter(|value| *value <= MAX_TASK_PROGRESS)
        .ok_or_else(|| {
            RepoError::InvalidData(format!("invalid progress `{progress}` in tasks.progress"))
        })?;

    Ok(Task {
        id: uuid_column(row, "id")?,
        project_id: uuid_column(row, "project_id")?,
        title: row.get("title")?,
        priority: enum_column(row, "priority", parse_task_priority)?,
        progress,
        status: enum_column(row, "status", parse_task_status)?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}
