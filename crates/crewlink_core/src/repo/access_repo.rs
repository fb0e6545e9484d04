//! Read-only queries behind chat access resolution.
//!
//! # Responsibility
//! - Map a chat to its owning scope (direct member list, project, cluster).
//! - Answer membership questions and compute chat audiences.
//!
//! # Invariants
//! - A project/company chat with no owning row maps to `ChatScope::Unowned`;
//!   callers must treat it as inaccessible.
//! - Audiences only ever contain active users.

use crate::config::ProjectChatVisibility;
use crate::model::chat::{ChatId, ChatKind};
use crate::model::membership::ClusterRole;
use crate::model::org::{ClusterId, ProjectId};
use crate::model::user::UserId;
use crate::repo::columns::{ensure_connection_ready, parse_uuid, uuid_column};
use crate::repo::entity_repo::load_chat;
use crate::repo::membership_repo::{is_chat_member, load_cluster_role, load_project_role};
use crate::repo::RepoResult;
use rusqlite::{params, Connection, OptionalExtension};

/// Ownership of a chat, resolved from the chat kind and owning rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatScope {
    Direct,
    Project {
        project_id: ProjectId,
        cluster_id: ClusterId,
    },
    Company {
        cluster_id: ClusterId,
    },
    /// Project/company chat whose owner row is missing.
    Unowned,
}

/// Repository interface for access resolution.
pub trait AccessRepository {
    /// Returns `None` when the chat does not exist.
    fn chat_scope(&self, chat_id: ChatId) -> RepoResult<Option<ChatScope>>;
    /// Returns `None` when the user does not exist.
    fn user_is_active(&self, user_id: UserId) -> RepoResult<Option<bool>>;
    fn is_chat_member(&self, chat_id: ChatId, user_id: UserId) -> RepoResult<bool>;
    fn is_project_member(&self, project_id: ProjectId, user_id: UserId) -> RepoResult<bool>;
    fn cluster_role(&self, cluster_id: ClusterId, user_id: UserId)
        -> RepoResult<Option<ClusterRole>>;
    /// Active users allowed to read the chat under `visibility`.
    fn chat_audience(
        &self,
        chat_id: ChatId,
        visibility: ProjectChatVisibility,
    ) -> RepoResult<Vec<UserId>>;
}

/// SQLite-backed access repository.
pub struct SqliteAccessRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteAccessRepository<'conn> {
    /// Creates repository from migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn)?;
        Ok(Self { conn })
    }
}

impl AccessRepository for SqliteAccessRepository<'_> {
    fn chat_scope(&self, chat_id: ChatId) -> RepoResult<Option<ChatScope>> {
        let Some(chat) = load_chat(self.conn, chat_id)? else {
            return Ok(None);
        };

        let scope = match chat.kind {
            ChatKind::Direct => ChatScope::Direct,
            ChatKind::Project => {
                let owner: Option<(String, String)> = self
                    .conn
                    .query_row(
                        "SELECT id, cluster_id FROM projects WHERE chat_id = ?1;",
                        [chat_id.to_string()],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()?;
                match owner {
                    Some((project_id, cluster_id)) => ChatScope::Project {
                        project_id: parse_uuid(&project_id, "projects.id")?,
                        cluster_id: parse_uuid(&cluster_id, "projects.cluster_id")?,
                    },
                    None => ChatScope::Unowned,
                }
            }
            ChatKind::Company => {
                let owner: Option<String> = self
                    .conn
                    .query_row(
                        "SELECT id FROM clusters WHERE chat_id = ?1;",
                        [chat_id.to_string()],
                        |row| row.get(0),
                    )
                    .optional()?;
                match owner {
                    Some(cluster_id) => ChatScope::Company {
                        cluster_id: parse_uuid(&cluster_id, "clusters.id")?,
                    },
                    None => ChatScope::Unowned,
                }
            }
        };
        Ok(Some(scope))
    }

    fn user_is_active(&self, user_id: UserId) -> RepoResult<Option<bool>> {
        let active: Option<i64> = self
            .conn
            .query_row(
                "SELECT is_active FROM users WHERE id = ?1;",
                [user_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(active.map(|value| value == 1))
    }

    fn is_chat_member(&self, chat_id: ChatId, user_id: UserId) -> RepoResult<bool> {
        is_chat_member(self.conn, chat_id, user_id)
    }

    fn is_project_member(&self, project_id: ProjectId, user_id: UserId) -> RepoResult<bool> {
        Ok(load_project_role(self.conn, project_id, user_id)?.is_some())
    }

    fn cluster_role(
        &self,
        cluster_id: ClusterId,
        user_id: UserId,
    ) -> RepoResult<Option<ClusterRole>> {
        load_cluster_role(self.conn, cluster_id, user_id)
    }

    fn chat_audience(
        &self,
        chat_id: ChatId,
        visibility: ProjectChatVisibility,
    ) -> RepoResult<Vec<UserId>> {
        let Some(scope) = self.chat_scope(chat_id)? else {
            return Ok(Vec::new());
        };

        let (sql, first, second) = match scope {
            ChatScope::Unowned => return Ok(Vec::new()),
            ChatScope::Direct => (
                "SELECT m.user_id AS user_id
                 FROM chat_members m
                 INNER JOIN users u ON u.id = m.user_id
                 WHERE m.chat_id = ?1
                   AND u.is_active = 1
                 ORDER BY m.user_id ASC;",
                chat_id,
                None,
            ),
            ChatScope::Company { cluster_id } => (
                "SELECT m.user_id AS user_id
                 FROM cluster_members m
                 INNER JOIN users u ON u.id = m.user_id
                 WHERE m.cluster_id = ?1
                   AND u.is_active = 1
                 ORDER BY m.user_id ASC;",
                cluster_id,
                None,
            ),
            ChatScope::Project {
                project_id,
                cluster_id,
            } => {
                match visibility {
                    ProjectChatVisibility::ProjectMembersOnly => (
                        "SELECT m.user_id AS user_id
                         FROM project_members m
                         INNER JOIN users u ON u.id = m.user_id
                         WHERE m.project_id = ?1
                           AND u.is_active = 1
                         ORDER BY m.user_id ASC;",
                        project_id,
                        None,
                    ),
                    ProjectChatVisibility::ClusterAdmins => (
                        "SELECT DISTINCT audience.user_id AS user_id
                         FROM (
                            SELECT user_id FROM project_members WHERE project_id = ?1
                            UNION
                            SELECT user_id FROM cluster_members
                            WHERE cluster_id = ?2 AND role = 'admin'
                         ) audience
                         INNER JOIN users u ON u.id = audience.user_id
                         WHERE u.is_active = 1
                         ORDER BY audience.user_id ASC;",
                        project_id,
                        Some(cluster_id),
                    ),
                    ProjectChatVisibility::AllClusterMembers => (
                        "SELECT DISTINCT audience.user_id AS user_id
                         FROM (
                            SELECT user_id FROM project_members WHERE project_id = ?1
                            UNION
                            SELECT user_id FROM cluster_members WHERE cluster_id = ?2
                         ) audience
                         INNER JOIN users u ON u.id = audience.user_id
                         WHERE u.is_active = 1
                         ORDER BY audience.user_id ASC;",
                        project_id,
                        Some(cluster_id),
                    ),
                }
            }
        };

        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = match second {
            Some(second) => stmt.query(params![first.to_string(), second.to_string()])?,
            None => stmt.query([first.to_string()])?,
        };
        let mut users = Vec::new();
        while let Some(row) = rows.next()? {
            users.push(uuid_column(row, "user_id")?);
        }
        Ok(users)
    }
}
