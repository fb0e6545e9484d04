//! Membership repository: cluster, project and chat member tables.
//!
//! # Responsibility
//! - Add/remove members and read roles for every group kind.
//! - Swap the privileged holder (cluster admin, project lead) atomically.
//!
//! # Invariants
//! - Every check-then-write runs inside one IMMEDIATE transaction, so writers
//!   are serialized by the database lock and no reader ever sees two holders.
//! - Swaps demote before they promote; the partial unique indexes reject any
//!   statement order that would let two holders coexist.
//! - A non-empty cluster always has an admin: the first member is promoted on
//!   join and the admin cannot leave while others remain.

use crate::db::now_epoch_ms;
use crate::model::chat::ChatId;
use crate::model::membership::{
    ChatMember, ChatRole, ClusterMember, ClusterRole, Member, ProjectMember, ProjectRole,
};
use crate::model::org::{ClusterId, ProjectId};
use crate::model::user::UserId;
use crate::repo::columns::{
    chat_role_to_db, cluster_role_to_db, enum_column, ensure_connection_ready, parse_chat_role,
    parse_cluster_role, parse_project_role, project_role_to_db, uuid_column,
};
use crate::repo::entity_repo::{ensure_active_user, load_chat, load_cluster, load_project};
use crate::repo::{GroupKind, RepoError, RepoResult};
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use uuid::Uuid;

/// Precondition on the current privileged holder for a swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HolderGuard {
    /// Swap regardless of who holds the role now.
    Unconditional,
    /// Swap only if the current holder equals the given value.
    Expect(Option<UserId>),
}

/// Outcome of a privileged-role swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleSwap {
    pub previous: Option<UserId>,
    pub current: Option<UserId>,
}

impl RoleSwap {
    pub fn changed(&self) -> bool {
        self.previous != self.current
    }
}

/// Repository interface for membership tables.
pub trait MembershipRepository {
    /// Adds a member; the first member of a cluster without admin becomes admin.
    fn add_cluster_member(&self, cluster_id: ClusterId, user_id: UserId)
        -> RepoResult<ClusterRole>;
    fn remove_cluster_member(&self, cluster_id: ClusterId, user_id: UserId) -> RepoResult<()>;
    fn swap_cluster_admin(
        &self,
        cluster_id: ClusterId,
        user_id: UserId,
        guard: HolderGuard,
    ) -> RepoResult<RoleSwap>;
    fn cluster_admin(&self, cluster_id: ClusterId) -> RepoResult<Option<UserId>>;
    fn cluster_role(&self, cluster_id: ClusterId, user_id: UserId)
        -> RepoResult<Option<ClusterRole>>;
    fn list_cluster_members(&self, cluster_id: ClusterId) -> RepoResult<Vec<ClusterMember>>;

    fn add_project_member(&self, project_id: ProjectId, user_id: UserId) -> RepoResult<()>;
    fn remove_project_member(&self, project_id: ProjectId, user_id: UserId) -> RepoResult<()>;
    /// Replaces the lead; `None` clears it.
    fn swap_project_lead(
        &self,
        project_id: ProjectId,
        user_id: Option<UserId>,
        guard: HolderGuard,
    ) -> RepoResult<RoleSwap>;
    fn project_lead(&self, project_id: ProjectId) -> RepoResult<Option<UserId>>;
    fn project_role(&self, project_id: ProjectId, user_id: UserId)
        -> RepoResult<Option<ProjectRole>>;
    fn list_project_members(&self, project_id: ProjectId) -> RepoResult<Vec<ProjectMember>>;

    fn add_chat_member(&self, chat_id: ChatId, user_id: UserId, role: ChatRole) -> RepoResult<()>;
    fn remove_chat_member(&self, chat_id: ChatId, user_id: UserId) -> RepoResult<()>;
    fn list_chat_members(&self, chat_id: ChatId) -> RepoResult<Vec<ChatMember>>;
}

/// Static description of one membership table.
struct GroupTable {
    kind: GroupKind,
    table: &'static str,
    key: &'static str,
    privileged: &'static str,
    demoted: &'static str,
}

const CLUSTER_MEMBERS: GroupTable = GroupTable {
    kind: GroupKind::Cluster,
    table: "cluster_members",
    key: "cluster_id",
    privileged: "admin",
    demoted: "member",
};

const PROJECT_MEMBERS: GroupTable = GroupTable {
    kind: GroupKind::Project,
    table: "project_members",
    key: "project_id",
    privileged: "lead",
    demoted: "member",
};

const CHAT_MEMBERS: GroupTable = GroupTable {
    kind: GroupKind::Chat,
    table: "chat_members",
    key: "chat_id",
    privileged: "admin",
    demoted: "member",
};

/// SQLite-backed membership repository.
pub struct SqliteMembershipRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteMembershipRepository<'conn> {
    /// Creates repository from migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn)?;
        Ok(Self { conn })
    }
}

impl MembershipRepository for SqliteMembershipRepository<'_> {
    fn add_cluster_member(
        &self,
        cluster_id: ClusterId,
        user_id: UserId,
    ) -> RepoResult<ClusterRole> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        ensure_cluster_exists(&tx, cluster_id)?;
        ensure_active_user(&tx, user_id)?;
        ensure_not_member(&tx, &CLUSTER_MEMBERS, cluster_id, user_id)?;

        let role = if load_holder(&tx, &CLUSTER_MEMBERS, cluster_id)?.is_none() {
            ClusterRole::Admin
        } else {
            ClusterRole::Member
        };
        insert_member(
            &tx,
            &CLUSTER_MEMBERS,
            cluster_id,
            user_id,
            cluster_role_to_db(role),
        )?;
        tx.commit()?;
        Ok(role)
    }

    fn remove_cluster_member(&self, cluster_id: ClusterId, user_id: UserId) -> RepoResult<()> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        ensure_cluster_exists(&tx, cluster_id)?;
        let role = load_role_text(&tx, &CLUSTER_MEMBERS, cluster_id, user_id)?.ok_or(
            RepoError::NotAMember {
                group: GroupKind::Cluster,
                group_id: cluster_id,
                user_id,
            },
        )?;

        if role == CLUSTER_MEMBERS.privileged
            && count_members(&tx, &CLUSTER_MEMBERS, cluster_id)? > 1
        {
            return Err(RepoError::LastAdmin {
                cluster_id,
                user_id,
            });
        }

        delete_member(&tx, &CLUSTER_MEMBERS, cluster_id, user_id)?;
        tx.commit()?;
        Ok(())
    }

    fn swap_cluster_admin(
        &self,
        cluster_id: ClusterId,
        user_id: UserId,
        guard: HolderGuard,
    ) -> RepoResult<RoleSwap> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        ensure_cluster_exists(&tx, cluster_id)?;
        let swap = swap_holder(&tx, &CLUSTER_MEMBERS, cluster_id, Some(user_id), guard)?;
        tx.commit()?;
        Ok(swap)
    }

    fn cluster_admin(&self, cluster_id: ClusterId) -> RepoResult<Option<UserId>> {
        load_holder(self.conn, &CLUSTER_MEMBERS, cluster_id)
    }

    fn cluster_role(
        &self,
        cluster_id: ClusterId,
        user_id: UserId,
    ) -> RepoResult<Option<ClusterRole>> {
        load_cluster_role(self.conn, cluster_id, user_id)
    }

    fn list_cluster_members(&self, cluster_id: ClusterId) -> RepoResult<Vec<ClusterMember>> {
        list_members(self.conn, &CLUSTER_MEMBERS, cluster_id, parse_cluster_role)
    }

    fn add_project_member(&self, project_id: ProjectId, user_id: UserId) -> RepoResult<()> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        ensure_project_exists(&tx, project_id)?;
        ensure_active_user(&tx, user_id)?;
        ensure_not_member(&tx, &PROJECT_MEMBERS, project_id, user_id)?;
        insert_member(
            &tx,
            &PROJECT_MEMBERS,
            project_id,
            user_id,
            project_role_to_db(ProjectRole::Member),
        )?;
        tx.commit()?;
        Ok(())
    }

    fn remove_project_member(&self, project_id: ProjectId, user_id: UserId) -> RepoResult<()> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        ensure_project_exists(&tx, project_id)?;
        if !delete_member(&tx, &PROJECT_MEMBERS, project_id, user_id)? {
            return Err(RepoError::NotAMember {
                group: GroupKind::Project,
                group_id: project_id,
                user_id,
            });
        }
        tx.commit()?;
        Ok(())
    }

    fn swap_project_lead(
        &self,
        project_id: ProjectId,
        user_id: Option<UserId>,
        guard: HolderGuard,
    ) -> RepoResult<RoleSwap> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        ensure_project_exists(&tx, project_id)?;
        let swap = swap_holder(&tx, &PROJECT_MEMBERS, project_id, user_id, guard)?;
        tx.commit()?;
        Ok(swap)
    }

    fn project_lead(&self, project_id: ProjectId) -> RepoResult<Option<UserId>> {
        load_holder(self.conn, &PROJECT_MEMBERS, project_id)
    }

    fn project_role(
        &self,
        project_id: ProjectId,
        user_id: UserId,
    ) -> RepoResult<Option<ProjectRole>> {
        load_project_role(self.conn, project_id, user_id)
    }

    fn list_project_members(&self, project_id: ProjectId) -> RepoResult<Vec<ProjectMember>> {
        list_members(self.conn, &PROJECT_MEMBERS, project_id, parse_project_role)
    }

    fn add_chat_member(&self, chat_id: ChatId, user_id: UserId, role: ChatRole) -> RepoResult<()> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        if load_chat(&tx, chat_id)?.is_none() {
            return Err(RepoError::NotFound {
                entity: "chat",
                id: chat_id,
            });
        }
        ensure_active_user(&tx, user_id)?;
        ensure_not_member(&tx, &CHAT_MEMBERS, chat_id, user_id)?;
        insert_member(&tx, &CHAT_MEMBERS, chat_id, user_id, chat_role_to_db(role))?;
        tx.commit()?;
        Ok(())
    }

    fn remove_chat_member(&self, chat_id: ChatId, user_id: UserId) -> RepoResult<()> {
        if !delete_member(self.conn, &CHAT_MEMBERS, chat_id, user_id)? {
            return Err(RepoError::NotAMember {
                group: GroupKind::Chat,
                group_id: chat_id,
                user_id,
            });
        }
        Ok(())
    }

    fn list_chat_members(&self, chat_id: ChatId) -> RepoResult<Vec<ChatMember>> {
        list_members(self.conn, &CHAT_MEMBERS, chat_id, parse_chat_role)
    }
}

pub(crate) fn load_cluster_role(
    conn: &Connection,
    cluster_id: ClusterId,
    user_id: UserId,
) -> RepoResult<Option<ClusterRole>> {
    load_role_text(conn, &CLUSTER_MEMBERS, cluster_id, user_id)?
        .map(|text| {
            parse_cluster_role(&text).ok_or_else(|| {
                RepoError::InvalidData(format!("invalid value `{text}` in cluster_members.role"))
            })
        })
        .transpose()
}

pub(crate) fn load_project_role(
    conn: &Connection,
    project_id: ProjectId,
    user_id: UserId,
) -> RepoResult<Option<ProjectRole>> {
    load_role_text(conn, &PROJECT_MEMBERS, project_id, user_id)?
        .map(|text| {
            parse_project_role(&text).ok_or_else(|| {
                RepoError::InvalidData(format!("invalid value `{text}` in project_members.role"))
            })
        })
        .transpose()
}

pub(crate) fn is_chat_member(
    conn: &Connection,
    chat_id: ChatId,
    user_id: UserId,
) -> RepoResult<bool> {
    Ok(load_role_text(conn, &CHAT_MEMBERS, chat_id, user_id)?.is_some())
}

fn swap_holder(
    tx: &Connection,
    group: &GroupTable,
    group_id: Uuid,
    next: Option<UserId>,
    guard: HolderGuard,
) -> RepoResult<RoleSwap> {
    if let Some(user_id) = next {
        if load_role_text(tx, group, group_id, user_id)?.is_none() {
            return Err(RepoError::NotAMember {
                group: group.kind,
                group_id,
                user_id,
            });
        }
        ensure_active_user(tx, user_id)?;
    }

    let previous = load_holder(tx, group, group_id)?;
    if let HolderGuard::Expect(expected) = guard {
        if expected != previous {
            return Err(RepoError::StaleHolder {
                group: group.kind,
                group_id,
                expected,
                actual: previous,
            });
        }
    }
    if previous == next {
        return Ok(RoleSwap {
            previous,
            current: next,
        });
    }

    tx.execute(
        &format!(
            "UPDATE {table} SET role = ?3 WHERE {key} = ?1 AND role = ?2;",
            table = group.table,
            key = group.key
        ),
        params![group_id.to_string(), group.privileged, group.demoted],
    )?;
    if let Some(user_id) = next {
        tx.execute(
            &format!(
                "UPDATE {table} SET role = ?3 WHERE {key} = ?1 AND user_id = ?2;",
                table = group.table,
                key = group.key
            ),
            params![group_id.to_string(), user_id.to_string(), group.privileged],
        )?;
    }

    Ok(RoleSwap {
        previous,
        current: next,
    })
}

fn ensure_cluster_exists(conn: &Connection, cluster_id: ClusterId) -> RepoResult<()> {
    match load_cluster(conn, cluster_id)? {
        Some(_) => Ok(()),
        None => Err(RepoError::NotFound {
            entity: "cluster",
            id: cluster_id,
        }),
    }
}

fn ensure_project_exists(conn: &Connection, project_id: ProjectId) -> RepoResult<()> {
    match load_project(conn, project_id)? {
        Some(_) => Ok(()),
        None => Err(RepoError::NotFound {
            entity: "project",
            id: project_id,
        }),
    }
}

fn ensure_not_member(
    conn: &Connection,
    group: &GroupTable,
    group_id: Uuid,
    user_id: UserId,
) -> RepoResult<()> {
    if load_role_text(conn, group, group_id, user_id)?.is_some() {
        return Err(RepoError::AlreadyMember {
            group: group.kind,
            group_id,
            user_id,
        });
    }
    Ok(())
}

fn load_role_text(
    conn: &Connection,
    group: &GroupTable,
    group_id: Uuid,
    user_id: UserId,
) -> RepoResult<Option<String>> {
    let role = conn
        .query_row(
            &format!(
                "SELECT role FROM {table} WHERE {key} = ?1 AND user_id = ?2;",
                table = group.table,
                key = group.key
            ),
            params![group_id.to_string(), user_id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(role)
}

fn load_holder(conn: &Connection, group: &GroupTable, group_id: Uuid) -> RepoResult<Option<UserId>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT user_id FROM {table} WHERE {key} = ?1 AND role = ?2;",
        table = group.table,
        key = group.key
    ))?;
    let mut rows = stmt.query(params![group_id.to_string(), group.privileged])?;
    let holder = match rows.next()? {
        Some(row) => Some(uuid_column(row, "user_id")?),
        None => None,
    };
    if rows.next()?.is_some() {
        return Err(RepoError::InvalidData(format!(
            "{} {} has more than one {}",
            group.kind, group_id, group.privileged
        )));
    }
    Ok(holder)
}

fn count_members(conn: &Connection, group: &GroupTable, group_id: Uuid) -> RepoResult<i64> {
    let count = conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM {table} WHERE {key} = ?1;",
            table = group.table,
            key = group.key
        ),
        [group_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(count)
}

fn insert_member(
    conn: &Connection,
    group: &GroupTable,
    group_id: Uuid,
    user_id: UserId,
    role: &str,
) -> RepoResult<()> {
    conn.execute(
        &format!(
            "INSERT INTO {table} ({key}, user_id, role, joined_at) VALUES (?1, ?2, ?3, ?4);",
            table = group.table,
            key = group.key
        ),
        params![
            group_id.to_string(),
            user_id.to_string(),
            role,
            now_epoch_ms()
        ],
    )?;
    Ok(())
}

fn delete_member(
    conn: &Connection,
    group: &GroupTable,
    group_id: Uuid,
    user_id: UserId,
) -> RepoResult<bool> {
    let changed = conn.execute(
        &format!(
            "DELETE FROM {table} WHERE {key} = ?1 AND user_id = ?2;",
            table = group.table,
            key = group.key
        ),
        params![group_id.to_string(), user_id.to_string()],
    )?;
    Ok(changed > 0)
}

fn list_members<R>(
    conn: &Connection,
    group: &GroupTable,
    group_id: Uuid,
    parse: fn(&str) -> Option<R>,
) -> RepoResult<Vec<Member<R>>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT user_id, role, joined_at
         FROM {table}
         WHERE {key} = ?1
         ORDER BY joined_at ASC, user_id ASC;",
        table = group.table,
        key = group.key
    ))?;
    let mut rows = stmt.query([group_id.to_string()])?;
    let mut members = Vec::new();
    while let Some(row) = rows.next()? {
        members.push(Member {
            user_id: uuid_column(row, "user_id")?,
            role: enum_column(row, "role", parse)?,
            joined_at: row.get("joined_at")?,
        });
    }
    Ok(members)
}
