//! Column codecs shared by the SQLite repositories.

use crate::db::migrations::{current_user_version, latest_version};
use crate::model::chat::{ChatKind, MessageKind};
use crate::model::membership::{ChatRole, ClusterRole, ProjectRole};
use crate::model::notification::{EntityKind, NotificationKind};
use crate::model::org::{TaskPriority, TaskStatus};
use crate::repo::{RepoError, RepoResult};
use rusqlite::{Connection, Row};
use uuid::Uuid;

pub(crate) fn ensure_connection_ready(conn: &Connection) -> RepoResult<()> {
    let expected_version = latest_version();
    let actual_version = current_user_version(conn)?;
    if actual_version != expected_version {
        return Err(RepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }
    Ok(())
}

pub(crate) fn parse_uuid(value: &str, column: &'static str) -> RepoResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid `{value}` in {column}")))
}

pub(crate) fn uuid_column(row: &Row<'_>, name: &'static str) -> RepoResult<Uuid> {
    let text: String = row.get(name)?;
    parse_uuid(&text, name)
}

pub(crate) fn optional_uuid_column(row: &Row<'_>, name: &'static str) -> RepoResult<Option<Uuid>> {
    row.get::<_, Option<String>>(name)?
        .map(|value| parse_uuid(&value, name))
        .transpose()
}

pub(crate) fn bool_column(row: &Row<'_>, name: &'static str) -> RepoResult<bool> {
    match row.get::<_, i64>(name)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(RepoError::InvalidData(format!(
            "invalid boolean value `{other}` in {name}"
        ))),
    }
}

/// Reads a text column and decodes it with `parse`, reporting bad values.
pub(crate) fn enum_column<T>(
    row: &Row<'_>,
    name: &'static str,
    parse: fn(&str) -> Option<T>,
) -> RepoResult<T> {
    let text: String = row.get(name)?;
    parse(&text).ok_or_else(|| RepoError::InvalidData(format!("invalid value `{text}` in {name}")))
}

pub(crate) fn chat_kind_to_db(kind: ChatKind) -> &'static str {
    match kind {
        ChatKind::Project => "project",
        ChatKind::Company => "company",
        ChatKind::Direct => "direct",
    }
}

pub(crate) fn parse_chat_kind(value: &str) -> Option<ChatKind> {
    match value {
        "project" => Some(ChatKind::Project),
        "company" => Some(ChatKind::Company),
        "direct" => Some(ChatKind::Direct),
        _ => None,
    }
}

pub(crate) fn message_kind_to_db(kind: MessageKind) -> &'static str {
    match kind {
        MessageKind::Text => "text",
        MessageKind::Image => "image",
        MessageKind::File => "file",
    }
}

pub(crate) fn parse_message_kind(value: &str) -> Option<MessageKind> {
    match value {
        "text" => Some(MessageKind::Text),
        "image" => Some(MessageKind::Image),
        "file" => Some(MessageKind::File),
        _ => None,
    }
}

pub(crate) fn cluster_role_to_db(role: ClusterRole) -> &'static str {
    match role {
        ClusterRole::Admin => "admin",
        ClusterRole::Member => "member",
    }
}

pub(crate) fn parse_cluster_role(value: &str) -> Option<ClusterRole> {
    match value {
        "admin" => Some(ClusterRole::Admin),
        "member" => Some(ClusterRole::Member),
        _ => None,
    }
}

pub(crate) fn project_role_to_db(role: ProjectRole) -> &'static str {
    match role {
        ProjectRole::Lead => "lead",
        ProjectRole::Member => "member",
    }
}

pub(crate) fn parse_project_role(value: &str) -> Option<ProjectRole> {
    match value {
        "lead" => Some(ProjectRole::Lead),
        "member" => Some(ProjectRole::Member),
        _ => None,
    }
}

pub(crate) fn chat_role_to_db(role: ChatRole) -> &'static str {
    match role {
        ChatRole::Admin => "admin",
        ChatRole::Member => "member",
    }
}

pub(crate) fn parse_chat_role(value: &str) -> Option<ChatRole> {
    match value {
        "admin" => Some(ChatRole::Admin),
        "member" => Some(ChatRole::Member),
        _ => None,
    }
}

pub(crate) fn task_priority_to_db(priority: TaskPriority) -> &'static str {
    match priority {
        TaskPriority::Low => "low",
        TaskPriority::Medium => "medium",
        TaskPriority::High => "high",
    }
}

pub(crate) fn parse_task_priority(value: &str) -> Option<TaskPriority> {
    match value {
        "low" => Some(TaskPriority::Low),
        "medium" => Some(TaskPriority::Medium),
        "high" => Some(TaskPriority::High),
        _ => None,
    }
}

pub(crate) fn task_status_to_db(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Todo => "todo",
        TaskStatus::InProgress => "in_progress",
        TaskStatus::Done => "done",
    }
}

pub(crate) fn parse_task_status(value: &str) -> Option<TaskStatus> {
    match value {
        "todo" => Some(TaskStatus::Todo),
        "in_progress" => Some(TaskStatus::InProgress),
        "done" => Some(TaskStatus::Done),
        _ => None,
    }
}

pub(crate) fn entity_kind_to_db(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Task => "task",
        EntityKind::Message => "message",
    }
}

pub(crate) fn parse_entity_kind(value: &str) -> Option<EntityKind> {
    match value {
        "task" => Some(EntityKind::Task),
        "message" => Some(EntityKind::Message),
        _ => None,
    }
}

pub(crate) fn notification_kind_to_db(kind: NotificationKind) -> &'static str {
    match kind {
        NotificationKind::Mention => "mention",
        NotificationKind::Assignment => "assignment",
    }
}

pub(crate) fn parse_notification_kind(value: &str) -> Option<NotificationKind> {
    match value {
        "mention" => Some(NotificationKind::Mention),
        "assignment" => Some(NotificationKind::Assignment),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enum_codecs_agree_with_schema_spelling() {
        for status in [TaskStatus::Todo, TaskStatus::InProgress, TaskStatus::Done] {
            assert_eq!(parse_task_status(task_status_to_db(status)), Some(status));
        }
        assert_eq!(task_status_to_db(TaskStatus::InProgress), "in_progress");
        assert_eq!(parse_cluster_role("owner"), None);
        assert_eq!(parse_chat_kind("Company"), None);
    }
}
