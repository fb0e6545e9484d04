//! Notification dispatch.
//!
//! # Responsibility
//! - Create notifications and manage each user's feed.
//! - Turn task assignments into assignment notifications.
//!
//! # Invariants
//! - Only the target of a notification may mark it read.
//! - Re-assigning an existing assignee does not notify again.
//! - A dangling source reference resolves to `Unavailable`, never an error.

use crate::error::{CoreError, CoreResult};
use crate::model::notification::{
    EntityRef, NewNotification, Notification, NotificationId, NotificationKind, ResolvedSource,
};
use crate::model::org::TaskId;
use crate::model::user::UserId;
use crate::repo::notification_repo::NotificationRepository;
use crate::service::retry_once;
use log::info;
use std::collections::HashSet;

/// Notification use-case service.
pub struct NotificationService<R: NotificationRepository> {
    repo: R,
}

impl<R: NotificationRepository> NotificationService<R> {
    /// Creates service from repository implementation.
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Writes one notification; repeated calls write repeated rows.
    pub fn notify(
        &self,
        target: UserId,
        source: Option<UserId>,
        entity: EntityRef,
        kind: NotificationKind,
        text: impl Into<String>,
    ) -> CoreResult<Notification> {
        let notification = self.repo.insert_notification(&NewNotification {
            user_id: target,
            source_user_id: source,
            entity,
            kind,
            text: text.into(),
        })?;
        info!(
            "event=notify module=notification status=ok notification_id={} user_id={target} kind={kind:?}",
            notification.id
        );
        Ok(notification)
    }

    pub fn get(&self, id: NotificationId) -> CoreResult<Notification> {
        self.repo.get_notification(id)?.ok_or(CoreError::NotFound {
            entity: "notification",
            id,
        })
    }

    /// Marks a notification read on behalf of its target.
    pub fn mark_read(&self, id: NotificationId, user_id: UserId) -> CoreResult<()> {
        let notification = self.get(id)?;
        if notification.user_id != user_id {
            return Err(CoreError::forbidden(user_id, "mark notification read"));
        }
        retry_once("notification_mark_read", || self.repo.mark_read(id))?;
        Ok(())
    }

    pub fn list_for_user(
        &self,
        user_id: UserId,
        unread_only: bool,
        limit: Option<u32>,
    ) -> CoreResult<Vec<Notification>> {
        Ok(self.repo.list_for_user(user_id, unread_only, limit)?)
    }

    pub fn unread_count(&self, user_id: UserId) -> CoreResult<u64> {
        Ok(self.repo.unread_count(user_id)?)
    }

    pub fn mark_all_read(&self, user_id: UserId) -> CoreResult<usize> {
        retry_once("notification_mark_all_read", || self.repo.mark_all_read(user_id))
    }

    /// Assigns users to a task and notifies the newly assigned ones.
    ///
    /// Returns the users that were not assigned before this call.
    pub fn assign_task(
        &self,
        task_id: TaskId,
        assigned_by: UserId,
        users: &[UserId],
    ) -> CoreResult<Vec<UserId>> {
        let task = match self.repo.resolve_source(EntityRef::task(task_id))? {
            ResolvedSource::Task(task) => task,
            _ => {
                return Err(CoreError::NotFound {
                    entity: "task",
                    id: task_id,
                })
            }
        };

        let mut seen = HashSet::new();
        let notifications: Vec<NewNotification> = users
            .iter()
            .copied()
            .filter(|user_id| seen.insert(*user_id))
            .map(|user_id| NewNotification {
                user_id,
                source_user_id: Some(assigned_by),
                entity: EntityRef::task(task_id),
                kind: NotificationKind::Assignment,
                text: format!("Assigned to task: {}", task.title),
            })
            .collect();

        let assigned = self.repo.assign_task(task_id, &notifications)?;
        info!(
            "event=task_assign module=notification status=ok task_id={task_id} requested={} newly_assigned={}",
            notifications.len(),
            assigned.len()
        );
        Ok(assigned)
    }

    /// Returns `false` when the user was not assigned.
    pub fn unassign_task(&self, task_id: TaskId, user_id: UserId) -> CoreResult<bool> {
        Ok(self.repo.unassign_task(task_id, user_id)?)
    }

    pub fn list_assignees(&self, task_id: TaskId) -> CoreResult<Vec<UserId>> {
        Ok(self.repo.list_assignees(task_id)?)
    }

    /// Loads the entity a notification points at.
    pub fn resolve_source(&self, notification: &Notification) -> CoreResult<ResolvedSource> {
        Ok(self.repo.resolve_source(notification.entity)?)
    }
}
