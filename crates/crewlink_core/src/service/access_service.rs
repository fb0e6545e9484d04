//! Chat access resolution.
//!
//! # Responsibility
//! - Decide whether a user may read and post in a chat.
//! - Compute the audience a message fans out to.
//!
//! # Invariants
//! - Fails closed: unknown chats, unowned project/company chats, unknown or
//!   deactivated users are all denied.
//! - `chat_audience` contains exactly the users for whom `can_access` holds.

use crate::config::ProjectChatVisibility;
use crate::error::{CoreError, CoreResult};
use crate::model::chat::ChatId;
use crate::model::membership::ClusterRole;
use crate::model::user::UserId;
use crate::repo::access_repo::{AccessRepository, ChatScope};
use log::debug;

/// Access resolver facade.
pub struct AccessResolver<A: AccessRepository> {
    repo: A,
    visibility: ProjectChatVisibility,
}

impl<A: AccessRepository> AccessResolver<A> {
    /// Creates resolver from repository and project-chat visibility policy.
    pub fn new(repo: A, visibility: ProjectChatVisibility) -> Self {
        Self { repo, visibility }
    }

    pub fn visibility(&self) -> ProjectChatVisibility {
        self.visibility
    }

    pub fn can_access(&self, user_id: UserId, chat_id: ChatId) -> CoreResult<bool> {
        if self.repo.user_is_active(user_id)? != Some(true) {
            return Ok(false);
        }
        let Some(scope) = self.repo.chat_scope(chat_id)? else {
            return Ok(false);
        };

        let allowed = match scope {
            ChatScope::Unowned => false,
            ChatScope::Direct => self.repo.is_chat_member(chat_id, user_id)?,
            ChatScope::Company { cluster_id } => {
                self.repo.cluster_role(cluster_id, user_id)?.is_some()
            }
            ChatScope::Project {
                project_id,
                cluster_id,
            } => {
                self.repo.is_project_member(project_id, user_id)?
                    || match self.visibility {
                        ProjectChatVisibility::ProjectMembersOnly => false,
                        ProjectChatVisibility::ClusterAdmins => {
                            self.repo.cluster_role(cluster_id, user_id)?
                                == Some(ClusterRole::Admin)
                        }
                        ProjectChatVisibility::AllClusterMembers => {
                            self.repo.cluster_role(cluster_id, user_id)?.is_some()
                        }
                    }
            }
        };
        Ok(allowed)
    }

    /// Like `can_access`, but denial is an error.
    pub fn ensure_access(&self, user_id: UserId, chat_id: ChatId) -> CoreResult<()> {
        if self.can_access(user_id, chat_id)? {
            return Ok(());
        }
        debug!("event=chat_access module=access status=denied chat_id={chat_id} user_id={user_id}");
        Err(CoreError::forbidden(user_id, "access chat"))
    }

    /// Active users allowed to access the chat, sorted by id.
    pub fn chat_audience(&self, chat_id: ChatId) -> CoreResult<Vec<UserId>> {
        Ok(self.repo.chat_audience(chat_id, self.visibility)?)
    }
}
