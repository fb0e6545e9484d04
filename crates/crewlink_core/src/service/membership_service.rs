//! Membership invariant enforcement.
//!
//! # Responsibility
//! - Promote cluster admins and project leads atomically.
//! - Apply the configured `PromotionPolicy` to racing promotions.
//! - Expose membership add/remove with the admin succession rules.
//!
//! # Invariants
//! - A non-empty cluster has exactly one admin after every committed
//!   operation.
//! - A project has at most one lead.
//! - Under `RejectConcurrent`, a promotion whose observed holder changed
//!   before commit fails with `Conflict` and leaves no trace.

use crate::config::PromotionPolicy;
use crate::error::CoreResult;
use crate::model::chat::ChatId;
use crate::model::membership::{ChatMember, ChatRole, ClusterMember, ClusterRole, ProjectMember};
use crate::model::org::{ClusterId, ProjectId};
use crate::model::user::UserId;
use crate::repo::membership_repo::{HolderGuard, MembershipRepository, RoleSwap};
use crate::repo::RepoError;
use log::{info, warn};

/// Membership use-case service.
pub struct MembershipService<R: MembershipRepository> {
    repo: R,
    policy: PromotionPolicy,
}

impl<R: MembershipRepository> MembershipService<R> {
    /// Creates service from repository implementation and promotion policy.
    pub fn new(repo: R, policy: PromotionPolicy) -> Self {
        Self { repo, policy }
    }

    /// Makes `user_id` the sole admin of the cluster.
    pub fn set_admin(&self, cluster_id: ClusterId, user_id: UserId) -> CoreResult<RoleSwap> {
        let guard = self.policy_guard(|| self.repo.cluster_admin(cluster_id))?;
        self.swap_admin(cluster_id, user_id, guard)
    }

    /// Makes `user_id` admin only if the current admin is `expected_admin`.
    pub fn set_admin_if(
        &self,
        cluster_id: ClusterId,
        user_id: UserId,
        expected_admin: Option<UserId>,
    ) -> CoreResult<RoleSwap> {
        self.swap_admin(cluster_id, user_id, HolderGuard::Expect(expected_admin))
    }

    /// Makes `user_id` the sole lead of the project.
    pub fn promote_lead(&self, project_id: ProjectId, user_id: UserId) -> CoreResult<RoleSwap> {
        let guard = self.policy_guard(|| self.repo.project_lead(project_id))?;
        self.swap_lead(project_id, Some(user_id), guard)
    }

    /// Demotes the current lead without naming a successor.
    pub fn clear_lead(&self, project_id: ProjectId) -> CoreResult<RoleSwap> {
        self.swap_lead(project_id, None, HolderGuard::Unconditional)
    }

    pub fn cluster_admin(&self, cluster_id: ClusterId) -> CoreResult<Option<UserId>> {
        Ok(self.repo.cluster_admin(cluster_id)?)
    }

    pub fn project_lead(&self, project_id: ProjectId) -> CoreResult<Option<UserId>> {
        Ok(self.repo.project_lead(project_id)?)
    }

    /// Adds a cluster member and reports the role it was given.
    pub fn add_cluster_member(
        &self,
        cluster_id: ClusterId,
        user_id: UserId,
    ) -> CoreResult<ClusterRole> {
        let role = self.repo.add_cluster_member(cluster_id, user_id)?;
        info!(
            "event=cluster_member_add module=membership status=ok cluster_id={cluster_id} user_id={user_id} role={role:?}"
        );
        Ok(role)
    }

    pub fn remove_cluster_member(&self, cluster_id: ClusterId, user_id: UserId) -> CoreResult<()> {
        match self.repo.remove_cluster_member(cluster_id, user_id) {
            Ok(()) => {
                info!(
                    "event=cluster_member_remove module=membership status=ok cluster_id={cluster_id} user_id={user_id}"
                );
                Ok(())
            }
            Err(err @ RepoError::LastAdmin { .. }) => {
                warn!(
                    "event=cluster_member_remove module=membership status=rejected cluster_id={cluster_id} user_id={user_id} reason=last_admin"
                );
                Err(err.into())
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn list_cluster_members(&self, cluster_id: ClusterId) -> CoreResult<Vec<ClusterMember>> {
        Ok(self.repo.list_cluster_members(cluster_id)?)
    }

    pub fn add_project_member(&self, project_id: ProjectId, user_id: UserId) -> CoreResult<()> {
        self.repo.add_project_member(project_id, user_id)?;
        info!(
            "event=project_member_add module=membership status=ok project_id={project_id} user_id={user_id}"
        );
        Ok(())
    }

    pub fn remove_project_member(&self, project_id: ProjectId, user_id: UserId) -> CoreResult<()> {
        self.repo.remove_project_member(project_id, user_id)?;
        info!(
            "event=project_member_remove module=membership status=ok project_id={project_id} user_id={user_id}"
        );
        Ok(())
    }

    pub fn list_project_members(&self, project_id: ProjectId) -> CoreResult<Vec<ProjectMember>> {
        Ok(self.repo.list_project_members(project_id)?)
    }

    pub fn add_chat_member(&self, chat_id: ChatId, user_id: UserId, role: ChatRole) -> CoreResult<()> {
        Ok(self.repo.add_chat_member(chat_id, user_id, role)?)
    }

    pub fn remove_chat_member(&self, chat_id: ChatId, user_id: UserId) -> CoreResult<()> {
        Ok(self.repo.remove_chat_member(chat_id, user_id)?)
    }

    pub fn list_chat_members(&self, chat_id: ChatId) -> CoreResult<Vec<ChatMember>> {
        Ok(self.repo.list_chat_members(chat_id)?)
    }

    fn policy_guard(
        &self,
        current_holder: impl FnOnce() -> Result<Option<UserId>, RepoError>,
    ) -> CoreResult<HolderGuard> {
        match self.policy {
            PromotionPolicy::LastCommittedWins => Ok(HolderGuard::Unconditional),
            PromotionPolicy::RejectConcurrent => Ok(HolderGuard::Expect(current_holder()?)),
        }
    }

    fn swap_admin(
        &self,
        cluster_id: ClusterId,
        user_id: UserId,
        guard: HolderGuard,
    ) -> CoreResult<RoleSwap> {
        match self.repo.swap_cluster_admin(cluster_id, user_id, guard) {
            Ok(swap) => {
                info!(
                    "event=admin_set module=membership status=ok cluster_id={cluster_id} previous={:?} current={:?} changed={}",
                    swap.previous,
                    swap.current,
                    swap.changed()
                );
                Ok(swap)
            }
            Err(err) => {
                warn!(
                    "event=admin_set module=membership status=error cluster_id={cluster_id} user_id={user_id} error={err}"
                );
                Err(err.into())
            }
        }
    }

    fn swap_lead(
        &self,
        project_id: ProjectId,
        user_id: Option<UserId>,
        guard: HolderGuard,
    ) -> CoreResult<RoleSwap> {
        match self.repo.swap_project_lead(project_id, user_id, guard) {
            Ok(swap) => {
                info!(
                    "event=lead_set module=membership status=ok project_id={project_id} previous={:?} current={:?} changed={}",
                    swap.previous,
                    swap.current,
                    swap.changed()
                );
                Ok(swap)
            }
            Err(err) => {
                warn!(
                    "event=lead_set module=membership status=error project_id={project_id} error={err}"
                );
                Err(err.into())
            }
        }
    }
}
