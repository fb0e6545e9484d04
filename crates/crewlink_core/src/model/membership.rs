//! Group membership roles.
//!
//! # Invariants
//! - A cluster with at least one member has exactly one `Admin`.
//! - A project has zero or one `Lead`.
//! - Chat roles carry no cardinality rule.

use crate::model::user::UserId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterRole {
    Admin,
    Member,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectRole {
    Lead,
    Member,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    Admin,
    #[default]
    Member,
}

/// One membership row of a group, generic over the group's role type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member<R> {
    pub user_id: UserId,
    pub role: R,
    pub joined_at: i64,
}

pub type ClusterMember = Member<ClusterRole>;
pub type ProjectMember = Member<ProjectRole>;
pub type ChatMember = Member<ChatRole>;
