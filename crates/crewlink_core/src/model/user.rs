//! User identity record.
//!
//! Users are created by the auth collaborator and only ever deactivated,
//! because messages and tasks keep referencing them.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type UserId = Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub display_name: String,
    pub email: String,
    /// Opaque hash produced by the auth collaborator; never inspected here.
    #[serde(skip_serializing)]
    pub credential_hash: String,
    pub is_active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Input for registering a user row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub display_name: String,
    pub email: String,
    pub credential_hash: String,
}

impl NewUser {
    pub fn new(
        display_name: impl Into<String>,
        email: impl Into<String>,
        credential_hash: impl Into<String>,
    ) -> Self {
        Self {
            display_name: display_name.into(),
            email: email.into(),
            credential_hash: credential_hash.into(),
        }
    }
}
