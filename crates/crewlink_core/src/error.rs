//! Service-level error type and its taxonomy.
//!
//! # Responsibility
//! - Give callers one error enum for every core operation.
//! - Classify each failure into a small, stable `ErrorKind`.
//!
//! # Invariants
//! - Lock contention maps to `Unavailable`; rejected constraints map to
//!   `InvalidState`.
//! - Unparseable persisted data maps to `Internal`, never to `NotFound`.

use crate::model::user::UserId;
use crate::repo::{GroupKind, RepoError};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub type CoreResult<T> = Result<T, CoreError>;

/// Coarse failure class reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Forbidden,
    Conflict,
    InvalidState,
    Unavailable,
    Internal,
}

#[derive(Debug)]
pub enum CoreError {
    NotFound {
        entity: &'static str,
        id: Uuid,
    },
    /// Actor is not allowed to perform the operation.
    Forbidden {
        user_id: UserId,
        action: &'static str,
    },
    /// A concurrent writer changed the state this operation was based on.
    Conflict {
        group: GroupKind,
        group_id: Uuid,
        expected: Option<UserId>,
        actual: Option<UserId>,
    },
    NotAMember {
        group: GroupKind,
        group_id: Uuid,
        user_id: UserId,
    },
    AlreadyMember {
        group: GroupKind,
        group_id: Uuid,
        user_id: UserId,
    },
    LastAdmin {
        cluster_id: Uuid,
        user_id: UserId,
    },
    InactiveUser(UserId),
    /// Request is well-formed but not valid in the current state.
    InvalidState(String),
    /// Store was busy or locked; the caller may retry.
    Unavailable(RepoError),
    /// A schema constraint rejected the write (duplicate key, dangling
    /// reference, out-of-range value).
    ConstraintViolation(RepoError),
    /// Any other repository failure.
    Repo(RepoError),
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Forbidden { .. } => ErrorKind::Forbidden,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::NotAMember { .. }
            | Self::AlreadyMember { .. }
            | Self::LastAdmin { .. }
            | Self::InactiveUser(_)
            | Self::InvalidState(_)
            | Self::ConstraintViolation(_) => ErrorKind::InvalidState,
            Self::Unavailable(_) => ErrorKind::Unavailable,
            Self::Repo(_) => ErrorKind::Internal,
        }
    }

    pub(crate) fn forbidden(user_id: UserId, action: &'static str) -> Self {
        Self::Forbidden { user_id, action }
    }

    pub(crate) fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }
}

impl Display for CoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            Self::Forbidden { user_id, action } => {
                write!(f, "user {user_id} is not allowed to {action}")
            }
            Self::Conflict {
                group,
                group_id,
                expected,
                actual,
            } => write!(
                f,
                "concurrent change on {group} {group_id}: expected holder {expected:?}, found {actual:?}"
            ),
            Self::NotAMember {
                group,
                group_id,
                user_id,
            } => write!(f, "user {user_id} is not a member of {group} {group_id}"),
            Self::AlreadyMember {
                group,
                group_id,
                user_id,
            } => write!(f, "user {user_id} is already a member of {group} {group_id}"),
            Self::LastAdmin {
                cluster_id,
                user_id,
            } => write!(
                f,
                "cannot remove admin {user_id} from cluster {cluster_id} while other members remain"
            ),
            Self::InactiveUser(id) => write!(f, "user is deactivated: {id}"),
            Self::InvalidState(message) => write!(f, "invalid state: {message}"),
            Self::Unavailable(err) => write!(f, "store unavailable: {err}"),
            Self::ConstraintViolation(err) => write!(f, "constraint violation: {err}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for CoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Unavailable(err) | Self::ConstraintViolation(err) | Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for CoreError {
    fn from(value: RepoError) -> Self {
        if value.is_transient() {
            return Self::Unavailable(value);
        }
        if value.is_constraint_violation() {
            return Self::ConstraintViolation(value);
        }
        match value {
            RepoError::NotFound { entity, id } => Self::NotFound { entity, id },
            RepoError::NotAMember {
                group,
                group_id,
                user_id,
            } => Self::NotAMember {
                group,
                group_id,
                user_id,
            },
            RepoError::AlreadyMember {
                group,
                group_id,
                user_id,
            } => Self::AlreadyMember {
                group,
                group_id,
                user_id,
            },
            RepoError::LastAdmin {
                cluster_id,
                user_id,
            } => Self::LastAdmin {
                cluster_id,
                user_id,
            },
            RepoError::StaleHolder {
                group,
                group_id,
                expected,
                actual,
            } => Self::Conflict {
                group,
                group_id,
                expected,
                actual,
            },
            RepoError::InactiveUser(id) => Self::InactiveUser(id),
            err @ RepoError::NotDelivered { .. } => Self::InvalidState(err.to_string()),
            other => Self::Repo(other),
        }
    }
}
