//! Repository error type shared by all SQLite repositories.

use crate::db::DbError;
use crate::model::user::UserId;
use rusqlite::{ffi, ErrorCode};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub type RepoResult<T> = Result<T, RepoError>;

/// Group table a membership error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKind {
    Cluster,
    Project,
    Chat,
}

impl Display for GroupKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Cluster => "cluster",
            Self::Project => "project",
            Self::Chat => "chat",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub enum RepoError {
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// Referenced row does not exist.
    NotFound { entity: &'static str, id: Uuid },
    /// User is not a member of the group.
    NotAMember {
        group: GroupKind,
        group_id: Uuid,
        user_id: UserId,
    },
    /// User already has a membership row in the group.
    AlreadyMember {
        group: GroupKind,
        group_id: Uuid,
        user_id: UserId,
    },
    /// Removing this admin would leave remaining members without one.
    LastAdmin { cluster_id: Uuid, user_id: UserId },
    /// Compare-and-swap on a privileged role saw a different holder.
    StaleHolder {
        group: GroupKind,
        group_id: Uuid,
        expected: Option<UserId>,
        actual: Option<UserId>,
    },
    /// User exists but is deactivated.
    InactiveUser(UserId),
    /// Read requested before the receipt recorded a delivery.
    NotDelivered {
        message_id: Uuid,
        user_id: UserId,
    },
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Persisted data cannot be converted to a valid read model.
    InvalidData(String),
}

impl RepoError {
    /// Whether the store was busy or locked and the operation may be retried
    /// as is.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.sqlite_code(),
            Some((ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked, _))
        )
    }

    /// Whether a concurrent writer inserted the same key first. Idempotent
    /// upserts may retry once; other callers see a constraint failure.
    pub fn is_unique_race(&self) -> bool {
        matches!(
            self.sqlite_code(),
            Some((
                ErrorCode::ConstraintViolation,
                ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY
            ))
        )
    }

    /// Whether the write was rejected by a schema constraint (unique, foreign
    /// key, check or not-null).
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self.sqlite_code(),
            Some((ErrorCode::ConstraintViolation, _))
        )
    }

    fn sqlite_code(&self) -> Option<(ErrorCode, i32)> {
        match self {
            Self::Db(DbError::Sqlite(rusqlite::Error::SqliteFailure(err, _))) => {
                Some((err.code, err.extended_code))
            }
            _ => None,
        }
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
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
                "user {user_id} is the admin of cluster {cluster_id} and other members remain"
            ),
            Self::StaleHolder {
                group,
                group_id,
                expected,
                actual,
            } => write!(
                f,
                "{group} {group_id} privileged holder changed: expected {expected:?}, found {actual:?}"
            ),
            Self::InactiveUser(id) => write!(f, "user is deactivated: {id}"),
            Self::NotDelivered {
                message_id,
                user_id,
            } => write!(
                f,
                "message {message_id} has not been delivered to user {user_id}"
            ),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "repository requires schema version {expected_version}, got {actual_version}"
            ),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

#[cfg(test)]
mod tests {
    use super::RepoError;
    use crate::db::DbError;
    use rusqlite::ffi;

    fn sqlite_failure(code: i32) -> RepoError {
        RepoError::Db(DbError::Sqlite(rusqlite::Error::SqliteFailure(
            ffi::Error::new(code),
            None,
        )))
    }

    #[test]
    fn only_lock_contention_is_transient() {
        assert!(sqlite_failure(ffi::SQLITE_BUSY).is_transient());
        assert!(sqlite_failure(ffi::SQLITE_LOCKED).is_transient());
        assert!(!sqlite_failure(ffi::SQLITE_CONSTRAINT_UNIQUE).is_transient());
        assert!(!sqlite_failure(ffi::SQLITE_CORRUPT).is_transient());
        assert!(!RepoError::InvalidData("x".to_string()).is_transient());
    }

    #[test]
    fn unique_races_are_told_apart_from_other_constraints() {
        assert!(sqlite_failure(ffi::SQLITE_CONSTRAINT_UNIQUE).is_unique_race());
        assert!(sqlite_failure(ffi::SQLITE_CONSTRAINT_PRIMARYKEY).is_unique_race());
        assert!(!sqlite_failure(ffi::SQLITE_CONSTRAINT_FOREIGNKEY).is_unique_race());
        assert!(!sqlite_failure(ffi::SQLITE_CONSTRAINT_CHECK).is_unique_race());

        assert!(sqlite_failure(ffi::SQLITE_CONSTRAINT_FOREIGNKEY).is_constraint_violation());
        assert!(sqlite_failure(ffi::SQLITE_CONSTRAINT_CHECK).is_constraint_violation());
        assert!(!sqlite_failure(ffi::SQLITE_BUSY).is_constraint_violation());
    }
}
