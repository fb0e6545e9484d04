//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define use-case oriented data access contracts per component.
//! - Isolate SQLite query details from service orchestration.
//! - Own every multi-row write as one IMMEDIATE transaction.
//!
//! # Invariants
//! - Repositories refuse connections that are not at the latest schema.
//! - Persisted enum text that does not parse is reported as `InvalidData`,
//!   never masked.

pub mod access_repo;
mod columns;
pub mod entity_repo;
mod error;
pub mod membership_repo;
pub mod message_repo;
pub mod notification_repo;

pub use error::{GroupKind, RepoError, RepoResult};
