//! Collaboration core for CrewLink.
//! This crate is the single source of truth for membership, messaging and
//! notification invariants.

pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use config::{ConfigError, CoreConfig, ProjectChatVisibility, PromotionPolicy};
pub use db::{open_db, open_db_in_memory, DbError};
pub use error::{CoreError, CoreResult, ErrorKind};
pub use logging::{default_log_level, init_logging, logging_status};
pub use repo::{RepoError, RepoResult};
pub use service::access_service::AccessResolver;
pub use service::membership_service::MembershipService;
pub use service::message_service::MessageService;
pub use service::notification_service::NotificationService;

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
