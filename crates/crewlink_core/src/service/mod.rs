//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls into use-case level APIs.
//! - Enforce authorization and membership policy above the storage layer.
//! - Map repository failures into `CoreError`.

pub mod access_service;
pub mod membership_service;
pub mod message_service;
pub mod notification_service;

use crate::error::CoreResult;
use crate::repo::RepoResult;
use log::warn;

/// Runs an idempotent store operation, retrying once when the store was busy
/// or a concurrent writer won a unique-key race.
pub(crate) fn retry_once<T>(
    operation: &'static str,
    mut op: impl FnMut() -> RepoResult<T>,
) -> CoreResult<T> {
    match op() {
        Err(err) if err.is_transient() || err.is_unique_race() => {
            warn!("event=store_retry module=service status=retry op={operation} error={err}");
            op().map_err(Into::into)
        }
        other => other.map_err(Into::into),
    }
}
