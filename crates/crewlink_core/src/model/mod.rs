//! Domain model for the collaboration core.
//!
//! # Responsibility
//! - Define canonical records for users, organizational units, chats,
//!   messages, receipts, memberships and notifications.
//! - Keep every role/status/kind a closed enum.
//!
//! # Invariants
//! - Every entity is identified by a stable UUID; messages additionally carry
//!   a monotonic insertion sequence.
//! - Users and messages are soft-deleted; organizational entities cascade.

pub mod chat;
pub mod membership;
pub mod notification;
pub mod org;
pub mod user;
