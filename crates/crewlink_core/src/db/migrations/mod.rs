//! Crewlink schema history.
//!
//! # Responsibility
//! - `0001_init`: users, chats, clusters, projects, tasks and the cluster,
//!   project and chat membership tables with their single-admin and
//!   single-lead partial unique indexes.
//! - `0002_messaging`: messages, read receipts, notifications and task
//!   assignments.
//! - Bring a connection from its recorded version to the latest one in a
//!   single transaction.
//!
//! # Invariants
//! - Steps are listed in strictly increasing version order.
//! - The last applied step is recorded in `PRAGMA user_version`.
//! - A store written by a newer binary is refused, never downgraded.
//! - Enumerated columns are closed sets guarded by `CHECK`; a new variant
//!   needs a new step.

use crate::db::{DbError, DbResult};
use log::info;
use rusqlite::Connection;

#[derive(Debug, Clone, Copy)]
struct SchemaStep {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const SCHEMA_STEPS: &[SchemaStep] = &[
    SchemaStep {
        version: 1,
        name: "init",
        sql: include_str!("0001_init.sql"),
    },
    SchemaStep {
        version: 2,
        name: "messaging",
        sql: include_str!("0002_messaging.sql"),
    },
];

/// Schema version this binary writes.
pub fn latest_version() -> u32 {
    SCHEMA_STEPS.last().map_or(0, |step| step.version)
}

/// Applies every step newer than the connection's recorded version.
pub fn apply_migrations(conn: &mut Connection) -> DbResult<()> {
    let from_version = current_user_version(conn)?;
    let to_version = latest_version();
    if from_version > to_version {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: from_version,
            latest_supported: to_version,
        });
    }

    let pending: Vec<&SchemaStep> = SCHEMA_STEPS
        .iter()
        .filter(|step| step.version > from_version)
        .collect();
    if pending.is_empty() {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for step in &pending {
        tx.execute_batch(step.sql)?;
        tx.pragma_update(None, "user_version", step.version)?;
        info!(
            "event=db_migrate_step module=db status=applied version={} name={}",
            step.version, step.name
        );
    }
    tx.commit()?;

    info!(
        "event=db_migrate module=db status=ok from_version={from_version} to_version={to_version} steps={}",
        pending.len()
    );
    Ok(())
}

/// Schema version recorded on this connection; `0` for a fresh store.
pub fn current_user_version(conn: &Connection) -> DbResult<u32> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get::<_, u32>(0))?)
}

#[cfg(test)]
mod tests {
    use super::SCHEMA_STEPS;

    #[test]
    fn steps_are_strictly_increasing_from_one() {
        let versions: Vec<u32> = SCHEMA_STEPS.iter().map(|step| step.version).collect();
        assert_eq!(versions, (1..=SCHEMA_STEPS.len() as u32).collect::<Vec<_>>());
        assert!(SCHEMA_STEPS.iter().all(|step| !step.sql.trim().is_empty()));
    }
}
