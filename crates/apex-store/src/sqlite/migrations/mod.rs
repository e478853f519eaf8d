//! Schema migration runner.
//!
//! Migrations are embedded with [`include_str!`] and applied in version
//! order, each inside its own transaction. The `schema_version` table records
//! what has been applied, so running the migrator twice is a no-op.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::{Result, StoreError};

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "sensor_readings and alerts tables",
    sql: include_str!("v001_schema.sql"),
}];

/// Apply every pending migration. Returns how many were applied.
pub fn run_migrations(conn: &Connection) -> Result<u32> {
    ensure_version_table(conn)?;
    let current = current_version(conn)?;
    let mut applied = 0;

    for migration in MIGRATIONS {
        if migration.version <= current {
            debug!(version = migration.version, "migration already applied, skipping");
            continue;
        }
        info!(
            version = migration.version,
            description = migration.description,
            "applying migration"
        );
        apply_migration(conn, migration)?;
        applied += 1;
    }

    Ok(applied)
}

/// Highest applied version, or 0.
pub fn current_version(conn: &Connection) -> Result<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .map_err(|e| migration_error(format!("failed to read schema_version: {e}")))
}

/// Latest version defined in code.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |m| m.version)
}

fn migration_error(message: String) -> StoreError {
    StoreError::Migration { message }
}

fn ensure_version_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
           version     INTEGER PRIMARY KEY,
           applied_at  TEXT    NOT NULL,
           description TEXT
         );",
    )
    .map_err(|e| migration_error(format!("failed to create schema_version table: {e}")))
}

fn apply_migration(conn: &Connection, migration: &Migration) -> Result<()> {
    let tx = conn.unchecked_transaction().map_err(|e| {
        migration_error(format!("failed to begin transaction for v{}: {e}", migration.version))
    })?;
    tx.execute_batch(migration.sql).map_err(|e| {
        migration_error(format!(
            "migration v{} ({}) failed: {e}",
            migration.version, migration.description
        ))
    })?;
    let _ = tx
        .execute(
            "INSERT INTO schema_version (version, applied_at, description) VALUES (?1, datetime('now'), ?2)",
            rusqlite::params![migration.version, migration.description],
        )
        .map_err(|e| migration_error(format!("failed to record v{}: {e}", migration.version)))?;
    tx.commit()
        .map_err(|e| migration_error(format!("failed to commit v{}: {e}", migration.version)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applies_all_then_nothing() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(run_migrations(&conn).unwrap(), latest_version());
        assert_eq!(run_migrations(&conn).unwrap(), 0);
        assert_eq!(current_version(&conn).unwrap(), latest_version());
    }

    #[test]
    fn creates_tables() {
        let conn = Connection::open_in_memory().unwrap();
        let _ = run_migrations(&conn).unwrap();
        for table in ["sensor_readings", "alerts"] {
            let n: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    [table],
                    |r| r.get(0),
                )
                .unwrap();
            assert_eq!(n, 1, "{table} missing");
        }
    }

    #[test]
    fn status_check_constraint_enforced() {
        let conn = Connection::open_in_memory().unwrap();
        let _ = run_migrations(&conn).unwrap();
        let res = conn.execute(
            "INSERT INTO alerts (id, title, severity, status, source, occurred_at, created_at, updated_at)
             VALUES ('x', 't', 'low', 'snoozed', 'bus', 'now', 'now', 'now')",
            [],
        );
        assert!(res.is_err());
    }
}
