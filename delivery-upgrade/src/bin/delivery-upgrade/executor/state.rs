//! Migration state tracking in the upgraded database.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use delivery_upgrade::MigrationOptions;
use delivery_upgrade::plan::plan_tables;
use delivery_upgrade::rusqlite::{Connection, OptionalExtension, params};
use delivery_upgrade::sql::table_exists;
use serde::{Deserialize, Serialize};

/// Table holding the applied-migration ledger.
pub const MIGRATION_STATE_TABLE: &str = "delivery_upgrade_migrations";

/// Applied migration record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedMigration {
    /// Migration name (e.g., "delivery_9_0_1_0_pre")
    pub name: String,
    /// Module version the database was upgraded from
    pub from_version: String,
    /// When the migration was applied
    pub applied_at: DateTime<Utc>,
    /// Checksum of the transformation plan and options that ran
    pub checksum: String,
    /// Execution time in milliseconds
    pub execution_time_ms: u64,
    /// Rows touched by the logged data statements
    pub rows_affected: u64,
    /// Whether the record was written by a dry run
    pub dry_run: bool,
}

/// Migration state manager.
///
/// Works on any connection, including one inside an open transaction, so a
/// record written during a run commits or rolls back with the run itself.
pub struct MigrationState<'c> {
    conn: &'c Connection,
}

impl<'c> MigrationState<'c> {
    /// Create a new migration state manager.
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    fn ensure_table(&self) -> Result<()> {
        self.conn
            .execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {MIGRATION_STATE_TABLE} (
                    name TEXT PRIMARY KEY,
                    from_version TEXT NOT NULL,
                    applied_at TEXT NOT NULL,
                    checksum TEXT NOT NULL,
                    execution_time_ms INTEGER NOT NULL,
                    rows_affected INTEGER NOT NULL,
                    dry_run BOOLEAN NOT NULL
                )"
            ))
            .context("Failed to initialize migration state")
    }

    /// List all applied migrations, oldest first.
    pub fn list_applied(&self) -> Result<Vec<AppliedMigration>> {
        if !table_exists(self.conn, MIGRATION_STATE_TABLE)? {
            return Ok(Vec::new());
        }

        let mut stmt = self.conn.prepare(&format!(
            "SELECT name, from_version, applied_at, checksum, execution_time_ms, rows_affected, dry_run
             FROM {MIGRATION_STATE_TABLE}
             ORDER BY applied_at, name"
        ))?;
        let applied = stmt
            .query_map([], |row| {
                Ok(AppliedMigration {
                    name: row.get(0)?,
                    from_version: row.get(1)?,
                    applied_at: row.get(2)?,
                    checksum: row.get(3)?,
                    execution_time_ms: row.get::<_, i64>(4)? as u64,
                    rows_affected: row.get::<_, i64>(5)? as u64,
                    dry_run: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read migration state")?;
        Ok(applied)
    }

    /// Check if a migration has been applied.
    pub fn is_applied(&self, name: &str) -> Result<bool> {
        if !table_exists(self.conn, MIGRATION_STATE_TABLE)? {
            return Ok(false);
        }
        let found = self
            .conn
            .query_row(
                &format!("SELECT 1 FROM {MIGRATION_STATE_TABLE} WHERE name = ?1"),
                [name],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Record a migration as applied.
    pub fn record_applied(&self, migration: &AppliedMigration) -> Result<()> {
        self.ensure_table()?;
        self.conn
            .execute(
                &format!(
                    "INSERT INTO {MIGRATION_STATE_TABLE}
                     (name, from_version, applied_at, checksum, execution_time_ms, rows_affected, dry_run)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
                ),
                params![
                    migration.name,
                    migration.from_version,
                    migration.applied_at,
                    migration.checksum,
                    migration.execution_time_ms as i64,
                    migration.rows_affected as i64,
                    migration.dry_run,
                ],
            )
            .with_context(|| format!("Failed to record applied migration '{}'", migration.name))?;
        Ok(())
    }

    /// Remove a migration record.
    pub fn remove_applied(&self, name: &str) -> Result<bool> {
        if !table_exists(self.conn, MIGRATION_STATE_TABLE)? {
            return Ok(false);
        }
        let removed = self
            .conn
            .execute(&format!("DELETE FROM {MIGRATION_STATE_TABLE} WHERE name = ?1"), [name])
            .context("Failed to remove migration record")?;
        Ok(removed > 0)
    }

    /// Mark a migration as applied (for resolve command).
    pub fn mark_applied(&self, name: &str, from_version: &str, checksum: &str) -> Result<()> {
        let migration = AppliedMigration {
            name: name.to_string(),
            from_version: from_version.to_string(),
            applied_at: Utc::now(),
            checksum: checksum.to_string(),
            execution_time_ms: 0,
            rows_affected: 0,
            dry_run: false,
        };
        self.record_applied(&migration)
    }

    /// Mark a migration as rolled back (remove from applied).
    pub fn mark_rolled_back(&self, name: &str) -> Result<bool> {
        self.remove_applied(name)
    }

    /// Get the last applied migration.
    pub fn last_applied(&self) -> Result<Option<AppliedMigration>> {
        let applied = self.list_applied()?;
        Ok(applied.into_iter().last())
    }
}

/// Calculate a checksum for migration content.
pub fn calculate_checksum(content: &str) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    content.hash(&mut hasher);
    format!("{:x}", hasher.finish())
}

/// Checksum of the transformation tables together with the options of a run.
pub fn plan_checksum(options: &MigrationOptions) -> Result<String> {
    let plan = serde_json::to_string(&plan_tables()).context("Failed to serialize migration plan")?;
    let options = serde_json::to_string(options).context("Failed to serialize migration options")?;
    Ok(calculate_checksum(&format!("{plan}\n{options}")))
}
