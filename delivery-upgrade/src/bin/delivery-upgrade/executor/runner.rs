//! Migration runner: owns the connection and the transaction around one upgrade run.

use anyhow::{Context, Result};
use chrono::Utc;
use delivery_upgrade::plan::{CARRIER_TABLE, ORDER_REFERENCE_TABLES, TABLE_RENAMES};
use delivery_upgrade::rusqlite::Connection;
use delivery_upgrade::sql::{quote_ident, table_exists};
use delivery_upgrade::upgrade::legacy_name;
use delivery_upgrade::{MIGRATION_NAME, MigrationContext, MigrationError, MigrationOptions, MigrationReport, migrate};
use serde::Serialize;
use std::path::Path;
use std::time::Instant;

use super::state::{AppliedMigration, MigrationState, plan_checksum};
use crate::output::OutputManager;

/// Statistics from a migration run.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationStats {
    /// What the upgrade did
    pub report: MigrationReport,
    /// Ledger record written by the run
    pub record: AppliedMigration,
    /// Total execution time in milliseconds
    pub total_time_ms: u64,
    pub dry_run: bool,
}

/// Migration runner.
pub struct MigrationRunner {
    conn: Connection,
    options: MigrationOptions,
    dry_run: bool,
}

impl MigrationRunner {
    /// Open the database file and prepare it for an upgrade run.
    pub fn open(path: &Path, options: MigrationOptions, dry_run: bool) -> Result<Self> {
        if !path.is_file() {
            anyhow::bail!("Database file {} does not exist", path.display());
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database {}", path.display()))?;
        Self::from_connection(conn, options, dry_run)
    }

    /// Wrap an open connection. Foreign key enforcement is switched off for the
    /// lifetime of the runner since table rebuilds cannot run with it on.
    pub fn from_connection(conn: Connection, options: MigrationOptions, dry_run: bool) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "OFF")
            .context("Failed to disable foreign key enforcement")?;
        Ok(Self { conn, options, dry_run })
    }

    /// Ledger view over the runner's connection.
    pub fn state(&self) -> MigrationState<'_> {
        MigrationState::new(&self.conn)
    }

    /// Run the delivery upgrade once, inside a single transaction.
    ///
    /// Refuses when the ledger already lists the migration. On success the run
    /// is recorded in the same transaction, which is then committed, or rolled
    /// back in dry-run mode.
    pub fn run(&mut self, from_version: &str, output: &OutputManager) -> Result<MigrationStats> {
        if self.state().is_applied(MIGRATION_NAME)? {
            anyhow::bail!(
                "Migration '{MIGRATION_NAME}' is already applied. Restore a backup and run \
                 'delivery-upgrade migrate resolve {MIGRATION_NAME} --rolled-back' to run it again"
            );
        }

        let checksum = plan_checksum(&self.options)?;
        let start_time = Instant::now();
        let tx = self.conn.transaction().context("Failed to begin transaction")?;

        output.progress(&format!("Applying {MIGRATION_NAME}"));
        let report = {
            let mut ctx = MigrationContext::new(&tx, self.options.clone())?;
            migrate(&mut ctx, from_version)
        };
        output.clear_line();
        // Dropping the transaction on error rolls it back.
        let report = report.with_context(|| format!("Migration '{MIGRATION_NAME}' failed; nothing was changed"))?;

        for step in &report.steps {
            output.verbose(&format!("step done: {step}"));
        }

        output.progress("Checking foreign keys");
        check_foreign_keys(&tx, &touched_tables(&self.options))?;
        output.clear_line();

        let record = AppliedMigration {
            name: MIGRATION_NAME.to_string(),
            from_version: from_version.to_string(),
            applied_at: Utc::now(),
            checksum,
            execution_time_ms: start_time.elapsed().as_millis() as u64,
            rows_affected: report.rows_affected,
            dry_run: self.dry_run,
        };
        MigrationState::new(&tx).record_applied(&record)?;

        if self.dry_run {
            tx.rollback().context("Failed to roll back dry run")?;
        } else {
            tx.commit().context("Failed to commit migration")?;
        }

        Ok(MigrationStats {
            report,
            record,
            total_time_ms: start_time.elapsed().as_millis() as u64,
            dry_run: self.dry_run,
        })
    }
}

/// Tables the upgrade writes to, under their post-upgrade names.
fn touched_tables(options: &MigrationOptions) -> Vec<String> {
    let mut tables = vec![CARRIER_TABLE.to_string()];
    for rename in TABLE_RENAMES {
        tables.push(match rename.new {
            Some(new) => new.to_string(),
            None => legacy_name(&options.legacy_prefix, rename.old),
        });
    }
    if options.recovery.correct_order_references {
        tables.extend(ORDER_REFERENCE_TABLES.iter().map(|t| t.to_string()));
    }
    tables
}

/// Fail on the first dangling reference in any of `tables` that exists.
fn check_foreign_keys(conn: &Connection, tables: &[String]) -> Result<()> {
    for table in tables {
        if !table_exists(conn, table)? {
            continue;
        }
        let mut stmt = conn.prepare(&format!("PRAGMA foreign_key_check({})", quote_ident(table)?))?;
        let mut rows = stmt.query([])?;
        if let Some(row) = rows.next()? {
            return Err(MigrationError::ForeignKeyViolation {
                table: row.get(0)?,
                rowid: row.get(1)?,
                parent: row.get(2)?,
            }
            .into());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::GlobalOptions;
    use delivery_upgrade::RecoverySteps;
    use std::path::PathBuf;
    use tempfile::TempDir;

    const V8_DATABASE: &str = "
        CREATE TABLE delivery_carrier (id INTEGER PRIMARY KEY, name VARCHAR NOT NULL);
        CREATE TABLE delivery_grid (
            id INTEGER PRIMARY KEY,
            name VARCHAR NOT NULL,
            sequence INTEGER,
            carrier_id INTEGER REFERENCES delivery_carrier(id),
            active BOOLEAN
        );
        CREATE TABLE delivery_grid_line (
            id INTEGER PRIMARY KEY,
            grid_id INTEGER NOT NULL REFERENCES delivery_grid(id),
            type VARCHAR NOT NULL,
            price_type VARCHAR NOT NULL,
            list_price DOUBLE PRECISION
        );
        CREATE TABLE delivery_grid_country_rel (
            grid_id INTEGER NOT NULL REFERENCES delivery_grid(id),
            country_id INTEGER NOT NULL,
            UNIQUE (grid_id, country_id)
        );
        CREATE TABLE delivery_grid_state_rel (
            grid_id INTEGER NOT NULL REFERENCES delivery_grid(id),
            state_id INTEGER NOT NULL,
            UNIQUE (grid_id, state_id)
        );
        INSERT INTO delivery_carrier VALUES (7, 'Post'), (8, 'Courier');
        INSERT INTO delivery_grid VALUES (1, 'G1', 1, 7, 1), (2, 'G2', 1, 8, 1);
        INSERT INTO delivery_grid_line VALUES (1, 1, 'weight', 'fixed', 12.5), (2, 2, 'price', 'variable', 2.0);
        INSERT INTO delivery_grid_country_rel VALUES (1, 10), (2, 10);
    ";

    fn database() -> (TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("erp.sqlite");
        let conn = Connection::open(&path).unwrap();
        conn.pragma_update(None, "foreign_keys", "OFF").unwrap();
        conn.execute_batch(V8_DATABASE).unwrap();
        (dir, path)
    }

    fn quiet() -> OutputManager {
        OutputManager::new(GlobalOptions {
            quiet: true,
            ..Default::default()
        })
    }

    fn runner(path: &Path, dry_run: bool) -> MigrationRunner {
        MigrationRunner::open(path, MigrationOptions::default(), dry_run).unwrap()
    }

    #[test]
    fn test_run_commits_and_records() {
        let (_dir, path) = database();

        let stats = runner(&path, false).run("8.0.1.0", &quiet()).unwrap();
        assert_eq!(stats.report.grids_mapped, 2);
        assert!(!stats.dry_run);
        assert_eq!(stats.record.checksum, plan_checksum(&MigrationOptions::default()).unwrap());

        let conn = Connection::open(&path).unwrap();
        assert!(table_exists(&conn, "delivery_price_rule").unwrap());
        assert!(!table_exists(&conn, "delivery_grid_line").unwrap());
        let state = MigrationState::new(&conn);
        let applied = state.list_applied().unwrap();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].name, MIGRATION_NAME);
        assert_eq!(applied[0].from_version, "8.0.1.0");
        assert_eq!(applied[0].rows_affected, stats.report.rows_affected);
    }

    #[test]
    fn test_run_refuses_when_already_applied() {
        let (_dir, path) = database();
        runner(&path, false).run("8.0.1.0", &quiet()).unwrap();

        let err = runner(&path, false).run("8.0.1.0", &quiet()).unwrap_err();
        assert!(err.to_string().contains("already applied"));
    }

    #[test]
    fn test_dry_run_rolls_back() {
        let (_dir, path) = database();

        let stats = runner(&path, true).run("8.0.1.0", &quiet()).unwrap();
        assert!(stats.dry_run);
        assert!(stats.record.dry_run);
        assert_eq!(stats.report.grids_mapped, 2);

        let conn = Connection::open(&path).unwrap();
        assert!(table_exists(&conn, "delivery_grid_line").unwrap());
        assert!(!table_exists(&conn, "delivery_price_rule").unwrap());
        assert!(MigrationState::new(&conn).list_applied().unwrap().is_empty());
    }

    #[test]
    fn test_failed_run_records_nothing() {
        let (_dir, path) = database();
        {
            let conn = Connection::open(&path).unwrap();
            conn.pragma_update(None, "foreign_keys", "OFF").unwrap();
            conn.execute("INSERT INTO delivery_grid VALUES (3, 'Lost', 1, 99, 1)", []).unwrap();
        }

        let err = runner(&path, false).run("8.0.1.0", &quiet()).unwrap_err();
        let root = err.downcast_ref::<MigrationError>().map(MigrationError::root_cause);
        assert!(matches!(root, Some(MigrationError::OrphanGrid { grid_id: 3, .. })));

        let conn = Connection::open(&path).unwrap();
        assert!(table_exists(&conn, "delivery_grid_line").unwrap());
        assert!(!MigrationState::new(&conn).is_applied(MIGRATION_NAME).unwrap());
    }

    #[test]
    fn test_foreign_key_check_reports_violation() {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", "OFF").unwrap();
        conn.execute_batch(
            "CREATE TABLE delivery_carrier (id INTEGER PRIMARY KEY);
             CREATE TABLE sale_order (id INTEGER PRIMARY KEY, carrier_id INTEGER REFERENCES delivery_carrier(id));
             INSERT INTO sale_order VALUES (1, 5);",
        )
        .unwrap();

        check_foreign_keys(&conn, &["delivery_carrier".to_string()]).unwrap();
        let err = check_foreign_keys(&conn, &["sale_order".to_string(), "missing".to_string()]).unwrap_err();
        match err.downcast_ref::<MigrationError>() {
            Some(MigrationError::ForeignKeyViolation { table, rowid, parent }) => {
                assert_eq!(table, "sale_order");
                assert_eq!(*rowid, Some(1));
                assert_eq!(parent, "delivery_carrier");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_touched_tables() {
        let tables = touched_tables(&MigrationOptions::default());
        assert!(tables.contains(&"delivery_price_rule".to_string()));
        assert!(tables.contains(&"openupgrade_legacy_9_0_delivery_grid".to_string()));
        assert!(!tables.contains(&"sale_order".to_string()));

        let with_orders = touched_tables(&MigrationOptions {
            recovery: RecoverySteps {
                correct_order_references: true,
                ..RecoverySteps::default()
            },
            ..MigrationOptions::default()
        });
        assert!(with_orders.contains(&"sale_order".to_string()));
    }

    #[test]
    fn test_open_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = MigrationRunner::open(&dir.path().join("absent.sqlite"), MigrationOptions::default(), false);
        assert!(result.is_err());
    }
}
