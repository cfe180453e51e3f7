use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use comfy_table::{Cell, Table};
use delivery_upgrade::rusqlite::Connection;
use delivery_upgrade::{MIGRATION_NAME, RecoverySteps};
use serde::Serialize;

use super::{DEFAULT_FROM_VERSION, DatabaseArgs, open_read_only};
use crate::context::ProjectContext;
use crate::examples::ExampleGroup;
use crate::executor::state::plan_checksum;
use crate::executor::{AppliedMigration, MigrationRunner, MigrationState, MigrationStats};
use crate::output::{GlobalOptions, OutputManager, TableDisplay, themed_table};

pub const EXAMPLES: &[ExampleGroup] = &[
    ExampleGroup {
        title: "Deploy the Upgrade",
        commands: &[
            "delivery-upgrade migrate deploy --database erp.sqlite     # Upgrade delivery data to 9.0",
            "delivery-upgrade migrate deploy --dry-run                 # Run everything, then roll back",
            "delivery-upgrade migrate deploy --fill-missing-grids      # Give grid-less carriers a grid first",
        ],
    },
    ExampleGroup {
        title: "Migration Status",
        commands: &[
            "delivery-upgrade migrate status                           # List applied migrations",
            "delivery-upgrade --output json migrate status             # Same, for scripts",
        ],
    },
    ExampleGroup {
        title: "Recovery",
        commands: &[
            "delivery-upgrade migrate resolve delivery_9_0_1_0_pre --rolled-back   # After restoring a backup",
            "delivery-upgrade migrate resolve delivery_9_0_1_0_pre --applied       # Upgraded by other means",
        ],
    },
];

#[derive(Subcommand)]
pub enum MigrateCommands {
    /// Upgrade the delivery data from 8.0 to 9.0 in one transaction
    #[command(name = "deploy")]
    Deploy(DeployArgs),

    /// List migrations recorded as applied
    #[command(name = "status")]
    Status {
        #[command(flatten)]
        db: DatabaseArgs,
    },

    /// Manually mark a migration as applied or rolled back
    #[command(name = "resolve")]
    Resolve {
        /// Migration name to resolve
        migration_name: String,

        /// Mark the migration as applied
        #[arg(long, conflicts_with = "rolled_back")]
        applied: bool,

        /// Mark the migration as rolled back
        #[arg(long, conflicts_with = "applied")]
        rolled_back: bool,

        /// Version recorded when marking as applied
        #[arg(long, default_value = DEFAULT_FROM_VERSION)]
        from_version: String,

        #[command(flatten)]
        db: DatabaseArgs,
    },
}

#[derive(Args)]
pub struct DeployArgs {
    #[command(flatten)]
    pub db: DatabaseArgs,

    /// Installed delivery module version being upgraded
    #[arg(long, default_value = DEFAULT_FROM_VERSION)]
    pub from_version: String,

    /// Run the whole upgrade, then roll it back
    #[arg(long)]
    pub dry_run: bool,

    /// Insert a grid for every carrier that has none
    #[arg(long)]
    pub fill_missing_grids: bool,

    /// Create a dedicated service product for every grid
    #[arg(long)]
    pub create_carrier_products: bool,

    /// Point sale orders and pickings at grid ids before the remap
    #[arg(long)]
    pub correct_order_references: bool,
}

impl DeployArgs {
    fn recovery(&self) -> RecoverySteps {
        RecoverySteps {
            fill_missing_grids: self.fill_missing_grids,
            create_carrier_products: self.create_carrier_products,
            correct_order_references: self.correct_order_references,
        }
    }
}

pub fn handle_migrate_commands(
    command: MigrateCommands,
    ctx: &ProjectContext,
    output: &OutputManager,
) -> Result<()> {
    match command {
        MigrateCommands::Deploy(args) => {
            handle_deploy(ctx, &args, output)?;
        }
        MigrateCommands::Status { db } => {
            handle_status(ctx, &db, output)?;
        }
        MigrateCommands::Resolve {
            migration_name,
            applied,
            rolled_back,
            from_version,
            db,
        } => {
            handle_resolve(ctx, &db, &migration_name, applied, rolled_back, &from_version, output)?;
        }
    }

    Ok(())
}

fn handle_deploy(ctx: &ProjectContext, args: &DeployArgs, output: &OutputManager) -> Result<()> {
    output.heading("Deploy Delivery Upgrade");

    if args.dry_run {
        output.warning("DRY RUN MODE - the transaction will be rolled back");
    }

    let database = ctx.database_path(args.db.database.as_deref())?;
    let options = ctx.migration_options(args.recovery());

    output.bullet(&format!("Database: {}", database.display()));
    output.bullet(&format!("Upgrading from: {}", args.from_version));
    output.bullet(&format!("Legacy prefix: {}", options.legacy_prefix));
    for (enabled, name) in [
        (options.recovery.fill_missing_grids, "fill missing grids"),
        (options.recovery.create_carrier_products, "create carrier products"),
        (options.recovery.correct_order_references, "correct order references"),
    ] {
        if enabled {
            output.bullet(&format!("Recovery step: {name}"));
        }
    }

    let mut runner = MigrationRunner::open(&database, options, args.dry_run)?;
    let stats = runner.run(&args.from_version, output)?;

    output.heading("Summary");
    output.display(&stats)?;

    if stats.dry_run {
        output.warning("DRY RUN - No actual changes were made");
    } else {
        output.success(&format!("Applied {MIGRATION_NAME} in {}ms", stats.total_time_ms));
    }

    Ok(())
}

impl TableDisplay for MigrationStats {
    fn to_table(&self, options: &GlobalOptions) -> Table {
        let report = &self.report;
        let steps = report.steps.iter().map(|s| s.name()).collect::<Vec<_>>().join(", ");

        let mut table = themed_table(options, &["Metric", "Value"]);
        let mut rows = vec![
            ("Migration", self.record.name.clone()),
            ("From version", report.from_version.clone()),
            ("Steps", steps),
            ("Grids mapped", report.grids_mapped.to_string()),
            ("Rows remapped", report.rows_remapped.to_string()),
            ("Duplicate links dropped", report.duplicates_collapsed.to_string()),
        ];
        if report.steps.iter().any(|s| s.is_recovery()) {
            rows.push(("Grids created", report.grids_created.to_string()));
            rows.push(("Products created", report.products_created.to_string()));
            rows.push(("Order references corrected", report.order_references_corrected.to_string()));
        }
        rows.push(("Rows affected", report.rows_affected.to_string()));
        rows.push(("Elapsed (ms)", self.total_time_ms.to_string()));
        rows.push(("Dry run", self.dry_run.to_string()));

        for (metric, value) in rows {
            table.add_row(vec![Cell::new(metric), Cell::new(value)]);
        }
        table
    }

    fn to_compact(&self) -> String {
        format!(
            "{} grids={} remapped={} affected={} {}ms{}",
            self.record.name,
            self.report.grids_mapped,
            self.report.rows_remapped,
            self.report.rows_affected,
            self.total_time_ms,
            if self.dry_run { " (dry run)" } else { "" }
        )
    }
}

/// Ledger contents for display.
#[derive(Serialize)]
#[serde(transparent)]
struct AppliedList(Vec<AppliedMigration>);

impl TableDisplay for AppliedList {
    fn to_table(&self, options: &GlobalOptions) -> Table {
        let mut table = themed_table(
            options,
            &["Migration", "From", "Applied at", "Rows affected", "Time (ms)", "Checksum"],
        );
        for migration in &self.0 {
            table.add_row(vec![
                Cell::new(&migration.name),
                Cell::new(&migration.from_version),
                Cell::new(migration.applied_at.format("%Y-%m-%d %H:%M:%S UTC").to_string()),
                Cell::new(migration.rows_affected.to_string()),
                Cell::new(migration.execution_time_ms.to_string()),
                Cell::new(&migration.checksum),
            ]);
        }
        table
    }

    fn to_compact(&self) -> String {
        if self.0.is_empty() {
            return "no migrations applied".to_string();
        }
        self.0
            .iter()
            .map(|m| format!("{}@{}", m.name, m.applied_at.to_rfc3339()))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn handle_status(ctx: &ProjectContext, db: &DatabaseArgs, output: &OutputManager) -> Result<()> {
    output.heading("Migration Status");

    let database = ctx.database_path(db.database.as_deref())?;
    let conn = open_read_only(&database)?;
    let state = MigrationState::new(&conn);

    let applied = state.list_applied()?;
    if applied.is_empty() {
        output.info(&format!("{MIGRATION_NAME} has not been applied to {}", database.display()));
        output.info("Run 'delivery-upgrade migrate deploy' to upgrade");
        return Ok(());
    }

    let last = state.last_applied()?;
    output.display(&AppliedList(applied))?;
    if let Some(last) = last {
        output.key_value("Last applied", &format!("{} at {}", last.name, last.applied_at.to_rfc3339()));
    }

    Ok(())
}

fn handle_resolve(
    ctx: &ProjectContext,
    db: &DatabaseArgs,
    migration_name: &str,
    applied: bool,
    rolled_back: bool,
    from_version: &str,
    output: &OutputManager,
) -> Result<()> {
    if !applied && !rolled_back {
        output.error("Must specify either --applied or --rolled-back");
        anyhow::bail!("Missing resolution flag");
    }

    let status = if applied { "applied" } else { "rolled-back" };

    output.heading(&format!("Resolve Migration: {migration_name}"));
    output.info(&format!("Marking migration as: {status}"));

    if migration_name != MIGRATION_NAME {
        output.warning(&format!("'{migration_name}' is not a migration this tool runs ({MIGRATION_NAME})"));
    }

    let database = ctx.database_path(db.database.as_deref())?;
    let conn = Connection::open(&database)
        .with_context(|| format!("Failed to open database {}", database.display()))?;
    let state = MigrationState::new(&conn);

    if applied {
        if state.is_applied(migration_name)? {
            output.warning(&format!("Migration '{migration_name}' is already marked as applied"));
            return Ok(());
        }

        let checksum = plan_checksum(&ctx.migration_options(RecoverySteps::default()))?;
        state.mark_applied(migration_name, from_version, &checksum)?;
        output.success(&format!("Marked '{migration_name}' as applied"));
    } else {
        if !state.mark_rolled_back(migration_name)? {
            output.warning(&format!("Migration '{migration_name}' is not marked as applied"));
            return Ok(());
        }
        output.success(&format!("Marked '{migration_name}' as rolled back"));
    }

    Ok(())
}
