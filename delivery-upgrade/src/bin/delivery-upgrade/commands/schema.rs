use std::collections::BTreeSet;

use anyhow::Result;
use clap::Subcommand;
use comfy_table::{Cell, Table};
use delivery_upgrade::delivery::{load_grid_mapping, verify_mapping_covers};
use delivery_upgrade::plan::{
    CARRIER_COLUMN, CARRIER_FIELDS, CARRIER_TABLE, COLUMN_RENAMES, FIELD_RENAMES, FIXED_PRICE_COLUMN,
    GRID_COLUMN, GRID_DEPENDENT_TABLES, GRID_LINKAGE_COPIES, GRID_TABLE, PlanTables, RULE_PRICE_COPIES,
    RULE_TABLE, TABLE_RENAMES, plan_tables,
};
use delivery_upgrade::rusqlite::Connection;
use delivery_upgrade::schema::TableShape;
use delivery_upgrade::sql::{column_exists, quote_ident, table_exists};
use delivery_upgrade::upgrade::legacy_name;
use delivery_upgrade::{MIGRATION_NAME, MigrationOptions, RecoverySteps};
use serde::Serialize;

use super::{DatabaseArgs, open_read_only};
use crate::context::ProjectContext;
use crate::examples::ExampleGroup;
use crate::executor::MigrationState;
use crate::output::{GlobalOptions, OutputFormat, OutputManager, TableDisplay, themed_table};
use crate::theme::ICONS;

pub const EXAMPLES: &[ExampleGroup] = &[
    ExampleGroup {
        title: "Upgrade Plan",
        commands: &[
            "delivery-upgrade schema plan                          # Show every rename, copy and new column",
            "delivery-upgrade --output json schema plan            # Machine-readable plan",
        ],
    },
    ExampleGroup {
        title: "Inspect Tables",
        commands: &[
            "delivery-upgrade schema inspect delivery_grid_line    # Columns, keys and indexes of a table",
        ],
    },
    ExampleGroup {
        title: "Preflight",
        commands: &[
            "delivery-upgrade schema validate --database erp.sqlite   # Check the database before deploying",
        ],
    },
];

#[derive(Subcommand)]
pub enum SchemaCommands {
    /// Show the transformation tables the upgrade applies
    #[command(name = "plan")]
    Plan,

    /// Show a table's columns, constraints and indexes
    #[command(name = "inspect")]
    Inspect {
        /// Table to inspect
        table: String,

        #[command(flatten)]
        db: DatabaseArgs,
    },

    /// Check that a database can be upgraded, without changing it
    #[command(name = "validate")]
    Validate {
        #[command(flatten)]
        db: DatabaseArgs,
    },
}

pub fn handle_schema_commands(
    command: SchemaCommands,
    ctx: &ProjectContext,
    output: &OutputManager,
) -> Result<()> {
    match command {
        SchemaCommands::Plan => {
            handle_plan(ctx, output)?;
        }
        SchemaCommands::Inspect { table, db } => {
            handle_inspect(ctx, &db, &table, output)?;
        }
        SchemaCommands::Validate { db } => {
            handle_validate(ctx, &db, output)?;
        }
    }

    Ok(())
}

/// The transformation tables under a given legacy prefix.
#[derive(Serialize)]
struct PlanView {
    legacy_prefix: String,
    #[serde(flatten)]
    tables: PlanTables,
}

impl PlanView {
    fn new(legacy_prefix: &str) -> Self {
        Self {
            legacy_prefix: legacy_prefix.to_string(),
            tables: plan_tables(),
        }
    }

    fn legacy(&self, name: &str) -> String {
        legacy_name(&self.legacy_prefix, name)
    }

    /// `[operation, table or model, from, to]` in execution order.
    fn rows(&self) -> Vec<[String; 4]> {
        let tables = &self.tables;
        let mut rows = Vec::new();

        for copy in tables.grid_linkage_copies {
            let target = copy.target.map_or_else(|| self.legacy(copy.source), str::to_string);
            rows.push(["copy column".into(), copy.table.into(), copy.source.into(), target]);
        }
        for rename in tables.column_renames {
            let new = rename.new.map_or_else(|| self.legacy(rename.old), str::to_string);
            rows.push(["rename column".into(), rename.table.into(), rename.old.into(), new]);
        }
        for rename in tables.field_renames {
            rows.push(["rename field".into(), rename.model.into(), rename.old.into(), rename.new.into()]);
        }
        rows.push(["remap grid → carrier".into(), GRID_DEPENDENT_TABLES.join(", "), GRID_COLUMN.into(), CARRIER_COLUMN.into()]);
        for field in tables.carrier_fields {
            let mut definition = field.column_type.to_string();
            if let Some(default) = field.default {
                definition.push_str(&format!(" DEFAULT {default}"));
            }
            if field.required {
                definition.push_str(" NOT NULL");
            }
            rows.push(["add column".into(), CARRIER_TABLE.into(), field.name.into(), definition]);
        }
        for copy in tables.rule_price_copies {
            let target = copy.target.map_or_else(|| self.legacy(copy.source), str::to_string);
            rows.push(["copy column".into(), copy.table.into(), copy.source.into(), target]);
        }
        for rename in tables.table_renames {
            let new = rename.new.map_or_else(|| self.legacy(rename.old), str::to_string);
            rows.push(["rename table".into(), String::new(), rename.old.into(), new]);
        }
        let property = &tables.property_rename;
        rows.push(["rename property".into(), property.model.into(), property.old.into(), property.new.into()]);
        rows
    }
}

impl TableDisplay for PlanView {
    fn to_table(&self, options: &GlobalOptions) -> Table {
        let mut table = themed_table(options, &["Operation", "Table / Model", "From", "To"]);
        for row in self.rows() {
            table.add_row(row.iter().map(Cell::new).collect::<Vec<_>>());
        }
        table
    }

    fn to_compact(&self) -> String {
        let tables = &self.tables;
        format!(
            "copies={} column_renames={} field_renames={} carrier_fields={} table_renames={} prefix={}",
            tables.grid_linkage_copies.len() + tables.rule_price_copies.len(),
            tables.column_renames.len(),
            tables.field_renames.len(),
            tables.carrier_fields.len(),
            tables.table_renames.len(),
            self.legacy_prefix
        )
    }
}

fn handle_plan(ctx: &ProjectContext, output: &OutputManager) -> Result<()> {
    output.heading(&format!("Upgrade Plan: {MIGRATION_NAME}"));
    let options = ctx.migration_options(RecoverySteps::default());
    output.display(&PlanView::new(&options.legacy_prefix))?;
    Ok(())
}

/// Introspected shape of one table.
#[derive(Serialize)]
#[serde(transparent)]
struct ShapeView(TableShape);

impl TableDisplay for ShapeView {
    fn to_table(&self, options: &GlobalOptions) -> Table {
        let shape = &self.0;
        let mut table = themed_table(options, &["Column", "Type", "Not null", "Default", "PK", "References"]);
        for column in &shape.columns {
            let references = shape
                .foreign_keys_on(&column.name)
                .iter()
                .map(|fk| format!("{} ON DELETE {}", fk.parent, fk.on_delete))
                .collect::<Vec<_>>()
                .join(", ");
            table.add_row(vec![
                Cell::new(&column.name),
                Cell::new(&column.decl_type),
                Cell::new(if column.not_null { "yes" } else { "" }),
                Cell::new(column.default.as_deref().unwrap_or("")),
                Cell::new(if column.pk_position > 0 { column.pk_position.to_string() } else { String::new() }),
                Cell::new(references),
            ]);
        }
        table
    }

    fn to_compact(&self) -> String {
        let shape = &self.0;
        format!(
            "{}: {} column(s), {} foreign key(s), {} unique constraint(s), {} index(es)",
            shape.name,
            shape.columns.len(),
            shape.foreign_keys.len(),
            shape.unique_constraints.len(),
            shape.indexes.len()
        )
    }
}

fn handle_inspect(ctx: &ProjectContext, db: &DatabaseArgs, table: &str, output: &OutputManager) -> Result<()> {
    output.heading(&format!("Table: {table}"));

    let database = ctx.database_path(db.database.as_deref())?;
    let conn = open_read_only(&database)?;
    let shape = ShapeView(TableShape::introspect(&conn, table)?);

    output.display(&shape)?;
    if output.options.output_format == OutputFormat::Table {
        for unique in &shape.0.unique_constraints {
            output.indented(ICONS.bullet, &format!("UNIQUE ({})", unique.join(", ")));
        }
        for object in shape.0.indexes.iter().chain(&shape.0.triggers) {
            output.indented(ICONS.bullet, object);
        }
        if shape.0.autoincrement {
            output.indented(ICONS.bullet, "AUTOINCREMENT");
        }
    }

    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum Severity {
    Ok,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize)]
struct Check {
    severity: Severity,
    check: String,
    detail: String,
}

/// Outcome of a read-only preflight.
#[derive(Debug, Default, Serialize)]
struct ValidationReport {
    checks: Vec<Check>,
}

impl ValidationReport {
    fn push(&mut self, severity: Severity, check: impl Into<String>, detail: impl Into<String>) {
        self.checks.push(Check {
            severity,
            check: check.into(),
            detail: detail.into(),
        });
    }

    fn errors(&self) -> usize {
        self.checks.iter().filter(|c| c.severity == Severity::Error).count()
    }
}

impl TableDisplay for ValidationReport {
    fn to_table(&self, options: &GlobalOptions) -> Table {
        let mut table = themed_table(options, &["", "Check", "Detail"]);
        for check in &self.checks {
            let icon = match check.severity {
                Severity::Ok => ICONS.check,
                Severity::Warning => ICONS.warning,
                Severity::Error => ICONS.cross,
            };
            table.add_row(vec![Cell::new(icon), Cell::new(&check.check), Cell::new(&check.detail)]);
        }
        table
    }

    fn to_compact(&self) -> String {
        let warnings = self.checks.iter().filter(|c| c.severity == Severity::Warning).count();
        format!("checks={} errors={} warnings={}", self.checks.len(), self.errors(), warnings)
    }
}

/// Check an 8.0 database against everything the upgrade relies on, without writing.
fn validate_database(conn: &Connection, options: &MigrationOptions) -> Result<ValidationReport> {
    let mut report = ValidationReport::default();

    if MigrationState::new(conn).is_applied(MIGRATION_NAME)? {
        report.push(Severity::Error, "ledger", format!("{MIGRATION_NAME} is already applied"));
    }

    let mut tables: Vec<&str> = vec![CARRIER_TABLE, GRID_TABLE];
    tables.extend(GRID_DEPENDENT_TABLES);
    let mut tables_present = true;
    for table in &tables {
        if table_exists(conn, table)? {
            report.push(Severity::Ok, format!("table {table}"), "present");
        } else {
            tables_present = false;
            report.push(Severity::Error, format!("table {table}"), "missing");
        }
    }
    for rename in TABLE_RENAMES {
        let target = rename.new.map_or_else(|| legacy_name(&options.legacy_prefix, rename.old), str::to_string);
        if table_exists(conn, &target)? {
            report.push(Severity::Error, format!("table {target}"), "already exists; rename would fail");
        }
    }
    if !tables_present {
        return Ok(report);
    }

    let mut required = BTreeSet::from([(GRID_TABLE, CARRIER_COLUMN)]);
    required.extend(GRID_LINKAGE_COPIES.iter().map(|c| (c.table, c.source)));
    required.extend(COLUMN_RENAMES.iter().map(|r| (r.table, r.old)));
    required.extend(FIELD_RENAMES.iter().map(|r| (r.table, r.old)));
    required.extend(RULE_PRICE_COPIES.iter().map(|c| (c.table, c.source)));

    let mut absent: BTreeSet<(&str, String)> = BTreeSet::new();
    absent.extend(
        GRID_LINKAGE_COPIES
            .iter()
            .map(|c| (c.table, legacy_name(&options.legacy_prefix, c.source))),
    );
    absent.extend(
        COLUMN_RENAMES
            .iter()
            .map(|r| (r.table, r.new.map_or_else(|| legacy_name(&options.legacy_prefix, r.old), str::to_string))),
    );
    absent.insert((RULE_TABLE, FIXED_PRICE_COLUMN.to_string()));
    absent.extend(CARRIER_FIELDS.iter().map(|f| (CARRIER_TABLE, f.name.to_string())));

    let mut columns_ok = true;
    for (table, column) in &required {
        if !column_exists(conn, table, column)? {
            columns_ok = false;
            report.push(Severity::Error, format!("column {table}.{column}"), "missing");
        }
    }
    for (table, column) in &absent {
        if column_exists(conn, table, column)? {
            columns_ok = false;
            report.push(Severity::Error, format!("column {table}.{column}"), "already exists; add or rename would fail");
        }
    }
    if columns_ok {
        report.push(Severity::Ok, "columns", format!("{} source column(s) present, no target collides", required.len()));
    } else {
        return Ok(report);
    }

    match load_grid_mapping(conn) {
        Ok(mapping) => {
            report.push(Severity::Ok, "grid owners", format!("{} grid(s) resolve to a carrier", mapping.len()));
            match verify_mapping_covers(conn, &mapping, GRID_COLUMN) {
                Ok(()) => report.push(Severity::Ok, "grid references", "every reference has a mapping"),
                Err(err) => report.push(Severity::Error, "grid references", err.to_string()),
            }
        }
        Err(err) => report.push(Severity::Error, "grid owners", err.to_string()),
    }

    let gridless: i64 = conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM {} dc WHERE NOT EXISTS (SELECT 1 FROM {} dg WHERE dg.carrier_id = dc.id)",
            quote_ident(CARRIER_TABLE)?,
            quote_ident(GRID_TABLE)?
        ),
        [],
        |row| row.get(0),
    )?;
    if gridless > 0 && !options.recovery.fill_missing_grids {
        report.push(
            Severity::Warning,
            "carriers without grid",
            format!("{gridless} carrier(s) have no grid; consider --fill-missing-grids"),
        );
    }

    Ok(report)
}

fn handle_validate(ctx: &ProjectContext, db: &DatabaseArgs, output: &OutputManager) -> Result<()> {
    output.heading("Validate Database");

    let database = ctx.database_path(db.database.as_deref())?;
    output.bullet(&format!("Database: {}", database.display()));
    let conn = open_read_only(&database)?;

    output.progress("Checking tables, columns and grid ownership");
    let options = ctx.migration_options(RecoverySteps::default());
    let report = validate_database(&conn, &options)?;
    output.clear_line();

    output.display(&report)?;

    let errors = report.errors();
    if errors > 0 {
        output.error(&format!("Found {errors} problem(s); the upgrade would fail"));
        anyhow::bail!("Validation failed");
    }
    output.success("Database is ready for 'delivery-upgrade migrate deploy'");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v8() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", "OFF").unwrap();
        conn.execute_batch(
            "CREATE TABLE delivery_carrier (id INTEGER PRIMARY KEY, name VARCHAR);
             CREATE TABLE delivery_grid (id INTEGER PRIMARY KEY, name VARCHAR, carrier_id INTEGER);
             CREATE TABLE delivery_grid_line (
                 id INTEGER PRIMARY KEY, grid_id INTEGER, type VARCHAR, price_type VARCHAR, list_price DOUBLE PRECISION
             );
             CREATE TABLE delivery_grid_country_rel (grid_id INTEGER, country_id INTEGER);
             CREATE TABLE delivery_grid_state_rel (grid_id INTEGER, state_id INTEGER);
             INSERT INTO delivery_carrier VALUES (7, 'Post'), (8, 'Courier'), (9, 'Pickup');
             INSERT INTO delivery_grid VALUES (1, 'G1', 7), (2, 'G2', 8);
             INSERT INTO delivery_grid_line VALUES (1, 1, 'weight', 'fixed', 12.5);",
        )
        .unwrap();
        conn
    }

    fn check_named<'a>(report: &'a ValidationReport, check: &str) -> Option<&'a Check> {
        report.checks.iter().find(|c| c.check == check)
    }

    #[test]
    fn test_validate_clean_database() {
        let conn = v8();
        let report = validate_database(&conn, &MigrationOptions::default()).unwrap();

        assert_eq!(report.errors(), 0);
        assert_eq!(check_named(&report, "grid owners").unwrap().severity, Severity::Ok);
        assert_eq!(check_named(&report, "carriers without grid").unwrap().severity, Severity::Warning);
    }

    #[test]
    fn test_validate_reports_orphan_grid() {
        let conn = v8();
        conn.execute("INSERT INTO delivery_grid VALUES (3, 'Lost', 99)", []).unwrap();

        let report = validate_database(&conn, &MigrationOptions::default()).unwrap();
        let check = check_named(&report, "grid owners").unwrap();
        assert_eq!(check.severity, Severity::Error);
        assert!(check.detail.contains("delivery grid 3"));
    }

    #[test]
    fn test_validate_reports_unmapped_reference() {
        let conn = v8();
        conn.execute("INSERT INTO delivery_grid_country_rel VALUES (42, 10)", []).unwrap();

        let report = validate_database(&conn, &MigrationOptions::default()).unwrap();
        assert_eq!(check_named(&report, "grid references").unwrap().severity, Severity::Error);
        assert_eq!(report.errors(), 1);
    }

    #[test]
    fn test_validate_reports_missing_table() {
        let conn = v8();
        conn.execute_batch("DROP TABLE delivery_grid_state_rel").unwrap();

        let report = validate_database(&conn, &MigrationOptions::default()).unwrap();
        assert_eq!(
            check_named(&report, "table delivery_grid_state_rel").unwrap().severity,
            Severity::Error
        );
        assert!(check_named(&report, "grid owners").is_none());
    }

    #[test]
    fn test_validate_reports_previous_partial_run() {
        let conn = v8();
        conn.execute_batch("ALTER TABLE delivery_grid_line ADD COLUMN openupgrade_legacy_9_0_grid_id INTEGER")
            .unwrap();

        let report = validate_database(&conn, &MigrationOptions::default()).unwrap();
        let check = check_named(&report, "column delivery_grid_line.openupgrade_legacy_9_0_grid_id").unwrap();
        assert_eq!(check.severity, Severity::Error);
    }

    #[test]
    fn test_validate_reports_missing_column() {
        let conn = v8();
        conn.execute_batch("ALTER TABLE delivery_grid_line DROP COLUMN price_type").unwrap();

        let report = validate_database(&conn, &MigrationOptions::default()).unwrap();
        assert_eq!(
            check_named(&report, "column delivery_grid_line.price_type").unwrap().severity,
            Severity::Error
        );
    }

    #[test]
    fn test_plan_rows_follow_prefix() {
        let rows = PlanView::new("legacy_").rows();
        assert!(rows.iter().any(|r| r[0] == "copy column" && r[3] == "legacy_grid_id"));
        assert!(rows.iter().any(|r| r[0] == "rename table" && r[2] == "delivery_grid" && r[3] == "legacy_delivery_grid"));
        assert!(rows.iter().any(|r| r[0] == "add column" && r[2] == "delivery_type" && r[3].ends_with("NOT NULL")));
        assert_eq!(rows.last().unwrap()[3], "property_delivery_carrier_id");
    }

    #[test]
    fn test_plan_json_flattens_tables() {
        let json = serde_json::to_value(PlanView::new("openupgrade_legacy_9_0_")).unwrap();
        assert_eq!(json["legacy_prefix"], "openupgrade_legacy_9_0_");
        assert_eq!(json["table_renames"][1]["new"], "delivery_price_rule");
    }

    #[test]
    fn test_shape_compact() {
        let conn = v8();
        let shape = ShapeView(TableShape::introspect(&conn, "delivery_grid_line").unwrap());
        assert_eq!(
            shape.to_compact(),
            "delivery_grid_line: 5 column(s), 0 foreign key(s), 0 unique constraint(s), 0 index(es)"
        );
    }
}
