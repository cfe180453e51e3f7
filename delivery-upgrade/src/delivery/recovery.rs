//! Opt-in recovery steps for databases with missing or inconsistent delivery data.
//!
//! None of these run unless enabled in [`crate::context::RecoverySteps`]. When
//! enabled they run right after the grid linkage is preserved and before any
//! rename.

use log::{info, warn};
use rusqlite::params;

use crate::context::MigrationContext;
use crate::errors::MigrationResult;
use crate::plan::{CARRIER_COLUMN, CARRIER_TABLE, GRID_TABLE, ORDER_REFERENCE_TABLES};
use crate::sql::{column_exists, quote_ident, table_exists};
use crate::upgrade::lift_constraints;

/// Audit columns copied from the carrier when both tables have them.
const AUDIT_COLUMNS: &[&str] = &["create_uid", "create_date", "write_uid", "write_date"];

/// Insert a grid for every carrier that has none, so every carrier survives the remap.
pub fn fill_missing_grids(ctx: &mut MigrationContext<'_>) -> MigrationResult<u64> {
    let mut columns = vec!["name", "sequence", "carrier_id", "active"];
    let mut values = vec!["dc.name", "1", "dc.id", "dc.active"];
    let mut audit_values = Vec::new();
    for column in AUDIT_COLUMNS {
        if column_exists(ctx.conn(), GRID_TABLE, column)? && column_exists(ctx.conn(), CARRIER_TABLE, column)? {
            columns.push(*column);
            audit_values.push(format!("dc.{}", quote_ident(column)?));
        }
    }
    values.extend(audit_values.iter().map(String::as_str));

    let columns = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<MigrationResult<Vec<_>>>()?
        .join(", ");
    let inserted = ctx.logged_query(
        &format!(
            "INSERT INTO {grid} ({columns})
             SELECT {values}
             FROM {carrier} dc
             LEFT JOIN {grid} dg ON dg.carrier_id = dc.id
             WHERE dg.id IS NULL",
            grid = quote_ident(GRID_TABLE)?,
            carrier = quote_ident(CARRIER_TABLE)?,
            values = values.join(", "),
        ),
        [],
    )?;
    info!("created {inserted} grid(s) for carriers without one");
    Ok(inserted as u64)
}

/// Give every grid its own service product, named after its carrier and itself.
///
/// Goes through the context's product factory. Must run after
/// [`fill_missing_grids`] when both are enabled.
pub fn create_carrier_products(ctx: &mut MigrationContext<'_>) -> MigrationResult<usize> {
    let grid = quote_ident(GRID_TABLE)?;
    ctx.execute_ddl(&format!("ALTER TABLE {grid} ADD COLUMN \"product_id\" INTEGER"))?;

    let grids = {
        let mut stmt = ctx.conn().prepare(&format!(
            "SELECT dg.id, dc.name, dg.name
             FROM {} dc JOIN {grid} dg ON dc.id = dg.carrier_id
             ORDER BY dg.id",
            quote_ident(CARRIER_TABLE)?
        ))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };

    for (grid_id, carrier_name, grid_name) in &grids {
        let name = format!(
            "{}: {}",
            carrier_name.as_deref().unwrap_or_default(),
            grid_name.as_deref().unwrap_or_default()
        );
        let product_id = ctx.create_service_product(&name)?;
        ctx.logged_query(
            &format!("UPDATE {grid} SET \"product_id\" = ?1 WHERE id = ?2"),
            params![product_id, grid_id],
        )?;
    }
    Ok(grids.len())
}

/// Point sale orders and pickings at the grid of the carrier they reference.
///
/// When a carrier owns several grids the lowest grid id wins. Tables of
/// modules that are not installed are skipped.
pub fn correct_order_references(ctx: &mut MigrationContext<'_>) -> MigrationResult<u64> {
    let grid = quote_ident(GRID_TABLE)?;
    let carrier = quote_ident(CARRIER_COLUMN)?;
    let mut corrected = 0;

    for table in ORDER_REFERENCE_TABLES {
        if !table_exists(ctx.conn(), table)? {
            warn!("{table} not found, skipping order reference correction");
            continue;
        }
        lift_constraints(ctx, table, CARRIER_COLUMN)?;
        let quoted = quote_ident(table)?;
        corrected += ctx.logged_query(
            &format!(
                "UPDATE {quoted}
                 SET {carrier} = (SELECT MIN(dg.id) FROM {grid} dg WHERE dg.carrier_id = {quoted}.{carrier})
                 WHERE {carrier} IN (SELECT carrier_id FROM {grid})"
            ),
            [],
        )? as u64;
    }
    Ok(corrected)
}
