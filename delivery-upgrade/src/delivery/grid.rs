use std::collections::BTreeMap;

use log::info;
use rusqlite::{Connection, params};

use crate::context::MigrationContext;
use crate::errors::{MigrationError, MigrationResult};
use crate::plan::{ASSOCIATION_TABLES, CARRIER_COLUMN, CARRIER_TABLE, GRID_COLUMN, GRID_DEPENDENT_TABLES, GRID_TABLE, RULE_TABLE};
use crate::sql::quote_ident;
use crate::upgrade::lift_constraints;

/// Outcome of repointing grid references at carriers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GridRemap {
    /// grid id → owning carrier id
    pub mapping: BTreeMap<i64, i64>,
    pub rows_remapped: u64,
    /// Association rows dropped because their carrier already had the same link.
    pub duplicates_collapsed: u64,
}

/// Build the grid → carrier mapping from the grid table.
///
/// Every grid must resolve to an existing carrier; the first one that does not
/// aborts with [`MigrationError::OrphanGrid`].
pub fn load_grid_mapping(conn: &Connection) -> MigrationResult<BTreeMap<i64, i64>> {
    let sql = format!(
        "SELECT dg.id, dg.carrier_id, dc.id
         FROM {} dg LEFT JOIN {} dc ON dc.id = dg.carrier_id
         ORDER BY dg.id",
        quote_ident(GRID_TABLE)?,
        quote_ident(CARRIER_TABLE)?
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, Option<i64>>(1)?,
                row.get::<_, Option<i64>>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut mapping = BTreeMap::new();
    for (grid_id, carrier_id, resolved) in rows {
        match resolved {
            Some(carrier) => {
                mapping.insert(grid_id, carrier);
            }
            None => return Err(MigrationError::OrphanGrid { grid_id, carrier_id }),
        }
    }
    Ok(mapping)
}

/// Check that every grid id stored in `column` of the dependent tables has a mapping entry.
pub fn verify_mapping_covers(
    conn: &Connection,
    mapping: &BTreeMap<i64, i64>,
    column: &str,
) -> MigrationResult<()> {
    let column = quote_ident(column)?;
    for table in GRID_DEPENDENT_TABLES {
        let sql = format!(
            "SELECT DISTINCT {column} FROM {} WHERE {column} IS NOT NULL ORDER BY 1",
            quote_ident(table)?
        );
        let mut stmt = conn.prepare(&sql)?;
        let grid_ids = stmt
            .query_map([], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        if let Some(grid_id) = grid_ids.into_iter().find(|id| !mapping.contains_key(id)) {
            return Err(MigrationError::UnmappedGridReference {
                table: table.to_string(),
                grid_id,
            });
        }
    }
    Ok(())
}

/// Repoint price rules and country/state links from grid ids to carrier ids.
///
/// Runs one update per mapping entry and table, keyed on the legacy grid column
/// copied before the renames. Association rows are first parked on negative
/// ids so a half-remapped table can never collide with a genuine carrier id;
/// a link that would duplicate an already remapped one is dropped.
pub fn correct_grid_references(ctx: &mut MigrationContext<'_>) -> MigrationResult<GridRemap> {
    let mapping = load_grid_mapping(ctx.conn())?;
    let legacy_column = ctx.legacy_name(GRID_COLUMN);
    verify_mapping_covers(ctx.conn(), &mapping, &legacy_column)?;
    info!("mapping {} grid(s) onto their carriers", mapping.len());

    for table in GRID_DEPENDENT_TABLES {
        lift_constraints(ctx, table, CARRIER_COLUMN)?;
    }

    let legacy = quote_ident(&legacy_column)?;
    let carrier = quote_ident(CARRIER_COLUMN)?;
    let rules = quote_ident(RULE_TABLE)?;

    for table in ASSOCIATION_TABLES {
        ctx.logged_query(
            &format!(
                "UPDATE {} SET {carrier} = -{legacy} WHERE {legacy} IS NOT NULL",
                quote_ident(table)?
            ),
            [],
        )?;
    }

    let mut remap = GridRemap::default();
    for (&grid_id, &carrier_id) in &mapping {
        remap.rows_remapped += ctx.logged_query(
            &format!("UPDATE {rules} SET {carrier} = ?1 WHERE {legacy} = ?2"),
            params![carrier_id, grid_id],
        )? as u64;

        for table in ASSOCIATION_TABLES {
            let table = quote_ident(table)?;
            remap.rows_remapped += ctx.logged_query(
                &format!("UPDATE OR IGNORE {table} SET {carrier} = ?1 WHERE {legacy} = ?2"),
                params![carrier_id, grid_id],
            )? as u64;
            remap.duplicates_collapsed += ctx.logged_query(
                &format!("DELETE FROM {table} WHERE {legacy} = ?1 AND {carrier} = ?2"),
                params![grid_id, -grid_id],
            )? as u64;
        }
    }

    remap.mapping = mapping;
    Ok(remap)
}
