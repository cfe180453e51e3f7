use log::info;

use crate::context::MigrationContext;
use crate::errors::MigrationResult;
use crate::plan::{CARRIER_FIELDS, CARRIER_TABLE};
use crate::schema::{TableShape, rebuild_table};
use crate::sql::quote_ident;

/// Add the 9.0 carrier columns, back-fill their defaults and make `delivery_type` required.
///
/// Columns are added nullable, filled, and only then tightened, so no carrier
/// row is ever left without a delivery type.
pub fn add_fields_to_delivery_carrier(ctx: &mut MigrationContext<'_>) -> MigrationResult<()> {
    let table = quote_ident(CARRIER_TABLE)?;

    for field in CARRIER_FIELDS {
        ctx.execute_ddl(&format!(
            "ALTER TABLE {table} ADD COLUMN {} {}",
            quote_ident(field.name)?,
            field.column_type
        ))?;
    }

    let assignments = CARRIER_FIELDS
        .iter()
        .filter_map(|field| field.default.map(|default| (field.name, default)))
        .map(|(name, default)| Ok(format!("{} = {default}", quote_ident(name)?)))
        .collect::<MigrationResult<Vec<_>>>()?;
    if !assignments.is_empty() {
        ctx.logged_query(&format!("UPDATE {table} SET {}", assignments.join(", ")), [])?;
    }

    let required: Vec<_> = CARRIER_FIELDS.iter().filter(|f| f.required).collect();
    if required.is_empty() {
        return Ok(());
    }
    let mut shape = TableShape::introspect(ctx.conn(), CARRIER_TABLE)?;
    for field in required {
        info!("tightening {CARRIER_TABLE}.{} to NOT NULL", field.name);
        shape = shape.with_not_null(field.name)?;
    }
    rebuild_table(ctx.conn(), &shape)
}
