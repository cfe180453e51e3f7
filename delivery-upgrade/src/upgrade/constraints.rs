use log::info;

use crate::context::MigrationContext;
use crate::errors::MigrationResult;
use crate::schema::{TableShape, rebuild_table};

/// Drop every foreign key on `table` that involves `column`.
///
/// Returns the number of foreign keys removed. The table is only rebuilt when
/// there is something to remove.
pub fn lift_constraints(ctx: &mut MigrationContext<'_>, table: &str, column: &str) -> MigrationResult<usize> {
    let shape = TableShape::introspect(ctx.conn(), table)?;
    let lifted = shape.foreign_keys_on(column).len();
    if lifted == 0 {
        return Ok(0);
    }

    info!("lifting {lifted} foreign key(s) on {table}.{column}");
    rebuild_table(ctx.conn(), &shape.without_foreign_keys_on(column))?;
    Ok(lifted)
}
