use log::info;
use rusqlite::params;

use super::{FieldRename, metadata_present};
use crate::context::MigrationContext;
use crate::errors::MigrationResult;
use crate::sql::quote_ident;

/// Rename model fields: the backing column plus every metadata record naming the field.
pub fn rename_fields(ctx: &mut MigrationContext<'_>, renames: &[FieldRename]) -> MigrationResult<()> {
    if renames.is_empty() {
        return Ok(());
    }
    let model_fields = metadata_present(ctx, "ir_model_fields")?;
    let model_data = metadata_present(ctx, "ir_model_data")?;
    let translations = metadata_present(ctx, "ir_translation")?;

    for rename in renames {
        info!("renaming field {}.{} to {}", rename.model, rename.old, rename.new);
        ctx.execute_ddl(&format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {}",
            quote_ident(rename.table)?,
            quote_ident(rename.old)?,
            quote_ident(rename.new)?
        ))?;

        if model_fields {
            ctx.logged_query(
                "UPDATE ir_model_fields SET name = ?1 WHERE model = ?2 AND name = ?3",
                params![rename.new, rename.model, rename.old],
            )?;
        }
        if model_data {
            ctx.logged_query(
                "UPDATE ir_model_data SET name = ?1 WHERE model = 'ir.model.fields' AND name = ?2",
                params![
                    field_xmlid(rename.model, rename.new),
                    field_xmlid(rename.model, rename.old)
                ],
            )?;
        }
        if translations {
            ctx.logged_query(
                "UPDATE ir_translation SET name = ?1 WHERE name = ?2",
                params![
                    format!("{},{}", rename.model, rename.new),
                    format!("{},{}", rename.model, rename.old)
                ],
            )?;
        }
    }
    Ok(())
}

/// External identifier of a field record, e.g. `field_delivery_grid_line_type`.
fn field_xmlid(model: &str, field: &str) -> String {
    format!("field_{}_{}", model.replace('.', "_"), field)
}
