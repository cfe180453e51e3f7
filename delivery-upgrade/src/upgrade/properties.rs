use log::info;
use rusqlite::params;

use super::{PropertyRename, metadata_present};
use crate::context::MigrationContext;
use crate::errors::MigrationResult;

/// Rename a property field so stored `ir_property` values keep resolving.
///
/// Returns the ids of the renamed field records.
pub fn rename_property(ctx: &mut MigrationContext<'_>, rename: &PropertyRename) -> MigrationResult<Vec<i64>> {
    if !metadata_present(ctx, "ir_model_fields")? {
        return Ok(Vec::new());
    }

    info!("renaming property {}.{} to {}", rename.model, rename.old, rename.new);
    let field_ids = {
        let mut stmt = ctx
            .conn()
            .prepare("SELECT id FROM ir_model_fields WHERE model = ?1 AND name = ?2 ORDER BY id")?;
        let ids = stmt
            .query_map(params![rename.model, rename.old], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        ids
    };
    if field_ids.is_empty() {
        return Ok(field_ids);
    }

    let model_data = metadata_present(ctx, "ir_model_data")?;
    let properties = metadata_present(ctx, "ir_property")?;
    for field_id in &field_ids {
        ctx.logged_query(
            "UPDATE ir_model_fields SET name = ?1 WHERE id = ?2",
            params![rename.new, field_id],
        )?;
        if model_data {
            ctx.logged_query(
                "UPDATE ir_model_data SET name = ?1 WHERE model = 'ir.model.fields' AND res_id = ?2",
                params![format!("{},{}", rename.model, rename.new), field_id],
            )?;
        }
        if properties {
            ctx.logged_query(
                "UPDATE ir_property SET name = ?1 WHERE fields_id = ?2",
                params![rename.new, field_id],
            )?;
        }
    }
    Ok(field_ids)
}
