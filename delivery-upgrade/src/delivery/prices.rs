use crate::context::MigrationContext;
use crate::errors::MigrationResult;
use crate::plan::{FIXED_PRICE_COLUMN, PRICE_TYPE_COLUMN, RULE_PRICE_COPIES, RULE_TABLE, VARIABLE_PRICE_COLUMN};
use crate::sql::quote_ident;
use crate::upgrade::copy_columns;

/// Split the tagged rule price into a fixed and a variable amount.
///
/// 8.0 stored a single amount plus a `fixed`/`variable` tag; 9.0 stores both
/// amounts. The amount is copied into both columns and the one the tag did not
/// select is zeroed. The tag is read under its legacy name.
pub fn correct_rule_prices(ctx: &mut MigrationContext<'_>) -> MigrationResult<()> {
    copy_columns(ctx, RULE_PRICE_COPIES)?;

    let table = quote_ident(RULE_TABLE)?;
    let price_type = quote_ident(&ctx.legacy_name(PRICE_TYPE_COLUMN))?;

    ctx.logged_query(
        &format!(
            "UPDATE {table} SET {} = 0 WHERE {price_type} = 'fixed'",
            quote_ident(VARIABLE_PRICE_COLUMN)?
        ),
        [],
    )?;
    ctx.logged_query(
        &format!(
            "UPDATE {table} SET {} = 0 WHERE {price_type} = 'variable'",
            quote_ident(FIXED_PRICE_COLUMN)?
        ),
        [],
    )?;
    Ok(())
}
