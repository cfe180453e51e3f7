use log::info;

use super::TableRename;
use crate::context::MigrationContext;
use crate::errors::MigrationResult;
use crate::sql::quote_ident;

/// Rename tables; a missing target name keeps the table under its legacy name.
pub fn rename_tables(ctx: &mut MigrationContext<'_>, renames: &[TableRename]) -> MigrationResult<()> {
    for rename in renames {
        let new = match rename.new {
            Some(new) => new.to_string(),
            None => ctx.legacy_name(rename.old),
        };
        info!("renaming table {} to {new}", rename.old);
        ctx.execute_ddl(&format!(
            "ALTER TABLE {} RENAME TO {}",
            quote_ident(rename.old)?,
            quote_ident(&new)?
        ))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::MigrationOptions;
    use crate::sql::{row_count, table_exists};
    use rusqlite::Connection;

    #[test]
    fn test_rename_tables() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", "OFF").unwrap();
        conn.execute_batch(
            "CREATE TABLE delivery_grid (id INTEGER PRIMARY KEY);
             CREATE TABLE delivery_grid_line (id INTEGER PRIMARY KEY, grid_id INTEGER REFERENCES delivery_grid(id));
             INSERT INTO delivery_grid VALUES (1);
             INSERT INTO delivery_grid_line VALUES (1, 1), (2, 1);",
        )
        .unwrap();
        let tx = conn.transaction().unwrap();
        let mut ctx = MigrationContext::new(&tx, MigrationOptions::default()).unwrap();

        rename_tables(
            &mut ctx,
            &[
                TableRename { old: "delivery_grid", new: None },
                TableRename { old: "delivery_grid_line", new: Some("delivery_price_rule") },
            ],
        )
        .unwrap();

        assert!(!table_exists(&tx, "delivery_grid").unwrap());
        assert!(!table_exists(&tx, "delivery_grid_line").unwrap());
        assert!(table_exists(&tx, "openupgrade_legacy_9_0_delivery_grid").unwrap());
        assert_eq!(row_count(&tx, "delivery_price_rule").unwrap(), 2);
    }

    #[test]
    fn test_rename_missing_table_fails() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", "OFF").unwrap();
        let tx = conn.transaction().unwrap();
        let mut ctx = MigrationContext::new(&tx, MigrationOptions::default()).unwrap();

        assert!(rename_tables(&mut ctx, &[TableRename { old: "delivery_grid", new: None }]).is_err());
    }
}
