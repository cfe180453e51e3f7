use log::info;

use super::{ColumnCopy, ColumnRename};
use crate::context::MigrationContext;
use crate::errors::{MigrationError, MigrationResult};
use crate::schema::TableShape;
use crate::sql::quote_ident;

/// Add a copy of each source column and fill it with the source's values.
pub fn copy_columns(ctx: &mut MigrationContext<'_>, copies: &[ColumnCopy]) -> MigrationResult<()> {
    for copy in copies {
        let shape = TableShape::introspect(ctx.conn(), copy.table)?;
        let source = shape.column(copy.source).ok_or_else(|| MigrationError::MissingColumn {
            table: copy.table.to_string(),
            column: copy.source.to_string(),
        })?;

        let target = match copy.target {
            Some(target) => target.to_string(),
            None => ctx.legacy_name(copy.source),
        };
        let column_type = copy.column_type.unwrap_or(source.decl_type.as_str());

        info!("copying column {}.{} to {target}", copy.table, copy.source);
        let table = quote_ident(copy.table)?;
        let target = quote_ident(&target)?;
        ctx.execute_ddl(&format!("ALTER TABLE {table} ADD COLUMN {target} {column_type}"))?;
        ctx.logged_query(
            &format!("UPDATE {table} SET {target} = {}", quote_ident(copy.source)?),
            [],
        )?;
    }
    Ok(())
}

/// Rename columns in place; a missing target name means the legacy name.
pub fn rename_columns(ctx: &mut MigrationContext<'_>, renames: &[ColumnRename]) -> MigrationResult<()> {
    for rename in renames {
        let new = match rename.new {
            Some(new) => new.to_string(),
            None => ctx.legacy_name(rename.old),
        };
        info!("renaming column {}.{} to {new}", rename.table, rename.old);
        ctx.execute_ddl(&format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {}",
            quote_ident(rename.table)?,
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
    use crate::sql::column_exists;
    use rusqlite::Connection;

    fn connection() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", "OFF").unwrap();
        conn.execute_batch(
            "CREATE TABLE line (id INTEGER PRIMARY KEY, grid_id INTEGER, list_price DOUBLE PRECISION, price_type VARCHAR);
             INSERT INTO line VALUES (1, 7, 12.5, 'fixed'), (2, 8, 3.0, 'variable');",
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_copy_columns_to_legacy_name() {
        let mut conn = connection();
        let tx = conn.transaction().unwrap();
        let mut ctx = MigrationContext::new(&tx, MigrationOptions::default()).unwrap();

        copy_columns(
            &mut ctx,
            &[ColumnCopy { table: "line", source: "grid_id", target: None, column_type: None }],
        )
        .unwrap();

        let shape = TableShape::introspect(&tx, "line").unwrap();
        let copied = shape.column("openupgrade_legacy_9_0_grid_id").unwrap();
        assert_eq!(copied.decl_type, "INTEGER");
        let values: Vec<i64> = tx
            .prepare("SELECT openupgrade_legacy_9_0_grid_id FROM line ORDER BY id")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(values, vec![7, 8]);
        assert_eq!(ctx.rows_affected(), 2);
    }

    #[test]
    fn test_copy_columns_named_target_and_type() {
        let mut conn = connection();
        let tx = conn.transaction().unwrap();
        let mut ctx = MigrationContext::new(&tx, MigrationOptions::default()).unwrap();

        copy_columns(
            &mut ctx,
            &[ColumnCopy {
                table: "line",
                source: "list_price",
                target: Some("list_base_price"),
                column_type: Some("NUMERIC"),
            }],
        )
        .unwrap();

        let shape = TableShape::introspect(&tx, "line").unwrap();
        assert_eq!(shape.column("list_base_price").unwrap().decl_type, "NUMERIC");
    }

    #[test]
    fn test_copy_columns_missing_source() {
        let mut conn = connection();
        let tx = conn.transaction().unwrap();
        let mut ctx = MigrationContext::new(&tx, MigrationOptions::default()).unwrap();

        let err = copy_columns(
            &mut ctx,
            &[ColumnCopy { table: "line", source: "nope", target: None, column_type: None }],
        )
        .unwrap_err();
        assert!(matches!(err, MigrationError::MissingColumn { .. }));

        let err = copy_columns(
            &mut ctx,
            &[ColumnCopy { table: "gone", source: "grid_id", target: None, column_type: None }],
        )
        .unwrap_err();
        assert!(matches!(err, MigrationError::MissingTable { .. }));
    }

    #[test]
    fn test_copy_columns_twice_fails() {
        let mut conn = connection();
        let tx = conn.transaction().unwrap();
        let mut ctx = MigrationContext::new(&tx, MigrationOptions::default()).unwrap();
        let copy = [ColumnCopy { table: "line", source: "grid_id", target: None, column_type: None }];

        copy_columns(&mut ctx, &copy).unwrap();
        assert!(matches!(copy_columns(&mut ctx, &copy), Err(MigrationError::Sql(_))));
    }

    #[test]
    fn test_rename_columns() {
        let mut conn = connection();
        let tx = conn.transaction().unwrap();
        let mut ctx = MigrationContext::new(&tx, MigrationOptions::default()).unwrap();

        rename_columns(
            &mut ctx,
            &[
                ColumnRename { table: "line", old: "price_type", new: None },
                ColumnRename { table: "line", old: "grid_id", new: Some("carrier_id") },
            ],
        )
        .unwrap();

        assert!(column_exists(&tx, "line", "openupgrade_legacy_9_0_price_type").unwrap());
        assert!(column_exists(&tx, "line", "carrier_id").unwrap());
        assert!(!column_exists(&tx, "line", "price_type").unwrap());
        assert!(!column_exists(&tx, "line", "grid_id").unwrap());
    }
}
