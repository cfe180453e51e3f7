//! Table introspection and rebuilds.
//!
//! SQLite cannot drop a foreign key or tighten a column to `NOT NULL` in place.
//! Both are done by creating a staging table from the table's stored
//! definition with only that clause edited, copying the rows across and
//! swapping the tables. Indexes and triggers are re-created from
//! `sqlite_master` once the staging table has taken the original name.

use log::debug;
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;

use crate::ddl::TableDefinition;
use crate::errors::{MigrationError, MigrationResult};
use crate::sql::{quote_ident, table_exists};

/// One column as reported by `pragma_table_info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    /// Declared type, empty when the column was declared without one.
    pub decl_type: String,
    pub not_null: bool,
    /// Default expression exactly as written in the DDL.
    pub default: Option<String>,
    /// 1-based position in the primary key, 0 when not part of it.
    pub pk_position: u32,
}

/// One (possibly composite) foreign key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForeignKeyInfo {
    pub id: i64,
    pub columns: Vec<String>,
    pub parent: String,
    /// `None` entries mean "the parent's primary key".
    pub parent_columns: Vec<Option<String>>,
    pub on_update: String,
    pub on_delete: String,
}

impl ForeignKeyInfo {
    /// Same reference, ignoring the pragma's numbering.
    fn same_reference(&self, other: &ForeignKeyInfo) -> bool {
        self.columns == other.columns
            && self.parent == other.parent
            && self.parent_columns == other.parent_columns
            && self.on_update == other.on_update
            && self.on_delete == other.on_delete
    }
}

/// A table as SQLite describes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableShape {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    pub unique_constraints: Vec<Vec<String>>,
    pub foreign_keys: Vec<ForeignKeyInfo>,
    /// `CREATE INDEX` statements for explicitly created indexes.
    pub indexes: Vec<String>,
    /// `CREATE TRIGGER` statements for triggers on the table.
    pub triggers: Vec<String>,
    pub autoincrement: bool,
    /// The stored `CREATE TABLE` statement.
    pub sql: String,
}

impl TableShape {
    /// Read the shape of `table`.
    pub fn introspect(conn: &Connection, table: &str) -> MigrationResult<Self> {
        let missing = || MigrationError::MissingTable {
            table: table.to_string(),
        };
        let columns = read_columns(conn, table)?;
        if columns.is_empty() {
            return Err(missing());
        }

        let sql: String = conn
            .query_row(
                "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![table],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?
            .flatten()
            .ok_or_else(missing)?;
        let autoincrement = TableDefinition::parse(table, &sql).is_ok_and(|d| d.is_autoincrement());

        Ok(Self {
            name: table.to_string(),
            columns,
            unique_constraints: read_unique_constraints(conn, table)?,
            foreign_keys: read_foreign_keys(conn, table)?,
            indexes: read_schema_objects(conn, "index", table)?,
            triggers: read_schema_objects(conn, "trigger", table)?,
            autoincrement,
            sql,
        })
    }

    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Foreign keys whose referencing side includes `column`.
    pub fn foreign_keys_on(&self, column: &str) -> Vec<&ForeignKeyInfo> {
        self.foreign_keys
            .iter()
            .filter(|fk| fk.columns.iter().any(|c| c == column))
            .collect()
    }

    /// Copy of this shape without the foreign keys that involve `column`.
    pub fn without_foreign_keys_on(&self, column: &str) -> Self {
        let mut shape = self.clone();
        shape
            .foreign_keys
            .retain(|fk| !fk.columns.iter().any(|c| c == column));
        shape
    }

    /// Copy of this shape with `column` declared `NOT NULL`.
    pub fn with_not_null(&self, column: &str) -> MigrationResult<Self> {
        let mut shape = self.clone();
        let info = shape
            .columns
            .iter_mut()
            .find(|c| c.name == column)
            .ok_or_else(|| MigrationError::MissingColumn {
                table: self.name.clone(),
                column: column.to_string(),
            })?;
        info.not_null = true;
        Ok(shape)
    }
}

/// Replace the table named `target.name` with one shaped like `target`, keeping its rows.
///
/// `target` may differ from the live table only by dropped foreign keys and
/// columns tightened to `NOT NULL`. Everything else in the stored definition is
/// kept as written, and a definition the edit cannot reproduce is rejected with
/// [`MigrationError::UnsupportedDefinition`].
///
/// Requires foreign key enforcement to be off: the old table is dropped while
/// other tables may still reference it.
pub fn rebuild_table(conn: &Connection, target: &TableShape) -> MigrationResult<()> {
    let current = TableShape::introspect(conn, &target.name)?;
    let mut definition = TableDefinition::parse(&current.name, &current.sql)?;
    edit_definition(&current, target, &mut definition)?;

    let staging = format!("{}__rebuild", current.name);
    let table = quote_ident(&current.name)?;
    let staging_q = quote_ident(&staging)?;
    let columns = quote_list(current.columns.iter().map(|c| c.name.as_str()))?;
    let sequence = if current.autoincrement {
        read_sequence(conn, &current.name)?
    } else {
        None
    };

    let create = definition.render(&staging_q);
    debug!("rebuilding {}: {create}", current.name);
    conn.execute(&create, [])?;
    verify_rebuilt(conn, &staging, target)?;

    conn.execute(
        &format!("INSERT INTO {staging_q} ({columns}) SELECT {columns} FROM {table}"),
        [],
    )?;
    conn.execute(&format!("DROP TABLE {table}"), [])?;
    rename_staging(conn, &staging_q, &table)?;

    for object in current.indexes.iter().chain(&current.triggers) {
        conn.execute_batch(object)?;
    }

    if let Some(seq) = sequence {
        restore_sequence(conn, &current.name, seq)?;
    }

    Ok(())
}

/// Apply the difference between `current` and `target` to the stored definition.
fn edit_definition(current: &TableShape, target: &TableShape, definition: &mut TableDefinition) -> MigrationResult<()> {
    let unsupported = |reason: String| MigrationError::UnsupportedDefinition {
        table: current.name.clone(),
        reason,
    };

    if current.columns.len() != target.columns.len() {
        return Err(unsupported("the column list differs".to_string()));
    }
    for (now, want) in current.columns.iter().zip(&target.columns) {
        let relaxed = ColumnInfo {
            not_null: now.not_null,
            ..want.clone()
        };
        if *now != relaxed {
            return Err(unsupported(format!("column {} changes beyond NOT NULL", want.name)));
        }
        match (now.not_null, want.not_null) {
            (false, true) => {
                if !definition.set_not_null(&want.name)? {
                    return Err(unsupported(format!("column {} is not in the stored definition", want.name)));
                }
            }
            (true, false) => {
                return Err(unsupported(format!("dropping NOT NULL from {} is not supported", want.name)));
            }
            _ => {}
        }
    }

    if current.unique_constraints != target.unique_constraints {
        return Err(unsupported("UNIQUE constraints differ".to_string()));
    }
    let added = target
        .foreign_keys
        .iter()
        .any(|want| !current.foreign_keys.iter().any(|now| now.same_reference(want)));
    if added {
        return Err(unsupported("adding foreign keys is not supported".to_string()));
    }
    for fk in &current.foreign_keys {
        if target.foreign_keys.iter().any(|want| want.same_reference(fk)) {
            continue;
        }
        if !definition.drop_foreign_key(&fk.columns, &fk.parent)? {
            return Err(unsupported(format!(
                "foreign key ({}) to {} is not in the stored definition",
                fk.columns.join(", "),
                fk.parent
            )));
        }
    }
    Ok(())
}

/// Check the freshly created staging table against the expected shape.
fn verify_rebuilt(conn: &Connection, staging: &str, target: &TableShape) -> MigrationResult<()> {
    let built = TableShape::introspect(conn, staging)?;
    let references = |shape: &TableShape| {
        let mut keys = shape
            .foreign_keys
            .iter()
            .map(|fk| (fk.columns.clone(), fk.parent.clone(), fk.parent_columns.clone(), fk.on_update.clone(), fk.on_delete.clone()))
            .collect::<Vec<_>>();
        keys.sort();
        keys
    };

    if built.columns == target.columns
        && built.unique_constraints == target.unique_constraints
        && references(&built) == references(target)
    {
        Ok(())
    } else {
        Err(MigrationError::UnsupportedDefinition {
            table: target.name.clone(),
            reason: "the edited definition does not produce the expected table".to_string(),
        })
    }
}

/// Rename the staging table without rewriting other schema objects, which
/// already name the original table.
fn rename_staging(conn: &Connection, staging: &str, table: &str) -> MigrationResult<()> {
    let legacy: bool = conn.query_row("PRAGMA legacy_alter_table", [], |row| row.get(0))?;
    conn.pragma_update(None, "legacy_alter_table", true)?;
    let renamed = conn.execute(&format!("ALTER TABLE {staging} RENAME TO {table}"), []);
    conn.pragma_update(None, "legacy_alter_table", legacy)?;
    renamed?;
    Ok(())
}

/// Last AUTOINCREMENT value handed out for `table`, if SQLite recorded one.
fn read_sequence(conn: &Connection, table: &str) -> MigrationResult<Option<i64>> {
    if !table_exists(conn, "sqlite_sequence")? {
        return Ok(None);
    }
    Ok(conn
        .query_row(
            "SELECT seq FROM sqlite_sequence WHERE name = ?1",
            params![table],
            |row| row.get(0),
        )
        .optional()?)
}

fn restore_sequence(conn: &Connection, table: &str, seq: i64) -> MigrationResult<()> {
    let updated = conn.execute(
        "UPDATE sqlite_sequence SET seq = MAX(seq, ?2) WHERE name = ?1",
        params![table, seq],
    )?;
    if updated == 0 {
        conn.execute(
            "INSERT INTO sqlite_sequence (name, seq) VALUES (?1, ?2)",
            params![table, seq],
        )?;
    }
    Ok(())
}

fn quote_list<'a>(names: impl Iterator<Item = &'a str>) -> MigrationResult<String> {
    let quoted = names.map(quote_ident).collect::<MigrationResult<Vec<_>>>()?;
    Ok(quoted.join(", "))
}

fn read_columns(conn: &Connection, table: &str) -> MigrationResult<Vec<ColumnInfo>> {
    let mut stmt = conn.prepare(
        "SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?1) ORDER BY cid",
    )?;
    let rows = stmt.query_map(params![table], |row| {
        Ok(ColumnInfo {
            name: row.get(0)?,
            decl_type: row.get(1)?,
            not_null: row.get::<_, i64>(2)? != 0,
            default: row.get(3)?,
            pk_position: row.get::<_, u32>(4)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn read_unique_constraints(conn: &Connection, table: &str) -> MigrationResult<Vec<Vec<String>>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM pragma_index_list(?1) WHERE origin = 'u' ORDER BY name",
    )?;
    let names = stmt
        .query_map(params![table], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut info = conn.prepare("SELECT name FROM pragma_index_info(?1) ORDER BY seqno")?;
    let mut constraints = Vec::with_capacity(names.len());
    for name in names {
        let columns = info
            .query_map(params![name], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        constraints.push(columns);
    }
    Ok(constraints)
}

fn read_foreign_keys(conn: &Connection, table: &str) -> MigrationResult<Vec<ForeignKeyInfo>> {
    let mut stmt = conn.prepare(
        "SELECT id, \"table\", \"from\", \"to\", on_update, on_delete
         FROM pragma_foreign_key_list(?1) ORDER BY id, seq",
    )?;
    let rows = stmt
        .query_map(params![table], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut keys: Vec<ForeignKeyInfo> = Vec::new();
    for (id, parent, from, to, on_update, on_delete) in rows {
        match keys.last_mut() {
            Some(fk) if fk.id == id => {
                fk.columns.push(from);
                fk.parent_columns.push(to);
            }
            _ => keys.push(ForeignKeyInfo {
                id,
                columns: vec![from],
                parent,
                parent_columns: vec![to],
                on_update,
                on_delete,
            }),
        }
    }
    Ok(keys)
}

fn read_schema_objects(conn: &Connection, kind: &str, table: &str) -> MigrationResult<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT sql FROM sqlite_master
         WHERE type = ?1 AND tbl_name = ?2 AND sql IS NOT NULL
         ORDER BY name",
    )?;
    let objects = stmt
        .query_map(params![kind, table], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(objects)
}
