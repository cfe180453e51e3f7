//! Schema upgrade helpers.
//!
//! Each helper is driven by plain descriptor data so the transformation tables
//! in [`crate::plan`] can be reviewed and tested without a database.
//!
//! - `columns` - copy and rename columns
//! - `fields` - rename model fields (column plus metadata)
//! - `tables` - rename tables
//! - `constraints` - lift foreign keys on a column
//! - `properties` - rename a company-dependent property

mod columns;
mod constraints;
mod fields;
mod properties;
mod tables;

use log::warn;
use serde::Serialize;

use crate::context::MigrationContext;
use crate::errors::MigrationResult;
use crate::sql::table_exists;

pub use columns::{copy_columns, rename_columns};
pub use constraints::lift_constraints;
pub use fields::rename_fields;
pub use properties::rename_property;
pub use tables::rename_tables;

/// Name under which a retired table or column is kept.
pub fn legacy_name(prefix: &str, name: &str) -> String {
    format!("{prefix}{name}")
}

/// Whether an ORM metadata table is present; absent ones are skipped with a warning.
fn metadata_present(ctx: &MigrationContext<'_>, table: &str) -> MigrationResult<bool> {
    let present = table_exists(ctx.conn(), table)?;
    if !present {
        warn!("metadata table {table} not found, skipping");
    }
    Ok(present)
}

/// Rename `old` on `table`; `None` keeps it under its legacy name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ColumnRename {
    pub table: &'static str,
    pub old: &'static str,
    pub new: Option<&'static str>,
}

/// Copy `source` into a new column on `table`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ColumnCopy {
    pub table: &'static str,
    pub source: &'static str,
    /// Target column; `None` means the legacy name of `source`.
    pub target: Option<&'static str>,
    /// Declared type of the target; `None` reuses the source's type.
    pub column_type: Option<&'static str>,
}

/// Rename a model field together with its column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FieldRename {
    pub model: &'static str,
    pub table: &'static str,
    pub old: &'static str,
    pub new: &'static str,
}

/// Rename a table; `None` keeps it under its legacy name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TableRename {
    pub old: &'static str,
    pub new: Option<&'static str>,
}

/// Rename a property field stored through `ir_property`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PropertyRename {
    pub model: &'static str,
    pub old: &'static str,
    pub new: &'static str,
}

/// A column added to an existing table, back-filled with `default`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ColumnAddition {
    pub name: &'static str,
    pub column_type: &'static str,
    /// SQL literal written into every existing row, if any.
    pub default: Option<&'static str>,
    /// Tightened to `NOT NULL` once back-filled.
    pub required: bool,
}
