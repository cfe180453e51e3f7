//! Identifier handling for statements that cannot bind table or column names.

use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::{Connection, params};

use crate::errors::{MigrationError, MigrationResult};

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid"));

/// Validate `name` and return it double-quoted for interpolation into SQL.
pub fn quote_ident(name: &str) -> MigrationResult<String> {
    if IDENTIFIER.is_match(name) {
        Ok(format!("\"{name}\""))
    } else {
        Err(MigrationError::InvalidIdentifier(name.to_string()))
    }
}

/// Whether a table named `table` exists in the main schema.
pub fn table_exists(conn: &Connection, table: &str) -> MigrationResult<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Whether `table` has a column named `column`.
pub fn column_exists(conn: &Connection, table: &str, column: &str) -> MigrationResult<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2",
        params![table, column],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Number of rows in `table`.
pub fn row_count(conn: &Connection, table: &str) -> MigrationResult<i64> {
    let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table)?);
    Ok(conn.query_row(&sql, [], |row| row.get(0))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident_accepts_plain_names() {
        assert_eq!(quote_ident("delivery_grid").unwrap(), "\"delivery_grid\"");
        assert_eq!(quote_ident("_x1").unwrap(), "\"_x1\"");
    }

    #[test]
    fn test_quote_ident_rejects_injection() {
        assert!(quote_ident("grid\"; DROP TABLE x; --").is_err());
        assert!(quote_ident("1abc").is_err());
        assert!(quote_ident("").is_err());
        assert!(quote_ident("with space").is_err());
    }

    #[test]
    fn test_table_and_column_exists() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE carrier (id INTEGER PRIMARY KEY, name TEXT);")
            .unwrap();

        assert!(table_exists(&conn, "carrier").unwrap());
        assert!(!table_exists(&conn, "grid").unwrap());
        assert!(column_exists(&conn, "carrier", "name").unwrap());
        assert!(!column_exists(&conn, "carrier", "price").unwrap());
        assert!(!column_exists(&conn, "grid", "id").unwrap());
    }

    #[test]
    fn test_row_count() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE carrier (id INTEGER PRIMARY KEY);
             INSERT INTO carrier (id) VALUES (1), (2), (3);",
        )
        .unwrap();

        assert_eq!(row_count(&conn, "carrier").unwrap(), 3);
    }
}
