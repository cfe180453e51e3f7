//! Migration context: the explicit transaction handle plus the capabilities steps may use.

use log::info;
use rusqlite::{Connection, Params};
use serde::{Deserialize, Serialize};

use crate::errors::{MigrationError, MigrationResult};
use crate::upgrade::legacy_name;

/// Prefix under which retired tables and columns are kept.
pub const DEFAULT_LEGACY_PREFIX: &str = "openupgrade_legacy_9_0_";

/// Opt-in recovery steps. None of them run unless switched on explicitly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoverySteps {
    /// Insert a grid for every carrier that has none.
    #[serde(default)]
    pub fill_missing_grids: bool,
    /// Create a dedicated service product per grid.
    #[serde(default)]
    pub create_carrier_products: bool,
    /// Point orders and pickings at grid ids instead of carrier ids.
    #[serde(default)]
    pub correct_order_references: bool,
}

impl RecoverySteps {
    pub fn any(&self) -> bool {
        self.fill_missing_grids || self.create_carrier_products || self.correct_order_references
    }
}

/// Tunables for a migration run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationOptions {
    #[serde(default = "default_legacy_prefix")]
    pub legacy_prefix: String,
    #[serde(default)]
    pub recovery: RecoverySteps,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            legacy_prefix: default_legacy_prefix(),
            recovery: RecoverySteps::default(),
        }
    }
}

fn default_legacy_prefix() -> String {
    DEFAULT_LEGACY_PREFIX.to_string()
}

/// Object-creation capability used by the product-per-carrier recovery step.
pub trait ProductFactory {
    /// Create a service product called `name` and return its `product_product` id.
    fn create_service_product(&mut self, conn: &Connection, name: &str) -> MigrationResult<i64>;
}

/// Creates products with plain inserts into `product_template` and `product_product`.
#[derive(Debug, Default)]
pub struct SqlProductFactory;

impl ProductFactory for SqlProductFactory {
    fn create_service_product(&mut self, conn: &Connection, name: &str) -> MigrationResult<i64> {
        conn.execute(
            "INSERT INTO product_template (name, type) VALUES (?1, 'service')",
            [name],
        )
        .map_err(|err| MigrationError::ProductCreation {
            name: name.to_string(),
            message: err.to_string(),
        })?;
        let template_id = conn.last_insert_rowid();

        conn.execute(
            "INSERT INTO product_product (product_tmpl_id) VALUES (?1)",
            [template_id],
        )
        .map_err(|err| MigrationError::ProductCreation {
            name: name.to_string(),
            message: err.to_string(),
        })?;
        Ok(conn.last_insert_rowid())
    }
}

/// Context handed to every step of the migration.
///
/// Wraps a connection that is inside a transaction owned by the caller. The
/// migration never commits or rolls back; the caller does, depending on
/// whether `migrate` returned an error.
pub struct MigrationContext<'a> {
    conn: &'a Connection,
    options: MigrationOptions,
    products: Box<dyn ProductFactory + 'a>,
    rows_affected: u64,
}

impl<'a> MigrationContext<'a> {
    /// Create a context around `conn`, which must already be in a transaction.
    pub fn new(conn: &'a Connection, options: MigrationOptions) -> MigrationResult<Self> {
        if conn.is_autocommit() {
            return Err(MigrationError::NotInTransaction);
        }
        let enforced: i64 = conn.pragma_query_value(None, "foreign_keys", |row| row.get(0))?;
        if enforced != 0 {
            return Err(MigrationError::ForeignKeysEnforced);
        }

        Ok(Self {
            conn,
            options,
            products: Box::new(SqlProductFactory),
            rows_affected: 0,
        })
    }

    /// Replace the product factory used by the product-per-carrier step.
    pub fn with_product_factory(mut self, factory: impl ProductFactory + 'a) -> Self {
        self.products = Box::new(factory);
        self
    }

    pub fn conn(&self) -> &'a Connection {
        self.conn
    }

    pub fn options(&self) -> &MigrationOptions {
        &self.options
    }

    /// Legacy name for `name` under the configured prefix.
    pub fn legacy_name(&self, name: &str) -> String {
        legacy_name(&self.options.legacy_prefix, name)
    }

    /// Total rows touched by `logged_query` so far.
    pub fn rows_affected(&self) -> u64 {
        self.rows_affected
    }

    /// Run a data statement, log it with its row count and add the count to the total.
    pub fn logged_query<P: Params>(&mut self, sql: &str, params: P) -> MigrationResult<usize> {
        let affected = self.conn.execute(sql, params)?;
        info!("{} rows affected: {}", affected, sql.split_whitespace().collect::<Vec<_>>().join(" "));
        self.rows_affected += affected as u64;
        Ok(affected)
    }

    /// Run a DDL statement.
    pub fn execute_ddl(&self, sql: &str) -> MigrationResult<()> {
        log::debug!("{sql}");
        self.conn.execute(sql, [])?;
        Ok(())
    }

    pub(crate) fn create_service_product(&mut self, name: &str) -> MigrationResult<i64> {
        let conn = self.conn;
        self.products.create_service_product(conn, name)
    }
}
