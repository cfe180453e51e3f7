//! Delivery module upgrade from 8.0 to 9.0.
//!
//! Folds delivery grids into carriers on a SQLite database: grid references
//! are repointed at the owning carrier, the carrier gains its 9.0 columns,
//! price rules trade their tagged price for two amounts, and tables, columns
//! and fields move to their 9.0 names.
//!
//! The entry point is [`delivery::migrate`], which runs inside a transaction
//! owned by the caller:
//!
//! ```no_run
//! use delivery_upgrade::{MigrationContext, MigrationOptions, delivery};
//! use rusqlite::Connection;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut conn = Connection::open("erp.sqlite")?;
//! conn.pragma_update(None, "foreign_keys", "OFF")?;
//! let tx = conn.transaction()?;
//! let report = {
//!     let mut ctx = MigrationContext::new(&tx, MigrationOptions::default())?;
//!     delivery::migrate(&mut ctx, "8.0.1.0")?
//! };
//! tx.commit()?;
//! println!("{} grid(s) folded into carriers", report.grids_mapped);
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod ddl;
pub mod delivery;
pub mod errors;
pub mod plan;
pub mod schema;
pub mod sql;
pub mod upgrade;

pub use context::{MigrationContext, MigrationOptions, ProductFactory, RecoverySteps, SqlProductFactory};
pub use delivery::{MIGRATION_NAME, MigrationReport, Step, migrate};
pub use errors::{MigrationError, MigrationResult};

// Re-export rusqlite so callers don't need to depend on a specific version
pub use rusqlite;
