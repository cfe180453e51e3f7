//! Migration execution engine.
//!
//! - `MigrationRunner` - owns the connection and the transaction around one upgrade run
//! - `MigrationState` - tracks applied migrations in the database itself

mod runner;
pub mod state;

pub use runner::{MigrationRunner, MigrationStats};
pub use state::{AppliedMigration, MigrationState};
