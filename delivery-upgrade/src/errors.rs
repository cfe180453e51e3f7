use thiserror::Error;

use crate::delivery::Step;

/// Top-level error type returned by the delivery upgrade.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Underlying SQLite statement failed.
    #[error("sqlite error: {0}")]
    Sql(#[from] rusqlite::Error),

    /// A table the plan operates on is absent.
    #[error("table '{table}' does not exist")]
    MissingTable { table: String },

    /// A column the plan operates on is absent.
    #[error("column '{column}' does not exist on table '{table}'")]
    MissingColumn { table: String, column: String },

    /// A name could not be used as an SQL identifier.
    #[error("invalid identifier '{0}'")]
    InvalidIdentifier(String),

    /// A table rebuild would not reproduce the table's definition faithfully.
    #[error("cannot rebuild table '{table}': {reason}")]
    UnsupportedDefinition { table: String, reason: String },

    /// A legacy grid row has no carrier it can be folded into.
    #[error("delivery grid {grid_id} has no resolvable carrier (carrier_id = {carrier_id:?})")]
    OrphanGrid { grid_id: i64, carrier_id: Option<i64> },

    /// A dependent row points at a grid id missing from the grid → carrier mapping.
    #[error("row in '{table}' references delivery grid {grid_id}, which has no carrier mapping")]
    UnmappedGridReference { table: String, grid_id: i64 },

    /// `PRAGMA foreign_key_check` reported a dangling reference after the run.
    #[error("foreign key violation in '{table}' (rowid {rowid:?}) referencing '{parent}'")]
    ForeignKeyViolation {
        table: String,
        rowid: Option<i64>,
        parent: String,
    },

    /// The connection handed to the executor is in autocommit mode.
    #[error("the migration must run inside a transaction owned by the caller")]
    NotInTransaction,

    /// Table rebuilds require foreign key enforcement to be switched off.
    #[error("foreign key enforcement must be disabled (PRAGMA foreign_keys = OFF) before the transaction starts")]
    ForeignKeysEnforced,

    /// The object-creation capability failed to produce a product.
    #[error("failed to create service product '{name}': {message}")]
    ProductCreation { name: String, message: String },

    /// A plan step aborted; the whole transaction must be discarded.
    #[error("step '{step}' failed: {source}")]
    Step {
        step: Step,
        #[source]
        source: Box<MigrationError>,
    },
}

impl MigrationError {
    /// Step that aborted, when the error came out of the executor.
    pub fn step(&self) -> Option<Step> {
        match self {
            MigrationError::Step { step, .. } => Some(*step),
            _ => None,
        }
    }

    /// Innermost error, skipping step wrappers.
    pub fn root_cause(&self) -> &MigrationError {
        match self {
            MigrationError::Step { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

pub type MigrationResult<T> = Result<T, MigrationError>;
