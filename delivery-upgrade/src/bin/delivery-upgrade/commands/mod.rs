pub mod migrate;
pub mod schema;

use anyhow::{Context, Result};
use clap::Args;
use delivery_upgrade::rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};

/// Module version upgraded from when none is given.
pub const DEFAULT_FROM_VERSION: &str = "8.0.1.0";

/// Database selection shared by every command that touches a database.
#[derive(Args, Debug, Clone, Default)]
pub struct DatabaseArgs {
    /// SQLite database file (overrides the config file and DELIVERY_DB)
    #[arg(short = 'd', long, value_name = "PATH")]
    pub database: Option<PathBuf>,
}

/// Open a database for inspection only.
pub fn open_read_only(path: &Path) -> Result<Connection> {
    Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .with_context(|| format!("Failed to open database {} read-only", path.display()))
}
