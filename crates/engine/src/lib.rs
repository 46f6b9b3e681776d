//! Table engine boundary for sql2textfs
//!
//! The filesystem never talks SQL directly. Everything it needs from a
//! relational store goes through [`TableEngine`]: listing databases and
//! tables, rendering a table as a header line plus one line per row, and
//! applying row-level inserts and deletes expressed as single lines of text.
//!
//! # Engines
//!
//! - [`SqliteEngine`]: one SQLite file per database inside a data directory
//! - [`MemoryEngine`]: fully in-process, nothing persisted
//!
//! Use [`connect`] to pick an engine from a connection string.

pub mod codec;
mod error;
mod memory;
mod sqlite;

pub use error::EngineError;
pub use memory::MemoryEngine;
pub use sqlite::SqliteEngine;

use std::sync::Arc;

/// A single column of a table as seen by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    /// Declared type, upper-cased (may be empty)
    pub decl_type: String,
    pub primary_key: bool,
}

/// Metadata descriptor of a table
///
/// Fetched before any row is inserted or deleted so row text can be
/// matched against the column list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    pub database: String,
    pub table: String,
    pub columns: Vec<Column>,
}

impl TableInfo {
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }
}

/// The relational collaborator behind the filesystem
///
/// All calls are synchronous; the filesystem invokes them while holding its
/// global lock. Implementations must be shareable between the threads the
/// FUSE session dispatches on.
pub trait TableEngine: Send + Sync {
    /// Names of all databases
    fn list_databases(&self) -> Result<Vec<String>, EngineError>;

    /// Names of all tables in `db`
    fn list_tables(&self, db: &str) -> Result<Vec<String>, EngineError>;

    /// The one-line schema header of a table, or `None` if the table does
    /// not exist
    fn table_header(&self, db: &str, table: &str) -> Result<Option<String>, EngineError>;

    /// Every row of a table, each rendered as one line of text
    fn list_rows(&self, db: &str, table: &str) -> Result<Vec<String>, EngineError>;

    /// Metadata descriptor used by row operations
    fn table_info(&self, db: &str, table: &str) -> Result<TableInfo, EngineError>;

    /// Create a table from a one-line header
    fn create_table(&self, db: &str, table: &str, header: &str) -> Result<(), EngineError>;

    /// Insert one row parsed from `line`
    fn insert_row(&self, info: &TableInfo, line: &str) -> Result<(), EngineError>;

    /// Delete one row whose rendering equals `line`
    fn delete_row(&self, info: &TableInfo, line: &str) -> Result<(), EngineError>;

    fn rename_table(&self, db: &str, from: &str, to: &str) -> Result<(), EngineError>;

    fn drop_table(&self, db: &str, table: &str) -> Result<(), EngineError>;

    fn create_database(&self, db: &str) -> Result<(), EngineError>;

    /// Remove a database. Fails with [`EngineError::DatabaseNotEmpty`] while
    /// it still holds tables.
    fn drop_database(&self, db: &str) -> Result<(), EngineError>;

    /// Release connections. Called once when the filesystem is destroyed.
    fn close(&self) {}
}

impl<T: TableEngine + ?Sized> TableEngine for Arc<T> {
    fn list_databases(&self) -> Result<Vec<String>, EngineError> {
        (**self).list_databases()
    }

    fn list_tables(&self, db: &str) -> Result<Vec<String>, EngineError> {
        (**self).list_tables(db)
    }

    fn table_header(&self, db: &str, table: &str) -> Result<Option<String>, EngineError> {
        (**self).table_header(db, table)
    }

    fn list_rows(&self, db: &str, table: &str) -> Result<Vec<String>, EngineError> {
        (**self).list_rows(db, table)
    }

    fn table_info(&self, db: &str, table: &str) -> Result<TableInfo, EngineError> {
        (**self).table_info(db, table)
    }

    fn create_table(&self, db: &str, table: &str, header: &str) -> Result<(), EngineError> {
        (**self).create_table(db, table, header)
    }

    fn insert_row(&self, info: &TableInfo, line: &str) -> Result<(), EngineError> {
        (**self).insert_row(info, line)
    }

    fn delete_row(&self, info: &TableInfo, line: &str) -> Result<(), EngineError> {
        (**self).delete_row(info, line)
    }

    fn rename_table(&self, db: &str, from: &str, to: &str) -> Result<(), EngineError> {
        (**self).rename_table(db, from, to)
    }

    fn drop_table(&self, db: &str, table: &str) -> Result<(), EngineError> {
        (**self).drop_table(db, table)
    }

    fn create_database(&self, db: &str) -> Result<(), EngineError> {
        (**self).create_database(db)
    }

    fn drop_database(&self, db: &str) -> Result<(), EngineError> {
        (**self).drop_database(db)
    }

    fn close(&self) {
        (**self).close()
    }
}

/// Open an engine from a connection string
///
/// Supported forms:
/// - `memory:` for the in-process engine
/// - `sqlite://<dir>` or `sqlite:<dir>` for a directory of SQLite files
///
/// Anything else is a [`EngineError::Config`] error, which the mount treats
/// as fatal.
pub fn connect(conn_str: &str) -> Result<Box<dyn TableEngine>, EngineError> {
    let conn_str = conn_str.trim();

    if conn_str == "memory:" {
        tracing::info!("using in-memory table engine");
        return Ok(Box::new(MemoryEngine::new()));
    }

    if let Some(rest) = conn_str.strip_prefix("sqlite:") {
        let dir = rest.strip_prefix("//").unwrap_or(rest);
        if dir.is_empty() {
            return Err(EngineError::Config(
                "sqlite connection string needs a data directory".to_string(),
            ));
        }
        tracing::info!(dir, "using sqlite table engine");
        return Ok(Box::new(SqliteEngine::open(dir)?));
    }

    Err(EngineError::Config(format!(
        "unsupported connection string: {conn_str}"
    )))
}

/// Check that a database or table name can be used as a single path segment
pub fn validate_name(name: &str) -> Result<(), EngineError> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\0');
    if bad {
        return Err(EngineError::InvalidName(name.to_string()));
    }
    Ok(())
}
