//! Local mirror of materialized tables
//!
//! Layout under the mirror root:
//!
//! ```text
//! <root>/<db>/            one directory per database
//! <root>/<db>/<table>     live mirror, edited by users
//! <root>/<db>/<table>.o   baseline snapshot of the last sync
//! ```
//!
//! A live mirror without a baseline is a table waiting to be created.

use std::fs::{self, DirBuilder, File};
use std::io::{BufWriter, Write};
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use engine::TableEngine;

use super::path::CLONE_SUFFIX;
use crate::error::FsError;

/// Mode of database directories created in the mirror
pub const DB_DIR_MODE: u32 = 0o770;

/// What [`MirrorStore::ensure_present`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// The mirror was missing and has been materialized
    Materialized,
    /// A closed, committed mirror was refreshed from the engine
    Reloaded,
    /// The existing mirror was left alone
    Kept,
}

#[derive(Debug, Clone)]
pub struct MirrorStore {
    root: PathBuf,
}

impl MirrorStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Host path backing a virtual path
    pub fn host_path(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }

    pub fn db_dir(&self, db: &str) -> PathBuf {
        self.root.join(db)
    }

    pub fn live_path(&self, db: &str, table: &str) -> PathBuf {
        self.db_dir(db).join(table)
    }

    pub fn baseline_path(&self, db: &str, table: &str) -> PathBuf {
        self.db_dir(db).join(format!("{table}{CLONE_SUFFIX}"))
    }

    pub fn has_live(&self, db: &str, table: &str) -> bool {
        self.live_path(db, table).exists()
    }

    pub fn has_baseline(&self, db: &str, table: &str) -> bool {
        self.baseline_path(db, table).exists()
    }

    /// Create a database directory if it is not there yet
    pub fn ensure_db_dir(&self, db: &str) -> Result<(), FsError> {
        let dir = self.db_dir(db);
        if dir.is_dir() {
            return Ok(());
        }
        match DirBuilder::new().mode(DB_DIR_MODE).create(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Render a table from the engine into its live mirror
    ///
    /// Fails with [`FsError::NotFound`] when the engine has no such table;
    /// no file is created in that case. Rows are fetched before the mirror
    /// is opened, so an engine failure leaves any existing mirror intact.
    pub fn materialize(
        &self,
        engine: &dyn TableEngine,
        db: &str,
        table: &str,
    ) -> Result<(), FsError> {
        let header = engine
            .table_header(db, table)?
            .ok_or_else(|| FsError::NotFound(format!("/{db}/{table}")))?;
        let rows = engine.list_rows(db, table)?;

        self.ensure_db_dir(db)?;
        let mut out = BufWriter::new(File::create(self.live_path(db, table))?);
        writeln!(out, "{header}")?;
        for row in &rows {
            writeln!(out, "{row}")?;
        }
        out.flush()?;

        tracing::debug!(db, table, rows = rows.len(), "materialized table");
        Ok(())
    }

    /// Copy the live mirror byte for byte over the baseline
    pub fn snapshot(&self, db: &str, table: &str) -> Result<(), FsError> {
        fs::copy(self.live_path(db, table), self.baseline_path(db, table))?;
        Ok(())
    }

    /// Materialize and snapshot in one go
    pub fn refresh(&self, engine: &dyn TableEngine, db: &str, table: &str) -> Result<(), FsError> {
        self.materialize(engine, db, table)?;
        self.snapshot(db, table)
    }

    /// Make sure a table has a live mirror, reloading it when allowed
    ///
    /// `may_reload` should only be true when reloading is enabled and nobody
    /// holds the path open. Even then only committed mirrors (those with a
    /// baseline) are refreshed; a pending table is never touched.
    pub fn ensure_present(
        &self,
        engine: &dyn TableEngine,
        db: &str,
        table: &str,
        may_reload: bool,
    ) -> Result<Presence, FsError> {
        if !self.has_live(db, table) {
            self.refresh(engine, db, table)?;
            return Ok(Presence::Materialized);
        }

        if may_reload && self.has_baseline(db, table) {
            self.refresh(engine, db, table)?;
            return Ok(Presence::Reloaded);
        }

        Ok(Presence::Kept)
    }

    /// Remove the live mirror and, if present, its baseline
    pub fn remove_table(&self, db: &str, table: &str) -> Result<(), FsError> {
        fs::remove_file(self.live_path(db, table))?;
        match fs::remove_file(self.baseline_path(db, table)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Rename a table's live mirror and baseline within one database
    pub fn rename_table(&self, db: &str, from: &str, to: &str) -> Result<(), FsError> {
        fs::rename(self.live_path(db, from), self.live_path(db, to))?;
        if self.has_baseline(db, from) {
            fs::rename(self.baseline_path(db, from), self.baseline_path(db, to))?;
        }
        Ok(())
    }
}
