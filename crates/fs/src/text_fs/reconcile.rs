//! Push edits of a live mirror back into the engine
//!
//! A mirror without a baseline is a creation script: its first line is the
//! header and every further line is a row. A mirror with a baseline is
//! diffed against it and each changed line becomes a row insert or delete.
//! Whenever the engine may have changed, the mirror and baseline are
//! re-rendered from the engine so they show what was actually stored.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use engine::TableEngine;

use super::diff::{DiffTool, LineChange};
use super::mirror::MirrorStore;
use crate::error::FsError;

/// Result of a successful reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    /// A pending table was created with this many rows
    Created { rows: usize },
    /// A committed table had rows inserted and deleted
    Applied { inserted: usize, deleted: usize },
    /// Nothing differed from the baseline
    Unchanged,
}

pub struct Reconciler<'a> {
    pub engine: &'a dyn TableEngine,
    pub store: &'a MirrorStore,
    pub diff: &'a DiffTool,
}

impl Reconciler<'_> {
    pub fn reconcile(&self, db: &str, table: &str) -> Result<Reconciled, FsError> {
        if self.store.has_baseline(db, table) {
            let result = self.apply_diff(db, table);
            if let Err(e) = &result {
                tracing::warn!(db, table, error = %e, "reconcile failed, reloading from engine");
                if let Err(reload) = self.store.refresh(self.engine, db, table) {
                    tracing::error!(db, table, error = %reload, "reload after failed reconcile");
                }
            }
            result
        } else {
            self.create(db, table)
        }
    }

    fn create(&self, db: &str, table: &str) -> Result<Reconciled, FsError> {
        let path = format!("/{db}/{table}");
        let mut lines = read_lines(&self.store.live_path(db, table))?.into_iter();
        let header = lines
            .next()
            .ok_or_else(|| FsError::NothingToCreate(path.clone()))?;

        tracing::info!(db, table, header = %header, "creating table");
        self.engine.create_table(db, table, &header)?;
        let info = self.engine.table_info(db, table)?;

        let mut rows = 0;
        let mut failure = None;
        for line in lines {
            if let Err(e) = self.engine.insert_row(&info, &line) {
                tracing::warn!(db, table, line = %line, error = %e, "insert failed");
                failure = Some(e);
                break;
            }
            rows += 1;
        }

        // the table exists now, so pick up canonical values either way
        self.store.refresh(self.engine, db, table)?;

        match failure {
            Some(e) => Err(e.into()),
            None => Ok(Reconciled::Created { rows }),
        }
    }

    fn apply_diff(&self, db: &str, table: &str) -> Result<Reconciled, FsError> {
        let live = self.store.live_path(db, table);
        let baseline = self.store.baseline_path(db, table);

        if first_line(&live)? != first_line(&baseline)? {
            return Err(FsError::SchemaEdit(format!("/{db}/{table}")));
        }

        let changes = self.diff.run(&live, &baseline)?;
        if changes.is_empty() {
            return Ok(Reconciled::Unchanged);
        }
        let info = self.engine.table_info(db, table)?;

        let (deletes, inserts): (Vec<_>, Vec<_>) = changes
            .into_iter()
            .partition(|c| matches!(c, LineChange::Delete(_)));

        let mut inserted = 0;
        let mut deleted = 0;
        for change in deletes.into_iter().chain(inserts) {
            match &change {
                LineChange::Delete(line) => {
                    tracing::debug!(db, table, line = %line, "delete row");
                    self.engine.delete_row(&info, line)?;
                    deleted += 1;
                }
                LineChange::Insert(line) => {
                    tracing::debug!(db, table, line = %line, "insert row");
                    self.engine.insert_row(&info, line)?;
                    inserted += 1;
                }
            }
        }

        self.store.refresh(self.engine, db, table)?;
        Ok(Reconciled::Applied { inserted, deleted })
    }
}

fn read_lines(path: &Path) -> Result<Vec<String>, FsError> {
    let reader = BufReader::new(File::open(path)?);
    let mut lines = Vec::new();
    for line in reader.lines() {
        let line = line?;
        lines.push(line.strip_suffix('\r').map(str::to_string).unwrap_or(line));
    }
    Ok(lines)
}

fn first_line(path: &Path) -> Result<Option<String>, FsError> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\n', '\r']).to_string()))
}
