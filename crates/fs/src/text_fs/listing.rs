//! Directory projection: what `readdir` shows
//!
//! The engine is authoritative for databases and tables. A database listing
//! additionally shows mirror files that the engine does not know yet
//! (tables created locally and not committed), never baselines.

use std::collections::BTreeSet;
use std::fs;

use engine::TableEngine;

use super::mirror::MirrorStore;
use super::path::CLONE_SUFFIX;
use crate::error::FsError;

/// List databases, making sure each has a mirror directory
pub fn list_root(engine: &dyn TableEngine, store: &MirrorStore) -> Result<Vec<String>, FsError> {
    let databases = engine.list_databases()?;
    for db in &databases {
        store.ensure_db_dir(db)?;
    }
    Ok(databases)
}

/// List the tables of one database plus any uncommitted local tables
pub fn list_database(
    engine: &dyn TableEngine,
    store: &MirrorStore,
    db: &str,
) -> Result<Vec<String>, FsError> {
    let mut names = engine.list_tables(db)?;
    let known: BTreeSet<String> = names.iter().cloned().collect();

    let dir = store.db_dir(db);
    if !dir.is_dir() {
        return Ok(names);
    }

    let mut local = BTreeSet::new();
    for entry in fs::read_dir(&dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if name.ends_with(CLONE_SUFFIX) || known.contains(&name) {
            continue;
        }
        local.insert(name);
    }

    if !local.is_empty() {
        tracing::debug!(db, pending = local.len(), "listing uncommitted tables");
    }
    names.extend(local);
    Ok(names)
}
