//! In-process table engine
//!
//! Keeps every database in a map behind a single lock. Rows are stored as
//! parsed field vectors so that rendering, matching and key generation use
//! the same codec as the SQLite engine.

use std::collections::BTreeMap;

use parking_lot::Mutex;

use crate::codec;
use crate::{validate_name, Column, EngineError, TableEngine, TableInfo};

type Row = Vec<Option<String>>;

#[derive(Debug, Clone)]
struct MemTable {
    header: String,
    columns: Vec<Column>,
    rows: Vec<Row>,
}

impl MemTable {
    /// Column index of a lone `INTEGER PRIMARY KEY`, which behaves like a rowid
    fn rowid_column(&self) -> Option<usize> {
        let pks: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.primary_key)
            .map(|(i, _)| i)
            .collect();
        match pks.as_slice() {
            [i] if self.columns[*i].decl_type == "INTEGER" => Some(*i),
            _ => None,
        }
    }

    fn next_rowid(&self, column: usize) -> i64 {
        self.rows
            .iter()
            .filter_map(|r| r[column].as_deref().and_then(|v| v.parse::<i64>().ok()))
            .max()
            .unwrap_or(0)
            + 1
    }

    fn key_of<'a>(&self, row: &'a Row) -> Vec<&'a Option<String>> {
        self.columns
            .iter()
            .zip(row.iter())
            .filter(|(c, _)| c.primary_key)
            .map(|(_, v)| v)
            .collect()
    }
}

type Database = BTreeMap<String, MemTable>;

/// Table engine that keeps everything in memory
#[derive(Debug, Default)]
pub struct MemoryEngine {
    databases: Mutex<BTreeMap<String, Database>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_db<R>(
        &self,
        db: &str,
        f: impl FnOnce(&mut Database) -> Result<R, EngineError>,
    ) -> Result<R, EngineError> {
        let mut databases = self.databases.lock();
        let database = databases
            .get_mut(db)
            .ok_or_else(|| EngineError::NoSuchDatabase(db.to_string()))?;
        f(database)
    }

    fn with_table<R>(
        &self,
        db: &str,
        table: &str,
        f: impl FnOnce(&mut MemTable) -> Result<R, EngineError>,
    ) -> Result<R, EngineError> {
        self.with_db(db, |database| {
            let t = database
                .get_mut(table)
                .ok_or_else(|| EngineError::NoSuchTable(db.to_string(), table.to_string()))?;
            f(t)
        })
    }
}

impl TableEngine for MemoryEngine {
    fn list_databases(&self) -> Result<Vec<String>, EngineError> {
        Ok(self.databases.lock().keys().cloned().collect())
    }

    fn list_tables(&self, db: &str) -> Result<Vec<String>, EngineError> {
        self.with_db(db, |database| Ok(database.keys().cloned().collect()))
    }

    fn table_header(&self, db: &str, table: &str) -> Result<Option<String>, EngineError> {
        self.with_db(db, |database| {
            Ok(database.get(table).map(|t| t.header.clone()))
        })
    }

    fn list_rows(&self, db: &str, table: &str) -> Result<Vec<String>, EngineError> {
        self.with_table(db, table, |t| {
            Ok(t.rows.iter().map(|r| codec::join_fields(r)).collect())
        })
    }

    fn table_info(&self, db: &str, table: &str) -> Result<TableInfo, EngineError> {
        self.with_table(db, table, |t| {
            Ok(TableInfo {
                database: db.to_string(),
                table: table.to_string(),
                columns: t.columns.clone(),
            })
        })
    }

    fn create_table(&self, db: &str, table: &str, header: &str) -> Result<(), EngineError> {
        validate_name(table)?;
        let header = codec::single_line(header);
        let columns = codec::parse_header(&header)?;

        self.with_db(db, |database| {
            if database.contains_key(table) {
                return Err(EngineError::Constraint(format!(
                    "table {db}/{table} already exists"
                )));
            }
            database.insert(
                table.to_string(),
                MemTable {
                    header,
                    columns,
                    rows: Vec::new(),
                },
            );
            Ok(())
        })
    }

    fn insert_row(&self, info: &TableInfo, line: &str) -> Result<(), EngineError> {
        let mut fields = codec::split_fields(line)?;

        self.with_table(&info.database, &info.table, |t| {
            if fields.len() != t.columns.len() {
                return Err(EngineError::MalformedRow(format!(
                    "expected {} fields, got {}",
                    t.columns.len(),
                    fields.len()
                )));
            }

            if let Some(col) = t.rowid_column() {
                match fields[col].as_deref() {
                    None => fields[col] = Some(t.next_rowid(col).to_string()),
                    Some(v) if v.parse::<i64>().is_err() => {
                        return Err(EngineError::Constraint(format!(
                            "{} must be an integer, got {v:?}",
                            t.columns[col].name
                        )))
                    }
                    Some(_) => {}
                }
            }

            if t.columns.iter().any(|c| c.primary_key) {
                let key = t.key_of(&fields);
                if t.rows.iter().any(|r| t.key_of(r) == key) {
                    return Err(EngineError::Constraint(format!(
                        "duplicate primary key in {}/{}",
                        info.database, info.table
                    )));
                }
            }

            t.rows.push(fields);
            Ok(())
        })
    }

    fn delete_row(&self, info: &TableInfo, line: &str) -> Result<(), EngineError> {
        let fields = codec::split_fields(line)?;

        self.with_table(&info.database, &info.table, |t| {
            let pos = t
                .rows
                .iter()
                .position(|r| *r == fields)
                .ok_or_else(|| EngineError::NoMatchingRow(line.to_string()))?;
            t.rows.remove(pos);
            Ok(())
        })
    }

    fn rename_table(&self, db: &str, from: &str, to: &str) -> Result<(), EngineError> {
        validate_name(to)?;
        self.with_db(db, |database| {
            if database.contains_key(to) {
                return Err(EngineError::Constraint(format!(
                    "table {db}/{to} already exists"
                )));
            }
            let t = database
                .remove(from)
                .ok_or_else(|| EngineError::NoSuchTable(db.to_string(), from.to_string()))?;
            database.insert(to.to_string(), t);
            Ok(())
        })
    }

    fn drop_table(&self, db: &str, table: &str) -> Result<(), EngineError> {
        self.with_db(db, |database| {
            database
                .remove(table)
                .map(|_| ())
                .ok_or_else(|| EngineError::NoSuchTable(db.to_string(), table.to_string()))
        })
    }

    fn create_database(&self, db: &str) -> Result<(), EngineError> {
        validate_name(db)?;
        let mut databases = self.databases.lock();
        if databases.contains_key(db) {
            return Err(EngineError::DatabaseExists(db.to_string()));
        }
        databases.insert(db.to_string(), Database::new());
        Ok(())
    }

    fn drop_database(&self, db: &str) -> Result<(), EngineError> {
        let mut databases = self.databases.lock();
        match databases.get(db) {
            None => Err(EngineError::NoSuchDatabase(db.to_string())),
            Some(database) if !database.is_empty() => {
                Err(EngineError::DatabaseNotEmpty(db.to_string()))
            }
            Some(_) => {
                databases.remove(db);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_with_users() -> (MemoryEngine, TableInfo) {
        let engine = MemoryEngine::new();
        engine.create_database("shop").unwrap();
        engine
            .create_table("shop", "users", "id INTEGER PRIMARY KEY, name TEXT")
            .unwrap();
        let info = engine.table_info("shop", "users").unwrap();
        (engine, info)
    }

    #[test]
    fn test_create_and_list() {
        let (engine, _) = engine_with_users();
        assert_eq!(engine.list_databases().unwrap(), vec!["shop"]);
        assert_eq!(engine.list_tables("shop").unwrap(), vec!["users"]);
        assert_eq!(
            engine.table_header("shop", "users").unwrap().as_deref(),
            Some("id INTEGER PRIMARY KEY, name TEXT")
        );
        assert_eq!(engine.table_header("shop", "nope").unwrap(), None);
    }

    #[test]
    fn test_insert_generates_rowid() {
        let (engine, info) = engine_with_users();
        engine.insert_row(&info, "\\N\tAlice").unwrap();
        engine.insert_row(&info, "7\tBob").unwrap();
        engine.insert_row(&info, "\\N\tCarol").unwrap();
        assert_eq!(
            engine.list_rows("shop", "users").unwrap(),
            vec!["1\tAlice", "7\tBob", "8\tCarol"]
        );
    }

    #[test]
    fn test_insert_rejects_duplicate_key_and_bad_width() {
        let (engine, info) = engine_with_users();
        engine.insert_row(&info, "1\tAlice").unwrap();
        assert!(matches!(
            engine.insert_row(&info, "1\tAgain"),
            Err(EngineError::Constraint(_))
        ));
        assert!(matches!(
            engine.insert_row(&info, "2"),
            Err(EngineError::MalformedRow(_))
        ));
    }

    #[test]
    fn test_delete_row_by_rendering() {
        let (engine, info) = engine_with_users();
        engine.insert_row(&info, "1\tAlice").unwrap();
        engine.insert_row(&info, "2\tBob").unwrap();
        engine.delete_row(&info, "1\tAlice").unwrap();
        assert_eq!(engine.list_rows("shop", "users").unwrap(), vec!["2\tBob"]);
        assert!(matches!(
            engine.delete_row(&info, "1\tAlice"),
            Err(EngineError::NoMatchingRow(_))
        ));
    }

    #[test]
    fn test_rename_and_drop_table() {
        let (engine, _) = engine_with_users();
        engine.rename_table("shop", "users", "people").unwrap();
        assert_eq!(engine.list_tables("shop").unwrap(), vec!["people"]);
        engine.drop_table("shop", "people").unwrap();
        assert!(engine.list_tables("shop").unwrap().is_empty());
    }

    #[test]
    fn test_drop_database_requires_empty() {
        let (engine, _) = engine_with_users();
        assert!(matches!(
            engine.drop_database("shop"),
            Err(EngineError::DatabaseNotEmpty(_))
        ));
        engine.drop_table("shop", "users").unwrap();
        engine.drop_database("shop").unwrap();
        assert!(engine.list_databases().unwrap().is_empty());
    }

    #[test]
    fn test_missing_database() {
        let engine = MemoryEngine::new();
        assert!(matches!(
            engine.list_tables("nope"),
            Err(EngineError::NoSuchDatabase(_))
        ));
    }
}
