//! SQLite table engine
//!
//! Each database is a `<name>.sqlite` file inside the data directory. Pools
//! are opened lazily and cached per database. The filesystem calls in from
//! plain threads, so the engine owns a current-thread tokio runtime and
//! blocks on every query.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};

use futures::TryStreamExt;
use parking_lot::Mutex;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tokio::runtime::Runtime;

use crate::codec;
use crate::{validate_name, Column, EngineError, TableEngine, TableInfo};

const DB_EXTENSION: &str = "sqlite";

/// Quote an identifier for interpolation into SQL
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Extract the column list from a `CREATE TABLE` statement
fn header_from_create_sql(sql: &str) -> Option<String> {
    let open = sql.find('(')?;
    let close = sql.rfind(')')?;
    if close <= open {
        return None;
    }
    Some(codec::single_line(&sql[open + 1..close]))
}

/// Table engine backed by a directory of SQLite files
pub struct SqliteEngine {
    root: PathBuf,
    runtime: Runtime,
    pools: Mutex<HashMap<String, SqlitePool>>,
}

impl std::fmt::Debug for SqliteEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteEngine")
            .field("root", &self.root)
            .field("open_pools", &self.pools.lock().len())
            .finish()
    }
}

impl SqliteEngine {
    /// Open an engine over an existing data directory
    pub fn open(root: impl AsRef<Path>) -> Result<Self, EngineError> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(EngineError::Config(format!(
                "sqlite data directory does not exist: {}",
                root.display()
            )));
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| EngineError::Config(format!("failed to start runtime: {e}")))?;

        Ok(Self {
            root,
            runtime,
            pools: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn db_path(&self, db: &str) -> PathBuf {
        self.root.join(format!("{db}.{DB_EXTENSION}"))
    }

    fn block_on<F: Future>(&self, fut: F) -> F::Output {
        self.runtime.block_on(fut)
    }

    fn connect(&self, db: &str) -> Result<SqlitePool, EngineError> {
        let options = SqliteConnectOptions::new().filename(self.db_path(db));
        let pool = self.block_on(
            SqlitePoolOptions::new()
                .max_connections(1)
                .connect_with(options),
        )?;
        Ok(pool)
    }

    fn pool(&self, db: &str) -> Result<SqlitePool, EngineError> {
        validate_name(db)?;
        if let Some(pool) = self.pools.lock().get(db) {
            return Ok(pool.clone());
        }
        if !self.db_path(db).is_file() {
            return Err(EngineError::NoSuchDatabase(db.to_string()));
        }

        tracing::debug!(db, "opening sqlite pool");
        let pool = self.connect(db)?;
        self.pools.lock().insert(db.to_string(), pool.clone());
        Ok(pool)
    }

    fn create_sql(&self, db: &str, table: &str) -> Result<Option<String>, EngineError> {
        let pool = self.pool(db)?;
        let sql: Option<Option<String>> = self.block_on(
            sqlx::query_scalar(
                "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
            )
            .bind(table)
            .fetch_optional(&pool),
        )?;
        Ok(sql.flatten())
    }
}

impl TableEngine for SqliteEngine {
    fn list_databases(&self) -> Result<Vec<String>, EngineError> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(DB_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn list_tables(&self, db: &str) -> Result<Vec<String>, EngineError> {
        let pool = self.pool(db)?;
        let names = self.block_on(
            sqlx::query_scalar(
                r#"
                SELECT name FROM sqlite_master
                WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
                ORDER BY name
                "#,
            )
            .fetch_all(&pool),
        )?;
        Ok(names)
    }

    fn table_header(&self, db: &str, table: &str) -> Result<Option<String>, EngineError> {
        match self.create_sql(db, table)? {
            None => Ok(None),
            Some(sql) => header_from_create_sql(&sql)
                .map(Some)
                .ok_or(EngineError::MalformedHeader(sql)),
        }
    }

    fn list_rows(&self, db: &str, table: &str) -> Result<Vec<String>, EngineError> {
        let info = self.table_info(db, table)?;
        let pool = self.pool(db)?;

        let select = info
            .column_names()
            .map(|c| format!("CAST({} AS TEXT)", quote_ident(c)))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!("SELECT {select} FROM {}", quote_ident(table));
        let width = info.columns.len();

        self.block_on(async {
            let mut lines = Vec::new();
            let mut rows = sqlx::query(&sql).fetch(&pool);
            while let Some(row) = rows.try_next().await? {
                let mut fields: Vec<Option<String>> = Vec::with_capacity(width);
                for i in 0..width {
                    fields.push(row.try_get(i)?);
                }
                lines.push(codec::join_fields(&fields));
            }
            Ok::<_, EngineError>(lines)
        })
    }

    fn table_info(&self, db: &str, table: &str) -> Result<TableInfo, EngineError> {
        let pool = self.pool(db)?;
        let sql = format!("PRAGMA table_info({})", quote_ident(table));
        let rows = self.block_on(sqlx::query(&sql).fetch_all(&pool))?;

        if rows.is_empty() {
            return Err(EngineError::NoSuchTable(db.to_string(), table.to_string()));
        }

        let mut columns = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.try_get("name")?;
            let decl_type: String = row.try_get("type")?;
            let pk: i64 = row.try_get("pk")?;
            columns.push(Column {
                name,
                decl_type: decl_type.to_ascii_uppercase(),
                primary_key: pk > 0,
            });
        }

        Ok(TableInfo {
            database: db.to_string(),
            table: table.to_string(),
            columns,
        })
    }

    fn create_table(&self, db: &str, table: &str, header: &str) -> Result<(), EngineError> {
        validate_name(table)?;
        let header = codec::single_line(header);
        if header.contains(';') {
            return Err(EngineError::MalformedHeader(header));
        }
        codec::parse_header(&header)?;

        let pool = self.pool(db)?;
        let sql = format!("CREATE TABLE {} ({header})", quote_ident(table));
        self.block_on(sqlx::query(&sql).execute(&pool))?;
        tracing::info!(db, table, "created table");
        Ok(())
    }

    fn insert_row(&self, info: &TableInfo, line: &str) -> Result<(), EngineError> {
        let fields = codec::split_fields(line)?;
        if fields.len() != info.columns.len() {
            return Err(EngineError::MalformedRow(format!(
                "expected {} fields, got {}",
                info.columns.len(),
                fields.len()
            )));
        }

        let pool = self.pool(&info.database)?;
        let columns = info
            .column_names()
            .map(quote_ident)
            .collect::<Vec<_>>()
            .join(", ");
        let params = (1..=fields.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {} ({columns}) VALUES ({params})",
            quote_ident(&info.table)
        );

        let mut query = sqlx::query(&sql);
        for field in fields {
            query = query.bind(field);
        }
        self.block_on(query.execute(&pool))?;
        Ok(())
    }

    fn delete_row(&self, info: &TableInfo, line: &str) -> Result<(), EngineError> {
        let fields = codec::split_fields(line)?;
        if fields.len() != info.columns.len() {
            return Err(EngineError::MalformedRow(format!(
                "expected {} fields, got {}",
                info.columns.len(),
                fields.len()
            )));
        }

        let pool = self.pool(&info.database)?;
        let table = quote_ident(&info.table);
        let predicate = info
            .column_names()
            .enumerate()
            .map(|(i, c)| format!("CAST({} AS TEXT) IS ?{}", quote_ident(c), i + 1))
            .collect::<Vec<_>>()
            .join(" AND ");
        let sql = format!(
            "DELETE FROM {table} WHERE rowid = (SELECT rowid FROM {table} WHERE {predicate} LIMIT 1)"
        );

        let mut query = sqlx::query(&sql);
        for field in fields {
            query = query.bind(field);
        }
        let result = self.block_on(query.execute(&pool))?;
        if result.rows_affected() == 0 {
            return Err(EngineError::NoMatchingRow(line.to_string()));
        }
        Ok(())
    }

    fn rename_table(&self, db: &str, from: &str, to: &str) -> Result<(), EngineError> {
        validate_name(to)?;
        let pool = self.pool(db)?;
        let sql = format!(
            "ALTER TABLE {} RENAME TO {}",
            quote_ident(from),
            quote_ident(to)
        );
        self.block_on(sqlx::query(&sql).execute(&pool))?;
        tracing::info!(db, from, to, "renamed table");
        Ok(())
    }

    fn drop_table(&self, db: &str, table: &str) -> Result<(), EngineError> {
        if self.create_sql(db, table)?.is_none() {
            return Err(EngineError::NoSuchTable(db.to_string(), table.to_string()));
        }
        let pool = self.pool(db)?;
        let sql = format!("DROP TABLE {}", quote_ident(table));
        self.block_on(sqlx::query(&sql).execute(&pool))?;
        tracing::info!(db, table, "dropped table");
        Ok(())
    }

    fn create_database(&self, db: &str) -> Result<(), EngineError> {
        validate_name(db)?;

        // An empty file is a valid empty SQLite database
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.db_path(db))
        {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(EngineError::DatabaseExists(db.to_string()))
            }
            Err(e) => return Err(e.into()),
        }

        let pool = self.connect(db)?;
        self.pools.lock().insert(db.to_string(), pool);
        tracing::info!(db, "created database");
        Ok(())
    }

    fn drop_database(&self, db: &str) -> Result<(), EngineError> {
        if !self.list_tables(db)?.is_empty() {
            return Err(EngineError::DatabaseNotEmpty(db.to_string()));
        }

        if let Some(pool) = self.pools.lock().remove(db) {
            self.block_on(pool.close());
        }

        let path = self.db_path(db);
        std::fs::remove_file(&path)?;
        for suffix in ["-wal", "-shm", "-journal"] {
            let mut side = path.clone().into_os_string();
            side.push(suffix);
            let _ = std::fs::remove_file(side);
        }
        tracing::info!(db, "dropped database");
        Ok(())
    }

    fn close(&self) {
        let pools: Vec<SqlitePool> = self.pools.lock().drain().map(|(_, p)| p).collect();
        for pool in pools {
            self.block_on(pool.close());
        }
    }
}
