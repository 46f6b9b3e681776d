//! Shared fixtures: an in-memory engine that records mutating calls and can
//! be told to fail

#![allow(dead_code)]

use std::sync::Arc;

use engine::{EngineError, MemoryEngine, TableEngine, TableInfo};
use parking_lot::Mutex;
use sql2textfs::{TextFs, TextFsOptions};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateTable {
        db: String,
        table: String,
        header: String,
    },
    Insert(String),
    Delete(String),
    Rename {
        db: String,
        from: String,
        to: String,
    },
    DropTable {
        db: String,
        table: String,
    },
    CreateDatabase(String),
    DropDatabase(String),
}

#[derive(Debug, Default)]
pub struct RecordingEngine {
    pub inner: MemoryEngine,
    calls: Mutex<Vec<Call>>,
    fail_insert: Mutex<Option<String>>,
    fail_drop_database: Mutex<bool>,
}

impl RecordingEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Make inserting exactly this line fail
    pub fn fail_insert_of(&self, line: &str) {
        *self.fail_insert.lock() = Some(line.to_string());
    }

    pub fn fail_drop_database(&self) {
        *self.fail_drop_database.lock() = true;
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }
}

impl TableEngine for RecordingEngine {
    fn list_databases(&self) -> Result<Vec<String>, EngineError> {
        self.inner.list_databases()
    }

    fn list_tables(&self, db: &str) -> Result<Vec<String>, EngineError> {
        self.inner.list_tables(db)
    }

    fn table_header(&self, db: &str, table: &str) -> Result<Option<String>, EngineError> {
        self.inner.table_header(db, table)
    }

    fn list_rows(&self, db: &str, table: &str) -> Result<Vec<String>, EngineError> {
        self.inner.list_rows(db, table)
    }

    fn table_info(&self, db: &str, table: &str) -> Result<TableInfo, EngineError> {
        self.inner.table_info(db, table)
    }

    fn create_table(&self, db: &str, table: &str, header: &str) -> Result<(), EngineError> {
        self.record(Call::CreateTable {
            db: db.to_string(),
            table: table.to_string(),
            header: header.to_string(),
        });
        self.inner.create_table(db, table, header)
    }

    fn insert_row(&self, info: &TableInfo, line: &str) -> Result<(), EngineError> {
        self.record(Call::Insert(line.to_string()));
        if self.fail_insert.lock().as_deref() == Some(line) {
            return Err(EngineError::Constraint(format!("injected failure for {line:?}")));
        }
        self.inner.insert_row(info, line)
    }

    fn delete_row(&self, info: &TableInfo, line: &str) -> Result<(), EngineError> {
        self.record(Call::Delete(line.to_string()));
        self.inner.delete_row(info, line)
    }

    fn rename_table(&self, db: &str, from: &str, to: &str) -> Result<(), EngineError> {
        self.record(Call::Rename {
            db: db.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        });
        self.inner.rename_table(db, from, to)
    }

    fn drop_table(&self, db: &str, table: &str) -> Result<(), EngineError> {
        self.record(Call::DropTable {
            db: db.to_string(),
            table: table.to_string(),
        });
        self.inner.drop_table(db, table)
    }

    fn create_database(&self, db: &str) -> Result<(), EngineError> {
        self.record(Call::CreateDatabase(db.to_string()));
        self.inner.create_database(db)
    }

    fn drop_database(&self, db: &str) -> Result<(), EngineError> {
        self.record(Call::DropDatabase(db.to_string()));
        if *self.fail_drop_database.lock() {
            return Err(EngineError::Constraint("injected drop failure".to_string()));
        }
        self.inner.drop_database(db)
    }
}

pub const LETTERS_HEADER: &str = "letter TEXT";

/// Engine with database `shop` holding table `letters` = A, B, C
pub fn seeded_engine() -> Arc<RecordingEngine> {
    let engine = RecordingEngine::new();
    engine.inner.create_database("shop").unwrap();
    engine
        .inner
        .create_table("shop", "letters", LETTERS_HEADER)
        .unwrap();
    let info = engine.inner.table_info("shop", "letters").unwrap();
    for row in ["A", "B", "C"] {
        engine.inner.insert_row(&info, row).unwrap();
    }
    engine
}

pub fn mount(engine: &Arc<RecordingEngine>, reload: bool) -> TextFs {
    let fs = TextFs::new(
        Box::new(engine.clone()),
        TextFsOptions {
            reload,
            ..Default::default()
        },
    )
    .unwrap();
    fs.init().unwrap();
    fs
}

pub fn read_file(fs: &TextFs, path: &str) -> String {
    let fh = fs.open(path, libc::O_RDONLY).unwrap();
    let data = fs.read(fh, 0, 1 << 20).unwrap();
    fs.release(fh).unwrap();
    String::from_utf8(data).unwrap()
}

/// Replace a file's contents through the filesystem and release it
pub fn write_file(
    fs: &TextFs,
    path: &str,
    text: &str,
) -> Result<Option<sql2textfs::text_fs::reconcile::Reconciled>, sql2textfs::FsError> {
    let fh = fs.open(path, libc::O_WRONLY | libc::O_TRUNC)?;
    fs.write(fh, 0, text.as_bytes())?;
    fs.release(fh)
}

pub fn mirror_text(fs: &TextFs, db: &str, table: &str) -> String {
    std::fs::read_to_string(fs.store().live_path(db, table)).unwrap()
}

pub fn baseline_text(fs: &TextFs, db: &str, table: &str) -> String {
    std::fs::read_to_string(fs.store().baseline_path(db, table)).unwrap()
}
