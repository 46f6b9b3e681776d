//! Path-addressed filesystem core
//!
//! [`TextFs`] implements every filesystem call against virtual paths such as
//! `/shop/users`, independent of how the kernel addresses them. The FUSE
//! adapter (see [`crate::fuse`]) translates inode requests onto it.
//!
//! # Components
//!
//! - [`path`]: classify virtual paths into root, database, table or artifact
//! - [`mirror`]: live mirrors and baseline snapshots on the host
//! - [`reconcile`]: turn mirror edits into engine calls on release
//! - [`listing`]: what directories show
//! - [`handles`]: small integer handles for open directories
//! - [`gate`]: the one lock every call runs under
//!
//! Only the raw byte I/O of `read` and `write` runs outside the gate; it
//! looks up the open file under its own lock and works on the descriptor.

pub mod diff;
pub mod gate;
pub mod handles;
pub mod listing;
pub mod mirror;
pub mod passthrough;
pub mod path;
pub mod reconcile;

use std::collections::HashMap;
use std::fs::{self, DirBuilder, File, Metadata, OpenOptions};
use std::io;
use std::os::unix::fs::{DirBuilderExt, FileExt, OpenOptionsExt};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use engine::TableEngine;
use parking_lot::RwLock;
use tempfile::TempDir;

use crate::error::FsError;
use diff::DiffTool;
use gate::{Gate, GateGuard};
use handles::HandleArena;
use mirror::{MirrorStore, Presence, DB_DIR_MODE};
use passthrough::Statfs;
use path::VirtualPath;
use reconcile::{Reconciled, Reconciler};

pub use diff::DEFAULT_DIFF_PROGRAM;

/// Default name prefix of the private mirror directory
pub const DEFAULT_MIRROR_PREFIX: &str = "sql2textfs-";

/// Runtime knobs of a mount
#[derive(Debug, Clone)]
pub struct TextFsOptions {
    /// Refresh closed, committed tables from the engine on access
    pub reload: bool,
    pub diff_program: String,
    pub mirror_prefix: String,
}

impl Default for TextFsOptions {
    fn default() -> Self {
        Self {
            reload: true,
            diff_program: DEFAULT_DIFF_PROGRAM.to_string(),
            mirror_prefix: DEFAULT_MIRROR_PREFIX.to_string(),
        }
    }
}

/// State mutated only while holding the gate
#[derive(Debug, Default)]
struct MountState {
    /// Open file handles per virtual path
    open_counts: HashMap<String, usize>,
    dir_handles: HandleArena,
    /// Mirror tree, removed on destroy
    mirror_dir: Option<TempDir>,
}

/// An open mirror file and the virtual path it was opened under
#[derive(Debug, Clone)]
struct OpenFile {
    /// `None` once the path was unlinked
    path: Option<String>,
    file: Arc<File>,
}

pub struct TextFs {
    engine: Box<dyn TableEngine>,
    store: MirrorStore,
    diff: DiffTool,
    reload: bool,
    gate: Gate<MountState>,
    files: RwLock<HashMap<u64, OpenFile>>,
    next_fh: AtomicU64,
}

impl std::fmt::Debug for TextFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextFs")
            .field("mirror", &self.store.root())
            .field("reload", &self.reload)
            .field("diff", &self.diff.program())
            .finish()
    }
}

impl TextFs {
    /// Create a filesystem over `engine` with a fresh private mirror
    /// directory under the system temp dir
    pub fn new(engine: Box<dyn TableEngine>, options: TextFsOptions) -> Result<Self, FsError> {
        let mirror_dir = tempfile::Builder::new()
            .prefix(&options.mirror_prefix)
            .tempdir()?;
        tracing::info!(mirror = %mirror_dir.path().display(), "created mirror directory");

        Ok(Self {
            engine,
            store: MirrorStore::new(mirror_dir.path()),
            diff: DiffTool::new(options.diff_program),
            reload: options.reload,
            gate: Gate::new(MountState {
                mirror_dir: Some(mirror_dir),
                ..Default::default()
            }),
            files: RwLock::new(HashMap::new()),
            next_fh: AtomicU64::new(1),
        })
    }

    pub fn mirror_root(&self) -> &Path {
        self.store.root()
    }

    pub fn store(&self) -> &MirrorStore {
        &self.store
    }

    pub fn engine(&self) -> &dyn TableEngine {
        self.engine.as_ref()
    }

    /// Open-handle count of a virtual path
    pub fn open_count(&self, path: &str) -> usize {
        let state = self.gate.enter();
        state.open_counts.get(path).copied().unwrap_or(0)
    }

    /// Whether a file handle is still open
    pub fn is_open(&self, fh: u64) -> bool {
        self.files.read().contains_key(&fh)
    }

    /// Free directory handles held for reuse
    pub fn free_dir_handles(&self) -> Vec<u64> {
        self.gate.enter().dir_handles.free_handles()
    }

    fn reconciler(&self) -> Reconciler<'_> {
        Reconciler {
            engine: self.engine.as_ref(),
            store: &self.store,
            diff: &self.diff,
        }
    }

    fn ensure_present_locked(
        &self,
        state: &GateGuard<'_, MountState>,
        path: &str,
        db: &str,
        table: &str,
    ) -> Result<Presence, FsError> {
        let open = state.open_counts.get(path).copied().unwrap_or(0);
        let presence = self
            .store
            .ensure_present(self.engine.as_ref(), db, table, self.reload && open == 0)?;
        if presence != Presence::Kept {
            tracing::debug!(path, ?presence, "table mirror refreshed");
        }
        Ok(presence)
    }

    /// Apply the existence and reload policy to a table path
    pub fn ensure_present(&self, path: &str) -> Result<Presence, FsError> {
        let state = self.gate.enter();
        match VirtualPath::classify(path) {
            VirtualPath::Table { db, table } => {
                self.ensure_present_locked(&state, path, &db, &table)
            }
            _ => Err(FsError::NotFound(path.to_string())),
        }
    }

    pub fn getattr(&self, path: &str) -> Result<Metadata, FsError> {
        let state = self.gate.enter();
        let class = VirtualPath::classify(path);
        if class == VirtualPath::Artifact {
            return Err(FsError::NotFound(path.to_string()));
        }

        let host = self.store.host_path(path);
        match fs::symlink_metadata(&host) {
            Ok(meta) => Ok(meta),
            Err(e) => match class {
                VirtualPath::Table { db, table } => {
                    self.ensure_present_locked(&state, path, &db, &table)?;
                    Ok(fs::symlink_metadata(&host)?)
                }
                _ => Err(e.into()),
            },
        }
    }

    /// Create a filesystem node; a regular file in a database directory is a
    /// table waiting to be created on release
    pub fn mknod(&self, path: &str, mode: u32, rdev: u32) -> Result<(), FsError> {
        let _state = self.gate.enter();
        self.mknod_locked(path, mode, rdev)
    }

    fn mknod_locked(&self, path: &str, mode: u32, rdev: u32) -> Result<(), FsError> {
        tracing::info!(path, mode = %format_args!("{mode:o}"), "mknod");
        match VirtualPath::classify(path) {
            VirtualPath::Table { .. } => {
                passthrough::mknod(&self.store.host_path(path), mode, rdev)
            }
            _ => Err(FsError::NotPermitted(path.to_string())),
        }
    }

    /// Create a regular file and open it
    pub fn create(&self, path: &str, mode: u32, flags: i32) -> Result<u64, FsError> {
        let mut state = self.gate.enter();
        self.mknod_locked(path, libc::S_IFREG as u32 | (mode & 0o7777), 0)?;
        self.open_locked(&mut state, path, flags)
    }

    pub fn mkdir(&self, path: &str) -> Result<(), FsError> {
        let _state = self.gate.enter();
        tracing::info!(path, "mkdir");
        let VirtualPath::Database(db) = VirtualPath::classify(path) else {
            return Err(FsError::NotPermitted(path.to_string()));
        };

        self.engine.create_database(&db)?;
        match DirBuilder::new()
            .mode(DB_DIR_MODE)
            .create(self.store.db_dir(&db))
        {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn rmdir(&self, path: &str) -> Result<(), FsError> {
        let _state = self.gate.enter();
        tracing::info!(path, "rmdir");
        let VirtualPath::Database(db) = VirtualPath::classify(path) else {
            return Err(FsError::NotPermitted(path.to_string()));
        };

        let dir = self.store.db_dir(&db);
        fs::remove_dir(&dir)?;
        if let Err(e) = self.engine.drop_database(&db) {
            tracing::warn!(db, error = %e, "drop database failed, restoring directory");
            if let Err(restore) = DirBuilder::new().mode(DB_DIR_MODE).create(&dir) {
                tracing::error!(db, error = %restore, "failed to restore database directory");
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Remove a table file; committed tables are dropped from the engine
    /// first, pending ones only exist locally
    pub fn unlink(&self, path: &str) -> Result<(), FsError> {
        let mut state = self.gate.enter();
        tracing::info!(path, "unlink");
        match VirtualPath::classify(path) {
            VirtualPath::Table { db, table } => {
                if self.store.has_baseline(&db, &table) {
                    self.engine.drop_table(&db, &table)?;
                }
                self.store.remove_table(&db, &table)?;

                // handles still open on the removed file release without reconciling
                state.open_counts.remove(path);
                for open in self.files.write().values_mut() {
                    if open.path.as_deref() == Some(path) {
                        open.path = None;
                    }
                }
                Ok(())
            }
            VirtualPath::Artifact => Err(FsError::NotPermitted(path.to_string())),
            _ => Ok(fs::remove_file(self.store.host_path(path))?),
        }
    }

    pub fn rename(&self, from: &str, to: &str) -> Result<(), FsError> {
        let mut state = self.gate.enter();
        tracing::info!(from, to, "rename");

        let (from_class, to_class) = (VirtualPath::classify(from), VirtualPath::classify(to));
        let (Some((db, from_table)), Some((to_db, to_table))) =
            (from_class.table(), to_class.table())
        else {
            if from_class == VirtualPath::Artifact || to_class == VirtualPath::Artifact {
                return Err(FsError::NotPermitted(format!("{from} -> {to}")));
            }
            return Err(FsError::Unsupported(format!("rename {from} -> {to}")));
        };
        if db != to_db {
            return Err(FsError::CrossDatabase {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        self.ensure_present_locked(&state, from, db, from_table)?;
        if from_table == to_table {
            return Ok(());
        }
        // a live mirror must never end up paired with another table's baseline
        if self.store.has_live(db, to_table)
            || self.store.has_baseline(db, to_table)
            || self.engine.table_header(db, to_table)?.is_some()
        {
            return Err(FsError::Exists(to.to_string()));
        }
        if self.store.has_baseline(db, from_table) {
            self.engine.rename_table(db, from_table, to_table)?;
        }
        self.store.rename_table(db, from_table, to_table)?;

        if let Some(count) = state.open_counts.remove(from) {
            state.open_counts.insert(to.to_string(), count);
        }
        for open in self.files.write().values_mut() {
            if open.path.as_deref() == Some(from) {
                open.path = Some(to.to_string());
            }
        }
        Ok(())
    }

    pub fn truncate(&self, path: &str, size: u64) -> Result<(), FsError> {
        let _state = self.gate.enter();
        tracing::debug!(path, size, "truncate");
        passthrough::truncate(&self.store.host_path(path), size)
    }

    pub fn utimens(
        &self,
        path: &str,
        atime: Option<SystemTime>,
        mtime: Option<SystemTime>,
    ) -> Result<(), FsError> {
        let _state = self.gate.enter();
        passthrough::utimens(&self.store.host_path(path), atime, mtime)
    }

    pub fn access(&self, path: &str, mask: i32) -> Result<(), FsError> {
        let _state = self.gate.enter();
        passthrough::access(&self.store.host_path(path), mask)
    }

    pub fn statfs(&self, path: &str) -> Result<Statfs, FsError> {
        let _state = self.gate.enter();
        passthrough::statfs(&self.store.host_path(path))
    }

    /// Open a table file, materializing it first if needed
    pub fn open(&self, path: &str, flags: i32) -> Result<u64, FsError> {
        let mut state = self.gate.enter();
        self.open_locked(&mut state, path, flags)
    }

    fn open_locked(
        &self,
        state: &mut GateGuard<'_, MountState>,
        path: &str,
        flags: i32,
    ) -> Result<u64, FsError> {
        tracing::info!(path, flags = %format_args!("{flags:#x}"), "open");
        let VirtualPath::Table { db, table } = VirtualPath::classify(path) else {
            return Err(FsError::NotFound(path.to_string()));
        };

        self.ensure_present_locked(state, path, &db, &table)?;

        let (read, write) = match flags & libc::O_ACCMODE {
            libc::O_WRONLY => (false, true),
            libc::O_RDWR => (true, true),
            _ => (true, false),
        };
        let file = OpenOptions::new()
            .read(read)
            .write(write)
            .custom_flags(flags & !libc::O_ACCMODE)
            .open(self.store.live_path(&db, &table))?;

        *state.open_counts.entry(path.to_string()).or_insert(0) += 1;
        let fh = self.next_fh.fetch_add(1, Ordering::SeqCst);
        self.files.write().insert(
            fh,
            OpenFile {
                path: Some(path.to_string()),
                file: Arc::new(file),
            },
        );
        Ok(fh)
    }

    fn file(&self, fh: u64) -> Result<Arc<File>, FsError> {
        self.files
            .read()
            .get(&fh)
            .map(|open| open.file.clone())
            .ok_or(FsError::BadHandle(fh))
    }

    pub fn read(&self, fh: u64, offset: u64, size: usize) -> Result<Vec<u8>, FsError> {
        let file = self.file(fh)?;
        let mut buf = vec![0u8; size];
        let mut filled = 0;
        while filled < size {
            match file.read_at(&mut buf[filled..], offset + filled as u64) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        buf.truncate(filled);
        Ok(buf)
    }

    pub fn write(&self, fh: u64, offset: u64, data: &[u8]) -> Result<usize, FsError> {
        let file = self.file(fh)?;
        file.write_all_at(data, offset)?;
        Ok(data.len())
    }

    pub fn flush(&self, fh: u64) -> Result<(), FsError> {
        self.file(fh).map(|_| ())
    }

    pub fn fsync(&self, fh: u64, datasync: bool) -> Result<(), FsError> {
        let _state = self.gate.enter();
        let file = self.file(fh)?;
        if datasync {
            file.sync_data()?;
        } else {
            file.sync_all()?;
        }
        Ok(())
    }

    /// Close a handle and push the table's edits to the engine
    ///
    /// The handle remembers the path it was opened under (following any
    /// rename since), so this works even after the path was unlinked.
    pub fn release(&self, fh: u64) -> Result<Option<Reconciled>, FsError> {
        let mut state = self.gate.enter();

        let OpenFile { path, .. } = self
            .files
            .write()
            .remove(&fh)
            .ok_or(FsError::BadHandle(fh))?;
        let Some(path) = path else {
            tracing::info!(fh, "release of unlinked file");
            return Ok(None);
        };
        let path = path.as_str();
        tracing::info!(path, fh, "release");
        if let Some(count) = state.open_counts.get_mut(path) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                state.open_counts.remove(path);
            }
        }

        let VirtualPath::Table { db, table } = VirtualPath::classify(path) else {
            return Ok(None);
        };
        if !self.store.has_live(&db, &table) {
            // mirror removed while open
            return Ok(None);
        }

        match self.reconciler().reconcile(&db, &table) {
            Ok(outcome) => {
                tracing::info!(path, ?outcome, "reconciled");
                Ok(Some(outcome))
            }
            Err(e) => {
                tracing::error!(path, error = %e, "reconcile failed");
                Err(e)
            }
        }
    }

    /// Allocate a handle for a directory listing session
    pub fn opendir(&self, path: &str) -> Result<u64, FsError> {
        let mut state = self.gate.enter();
        match VirtualPath::classify(path) {
            VirtualPath::Root | VirtualPath::Database(_) => {}
            VirtualPath::Table { .. } => {
                return Err(io::Error::from_raw_os_error(libc::ENOTDIR).into())
            }
            _ => return Err(FsError::NotFound(path.to_string())),
        }

        let handle = state.dir_handles.acquire();
        state.dir_handles.set_string(handle, path.to_string());
        tracing::debug!(path, handle, "opendir");
        Ok(handle)
    }

    /// Build the listing of a directory and keep it under `handle`
    pub fn readdir(&self, path: &str, handle: u64) -> Result<Vec<String>, FsError> {
        let mut state = self.gate.enter();
        if state.dir_handles.string(handle) != Some(path) {
            return Err(FsError::BadHandle(handle));
        }

        let names = match VirtualPath::classify(path) {
            VirtualPath::Root => listing::list_root(self.engine.as_ref(), &self.store)?,
            VirtualPath::Database(db) => {
                listing::list_database(self.engine.as_ref(), &self.store, &db)?
            }
            _ => return Err(FsError::NotFound(path.to_string())),
        };

        state.dir_handles.set_listing(handle, names.clone());
        Ok(names)
    }

    /// The listing stored under a directory handle, if any
    pub fn listing(&self, handle: u64) -> Option<Vec<String>> {
        let state = self.gate.enter();
        state.dir_handles.listing(handle).map(<[String]>::to_vec)
    }

    pub fn releasedir(&self, handle: u64) -> Result<(), FsError> {
        let mut state = self.gate.enter();
        if state.dir_handles.release(handle) {
            Ok(())
        } else {
            Err(FsError::BadHandle(handle))
        }
    }

    pub fn fsyncdir(&self, handle: u64) -> Result<(), FsError> {
        let state = self.gate.enter();
        if state.dir_handles.in_use(handle) {
            Ok(())
        } else {
            Err(FsError::BadHandle(handle))
        }
    }

    /// List the root once so every database has a mirror directory
    pub fn init(&self) -> Result<(), FsError> {
        let _state = self.gate.enter();
        let databases = listing::list_root(self.engine.as_ref(), &self.store)?;
        tracing::info!(databases = databases.len(), "filesystem initialized");
        Ok(())
    }

    /// Close the engine and delete the mirror tree
    pub fn destroy(&self) {
        let mut state = self.gate.enter();
        self.files.write().clear();
        self.engine.close();

        if let Some(dir) = state.mirror_dir.take() {
            let path = dir.path().to_path_buf();
            match dir.close() {
                Ok(()) => tracing::info!(mirror = %path.display(), "removed mirror directory"),
                Err(e) => tracing::error!(mirror = %path.display(), error = %e, "failed to remove mirror directory"),
            }
        }
    }
}
