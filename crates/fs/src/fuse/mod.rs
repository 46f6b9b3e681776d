//! FUSE integration
//!
//! [`SqlTextFuse`] implements [`fuser::Filesystem`] by resolving inode
//! numbers to virtual paths through an [`InodeTable`] and delegating every
//! call to the path-addressed [`TextFs`] core. Errors come back as
//! [`FsError`](crate::FsError) and are replied with their errno.

mod attr;
mod inode_table;

pub use inode_table::InodeTable;

use std::ffi::OsStr;
use std::path::Path;
use std::time::{Duration, SystemTime};

use fuser::{
    FileType, Filesystem, KernelConfig, MountOption, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request,
    TimeOrNow,
};

use crate::text_fs::path::{self as vpath, VirtualPath};
use crate::TextFs;
use attr::{file_attr, resolve_time};

/// Attribute and entry cache lifetime handed to the kernel
const TTL: Duration = Duration::from_secs(1);

const FS_NAME: &str = "sql2textfs";

pub struct SqlTextFuse {
    core: TextFs,
    inodes: InodeTable,
}

impl SqlTextFuse {
    pub fn new(core: TextFs) -> Self {
        Self {
            core,
            inodes: InodeTable::new(),
        }
    }

    pub fn core(&self) -> &TextFs {
        &self.core
    }

    fn path(&self, ino: u64) -> Result<String, i32> {
        self.inodes
            .get_path(ino)
            .map(str::to_string)
            .ok_or(libc::ENOENT)
    }

    fn child(&self, parent: u64, name: &OsStr) -> Result<String, i32> {
        let name = name.to_str().ok_or(libc::EINVAL)?;
        Ok(vpath::join(&self.path(parent)?, name))
    }

    /// Stat a path and register it in the inode table
    fn entry(&mut self, path: &str) -> Result<fuser::FileAttr, i32> {
        let meta = self.core.getattr(path).map_err(|e| e.errno())?;
        let ino = self.inodes.get_or_create(path);
        Ok(file_attr(&meta, ino))
    }
}

impl Filesystem for SqlTextFuse {
    fn init(&mut self, _req: &Request, _config: &mut KernelConfig) -> Result<(), libc::c_int> {
        self.core.init().map_err(|e| {
            tracing::error!(error = %e, "init failed");
            e.errno()
        })
    }

    fn destroy(&mut self) {
        self.core.destroy();
    }

    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let result = self.child(parent, name).and_then(|p| self.entry(&p));
        match result {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(errno) => reply.error(errno),
        }
    }

    fn getattr(&mut self, _req: &Request, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let result = self.path(ino).and_then(|p| {
            let meta = self.core.getattr(&p).map_err(|e| e.errno())?;
            Ok(file_attr(&meta, ino))
        });
        match result {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(errno) => reply.error(errno),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        // ownership and permission changes are not supported
        if mode.is_some() || uid.is_some() || gid.is_some() {
            reply.error(libc::ENOSYS);
            return;
        }

        let result = self.path(ino).and_then(|p| {
            if let Some(size) = size {
                self.core.truncate(&p, size).map_err(|e| e.errno())?;
            }
            let (atime, mtime) = (resolve_time(atime), resolve_time(mtime));
            if atime.is_some() || mtime.is_some() {
                self.core.utimens(&p, atime, mtime).map_err(|e| e.errno())?;
            }
            let meta = self.core.getattr(&p).map_err(|e| e.errno())?;
            Ok(file_attr(&meta, ino))
        });
        match result {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(errno) => reply.error(errno),
        }
    }

    fn mknod(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        rdev: u32,
        reply: ReplyEntry,
    ) {
        let result = self.child(parent, name).and_then(|p| {
            self.core.mknod(&p, mode, rdev).map_err(|e| e.errno())?;
            self.entry(&p)
        });
        match result {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(errno) => reply.error(errno),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let result = self.child(parent, name).and_then(|p| {
            self.core.mkdir(&p).map_err(|e| e.errno())?;
            self.entry(&p)
        });
        match result {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(errno) => reply.error(errno),
        }
    }

    fn unlink(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let result = self.child(parent, name).and_then(|p| {
            self.core.unlink(&p).map_err(|e| e.errno())?;
            self.inodes.remove_by_path(&p);
            Ok(())
        });
        match result {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }

    fn rmdir(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let result = self.child(parent, name).and_then(|p| {
            self.core.rmdir(&p).map_err(|e| e.errno())?;
            self.inodes.remove_by_path(&p);
            Ok(())
        });
        match result {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }

    fn rename(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
        reply: ReplyEmpty,
    ) {
        if flags != 0 {
            // RENAME_NOREPLACE / RENAME_EXCHANGE
            reply.error(libc::EINVAL);
            return;
        }

        let result = self.child(parent, name).and_then(|from| {
            let to = self.child(newparent, newname)?;
            self.core.rename(&from, &to).map_err(|e| e.errno())?;
            self.inodes.rename(&from, &to);
            Ok(())
        });
        match result {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }

    fn open(&mut self, _req: &Request, ino: u64, flags: i32, reply: ReplyOpen) {
        let result = self
            .path(ino)
            .and_then(|p| self.core.open(&p, flags).map_err(|e| e.errno()));
        match result {
            Ok(fh) => reply.opened(fh, 0),
            Err(errno) => reply.error(errno),
        }
    }

    fn read(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Ok(offset) = u64::try_from(offset) else {
            reply.error(libc::EINVAL);
            return;
        };
        match self.core.read(fh, offset, size as usize) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn write(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let Ok(offset) = u64::try_from(offset) else {
            reply.error(libc::EINVAL);
            return;
        };
        match self.core.write(fh, offset, data) {
            Ok(n) => reply.written(n as u32),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn flush(&mut self, _req: &Request, _ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        match self.core.flush(fh) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn release(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        // the inode may already be gone if the file was unlinked while open
        match self.core.release(fh) {
            Ok(_) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn fsync(&mut self, _req: &Request, _ino: u64, fh: u64, datasync: bool, reply: ReplyEmpty) {
        match self.core.fsync(fh, datasync) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn opendir(&mut self, _req: &Request, ino: u64, _flags: i32, reply: ReplyOpen) {
        let result = self
            .path(ino)
            .and_then(|p| self.core.opendir(&p).map_err(|e| e.errno()));
        match result {
            Ok(handle) => reply.opened(handle, 0),
            Err(errno) => reply.error(errno),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request,
        ino: u64,
        fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let path = match self.path(ino) {
            Ok(p) => p,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };

        // build the listing once per session, then page through it
        let names = match self.core.listing(fh) {
            Some(names) if offset > 0 => names,
            _ => match self.core.readdir(&path, fh) {
                Ok(names) => names,
                Err(e) => {
                    reply.error(e.errno());
                    return;
                }
            },
        };

        let child_kind = match VirtualPath::classify(&path) {
            VirtualPath::Root => FileType::Directory,
            _ => FileType::RegularFile,
        };
        let parent_ino = self.inodes.get_or_create(&parent_of(&path));

        let mut entries = vec![
            (ino, FileType::Directory, ".".to_string()),
            (parent_ino, FileType::Directory, "..".to_string()),
        ];
        for name in names {
            let child = self.inodes.get_or_create(&vpath::join(&path, &name));
            entries.push((child, child_kind, name));
        }

        for (i, (child, kind, name)) in entries.into_iter().enumerate().skip(offset as usize) {
            if reply.add(child, (i + 1) as i64, kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn releasedir(&mut self, _req: &Request, _ino: u64, fh: u64, _flags: i32, reply: ReplyEmpty) {
        match self.core.releasedir(fh) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn fsyncdir(&mut self, _req: &Request, _ino: u64, fh: u64, _datasync: bool, reply: ReplyEmpty) {
        match self.core.fsyncdir(fh) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn statfs(&mut self, _req: &Request, ino: u64, reply: ReplyStatfs) {
        let result = self
            .path(ino)
            .and_then(|p| self.core.statfs(&p).map_err(|e| e.errno()));
        match result {
            Ok(st) => reply.statfs(
                st.blocks, st.bfree, st.bavail, st.files, st.ffree, st.bsize, st.namelen,
                st.frsize,
            ),
            Err(errno) => reply.error(errno),
        }
    }

    fn access(&mut self, _req: &Request, ino: u64, mask: i32, reply: ReplyEmpty) {
        let result = self
            .path(ino)
            .and_then(|p| self.core.access(&p, mask).map_err(|e| e.errno()));
        match result {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }

    fn create(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        let result = self.child(parent, name).and_then(|p| {
            let fh = self.core.create(&p, mode, flags).map_err(|e| e.errno())?;
            Ok((self.entry(&p)?, fh))
        });
        match result {
            Ok((attr, fh)) => reply.created(&TTL, &attr, 0, fh, 0),
            Err(errno) => reply.error(errno),
        }
    }
}

fn parent_of(path: &str) -> String {
    match path.trim_end_matches('/').rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(pos) => path[..pos].to_string(),
    }
}

/// Translate `-o` strings into fuser mount options
pub fn mount_options(raw: &[String]) -> Vec<MountOption> {
    let mut options = vec![MountOption::FSName(FS_NAME.to_string())];
    for opt in raw {
        options.push(match opt.as_str() {
            "ro" => MountOption::RO,
            "rw" => MountOption::RW,
            "allow_other" => MountOption::AllowOther,
            "allow_root" => MountOption::AllowRoot,
            "auto_unmount" => MountOption::AutoUnmount,
            "default_permissions" => MountOption::DefaultPermissions,
            "dev" => MountOption::Dev,
            "nodev" => MountOption::NoDev,
            "suid" => MountOption::Suid,
            "nosuid" => MountOption::NoSuid,
            "exec" => MountOption::Exec,
            "noexec" => MountOption::NoExec,
            "atime" => MountOption::Atime,
            "noatime" => MountOption::NoAtime,
            "sync" => MountOption::Sync,
            "async" => MountOption::Async,
            other => match other.strip_prefix("fsname=") {
                Some(name) => MountOption::FSName(name.to_string()),
                None => MountOption::CUSTOM(other.to_string()),
            },
        });
    }
    options
}

/// Mount `core` at `mountpoint` and serve requests until unmounted
pub fn mount(core: TextFs, mountpoint: &Path, raw_options: &[String]) -> std::io::Result<()> {
    let options = mount_options(raw_options);
    tracing::info!(mountpoint = %mountpoint.display(), ?options, "starting FUSE session");
    fuser::mount2(SqlTextFuse::new(core), mountpoint, &options)
}
