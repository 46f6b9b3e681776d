//! Host calls that never touch the engine

use std::ffi::CString;
use std::fs::OpenOptions;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::FsError;

/// Filesystem statistics of the host filesystem holding the mirror
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Statfs {
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub bsize: u32,
    pub namelen: u32,
    pub frsize: u32,
}

fn c_path(path: &Path) -> Result<CString, FsError> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| FsError::Io(io::Error::from_raw_os_error(libc::EINVAL)))
}

fn check(rc: libc::c_int) -> Result<(), FsError> {
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error().into())
    }
}

pub fn statfs(path: &Path) -> Result<Statfs, FsError> {
    let c = c_path(path)?;
    // SAFETY: statvfs is plain old data and fully written on success
    let mut st: libc::statvfs = unsafe { std::mem::zeroed() };
    check(unsafe { libc::statvfs(c.as_ptr(), &mut st) })?;

    Ok(Statfs {
        blocks: st.f_blocks as u64,
        bfree: st.f_bfree as u64,
        bavail: st.f_bavail as u64,
        files: st.f_files as u64,
        ffree: st.f_ffree as u64,
        bsize: st.f_bsize as u32,
        namelen: st.f_namemax as u32,
        frsize: st.f_frsize as u32,
    })
}

pub fn access(path: &Path, mask: i32) -> Result<(), FsError> {
    let c = c_path(path)?;
    check(unsafe { libc::access(c.as_ptr(), mask) })
}

/// Create a node: regular files exclusively, FIFOs with mkfifo, anything
/// else with mknod
pub fn mknod(path: &Path, mode: u32, rdev: u32) -> Result<(), FsError> {
    let perm = mode & 0o7777;
    let kind = mode & libc::S_IFMT as u32;

    if kind == libc::S_IFREG as u32 || kind == 0 {
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(perm)
            .open(path)?;
        return Ok(());
    }

    let c = c_path(path)?;
    if kind == libc::S_IFIFO as u32 {
        check(unsafe { libc::mkfifo(c.as_ptr(), perm as libc::mode_t) })
    } else {
        check(unsafe { libc::mknod(c.as_ptr(), mode as libc::mode_t, rdev as libc::dev_t) })
    }
}

pub fn truncate(path: &Path, size: u64) -> Result<(), FsError> {
    OpenOptions::new().write(true).open(path)?.set_len(size)?;
    Ok(())
}

fn timespec(time: Option<SystemTime>) -> libc::timespec {
    match time {
        None => libc::timespec {
            tv_sec: 0,
            tv_nsec: libc::UTIME_OMIT,
        },
        Some(t) => {
            let d = t.duration_since(UNIX_EPOCH).unwrap_or_default();
            libc::timespec {
                tv_sec: d.as_secs() as libc::time_t,
                tv_nsec: d.subsec_nanos() as libc::c_long,
            }
        }
    }
}

/// Set access and modification times; `None` leaves a time unchanged
pub fn utimens(
    path: &Path,
    atime: Option<SystemTime>,
    mtime: Option<SystemTime>,
) -> Result<(), FsError> {
    let c = c_path(path)?;
    let times = [timespec(atime), timespec(mtime)];
    check(unsafe {
        libc::utimensat(
            libc::AT_FDCWD,
            c.as_ptr(),
            times.as_ptr(),
            libc::AT_SYMLINK_NOFOLLOW,
        )
    })
}
