use engine::EngineError;

/// Errors produced by filesystem operations
///
/// Every variant maps onto an errno that is handed back to the kernel; see
/// [`FsError::errno`].
#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("operation not permitted: {0}")]
    NotPermitted(String),
    #[error("already exists: {0}")]
    Exists(String),
    #[error("cannot move {from} to {to} across databases")]
    CrossDatabase { from: String, to: String },
    #[error("unsupported operation: {0}")]
    Unsupported(String),
    #[error("bad handle: {0}")]
    BadHandle(u64),
    #[error("nothing to create: {0} has no header line")]
    NothingToCreate(String),
    #[error("header of {0} was edited; schema changes are not supported")]
    SchemaEdit(String),
    #[error("diff failed: {0}")]
    Diff(String),
}

impl FsError {
    /// The errno reported to the kernel for this error
    pub fn errno(&self) -> i32 {
        match self {
            FsError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
            FsError::Engine(e) => match e {
                EngineError::NoSuchDatabase(_) | EngineError::NoSuchTable(..) => libc::ENOENT,
                EngineError::DatabaseExists(_) => libc::EEXIST,
                EngineError::DatabaseNotEmpty(_) => libc::ENOTEMPTY,
                EngineError::InvalidName(_) => libc::EINVAL,
                _ => libc::EIO,
            },
            FsError::NotFound(_) => libc::ENOENT,
            FsError::NotPermitted(_) => libc::EPERM,
            FsError::Exists(_) => libc::EEXIST,
            FsError::CrossDatabase { .. } => libc::EXDEV,
            FsError::Unsupported(_) => libc::ENOTSUP,
            FsError::BadHandle(_) => libc::EBADF,
            FsError::NothingToCreate(_) | FsError::SchemaEdit(_) | FsError::Diff(_) => libc::EIO,
        }
    }
}
