/// Errors reported by a [`TableEngine`](crate::TableEngine)
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("no such database: {0}")]
    NoSuchDatabase(String),
    #[error("no such table: {0}/{1}")]
    NoSuchTable(String, String),
    #[error("database already exists: {0}")]
    DatabaseExists(String),
    #[error("database is not empty: {0}")]
    DatabaseNotEmpty(String),
    #[error("invalid name: {0:?}")]
    InvalidName(String),
    #[error("malformed header: {0}")]
    MalformedHeader(String),
    #[error("malformed row: {0}")]
    MalformedRow(String),
    #[error("no row matches: {0}")]
    NoMatchingRow(String),
    #[error("constraint violated: {0}")]
    Constraint(String),
    #[error("sql error: {0}")]
    Sql(#[from] sqlx::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// Whether the error means the engine cannot be used at all
    ///
    /// Fatal errors abort startup; everything else only fails the call that
    /// produced it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Config(_))
    }
}
