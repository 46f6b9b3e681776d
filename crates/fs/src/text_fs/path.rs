//! Classification of virtual paths
//!
//! The mount has a fixed two-level shape: databases at the top, tables
//! directly inside them. Baseline snapshots live next to their table under
//! the same name plus [`CLONE_SUFFIX`] and are never surfaced as tables.

/// Suffix appended to a table's mirror name to form its baseline snapshot
pub const CLONE_SUFFIX: &str = ".o";

/// What a virtual path denotes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VirtualPath {
    Root,
    Database(String),
    Table { db: String, table: String },
    /// A baseline snapshot or anything else carrying the reserved suffix
    Artifact,
    /// Nested or otherwise unrecognised shapes, handled as plain pass-through
    Other,
}

impl VirtualPath {
    pub fn classify(path: &str) -> Self {
        let trimmed = path.trim_end_matches('/');
        if trimmed.is_empty() {
            return VirtualPath::Root;
        }

        let Some(rest) = trimmed.strip_prefix('/') else {
            return VirtualPath::Other;
        };

        let segments: Vec<&str> = rest.split('/').collect();
        if segments.iter().any(|s| s.is_empty() || *s == "." || *s == "..") {
            return VirtualPath::Other;
        }
        if segments
            .last()
            .is_some_and(|s| s.ends_with(CLONE_SUFFIX))
        {
            return VirtualPath::Artifact;
        }

        match segments.as_slice() {
            [db] => VirtualPath::Database(db.to_string()),
            [db, table] => VirtualPath::Table {
                db: db.to_string(),
                table: table.to_string(),
            },
            _ => VirtualPath::Other,
        }
    }

    /// The `(db, table)` pair when this is a table path
    pub fn table(&self) -> Option<(&str, &str)> {
        match self {
            VirtualPath::Table { db, table } => Some((db, table)),
            _ => None,
        }
    }
}

/// Join a parent virtual path and a child name
pub fn join(parent: &str, name: &str) -> String {
    if parent == "/" || parent.is_empty() {
        format!("/{name}")
    } else {
        format!("{}/{name}", parent.trim_end_matches('/'))
    }
}
