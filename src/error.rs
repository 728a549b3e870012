//! Error types shared by every datastore operation.

use std::path::PathBuf;

/// Result type alias for datastore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Everything a datastore operation can fail with.
///
/// `NotFound` is kept apart from real failures so callers can tell an absent
/// row from a broken database.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid datastore path: {0}")]
    InvalidPath(String),

    #[error("datastore at {} is not open", .0.display())]
    NotOpen(PathBuf),

    #[error("no row in `{table}` matches the given primary key")]
    NotFound { table: String },

    #[error("table `{table}` has no column `{column}`")]
    UnknownColumn { table: String, column: String },

    #[error("table `{table}` has {expected} columns but the entity produced {actual} values")]
    ColumnMismatch {
        table: String,
        expected: usize,
        actual: usize,
    },

    #[error("invalid table definition: {0}")]
    InvalidSchema(String),

    #[error("table `{0}` has no primary key")]
    MissingPrimaryKey(String),

    #[error("batch aborted at item {index}: {source}")]
    Batch {
        index: usize,
        #[source]
        source: Box<Error>,
    },

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("blocking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("connection lock poisoned")]
    Poisoned,
}

impl Error {
    /// True when the error only says that no matching row existed.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}
