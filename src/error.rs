//! Error types for the data-access layer.
//!
//! Driver failures are caught at the [`Connection`](crate::database::Connection)
//! and query builder boundary and re-raised as one of these variants, so
//! callers never see a raw `rusqlite::Error` escaping on its own.

use std::path::PathBuf;

use crate::database::Value;

/// Result alias used throughout the database layer.
pub type Result<T> = std::result::Result<T, DbError>;

/// Errors that can occur while talking to the database.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// The native handle could not be created.
    #[error("could not connect to the database ({dsn}): {reason}")]
    Connection {
        /// Credential-free DSN that was attempted.
        dsn: String,
        /// Driver-supplied cause.
        reason: String,
    },

    /// No database is configured, the connection is inert.
    #[error("database connection is not available: no database configured")]
    NoConnection,

    /// A statement failed to prepare or execute.
    #[error("query execution failed: {source}; SQL: {sql}; bindings: {bindings:?}")]
    QueryExecution {
        /// The compiled SQL.
        sql: String,
        /// Positional bindings, in placeholder order.
        bindings: Vec<Value>,
        /// The underlying SQLite error.
        #[source]
        source: rusqlite::Error,
    },

    /// The query cannot be compiled into valid SQL.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// DDL compilation or schema introspection failed.
    #[error("schema error: {0}")]
    Schema(String),

    /// A migration referenced by name does not exist.
    #[error("migration not found: {0}")]
    MigrationNotFound(String),

    /// A migration unit does not satisfy the up/down contract.
    #[error("migration '{name}' is invalid: {reason}")]
    MigrationUnitInvalid {
        /// Stable migration identifier.
        name: String,
        /// What is wrong with the unit.
        reason: String,
    },

    /// A relation name is not registered on the model.
    #[error("relation '{relation}' is not defined on model {model}")]
    RelationContract {
        /// Model basename.
        model: String,
        /// Requested relation name.
        relation: String,
    },

    /// `find_or_fail` did not match any row.
    #[error("no {model} found for key {key}")]
    ModelNotFound {
        /// Model basename.
        model: String,
        /// Primary key value that was looked up.
        key: Value,
    },

    /// An attribute could not be read as the requested type.
    #[error("attribute '{name}': {reason}")]
    Attribute {
        /// Attribute name.
        name: String,
        /// Conversion failure.
        reason: String,
    },

    /// Filesystem access failed.
    #[error("i/o error on {}: {source}", path.display())]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl DbError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DbError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error came from executing a statement.
    pub fn is_query_error(&self) -> bool {
        matches!(self, DbError::QueryExecution { .. })
    }
}
