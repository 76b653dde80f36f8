//! Storage errors for the tree database
//!
//! Everything that can go wrong below the engine: opening the database file,
//! creating the tree schema, and running statements against `tree_nodes`,
//! `owners`, or `tree_meta`. `TreeError` decides which of these a caller may
//! retry; this layer only reports them.

use crate::config::ConfigError;
use std::path::PathBuf;
use thiserror::Error;

/// Failure in the libsql storage layer
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// The database file could not be opened
    #[error("Cannot open tree database at {path}: {source}")]
    Open {
        path: PathBuf,
        source: libsql::Error,
    },

    /// Tree schema or metadata could not be created or read
    #[error("Tree schema setup failed: {0}")]
    Schema(String),

    /// Stored metadata disagrees with the configuration (e.g. segment width)
    #[error("Stored metadata rejects configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("No permission to create tree database at {path}")]
    PermissionDenied { path: PathBuf },

    /// Parent directory of the database file could not be created
    #[error("Cannot create database directory: {0}")]
    CreateDir(#[from] std::io::Error),

    /// Raw libsql failure (busy, I/O, constraint)
    #[error("libsql: {0}")]
    Libsql(#[from] libsql::Error),

    /// A tree statement failed; `context` names the statement and cause
    #[error("Tree statement failed: {context}")]
    Statement { context: String },
}

impl DatabaseError {
    pub fn open(path: PathBuf, source: libsql::Error) -> Self {
        Self::Open { path, source }
    }

    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    pub fn permission_denied(path: PathBuf) -> Self {
        Self::PermissionDenied { path }
    }

    pub fn statement(context: impl Into<String>) -> Self {
        Self::Statement {
            context: context.into(),
        }
    }

    /// True when the `UNIQUE(path)` index (or any UNIQUE index) rejected a write
    ///
    /// libsql surfaces SQLite constraint failures only through the message.
    pub fn is_unique_violation(&self) -> bool {
        self.to_string().contains("UNIQUE constraint failed")
    }
}
