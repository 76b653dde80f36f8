//! Tree Engine Error Types
//!
//! Every engine operation fails with a [`TreeError`]. Retryable kinds
//! (`PathConflict`, `StorageUnavailable`, `DeadlineExceeded`) are told apart
//! from fatal ones so the request layer only retries where it is safe, and
//! [`ErrorClass`] carries the mapping onto user-visible responses.

use crate::config::ConfigError;
use crate::db::{DatabaseError, PathError};
use crate::models::NodeId;
use std::time::Duration;
use thiserror::Error;

/// Tree engine errors
#[derive(Error, Debug)]
pub enum TreeError {
    /// `create_root` with an owner that does not resolve
    #[error("Invalid owner: {owner_ref}")]
    InvalidOwner { owner_ref: String },

    /// `add_child` with a parent that does not exist
    #[error("Parent node not found: {parent_id}")]
    ParentNotFound { parent_id: NodeId },

    /// Rating, read, or delete on a missing node
    #[error("Node not found: {id}")]
    NodeNotFound { id: NodeId },

    /// Concurrent writers collided on a path segment
    #[error("Path conflict: {context}")]
    PathConflict { context: String },

    /// A parent ran out of segment positions; the segment width is too small
    #[error("Segment overflow: position {position} exceeds capacity {capacity}")]
    SegmentOverflow { position: u64, capacity: u64 },

    /// Transport or transaction failure
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[source] DatabaseError),

    /// The caller's deadline elapsed; storage was rolled back
    #[error("Deadline of {timeout:?} exceeded")]
    DeadlineExceeded { timeout: Duration },

    /// A stored path is malformed
    #[error("Corrupt path: {0}")]
    CorruptPath(PathError),

    /// Payload could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration rejected at startup
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// How the request layer should surface an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// "not found"
    NotFound,
    /// "bad request"
    BadRequest,
    /// Transient failure, retry with backoff
    Transient,
    /// Misconfiguration or corruption, do not retry
    Fatal,
}

impl TreeError {
    /// Create an invalid owner error
    pub fn invalid_owner(owner_ref: impl Into<String>) -> Self {
        Self::InvalidOwner {
            owner_ref: owner_ref.into(),
        }
    }

    /// Create a parent not found error
    pub fn parent_not_found(parent_id: NodeId) -> Self {
        Self::ParentNotFound { parent_id }
    }

    /// Create a node not found error
    pub fn node_not_found(id: NodeId) -> Self {
        Self::NodeNotFound { id }
    }

    /// Create a path conflict error
    pub fn path_conflict(context: impl Into<String>) -> Self {
        Self::PathConflict {
            context: context.into(),
        }
    }

    /// Create a storage unavailable error with context
    pub fn storage(context: impl Into<String>) -> Self {
        Self::StorageUnavailable(DatabaseError::statement(context))
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Whether retrying the same call may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TreeError::PathConflict { .. }
                | TreeError::StorageUnavailable(_)
                | TreeError::DeadlineExceeded { .. }
        )
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            TreeError::ParentNotFound { .. } | TreeError::NodeNotFound { .. } => {
                ErrorClass::NotFound
            }
            TreeError::InvalidOwner { .. } => ErrorClass::BadRequest,
            TreeError::PathConflict { .. }
            | TreeError::StorageUnavailable(_)
            | TreeError::DeadlineExceeded { .. } => ErrorClass::Transient,
            TreeError::SegmentOverflow { .. }
            | TreeError::CorruptPath(_)
            | TreeError::Serialization(_)
            | TreeError::Config(_) => ErrorClass::Fatal,
        }
    }
}

impl From<DatabaseError> for TreeError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::Config(config) => TreeError::Config(config),
            err if err.is_unique_violation() => TreeError::path_conflict(err.to_string()),
            err => TreeError::StorageUnavailable(err),
        }
    }
}

impl From<libsql::Error> for TreeError {
    fn from(err: libsql::Error) -> Self {
        TreeError::from(DatabaseError::Libsql(err))
    }
}

impl From<PathError> for TreeError {
    fn from(err: PathError) -> Self {
        match err {
            PathError::SegmentOverflow { position, capacity } => {
                TreeError::SegmentOverflow { position, capacity }
            }
            other => TreeError::CorruptPath(other),
        }
    }
}

impl From<serde_json::Error> for TreeError {
    fn from(err: serde_json::Error) -> Self {
        TreeError::Serialization(err.to_string())
    }
}

pub type TreeResult<T> = Result<T, TreeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(TreeError::path_conflict("0001").is_retryable());
        assert!(TreeError::storage("disk I/O error").is_retryable());
        assert!(TreeError::DeadlineExceeded {
            timeout: Duration::from_millis(5)
        }
        .is_retryable());

        assert!(!TreeError::node_not_found(1).is_retryable());
        assert!(!TreeError::SegmentOverflow {
            position: 36,
            capacity: 36
        }
        .is_retryable());
    }

    #[test]
    fn test_error_classes() {
        assert_eq!(TreeError::parent_not_found(9).class(), ErrorClass::NotFound);
        assert_eq!(TreeError::node_not_found(9).class(), ErrorClass::NotFound);
        assert_eq!(
            TreeError::invalid_owner("post-0").class(),
            ErrorClass::BadRequest
        );
        assert_eq!(
            TreeError::path_conflict("x").class(),
            ErrorClass::Transient
        );
        assert_eq!(
            TreeError::SegmentOverflow {
                position: 1,
                capacity: 1
            }
            .class(),
            ErrorClass::Fatal
        );
    }

    #[test]
    fn test_unique_violation_becomes_path_conflict() {
        let db_err = DatabaseError::statement(
            "Failed to insert node: UNIQUE constraint failed: tree_nodes.path",
        );
        assert!(matches!(
            TreeError::from(db_err),
            TreeError::PathConflict { .. }
        ));

        let db_err = DatabaseError::statement("database is locked");
        assert!(matches!(
            TreeError::from(db_err),
            TreeError::StorageUnavailable(_)
        ));
    }

    #[test]
    fn test_path_error_mapping() {
        let overflow = PathError::SegmentOverflow {
            position: 40,
            capacity: 36,
        };
        assert!(matches!(
            TreeError::from(overflow),
            TreeError::SegmentOverflow {
                position: 40,
                capacity: 36
            }
        ));
        assert!(matches!(
            TreeError::from(PathError::Empty),
            TreeError::CorruptPath(PathError::Empty)
        ));
    }

    #[test]
    fn test_config_error_passes_through_database_error() {
        let db_err = DatabaseError::from(ConfigError::SegmentWidthMismatch {
            stored: 4,
            configured: 6,
        });
        assert!(matches!(
            TreeError::from(db_err),
            TreeError::Config(ConfigError::SegmentWidthMismatch { .. })
        ));
    }
}
