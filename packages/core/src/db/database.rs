//! Database Connection Management
//!
//! Core database connection and initialization using libsql.
//!
//! # Architecture
//!
//! - **Path-agnostic**: Accepts any valid PathBuf
//! - **WAL mode**: Readers never block the single writer
//! - **Connection per operation**: Every engine call opens its own connection
//!   with a busy timeout, so a dropped call drops its connection and SQLite
//!   rolls back whatever transaction it had open
//! - **Width pinning**: The segment width is stored on first open and checked
//!   on every later open
//!
//! # Schema
//!
//! - `tree_meta`: engine metadata (`segment_width`)
//! - `owners`: registered owner references
//! - `tree_nodes`: one row per tree member, `path` unique
//!
//! Indexes: `(owner_ref, depth)` for owner root lookups, `(depth, path)` for
//! sibling and root scans, `parent_id` for lookups by parent.

use crate::config::{ConfigError, TreeConfig};
use crate::db::error::DatabaseError;
use libsql::{Builder, Connection, Database};
use std::path::PathBuf;
use std::sync::Arc;

/// Columns selected for every node read, in `row_to_node` order
pub(crate) const NODE_COLUMNS: &str =
    "id, parent_id, path, depth, numchild, rating, rank_key, owner_ref, payload, created_at";

/// Database service for managing libsql connection and schema
///
/// # Examples
///
/// ```no_run
/// use threadtree_core::config::TreeConfig;
/// use threadtree_core::db::DatabaseService;
/// use std::path::PathBuf;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let db_path = PathBuf::from("./data/threads.db");
///     let db_service = DatabaseService::new(db_path, &TreeConfig::default()).await?;
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct DatabaseService {
    /// libsql database handle (wrapped in Arc for sharing)
    pub db: Arc<Database>,

    /// Path to the database file
    pub db_path: PathBuf,

    busy_timeout_ms: u32,
}

impl DatabaseService {
    /// Open (or create) the database and initialize its schema
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if:
    /// - Parent directory cannot be created
    /// - Database connection fails
    /// - Schema initialization fails
    /// - The database was created with a different segment width
    pub async fn new(db_path: PathBuf, config: &TreeConfig) -> Result<Self, DatabaseError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    if e.kind() == std::io::ErrorKind::PermissionDenied {
                        DatabaseError::permission_denied(db_path.clone())
                    } else {
                        DatabaseError::CreateDir(e)
                    }
                })?;
            }
        }

        let db = Builder::new_local(&db_path)
            .build()
            .await
            .map_err(|e| DatabaseError::open(db_path.clone(), e))?;

        let service = Self {
            db: Arc::new(db),
            db_path,
            busy_timeout_ms: config.busy_timeout_ms,
        };

        service.initialize_schema(config.segment_width).await?;

        tracing::debug!(
            "Opened tree database at {:?} (segment_width = {})",
            service.db_path,
            config.segment_width
        );

        Ok(service)
    }

    /// Execute a PRAGMA statement
    ///
    /// PRAGMA statements return rows, so we must use query() instead of execute().
    async fn execute_pragma(&self, conn: &Connection, pragma: &str) -> Result<(), DatabaseError> {
        let mut stmt = conn.prepare(pragma).await.map_err(|e| {
            DatabaseError::statement(format!("Failed to execute '{}': {}", pragma, e))
        })?;
        let mut rows = stmt.query(()).await.map_err(|e| {
            DatabaseError::statement(format!("Failed to execute '{}': {}", pragma, e))
        })?;
        // Step once so the pragma takes effect
        rows.next().await.map_err(|e| {
            DatabaseError::statement(format!("Failed to execute '{}': {}", pragma, e))
        })?;
        Ok(())
    }

    /// Create tables and indexes (idempotent) and pin the segment width
    async fn initialize_schema(&self, segment_width: usize) -> Result<(), DatabaseError> {
        let conn = self.connect_with_timeout().await?;

        self.execute_pragma(&conn, "PRAGMA journal_mode = WAL")
            .await?;

        let statements = [
            (
                "tree_meta",
                "CREATE TABLE IF NOT EXISTS tree_meta (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                )",
            ),
            (
                "owners",
                "CREATE TABLE IF NOT EXISTS owners (
                    owner_ref TEXT PRIMARY KEY,
                    created_at TEXT NOT NULL
                )",
            ),
            (
                "tree_nodes",
                "CREATE TABLE IF NOT EXISTS tree_nodes (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    -- Lookup only; ancestry is derived from path
                    parent_id INTEGER,
                    path TEXT NOT NULL UNIQUE,
                    depth INTEGER NOT NULL,
                    numchild INTEGER NOT NULL DEFAULT 0,
                    rating INTEGER NOT NULL DEFAULT 0,
                    rank_key INTEGER NOT NULL DEFAULT 0,
                    owner_ref TEXT NOT NULL,
                    payload TEXT NOT NULL,
                    created_at TEXT NOT NULL
                )",
            ),
            (
                "idx_tree_nodes_owner_depth",
                "CREATE INDEX IF NOT EXISTS idx_tree_nodes_owner_depth ON tree_nodes(owner_ref, depth)",
            ),
            (
                // Sibling and root scans: depth equality plus a path range
                "idx_tree_nodes_depth_path",
                "CREATE INDEX IF NOT EXISTS idx_tree_nodes_depth_path ON tree_nodes(depth, path)",
            ),
            (
                "idx_tree_nodes_parent",
                "CREATE INDEX IF NOT EXISTS idx_tree_nodes_parent ON tree_nodes(parent_id)",
            ),
        ];

        for (name, sql) in statements {
            conn.execute(sql, ()).await.map_err(|e| {
                DatabaseError::schema(format!("Failed to create '{}': {}", name, e))
            })?;
        }

        conn.execute(
            "INSERT OR IGNORE INTO tree_meta (key, value) VALUES ('segment_width', ?)",
            [segment_width.to_string()],
        )
        .await
        .map_err(|e| {
            DatabaseError::schema(format!("Failed to record segment width: {}", e))
        })?;

        let mut rows = conn
            .query("SELECT value FROM tree_meta WHERE key = 'segment_width'", ())
            .await
            .map_err(|e| {
                DatabaseError::schema(format!("Failed to read segment width: {}", e))
            })?;

        let stored: String = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => {
                return Err(DatabaseError::schema(
                    "segment width missing from tree_meta",
                ))
            }
        };

        let stored: usize = stored.parse().map_err(|_| {
            DatabaseError::schema(format!("Corrupt segment width '{}'", stored))
        })?;

        if stored != segment_width {
            return Err(ConfigError::SegmentWidthMismatch {
                stored,
                configured: segment_width,
            }
            .into());
        }

        Ok(())
    }

    /// Get a raw connection
    ///
    /// Prefer [`connect_with_timeout`](Self::connect_with_timeout) in async code.
    pub fn connect(&self) -> Result<Connection, DatabaseError> {
        self.db.connect().map_err(DatabaseError::Libsql)
    }

    /// Get a connection with the configured busy timeout
    ///
    /// Concurrent writers wait for the lock instead of failing immediately
    /// with `SQLITE_BUSY`.
    pub async fn connect_with_timeout(&self) -> Result<Connection, DatabaseError> {
        let conn = self.connect()?;
        self.execute_pragma(&conn, &format!("PRAGMA busy_timeout = {}", self.busy_timeout_ms))
            .await?;
        Ok(conn)
    }

    /// Start a write transaction that takes the database write lock up front
    ///
    /// `IMMEDIATE` serializes segment allocation across all writers, so two
    /// inserts under one parent never read the same "last sibling".
    pub async fn begin_immediate(&self, conn: &Connection) -> Result<(), DatabaseError> {
        conn.execute("BEGIN IMMEDIATE", ()).await.map_err(|e| {
            DatabaseError::statement(format!("Failed to begin transaction: {}", e))
        })?;
        Ok(())
    }

    pub async fn commit(&self, conn: &Connection) -> Result<(), DatabaseError> {
        if let Err(e) = conn.execute("COMMIT", ()).await {
            let _rollback = conn.execute("ROLLBACK", ()).await;
            return Err(DatabaseError::statement(format!(
                "Failed to commit transaction: {}",
                e
            )));
        }
        Ok(())
    }

    /// Roll back, logging rather than returning a failure to roll back
    pub async fn rollback(&self, conn: &Connection) {
        if let Err(e) = conn.execute("ROLLBACK", ()).await {
            tracing::warn!("Rollback failed: {}", e);
        }
    }
}
