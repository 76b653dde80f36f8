//! Owner resolution
//!
//! The content entity that owns a comment tree (a post) lives outside the
//! engine. `create_root` only needs to know whether an owner reference
//! resolves, which is what [`OwnerResolver`] answers. [`OwnerRegistry`] is
//! the built-in implementation backed by the `owners` table.

use crate::db::DatabaseService;
use crate::services::error::TreeResult;
use async_trait::async_trait;
use chrono::Utc;
use libsql::Connection;
use std::sync::Arc;

/// Answers whether an owner reference names an existing content entity
#[async_trait]
pub trait OwnerResolver: Send + Sync {
    async fn owner_exists(&self, owner_ref: &str) -> TreeResult<bool>;
}

/// Owners recorded in the engine's own database
#[derive(Debug, Clone)]
pub struct OwnerRegistry {
    db: Arc<DatabaseService>,
}

impl OwnerRegistry {
    pub fn new(db: Arc<DatabaseService>) -> Self {
        Self { db }
    }

    /// Register an owner; registering twice is a no-op
    ///
    /// Returns `true` when the owner was newly added.
    pub async fn register(&self, owner_ref: &str) -> TreeResult<bool> {
        let conn = self.db.connect_with_timeout().await?;
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO owners (owner_ref, created_at) VALUES (?, ?)",
                (owner_ref, Utc::now().to_rfc3339()),
            )
            .await?;

        if inserted > 0 {
            tracing::debug!("Registered owner '{}'", owner_ref);
        }
        Ok(inserted > 0)
    }

    /// Remove an owner record; its nodes are removed separately
    pub async fn unregister(&self, owner_ref: &str) -> TreeResult<bool> {
        let conn = self.db.connect_with_timeout().await?;
        Self::unregister_on(&conn, owner_ref).await
    }

    /// Delete the owner record on `conn`, inside whatever transaction it holds
    pub(crate) async fn unregister_on(conn: &Connection, owner_ref: &str) -> TreeResult<bool> {
        let removed = conn
            .execute("DELETE FROM owners WHERE owner_ref = ?", [owner_ref])
            .await?;
        Ok(removed > 0)
    }
}

#[async_trait]
impl OwnerResolver for OwnerRegistry {
    async fn owner_exists(&self, owner_ref: &str) -> TreeResult<bool> {
        let conn = self.db.connect_with_timeout().await?;
        let mut rows = conn
            .query("SELECT 1 FROM owners WHERE owner_ref = ?", [owner_ref])
            .await?;
        Ok(rows.next().await?.is_some())
    }
}
