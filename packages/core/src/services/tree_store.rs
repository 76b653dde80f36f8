//! TreeStore - Materialized Path Tree Engine
//!
//! The only component allowed to write `path`, `depth`, `numchild`, or
//! `parent_id`. Every structural write runs in one `BEGIN IMMEDIATE`
//! transaction: it either commits the whole change or rolls all of it back.
//!
//! # Segment allocation
//!
//! - **Roots** are appended after the last existing root. Roots of all owners
//!   share one namespace and are ordered by creation only.
//! - **Children** go before the first sibling (in path order) whose rank key
//!   is strictly greater than the new child's, shifting that sibling and every
//!   later one a position to the right. With no such sibling the child is
//!   appended. Equal keys therefore keep insertion order.
//! - Gaps left by deletions stay in place until a parent (or the root
//!   namespace) runs out of positions. The next insert then compacts the
//!   existing siblings to positions `0..n` in their current order before
//!   allocating, so `SegmentOverflow` means the parent really is full.
//!
//! # Rating changes
//!
//! A rating change rewrites `rating` and `rank_key` only. Existing siblings
//! keep their paths, so after a rating change `ChildOrder::ByPath` and
//! `ChildOrder::ByRank` may disagree until [`TreeStore::resort_children`]
//! physically reorders them.
//!
//! # Re-pathing
//!
//! Moving a child's subtree to a new segment is done in two phases so the
//! `UNIQUE(path)` index never sees a transient collision: every affected
//! subtree is first staged under a `#` prefix (outside the path alphabet),
//! then each staged subtree is rewritten to its final prefix with a single
//! range update.

use crate::config::TreeConfig;
use crate::db::{DatabaseError, DatabaseService, PathCodec, TreeEvent, NODE_COLUMNS};
use crate::models::{ChildOrder, DeleteResult, Node, NodeId, RankKey, RatingDelta};
use crate::services::error::{TreeError, TreeResult};
use crate::services::owner_registry::{OwnerRegistry, OwnerResolver};
use chrono::{DateTime, Utc};
use libsql::params::IntoParams;
use libsql::{Connection, Row};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Prefix for subtrees parked during a re-path
const STAGING_PREFIX: &str = "#";

/// Materialized path tree store over libsql
pub struct TreeStore<P> {
    db: Arc<DatabaseService>,
    codec: PathCodec,
    owners: Arc<dyn OwnerResolver>,
    events: broadcast::Sender<TreeEvent>,
    _payload: PhantomData<fn() -> P>,
}

impl<P> Clone for TreeStore<P> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            codec: self.codec,
            owners: self.owners.clone(),
            events: self.events.clone(),
            _payload: PhantomData,
        }
    }
}

/// Index among `siblings` (path order) where a node with `new_key` is inserted
///
/// `None` means append after the last sibling.
pub(crate) fn insertion_index(siblings: &[RankKey], new_key: RankKey) -> Option<usize> {
    siblings.iter().position(|key| *key > new_key)
}

impl<P> TreeStore<P>
where
    P: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Create a store over an initialized database
    ///
    /// Fails with `TreeError::Config` if the configuration is invalid.
    pub fn new(
        db: Arc<DatabaseService>,
        config: &TreeConfig,
        owners: Arc<dyn OwnerResolver>,
    ) -> TreeResult<Self> {
        let codec = PathCodec::from_config(config)?;
        let (events, _) = broadcast::channel(config.event_capacity);

        Ok(Self {
            db,
            codec,
            owners,
            events,
            _payload: PhantomData,
        })
    }

    pub fn codec(&self) -> &PathCodec {
        &self.codec
    }

    /// Subscribe to events emitted after each committed mutation
    pub fn subscribe(&self) -> broadcast::Receiver<TreeEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: TreeEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    //
    // ROW CONVERSION
    //

    /// Convert a row selected with `NODE_COLUMNS` into a node
    fn row_to_node(&self, row: &Row) -> TreeResult<Node<P>> {
        let id: i64 = row.get(0)?;
        let parent_id: Option<i64> = row.get(1)?;
        let path: String = row.get(2)?;
        let depth: i64 = row.get(3)?;
        let numchild: i64 = row.get(4)?;
        let rating: i64 = row.get(5)?;
        let rank_key: i64 = row.get(6)?;
        let owner_ref: String = row.get(7)?;
        let payload_json: String = row.get(8)?;
        let created_at_str: String = row.get(9)?;

        self.codec.validate(&path)?;

        let depth = u32::try_from(depth)
            .map_err(|_| TreeError::storage(format!("Invalid depth {} on node {}", depth, id)))?;
        let numchild = u32::try_from(numchild).map_err(|_| {
            TreeError::storage(format!("Invalid numchild {} on node {}", numchild, id))
        })?;
        let created_at = DateTime::parse_from_rfc3339(&created_at_str)
            .map_err(|e| {
                TreeError::serialization(format!(
                    "Invalid created_at '{}' on node {}: {}",
                    created_at_str, id, e
                ))
            })?
            .with_timezone(&Utc);
        let payload: P = serde_json::from_str(&payload_json)?;

        Ok(Node {
            id,
            parent_id,
            path,
            depth,
            numchild,
            rating,
            rank_key: RankKey::from_stored(rank_key),
            owner_ref,
            payload,
            created_at,
        })
    }

    async fn fetch_all(
        &self,
        conn: &Connection,
        sql: &str,
        params: impl IntoParams,
    ) -> TreeResult<Vec<Node<P>>> {
        let mut rows = conn.query(sql, params).await?;
        let mut nodes = Vec::new();
        while let Some(row) = rows.next().await? {
            nodes.push(self.row_to_node(&row)?);
        }
        Ok(nodes)
    }

    async fn fetch_optional(
        &self,
        conn: &Connection,
        sql: &str,
        params: impl IntoParams,
    ) -> TreeResult<Option<Node<P>>> {
        let mut rows = conn.query(sql, params).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(self.row_to_node(&row)?)),
            None => Ok(None),
        }
    }

    async fn node_by_id(&self, conn: &Connection, id: NodeId) -> TreeResult<Option<Node<P>>> {
        let sql = format!("SELECT {} FROM tree_nodes WHERE id = ?", NODE_COLUMNS);
        self.fetch_optional(conn, &sql, [id]).await
    }

    async fn children_by_path(&self, conn: &Connection, parent: &Node<P>) -> TreeResult<Vec<Node<P>>> {
        let sql = format!(
            "SELECT {} FROM tree_nodes WHERE depth = ?3 AND path BETWEEN ?1 AND ?2 ORDER BY path",
            NODE_COLUMNS
        );
        self.fetch_all(
            conn,
            &sql,
            (
                parent.path.as_str(),
                PathCodec::subtree_upper_bound(&parent.path),
                i64::from(parent.depth) + 1,
            ),
        )
        .await
    }

    /// Commit on success, roll back on failure
    async fn finish<T>(&self, conn: &Connection, result: TreeResult<T>) -> TreeResult<T> {
        match result {
            Ok(value) => {
                self.db.commit(conn).await?;
                Ok(value)
            }
            Err(e) => {
                tracing::warn!("Rolling back tree transaction: {}", e);
                self.db.rollback(conn).await;
                Err(e)
            }
        }
    }

    async fn begin(&self) -> TreeResult<Connection> {
        let conn = self.db.connect_with_timeout().await?;
        self.db.begin_immediate(&conn).await?;
        Ok(conn)
    }

    //
    // STRUCTURAL WRITES
    //

    async fn insert_node(
        &self,
        conn: &Connection,
        parent_id: Option<NodeId>,
        path: &str,
        depth: u32,
        owner_ref: &str,
        payload_json: &str,
    ) -> TreeResult<NodeId> {
        let rating = 0i64;
        conn.execute(
            "INSERT INTO tree_nodes (parent_id, path, depth, numchild, rating, rank_key, owner_ref, payload, created_at)
             VALUES (?, ?, ?, 0, ?, ?, ?, ?, ?)",
            (
                parent_id,
                path,
                i64::from(depth),
                rating,
                RankKey::derive(rating).value(),
                owner_ref,
                payload_json,
                Utc::now().to_rfc3339(),
            ),
        )
        .await
        .map_err(|e| {
            DatabaseError::statement(format!(
                "Failed to insert node at '{}': {}",
                path, e
            ))
        })?;

        Ok(conn.last_insert_rowid())
    }

    /// Move child subtrees from their old prefix to a new one of equal length
    async fn repath(&self, conn: &Connection, moves: &[(String, String)]) -> TreeResult<()> {
        if moves.is_empty() {
            return Ok(());
        }

        for (old, _) in moves {
            conn.execute(
                "UPDATE tree_nodes SET path = ?1 || path WHERE path BETWEEN ?2 AND ?3",
                (STAGING_PREFIX, old.as_str(), PathCodec::subtree_upper_bound(old)),
            )
            .await?;
        }

        for (old, new) in moves {
            let staged = format!("{}{}", STAGING_PREFIX, old);
            // substr is 1-based; skip the staging prefix and the old prefix
            let suffix_start = (STAGING_PREFIX.len() + old.len() + 1) as i64;
            conn.execute(
                "UPDATE tree_nodes SET path = ?1 || substr(path, ?2) WHERE path BETWEEN ?3 AND ?4",
                (
                    new.as_str(),
                    suffix_start,
                    staged.as_str(),
                    PathCodec::subtree_upper_bound(&staged),
                ),
            )
            .await?;
        }

        tracing::debug!("Re-pathed {} subtree(s)", moves.len());
        Ok(())
    }

    /// Re-path `paths` (siblings, in their new order) to positions `0..n`
    ///
    /// Returns how many siblings changed segment.
    async fn compact(&self, conn: &Connection, parent_path: &str, paths: &[String]) -> TreeResult<usize> {
        let mut moves = Vec::new();
        for (position, path) in paths.iter().enumerate() {
            let target = self.codec.child_path(parent_path, position as u64)?;
            if target != *path {
                moves.push((path.clone(), target));
            }
        }
        self.repath(conn, &moves).await?;
        Ok(moves.len())
    }

    /// Whether the next allocation after `last_path` overflows while
    /// `count` siblings still leave free positions behind it
    fn needs_compaction(&self, last_path: Option<&str>, count: usize) -> TreeResult<bool> {
        let Some(last) = last_path else {
            return Ok(false);
        };
        let next = self.codec.position_of(last)? + 1;
        Ok(next >= self.codec.capacity() && (count as u64) < self.codec.capacity())
    }

    /// Create a new root for `owner_ref`
    ///
    /// # Errors
    ///
    /// - `InvalidOwner` if the owner does not resolve
    /// - `SegmentOverflow` if the root namespace is exhausted
    pub async fn create_root(&self, owner_ref: &str, payload: &P) -> TreeResult<Node<P>> {
        let payload_json = serde_json::to_string(payload)?;

        let conn = self.begin().await?;
        let result = self.create_root_tx(&conn, owner_ref, &payload_json).await;
        let node = self.finish(&conn, result).await?;

        tracing::info!("Created root {} for owner '{}'", node.id, owner_ref);
        self.emit(TreeEvent::NodeCreated {
            id: node.id,
            parent_id: None,
            owner_ref: node.owner_ref.clone(),
        });
        Ok(node)
    }

    async fn create_root_tx(
        &self,
        conn: &Connection,
        owner_ref: &str,
        payload_json: &str,
    ) -> TreeResult<Node<P>> {
        // Checked under the write lock so a concurrent owner removal cannot
        // commit between the check and the insert
        if !self.owners.owner_exists(owner_ref).await? {
            return Err(TreeError::invalid_owner(owner_ref));
        }

        let mut rows = conn
            .query(
                "SELECT path, (SELECT COUNT(*) FROM tree_nodes WHERE depth = 1)
                 FROM tree_nodes WHERE depth = 1 ORDER BY path DESC LIMIT 1",
                (),
            )
            .await?;
        let (last, count) = match rows.next().await? {
            Some(row) => {
                let last: String = row.get(0)?;
                let count: i64 = row.get(1)?;
                (Some(last), count as usize)
            }
            None => (None, 0),
        };
        drop(rows);

        let position = if self.needs_compaction(last.as_deref(), count)? {
            let roots = self.root_paths(conn).await?;
            let moved = self.compact(conn, "", &roots).await?;
            tracing::info!("Root namespace full; compacted {} root(s)", moved);
            roots.len() as u64
        } else {
            match last {
                Some(last) => self.codec.position_of(&last)? + 1,
                None => 0,
            }
        };

        let path = self.codec.root_path(position)?;
        tracing::debug!("Allocated root path '{}'", path);

        let id = self
            .insert_node(conn, None, &path, 1, owner_ref, payload_json)
            .await?;
        self.node_by_id(conn, id)
            .await?
            .ok_or_else(|| TreeError::storage(format!("Node {} missing after insert", id)))
    }

    async fn root_paths(&self, conn: &Connection) -> TreeResult<Vec<String>> {
        let mut rows = conn
            .query("SELECT path FROM tree_nodes WHERE depth = 1 ORDER BY path", ())
            .await?;
        let mut paths = Vec::new();
        while let Some(row) = rows.next().await? {
            paths.push(row.get::<String>(0)?);
        }
        Ok(paths)
    }

    /// Attach a new child under `parent_id`
    ///
    /// # Errors
    ///
    /// - `ParentNotFound` if the parent does not exist
    /// - `SegmentOverflow` if the parent has no free position left
    /// - `PathConflict` if a concurrent writer claimed the same path
    pub async fn add_child(&self, parent_id: NodeId, payload: &P) -> TreeResult<Node<P>> {
        self.add_child_checked(parent_id, None, payload).await
    }

    /// Attach a reply under a parent that must belong to `owner_ref`
    ///
    /// A parent owned by someone else is reported as `ParentNotFound`.
    pub async fn add_reply(
        &self,
        owner_ref: &str,
        parent_id: NodeId,
        payload: &P,
    ) -> TreeResult<Node<P>> {
        self.add_child_checked(parent_id, Some(owner_ref), payload)
            .await
    }

    async fn add_child_checked(
        &self,
        parent_id: NodeId,
        expected_owner: Option<&str>,
        payload: &P,
    ) -> TreeResult<Node<P>> {
        let payload_json = serde_json::to_string(payload)?;

        let conn = self.begin().await?;
        let result = self
            .add_child_tx(&conn, parent_id, expected_owner, &payload_json)
            .await;
        let node = self.finish(&conn, result).await?;

        tracing::info!(
            "Added node {} under {} (path depth {})",
            node.id,
            parent_id,
            node.depth
        );
        self.emit(TreeEvent::NodeCreated {
            id: node.id,
            parent_id: Some(parent_id),
            owner_ref: node.owner_ref.clone(),
        });
        Ok(node)
    }

    async fn add_child_tx(
        &self,
        conn: &Connection,
        parent_id: NodeId,
        expected_owner: Option<&str>,
        payload_json: &str,
    ) -> TreeResult<Node<P>> {
        let parent = match self.node_by_id(conn, parent_id).await? {
            Some(parent) => parent,
            None => return Err(TreeError::parent_not_found(parent_id)),
        };
        if let Some(owner_ref) = expected_owner {
            if parent.owner_ref != owner_ref {
                return Err(TreeError::parent_not_found(parent_id));
            }
        }

        let mut siblings = self.children_by_path(conn, &parent).await?;
        let last = siblings.last().map(|s| s.path.as_str());
        if self.needs_compaction(last, siblings.len())? {
            let paths: Vec<String> = siblings.iter().map(|s| s.path.clone()).collect();
            let moved = self.compact(conn, &parent.path, &paths).await?;
            tracing::info!(
                "Positions under '{}' exhausted; compacted {} child(ren)",
                parent.path,
                moved
            );
            siblings = self.children_by_path(conn, &parent).await?;
        }

        let keys: Vec<RankKey> = siblings.iter().map(|s| s.rank_key).collect();
        let new_key = RankKey::derive(0);

        let position = match insertion_index(&keys, new_key) {
            Some(index) => {
                let position = self.codec.position_of(&siblings[index].path)?;
                let mut moves = Vec::with_capacity(siblings.len() - index);
                for sibling in &siblings[index..] {
                    let next = self.codec.position_of(&sibling.path)? + 1;
                    moves.push((
                        sibling.path.clone(),
                        self.codec.child_path(&parent.path, next)?,
                    ));
                }
                tracing::debug!(
                    "Inserting at position {} under '{}', shifting {} sibling(s)",
                    position,
                    parent.path,
                    moves.len()
                );
                self.repath(conn, &moves).await?;
                position
            }
            None => match siblings.last() {
                Some(last) => self.codec.position_of(&last.path)? + 1,
                None => 0,
            },
        };

        let path = self.codec.child_path(&parent.path, position)?;
        let id = self
            .insert_node(
                conn,
                Some(parent.id),
                &path,
                parent.depth + 1,
                &parent.owner_ref,
                payload_json,
            )
            .await?;

        conn.execute(
            "UPDATE tree_nodes SET numchild = numchild + 1 WHERE id = ?",
            [parent.id],
        )
        .await?;

        self.node_by_id(conn, id)
            .await?
            .ok_or_else(|| TreeError::storage(format!("Node {} missing after insert", id)))
    }

    /// Apply one rating step atomically and recompute the rank key
    ///
    /// Paths are left alone. Only the rating ledger calls this.
    pub(crate) async fn adjust_rating(&self, id: NodeId, delta: RatingDelta) -> TreeResult<Node<P>> {
        let conn = self.begin().await?;
        let result = self.adjust_rating_tx(&conn, id, delta).await;
        let node = self.finish(&conn, result).await?;

        tracing::debug!("Rating of node {} is now {}", node.id, node.rating);
        self.emit(TreeEvent::RatingChanged {
            id: node.id,
            owner_ref: node.owner_ref.clone(),
            rating: node.rating,
        });
        Ok(node)
    }

    async fn adjust_rating_tx(
        &self,
        conn: &Connection,
        id: NodeId,
        delta: RatingDelta,
    ) -> TreeResult<Node<P>> {
        // rank_key is the negated new rating; SET expressions read the old row
        let sql = format!(
            "UPDATE tree_nodes SET rating = rating + ?1, rank_key = -(rating + ?1) WHERE id = ?2 RETURNING {}",
            NODE_COLUMNS
        );
        self.fetch_optional(conn, &sql, (delta.value(), id))
            .await?
            .ok_or_else(|| TreeError::node_not_found(id))
    }

    /// Physically reorder the children of `parent_id` by rank
    ///
    /// Children are re-pathed to consecutive positions in rank order (rating
    /// descending, insertion order on ties), carrying their subtrees along.
    /// Returns how many children changed segment.
    pub async fn resort_children(&self, parent_id: NodeId) -> TreeResult<usize> {
        let conn = self.begin().await?;
        let result = self.resort_children_tx(&conn, parent_id).await;
        let (owner_ref, moved) = self.finish(&conn, result).await?;

        tracing::info!("Resorted children of {} ({} moved)", parent_id, moved);
        self.emit(TreeEvent::ChildrenResorted {
            parent_id,
            owner_ref,
            moved,
        });
        Ok(moved)
    }

    async fn resort_children_tx(
        &self,
        conn: &Connection,
        parent_id: NodeId,
    ) -> TreeResult<(String, usize)> {
        let parent = self
            .node_by_id(conn, parent_id)
            .await?
            .ok_or_else(|| TreeError::node_not_found(parent_id))?;

        let mut children = self.children_by_path(conn, &parent).await?;
        children.sort_by(|a, b| RankKey::compare(a.rank_order(), b.rank_order()));

        let ranked: Vec<String> = children.into_iter().map(|c| c.path).collect();
        let moved = self.compact(conn, &parent.path, &ranked).await?;
        Ok((parent.owner_ref, moved))
    }

    /// Remove a node and its entire subtree
    ///
    /// The former parent's `numchild` drops by one; no other ancestor count
    /// is touched.
    pub async fn delete_subtree(&self, id: NodeId) -> TreeResult<DeleteResult> {
        let conn = self.begin().await?;
        let result = self.delete_subtree_tx(&conn, id).await;
        let (node, deleted) = self.finish(&conn, result).await?;

        tracing::info!("Deleted subtree {} ({} node(s))", id, deleted.deleted_count);
        self.emit(TreeEvent::SubtreeDeleted {
            id,
            parent_id: node.parent_id,
            owner_ref: node.owner_ref,
            deleted_count: deleted.deleted_count,
        });
        Ok(deleted)
    }

    async fn delete_subtree_tx(
        &self,
        conn: &Connection,
        id: NodeId,
    ) -> TreeResult<(Node<P>, DeleteResult)> {
        let node = self
            .node_by_id(conn, id)
            .await?
            .ok_or_else(|| TreeError::node_not_found(id))?;

        let deleted_count = conn
            .execute(
                "DELETE FROM tree_nodes WHERE path BETWEEN ?1 AND ?2",
                (node.path.as_str(), PathCodec::subtree_upper_bound(&node.path)),
            )
            .await?;

        if let Some(parent_id) = node.parent_id {
            conn.execute(
                "UPDATE tree_nodes SET numchild = numchild - 1 WHERE id = ?",
                [parent_id],
            )
            .await?;
        }

        Ok((node, DeleteResult { deleted_count }))
    }

    /// Remove every node belonging to `owner_ref`
    pub async fn delete_owner_forest(&self, owner_ref: &str) -> TreeResult<DeleteResult> {
        let conn = self.begin().await?;
        let result = conn
            .execute("DELETE FROM tree_nodes WHERE owner_ref = ?", [owner_ref])
            .await
            .map_err(TreeError::from);
        let deleted_count = self.finish(&conn, result).await?;

        tracing::info!(
            "Deleted forest of owner '{}' ({} node(s))",
            owner_ref,
            deleted_count
        );
        self.emit(TreeEvent::OwnerForestDeleted {
            owner_ref: owner_ref.to_string(),
            deleted_count,
        });
        Ok(DeleteResult { deleted_count })
    }

    /// Remove every node of `owner_ref` and its registration together
    ///
    /// One transaction, so no root can be created for the owner between the
    /// two deletes.
    pub async fn remove_owner(&self, owner_ref: &str) -> TreeResult<DeleteResult> {
        let conn = self.begin().await?;
        let result = self.remove_owner_tx(&conn, owner_ref).await;
        let deleted_count = self.finish(&conn, result).await?;

        tracing::info!(
            "Removed owner '{}' ({} node(s))",
            owner_ref,
            deleted_count
        );
        self.emit(TreeEvent::OwnerForestDeleted {
            owner_ref: owner_ref.to_string(),
            deleted_count,
        });
        Ok(DeleteResult { deleted_count })
    }

    async fn remove_owner_tx(&self, conn: &Connection, owner_ref: &str) -> TreeResult<u64> {
        let deleted = conn
            .execute("DELETE FROM tree_nodes WHERE owner_ref = ?", [owner_ref])
            .await?;
        OwnerRegistry::unregister_on(conn, owner_ref).await?;
        Ok(deleted)
    }

    //
    // READS
    //

    pub async fn get_node(&self, id: NodeId) -> TreeResult<Node<P>> {
        let conn = self.db.connect_with_timeout().await?;
        self.node_by_id(&conn, id)
            .await?
            .ok_or_else(|| TreeError::node_not_found(id))
    }

    /// Direct children of `parent_id`
    ///
    /// `ByPath` is the physical order; `ByRank` sorts by rank key in memory.
    pub async fn children_of(&self, parent_id: NodeId, order: ChildOrder) -> TreeResult<Vec<Node<P>>> {
        let conn = self.db.connect_with_timeout().await?;
        let parent = self
            .node_by_id(&conn, parent_id)
            .await?
            .ok_or_else(|| TreeError::node_not_found(parent_id))?;

        let mut children = self.children_by_path(&conn, &parent).await?;
        if order == ChildOrder::ByRank {
            children.sort_by(|a, b| RankKey::compare(a.rank_order(), b.rank_order()));
        }
        Ok(children)
    }

    /// The node and all its descendants, pre-order by path
    ///
    /// One range query; the first element is the node itself.
    pub async fn subtree_of(&self, id: NodeId) -> TreeResult<Vec<Node<P>>> {
        let conn = self.db.connect_with_timeout().await?;
        let sql = format!(
            "SELECT {} FROM tree_nodes
             WHERE path BETWEEN (SELECT path FROM tree_nodes WHERE id = ?1)
                            AND (SELECT path FROM tree_nodes WHERE id = ?1) || '~'
             ORDER BY path",
            NODE_COLUMNS
        );
        let nodes = self.fetch_all(&conn, &sql, [id]).await?;
        if nodes.is_empty() {
            return Err(TreeError::node_not_found(id));
        }
        Ok(nodes)
    }

    /// Roots of `owner_ref` in creation order
    pub async fn roots_of(&self, owner_ref: &str) -> TreeResult<Vec<Node<P>>> {
        let conn = self.db.connect_with_timeout().await?;
        let sql = format!(
            "SELECT {} FROM tree_nodes WHERE owner_ref = ? AND depth = 1 ORDER BY path",
            NODE_COLUMNS
        );
        self.fetch_all(&conn, &sql, [owner_ref]).await
    }

    /// Every node of `owner_ref`, pre-order by path
    pub async fn forest_of(&self, owner_ref: &str) -> TreeResult<Vec<Node<P>>> {
        let conn = self.db.connect_with_timeout().await?;
        let sql = format!(
            "SELECT {} FROM tree_nodes WHERE owner_ref = ? ORDER BY path",
            NODE_COLUMNS
        );
        self.fetch_all(&conn, &sql, [owner_ref]).await
    }

    /// Check the structural invariants over every stored node
    ///
    /// Returns one message per violation; an empty list means the forest is
    /// consistent.
    pub async fn audit(&self) -> TreeResult<Vec<String>> {
        let conn = self.db.connect_with_timeout().await?;
        let sql = format!("SELECT {} FROM tree_nodes ORDER BY path", NODE_COLUMNS);
        let nodes = self.fetch_all(&conn, &sql, ()).await?;
        Ok(audit_nodes(&self.codec, &nodes))
    }
}

/// Invariant check over a full, path-ordered node list
pub(crate) fn audit_nodes<P>(codec: &PathCodec, nodes: &[Node<P>]) -> Vec<String> {
    let mut violations = Vec::new();
    let by_path: HashMap<&str, &Node<P>> = nodes.iter().map(|n| (n.path.as_str(), n)).collect();
    let mut child_counts: HashMap<&str, u32> = HashMap::new();

    for node in nodes {
        if codec.depth_of(&node.path) != node.depth as usize {
            violations.push(format!(
                "node {}: depth {} does not match path '{}'",
                node.id, node.depth, node.path
            ));
        }

        if node.rank_key != RankKey::derive(node.rating) {
            violations.push(format!(
                "node {}: rank key {} does not match rating {}",
                node.id,
                node.rank_key.value(),
                node.rating
            ));
        }

        match (codec.parent_path(&node.path), node.parent_id) {
            (None, None) => {}
            (Some(parent_path), Some(parent_id)) => match by_path.get(parent_path) {
                Some(parent) if parent.id == parent_id => {
                    *child_counts.entry(parent_path).or_insert(0) += 1;
                    if parent.owner_ref != node.owner_ref {
                        violations.push(format!(
                            "node {}: owner '{}' differs from parent owner '{}'",
                            node.id, node.owner_ref, parent.owner_ref
                        ));
                    }
                }
                Some(parent) => violations.push(format!(
                    "node {}: parent_id {} but path parent is {}",
                    node.id, parent_id, parent.id
                )),
                None => violations.push(format!(
                    "node {}: no node at parent path '{}'",
                    node.id, parent_path
                )),
            },
            (None, Some(parent_id)) => violations.push(format!(
                "node {}: root path but parent_id {}",
                node.id, parent_id
            )),
            (Some(_), None) => violations.push(format!(
                "node {}: nested path '{}' but no parent_id",
                node.id, node.path
            )),
        }
    }

    for node in nodes {
        let actual = child_counts.get(node.path.as_str()).copied().unwrap_or(0);
        if actual != node.numchild {
            violations.push(format!(
                "node {}: numchild {} but {} children stored",
                node.id, node.numchild, actual
            ));
        }
    }

    violations
}
