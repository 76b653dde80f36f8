//! Storage Integration Tests
//!
//! Tests cover:
//! - Query plans of the sibling and root scans
//! - UNIQUE(path) violations surfacing as retryable `PathConflict`
//! - Rollback of a multi-statement write that fails after re-pathing

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use threadtree_core::config::TreeConfig;
use threadtree_core::db::DatabaseService;
use threadtree_core::models::{ChildOrder, NodeId};
use threadtree_core::services::{ErrorClass, TreeError, TreeService};

async fn open_database(temp_dir: &TempDir) -> Result<DatabaseService> {
    Ok(DatabaseService::new(temp_dir.path().join("storage.db"), &TreeConfig::default()).await?)
}

/// Detail column of every `EXPLAIN QUERY PLAN` row for `sql`
async fn query_plan(db: &DatabaseService, sql: &str) -> Result<Vec<String>> {
    let conn = db.connect()?;
    let mut rows = conn.query(&format!("EXPLAIN QUERY PLAN {}", sql), ()).await?;
    let mut details = Vec::new();
    while let Some(row) = rows.next().await? {
        details.push(row.get::<String>(3)?);
    }
    Ok(details)
}

async fn insert_raw(conn: &libsql::Connection, path: &str) -> libsql::Result<u64> {
    conn.execute(
        "INSERT INTO tree_nodes (parent_id, path, depth, numchild, rating, rank_key, owner_ref, payload, created_at)
         VALUES (NULL, ?, 1, 0, 0, 0, 'post-1', '{}', '2026-01-01T00:00:00Z')",
        [path],
    )
    .await
}

#[tokio::test]
async fn test_sibling_scan_uses_depth_path_index() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let db = open_database(&temp_dir).await?;

    let plan = query_plan(
        &db,
        "SELECT * FROM tree_nodes WHERE depth = 2 AND path BETWEEN '0000' AND '0000~' ORDER BY path",
    )
    .await?;
    assert!(
        plan.iter().any(|d| d.contains("idx_tree_nodes_depth_path")),
        "sibling scan plan: {:?}",
        plan
    );
    assert!(
        !plan.iter().any(|d| d.contains("TEMP B-TREE")),
        "sibling scan should not sort: {:?}",
        plan
    );
    Ok(())
}

#[tokio::test]
async fn test_last_root_lookup_uses_depth_path_index() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let db = open_database(&temp_dir).await?;

    let plan = query_plan(
        &db,
        "SELECT path FROM tree_nodes WHERE depth = 1 ORDER BY path DESC LIMIT 1",
    )
    .await?;
    assert!(
        plan.iter().any(|d| d.contains("idx_tree_nodes_depth_path")),
        "root lookup plan: {:?}",
        plan
    );
    Ok(())
}

#[tokio::test]
async fn test_duplicate_path_is_retryable_path_conflict() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let db = open_database(&temp_dir).await?;
    let conn = db.connect()?;

    insert_raw(&conn, "0000").await?;
    let err = insert_raw(&conn, "0000")
        .await
        .err()
        .expect("second insert at the same path must fail");

    let tree_err = TreeError::from(err);
    assert!(
        matches!(tree_err, TreeError::PathConflict { .. }),
        "got {:?}",
        tree_err
    );
    assert!(tree_err.is_retryable());
    assert_eq!(tree_err.class(), ErrorClass::Transient);
    Ok(())
}

/// Payload that stores fine but refuses to load the text "poison"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
struct Guarded(String);

impl TryFrom<String> for Guarded {
    type Error = String;

    fn try_from(text: String) -> Result<Self, Self::Error> {
        if text == "poison" {
            Err("poisoned payload".to_string())
        } else {
            Ok(Guarded(text))
        }
    }
}

impl From<Guarded> for String {
    fn from(guarded: Guarded) -> Self {
        guarded.0
    }
}

fn guarded(text: &str) -> Guarded {
    Guarded(text.to_string())
}

async fn path_of(service: &TreeService<Guarded>, id: NodeId) -> Result<String> {
    Ok(service.store().get_node(id).await?.path)
}

#[tokio::test]
async fn test_failure_after_shift_rolls_back_every_statement() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let service: TreeService<Guarded> =
        TreeService::open(temp_dir.path().join("rollback.db"), TreeConfig::default()).await?;
    service.register_owner("post-1").await?;

    let root = service.create_root("post-1", guarded("root")).await?;
    let a = service.add_child(root.id, guarded("a")).await?;
    let b = service.add_child(root.id, guarded("b")).await?;
    let a1 = service.add_child(a.id, guarded("a1")).await?;
    // Both siblings now rank below a fresh child, so the insert shifts them
    service.decrement_rating(a.id).await?;
    service.decrement_rating(b.id).await?;

    let ids = [root.id, a.id, b.id, a1.id];
    let mut before = Vec::new();
    for id in ids {
        before.push(path_of(&service, id).await?);
    }

    // Re-path, insert, and numchild update all run before the read-back fails
    let err = service
        .add_child(root.id, guarded("poison"))
        .await
        .err()
        .expect("read-back of the new child must fail");
    assert!(matches!(err, TreeError::Serialization(_)), "got {:?}", err);

    let mut after = Vec::new();
    for id in ids {
        after.push(path_of(&service, id).await?);
    }
    assert_eq!(before, after);
    assert_eq!(service.get_node(root.id).await?.numchild, 2);

    let subtree = service.get_subtree(root.id, ChildOrder::ByPath).await?;
    let children: Vec<NodeId> = subtree.children.iter().map(|c| c.node.id).collect();
    assert_eq!(children, vec![a.id, b.id]);
    assert_eq!(subtree.children[0].children[0].node.id, a1.id);
    assert!(service.audit().await?.is_empty());
    Ok(())
}
