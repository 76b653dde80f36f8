//! Tree Node Models
//!
//! `Node` is the full stored row, including the materialized path. The views
//! (`NodeView`, `NestedNodeView`) are what leaves the engine: they carry the
//! same data minus the path, which stays an internal representation.

use super::rank_key::RankKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable node identifier, assigned once and never reused
pub type NodeId = i64;

/// A stored tree member
///
/// # Fields
///
/// - `path`: concatenation of the parent's path and this node's segment
/// - `depth`: 1 for roots, parent depth + 1 otherwise
/// - `numchild`: count of direct children
/// - `rank_key`: derived from `rating`, see [`RankKey::derive`]
/// - `owner_ref`: content entity the whole tree belongs to
#[derive(Debug, Clone, PartialEq)]
pub struct Node<P> {
    pub id: NodeId,
    pub parent_id: Option<NodeId>,
    pub path: String,
    pub depth: u32,
    pub numchild: u32,
    pub rating: i64,
    pub rank_key: RankKey,
    pub owner_ref: String,
    pub payload: P,
    pub created_at: DateTime<Utc>,
}

impl<P> Node<P> {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Sort key used by rank-ordered reads
    pub fn rank_order(&self) -> (RankKey, NodeId) {
        (self.rank_key, self.id)
    }
}

impl<P: Clone> Node<P> {
    pub fn to_view(&self) -> NodeView<P> {
        NodeView::from(self.clone())
    }
}

/// Sibling order requested by a read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChildOrder {
    /// Physical order (pre-order by path)
    #[default]
    ByPath,
    /// Descending rating, ties by insertion order
    ByRank,
}

/// Externally visible node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeView<P> {
    pub id: NodeId,
    pub owner_ref: String,
    pub rating: i64,
    pub depth: u32,
    pub numchild: u32,
    pub payload: P,
    pub created_at: DateTime<Utc>,
}

impl<P> From<Node<P>> for NodeView<P> {
    fn from(node: Node<P>) -> Self {
        Self {
            id: node.id,
            owner_ref: node.owner_ref,
            rating: node.rating,
            depth: node.depth,
            numchild: node.numchild,
            payload: node.payload,
            created_at: node.created_at,
        }
    }
}

/// A node together with its nested replies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NestedNodeView<P> {
    #[serde(flatten)]
    pub node: NodeView<P>,
    pub children: Vec<NestedNodeView<P>>,
}

impl<P> NestedNodeView<P> {
    pub fn leaf(node: NodeView<P>) -> Self {
        Self {
            node,
            children: Vec::new(),
        }
    }

    /// Number of nodes in this tree, itself included
    pub fn len(&self) -> usize {
        1 + self.children.iter().map(NestedNodeView::len).sum::<usize>()
    }

    /// Always false: a nested view contains at least its own node
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Ids in pre-order
    pub fn ids(&self) -> Vec<NodeId> {
        let mut ids = Vec::with_capacity(self.len());
        let mut stack = vec![self];
        while let Some(current) = stack.pop() {
            ids.push(current.node.id);
            stack.extend(current.children.iter().rev());
        }
        ids
    }
}

/// Result of a subtree deletion
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResult {
    /// Rows removed, the targeted node included
    pub deleted_count: u64,
}

/// Comment content carried as the payload in the comment-thread use case
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentPayload {
    pub author: String,
    pub text: String,
}

impl CommentPayload {
    pub fn new(author: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            text: text.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn view(id: NodeId) -> NodeView<CommentPayload> {
        NodeView {
            id,
            owner_ref: "post-1".to_string(),
            rating: 0,
            depth: 1,
            numchild: 0,
            payload: CommentPayload::new("alice", format!("comment {}", id)),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_view_hides_path() {
        let node = Node {
            id: 3,
            parent_id: Some(1),
            path: "00000001".to_string(),
            depth: 2,
            numchild: 0,
            rating: 2,
            rank_key: RankKey::derive(2),
            owner_ref: "post-1".to_string(),
            payload: CommentPayload::new("bob", "hi"),
            created_at: Utc::now(),
        };

        let value = serde_json::to_value(node.to_view()).unwrap();
        assert!(value.get("path").is_none());
        assert_eq!(value["ownerRef"], json!("post-1"));
        assert_eq!(value["payload"]["text"], json!("hi"));
        assert!(!node.is_root());
    }

    #[test]
    fn test_nested_view_flattens_node_fields() {
        let tree = NestedNodeView {
            node: view(1),
            children: vec![NestedNodeView::leaf(view(2))],
        };

        let value = serde_json::to_value(&tree).unwrap();
        assert_eq!(value["id"], json!(1));
        assert_eq!(value["children"][0]["id"], json!(2));
        assert_eq!(value["children"][0]["children"], json!([]));
    }

    #[test]
    fn test_nested_view_len_and_preorder_ids() {
        let tree = NestedNodeView {
            node: view(1),
            children: vec![
                NestedNodeView {
                    node: view(2),
                    children: vec![NestedNodeView::leaf(view(4))],
                },
                NestedNodeView::leaf(view(3)),
            ],
        };

        assert_eq!(tree.len(), 4);
        assert_eq!(tree.ids(), vec![1, 2, 4, 3]);
    }

    #[test]
    fn test_child_order_serde() {
        assert_eq!(
            serde_json::to_value(ChildOrder::ByRank).unwrap(),
            json!("by_rank")
        );
        assert_eq!(ChildOrder::default(), ChildOrder::ByPath);
    }
}
