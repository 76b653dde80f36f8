//! Tree Events
//!
//! Events emitted by the tree store after a mutation commits. They follow
//! the observer pattern over a tokio broadcast channel, so a cache layer can
//! invalidate exactly the subtree that changed without the store knowing
//! about it.
//!
//! Every structural event names the node whose subtree (path range) changed.
//! A cached render of any ancestor of that node is stale as well.

use crate::models::NodeId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeEvent {
    /// A root or child was inserted; sibling subtrees under `parent_id` may
    /// have been re-pathed to make room
    NodeCreated {
        id: NodeId,
        parent_id: Option<NodeId>,
        owner_ref: String,
    },

    /// Rating changed; no path was touched
    RatingChanged {
        id: NodeId,
        owner_ref: String,
        rating: i64,
    },

    /// Children of `parent_id` were physically reordered
    ChildrenResorted {
        parent_id: NodeId,
        owner_ref: String,
        moved: usize,
    },

    /// The subtree rooted at `id` was removed
    SubtreeDeleted {
        id: NodeId,
        parent_id: Option<NodeId>,
        owner_ref: String,
        deleted_count: u64,
    },

    /// Every node of an owner was removed
    OwnerForestDeleted {
        owner_ref: String,
        deleted_count: u64,
    },
}

impl TreeEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            TreeEvent::NodeCreated { .. } => "node:created",
            TreeEvent::RatingChanged { .. } => "node:rating",
            TreeEvent::ChildrenResorted { .. } => "tree:resorted",
            TreeEvent::SubtreeDeleted { .. } => "tree:deleted",
            TreeEvent::OwnerForestDeleted { .. } => "owner:deleted",
        }
    }

    /// Owner whose forest this event touches
    pub fn owner_ref(&self) -> &str {
        match self {
            TreeEvent::NodeCreated { owner_ref, .. }
            | TreeEvent::RatingChanged { owner_ref, .. }
            | TreeEvent::ChildrenResorted { owner_ref, .. }
            | TreeEvent::SubtreeDeleted { owner_ref, .. }
            | TreeEvent::OwnerForestDeleted { owner_ref, .. } => owner_ref,
        }
    }

    /// Whether the event changed any path, depth, or numchild
    pub fn is_structural(&self) -> bool {
        !matches!(self, TreeEvent::RatingChanged { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_metadata() {
        let event = TreeEvent::RatingChanged {
            id: 1,
            owner_ref: "post-42".to_string(),
            rating: 3,
        };
        assert_eq!(event.event_type(), "node:rating");
        assert_eq!(event.owner_ref(), "post-42");
        assert!(!event.is_structural());

        let event = TreeEvent::SubtreeDeleted {
            id: 2,
            parent_id: Some(1),
            owner_ref: "post-42".to_string(),
            deleted_count: 6,
        };
        assert!(event.is_structural());
    }
}
