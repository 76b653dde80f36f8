//! Data Models
//!
//! - `Node` - stored tree member, path included
//! - `NodeView` / `NestedNodeView` - what the engine hands to callers
//! - `RankKey` - sibling ordering derived from rating

mod node;
mod rank_key;

pub use node::{
    ChildOrder, CommentPayload, DeleteResult, NestedNodeView, Node, NodeId, NodeView,
};
pub use rank_key::{RankKey, RatingDelta};
