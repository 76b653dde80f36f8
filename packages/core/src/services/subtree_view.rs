//! Nested subtree rendering
//!
//! Projects a node and its descendants into `NestedNodeView`s. A render is
//! always one bulk fetch (a path range or an owner scan) followed by in-memory
//! grouping: each node is attached to the node whose path is its own path
//! minus the last segment. Nothing is queried per node or per level.

use crate::db::PathCodec;
use crate::models::{ChildOrder, NestedNodeView, Node, NodeId, NodeView, RankKey};
use crate::services::error::{TreeError, TreeResult};
use crate::services::tree_store::TreeStore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;

pub struct SubtreeView<P> {
    store: TreeStore<P>,
}

impl<P> Clone for SubtreeView<P> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<P> SubtreeView<P>
where
    P: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(store: TreeStore<P>) -> Self {
        Self { store }
    }

    /// Render `id` and everything below it
    pub async fn render(&self, id: NodeId, order: ChildOrder) -> TreeResult<NestedNodeView<P>> {
        let nodes = self.store.subtree_of(id).await?;
        let mut trees = assemble(self.store.codec(), nodes, order);
        tracing::debug!("Rendered subtree of {} ({} top-level)", id, trees.len());

        // subtree_of returns the node itself first, so exactly one tree comes back
        match trees.len() {
            1 => Ok(trees.remove(0)),
            _ => Err(TreeError::node_not_found(id)),
        }
    }

    /// Render every thread of `owner_ref`
    ///
    /// Roots stay in creation order whatever `order` says; `order` applies to
    /// every level below them.
    pub async fn render_forest(
        &self,
        owner_ref: &str,
        order: ChildOrder,
    ) -> TreeResult<Vec<NestedNodeView<P>>> {
        let nodes = self.store.forest_of(owner_ref).await?;
        Ok(assemble(self.store.codec(), nodes, order))
    }
}

/// Group path-ordered nodes into nested views
///
/// Nodes whose parent is not part of `nodes` become top-level trees, kept in
/// path order. Children are ordered by path or by rank.
pub(crate) fn assemble<P>(
    codec: &PathCodec,
    nodes: Vec<Node<P>>,
    order: ChildOrder,
) -> Vec<NestedNodeView<P>> {
    let index: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, node)| (node.path.as_str(), i))
        .collect();

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    let mut tops = Vec::new();
    for (i, node) in nodes.iter().enumerate() {
        match codec.parent_path(&node.path).and_then(|p| index.get(p)) {
            Some(&parent) => children[parent].push(i),
            None => tops.push(i),
        }
    }
    drop(index);

    if order == ChildOrder::ByRank {
        for group in children.iter_mut() {
            group.sort_by(|&a, &b| RankKey::compare(nodes[a].rank_order(), nodes[b].rank_order()));
        }
    }

    // Every child sits after its parent in path order, so building back to
    // front always finds the children already built
    let mut built: Vec<Option<NestedNodeView<P>>> = Vec::with_capacity(nodes.len());
    built.resize_with(nodes.len(), || None);
    let mut views: Vec<Option<NodeView<P>>> =
        nodes.into_iter().map(|n| Some(NodeView::from(n))).collect();

    for i in (0..views.len()).rev() {
        let Some(node) = views[i].take() else {
            continue;
        };
        let nested_children = children[i]
            .iter()
            .filter_map(|&child| built[child].take())
            .collect();
        built[i] = Some(NestedNodeView {
            node,
            children: nested_children,
        });
    }

    tops.into_iter().filter_map(|i| built[i].take()).collect()
}
