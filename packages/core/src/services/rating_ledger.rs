//! Rating ledger
//!
//! The only entry point that changes a node's rating. Each step is a single
//! atomic read-modify-write in storage (`rating = rating + 1`), so concurrent
//! votes on one node never lose an update.

use crate::models::{Node, NodeId, RatingDelta};
use crate::services::error::TreeResult;
use crate::services::tree_store::TreeStore;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub struct RatingLedger<P> {
    store: TreeStore<P>,
}

impl<P> Clone for RatingLedger<P> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<P> RatingLedger<P>
where
    P: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(store: TreeStore<P>) -> Self {
        Self { store }
    }

    /// Up-vote; fails with `NodeNotFound` if the node is absent
    pub async fn increment(&self, id: NodeId) -> TreeResult<Node<P>> {
        self.store.adjust_rating(id, RatingDelta::Up).await
    }

    /// Down-vote; fails with `NodeNotFound` if the node is absent
    pub async fn decrement(&self, id: NodeId) -> TreeResult<Node<P>> {
        self.store.adjust_rating(id, RatingDelta::Down).await
    }
}
