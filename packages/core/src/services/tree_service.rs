//! TreeService - request-facing surface of the tree engine
//!
//! Wires the store, rating ledger, subtree view, and owner registry together
//! and hands out `NodeView`s, never raw paths. Every call is bounded by a
//! deadline (retries included), and retryable failures (`PathConflict`,
//! `StorageUnavailable`) are retried with exponential backoff before they
//! reach the caller.
//!
//! # Examples
//!
//! ```rust,no_run
//! use threadtree_core::config::TreeConfig;
//! use threadtree_core::models::{ChildOrder, CommentPayload};
//! use threadtree_core::services::TreeService;
//! use std::path::PathBuf;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service: TreeService<CommentPayload> =
//!         TreeService::open(PathBuf::from("./data/threads.db"), TreeConfig::default()).await?;
//!
//!     service.register_owner("post-42").await?;
//!     let root = service
//!         .create_root("post-42", CommentPayload::new("alice", "First!"))
//!         .await?;
//!     service
//!         .add_child(root.id, CommentPayload::new("bob", "Reply"))
//!         .await?;
//!     service.increment_rating(root.id).await?;
//!
//!     let thread = service.get_subtree(root.id, ChildOrder::ByRank).await?;
//!     println!("{} comment(s)", thread.len());
//!     Ok(())
//! }
//! ```

use crate::config::TreeConfig;
use crate::db::{DatabaseService, TreeEvent};
use crate::models::{ChildOrder, DeleteResult, NestedNodeView, NodeId, NodeView};
use crate::services::error::{TreeError, TreeResult};
use crate::services::owner_registry::{OwnerRegistry, OwnerResolver};
use crate::services::rating_ledger::RatingLedger;
use crate::services::subtree_view::SubtreeView;
use crate::services::tree_store::TreeStore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

pub struct TreeService<P> {
    store: TreeStore<P>,
    ledger: RatingLedger<P>,
    view: SubtreeView<P>,
    registry: OwnerRegistry,
    config: Arc<TreeConfig>,
    timeout: Duration,
}

impl<P> Clone for TreeService<P> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            ledger: self.ledger.clone(),
            view: self.view.clone(),
            registry: self.registry.clone(),
            config: self.config.clone(),
            timeout: self.timeout,
        }
    }
}

impl<P> TreeService<P>
where
    P: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Open the database at `db_path` with the built-in owner registry
    ///
    /// The configuration is validated before storage is touched; an
    /// insufficient segment width fails here, not at the first overflow.
    pub async fn open(db_path: PathBuf, config: TreeConfig) -> TreeResult<Self> {
        config.validate()?;
        let db = Arc::new(DatabaseService::new(db_path, &config).await?);
        let registry = OwnerRegistry::new(db.clone());
        let resolver: Arc<dyn OwnerResolver> = Arc::new(registry.clone());
        Self::assemble(db, config, registry, resolver)
    }

    /// Open with an external owner resolver (e.g. the posts service)
    pub async fn open_with_resolver(
        db_path: PathBuf,
        config: TreeConfig,
        resolver: Arc<dyn OwnerResolver>,
    ) -> TreeResult<Self> {
        config.validate()?;
        let db = Arc::new(DatabaseService::new(db_path, &config).await?);
        let registry = OwnerRegistry::new(db.clone());
        Self::assemble(db, config, registry, resolver)
    }

    fn assemble(
        db: Arc<DatabaseService>,
        config: TreeConfig,
        registry: OwnerRegistry,
        resolver: Arc<dyn OwnerResolver>,
    ) -> TreeResult<Self> {
        let store = TreeStore::new(db, &config, resolver)?;
        Ok(Self {
            ledger: RatingLedger::new(store.clone()),
            view: SubtreeView::new(store.clone()),
            store,
            registry,
            timeout: config.operation_timeout,
            config: Arc::new(config),
        })
    }

    /// Handle whose calls use `timeout` as their deadline
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let mut handle = self.clone();
        handle.timeout = timeout;
        handle
    }

    pub fn store(&self) -> &TreeStore<P> {
        &self.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TreeEvent> {
        self.store.subscribe()
    }

    /// Run `op` under the deadline, retrying retryable failures
    async fn call<T, F, Fut>(&self, name: &'static str, op: F) -> TreeResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = TreeResult<T>>,
    {
        let policy = &self.config.retry;
        let attempts = async {
            let mut attempt = 0;
            loop {
                match op().await {
                    Ok(value) => {
                        if attempt > 0 {
                            tracing::debug!("{} succeeded after {} retry(ies)", name, attempt);
                        }
                        return Ok(value);
                    }
                    Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                        let backoff = policy.backoff(attempt);
                        tracing::warn!(
                            "{} failed (attempt {}): {}; retrying in {:?}",
                            name,
                            attempt + 1,
                            e,
                            backoff
                        );
                        tokio::time::sleep(backoff).await;
                        attempt += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        match tokio::time::timeout(self.timeout, attempts).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!("{} exceeded its {:?} deadline", name, self.timeout);
                Err(TreeError::DeadlineExceeded {
                    timeout: self.timeout,
                })
            }
        }
    }

    //
    // OWNERS
    //

    pub async fn register_owner(&self, owner_ref: &str) -> TreeResult<bool> {
        let registry = &self.registry;
        self.call("register_owner", move || registry.register(owner_ref))
            .await
    }

    /// Delete every thread of `owner_ref` and forget the owner atomically
    pub async fn remove_owner(&self, owner_ref: &str) -> TreeResult<DeleteResult> {
        let store = &self.store;
        self.call("remove_owner", move || store.remove_owner(owner_ref))
            .await
    }

    //
    // WRITES
    //

    /// New top-level comment; `InvalidOwner` if the owner does not resolve
    pub async fn create_root(&self, owner_ref: &str, payload: P) -> TreeResult<NodeView<P>> {
        let store = &self.store;
        let payload = &payload;
        self.call("create_root", move || store.create_root(owner_ref, payload))
            .await
            .map(NodeView::from)
    }

    /// Reply under `parent_id`; `ParentNotFound` if it does not exist
    pub async fn add_child(&self, parent_id: NodeId, payload: P) -> TreeResult<NodeView<P>> {
        let store = &self.store;
        let payload = &payload;
        self.call("add_child", move || store.add_child(parent_id, payload))
            .await
            .map(NodeView::from)
    }

    /// Reply under `parent_id`, which must belong to `owner_ref`
    pub async fn add_reply(
        &self,
        owner_ref: &str,
        parent_id: NodeId,
        payload: P,
    ) -> TreeResult<NodeView<P>> {
        let store = &self.store;
        let payload = &payload;
        self.call("add_reply", move || {
            store.add_reply(owner_ref, parent_id, payload)
        })
        .await
        .map(NodeView::from)
    }

    pub async fn increment_rating(&self, id: NodeId) -> TreeResult<NodeView<P>> {
        let ledger = &self.ledger;
        self.call("increment_rating", move || ledger.increment(id))
            .await
            .map(NodeView::from)
    }

    pub async fn decrement_rating(&self, id: NodeId) -> TreeResult<NodeView<P>> {
        let ledger = &self.ledger;
        self.call("decrement_rating", move || ledger.decrement(id))
            .await
            .map(NodeView::from)
    }

    /// Physically reorder the children of `parent_id` by rank
    pub async fn resort_children(&self, parent_id: NodeId) -> TreeResult<usize> {
        let store = &self.store;
        self.call("resort_children", move || store.resort_children(parent_id))
            .await
    }

    /// Moderation removal of a node and all its replies
    pub async fn delete_subtree(&self, id: NodeId) -> TreeResult<DeleteResult> {
        let store = &self.store;
        self.call("delete_subtree", move || store.delete_subtree(id))
            .await
    }

    //
    // READS
    //

    pub async fn get_node(&self, id: NodeId) -> TreeResult<NodeView<P>> {
        let store = &self.store;
        self.call("get_node", move || store.get_node(id))
            .await
            .map(NodeView::from)
    }

    /// Direct replies under `parent_id`
    pub async fn get_children(
        &self,
        parent_id: NodeId,
        order: ChildOrder,
    ) -> TreeResult<Vec<NodeView<P>>> {
        let store = &self.store;
        let children = self
            .call("get_children", move || store.children_of(parent_id, order))
            .await?;
        Ok(children.into_iter().map(NodeView::from).collect())
    }

    /// Top-level comments of `owner_ref` in creation order
    pub async fn get_roots(&self, owner_ref: &str) -> TreeResult<Vec<NodeView<P>>> {
        let store = &self.store;
        let roots = self
            .call("get_roots", move || store.roots_of(owner_ref))
            .await?;
        Ok(roots.into_iter().map(NodeView::from).collect())
    }

    /// Full reply thread from `id` downward
    pub async fn get_subtree(&self, id: NodeId, order: ChildOrder) -> TreeResult<NestedNodeView<P>> {
        let view = &self.view;
        self.call("get_subtree", move || view.render(id, order))
            .await
    }

    /// Every thread of `owner_ref`
    pub async fn get_owner_forest(
        &self,
        owner_ref: &str,
        order: ChildOrder,
    ) -> TreeResult<Vec<NestedNodeView<P>>> {
        let view = &self.view;
        self.call("get_owner_forest", move || {
            view.render_forest(owner_ref, order)
        })
        .await
    }

    /// Structural invariant violations across the whole store
    pub async fn audit(&self) -> TreeResult<Vec<String>> {
        let store = &self.store;
        self.call("audit", move || store.audit()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::models::CommentPayload;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn open_service(config: TreeConfig) -> (TreeService<CommentPayload>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("service.db");
        let service = tokio_test::block_on(TreeService::open(db_path, config)).unwrap();
        (service, temp_dir)
    }

    #[test]
    fn test_call_retries_conflicts_then_succeeds() {
        let config = TreeConfig {
            retry: RetryPolicy {
                max_retries: 3,
                base_backoff_ms: 1,
            },
            ..Default::default()
        };
        let (service, _temp_dir) = open_service(config);
        let counter = AtomicUsize::new(0);
        let attempts = &counter;

        let result = tokio_test::block_on(service.call("flaky", move || async move {
            if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(TreeError::path_conflict("segment taken"))
            } else {
                Ok(7)
            }
        }));

        assert_eq!(result.unwrap(), 7);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_call_gives_up_after_max_retries() {
        let config = TreeConfig {
            retry: RetryPolicy {
                max_retries: 2,
                base_backoff_ms: 1,
            },
            ..Default::default()
        };
        let (service, _temp_dir) = open_service(config);
        let counter = AtomicUsize::new(0);
        let attempts = &counter;

        let result: TreeResult<()> = tokio_test::block_on(service.call("conflicting", move || async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(TreeError::path_conflict("segment taken"))
        }));

        assert!(matches!(result, Err(TreeError::PathConflict { .. })));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_call_does_not_retry_client_errors() {
        let (service, _temp_dir) = open_service(TreeConfig::default());
        let counter = AtomicUsize::new(0);
        let attempts = &counter;

        let result: TreeResult<()> = tokio_test::block_on(service.call("missing", move || async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(TreeError::node_not_found(99))
        }));

        assert!(matches!(result, Err(TreeError::NodeNotFound { id: 99 })));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_call_reports_deadline_exceeded() {
        let (service, _temp_dir) = open_service(TreeConfig::default());
        let short = service.with_timeout(Duration::from_millis(10));

        let result: TreeResult<()> = tokio_test::block_on(short.call("slow", || async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(())
        }));

        assert!(matches!(
            result,
            Err(TreeError::DeadlineExceeded { timeout }) if timeout == Duration::from_millis(10)
        ));
    }

    #[test]
    fn test_open_rejects_invalid_config() {
        let temp_dir = TempDir::new().unwrap();
        let config = TreeConfig {
            segment_width: 1,
            max_fanout: 100,
            ..Default::default()
        };

        let result = tokio_test::block_on(TreeService::<CommentPayload>::open(
            temp_dir.path().join("never.db"),
            config,
        ));

        assert!(matches!(result, Err(TreeError::Config(_))));
        assert!(!temp_dir.path().join("never.db").exists());
    }
}
