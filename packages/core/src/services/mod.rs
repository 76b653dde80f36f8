//! Tree Engine Services
//!
//! - `TreeStore` - path allocation, structural writes, ordered reads
//! - `RatingLedger` - the only writer of `rating`
//! - `SubtreeView` - single-fetch nested rendering
//! - `OwnerRegistry` / `OwnerResolver` - owner resolution for new roots
//! - `TreeService` - request-facing surface with deadlines and retry

pub mod error;
pub mod owner_registry;
pub mod rating_ledger;
pub mod subtree_view;
pub mod tree_service;
pub mod tree_store;

pub use error::{ErrorClass, TreeError, TreeResult};
pub use owner_registry::{OwnerRegistry, OwnerResolver};
pub use rating_ledger::RatingLedger;
pub use subtree_view::SubtreeView;
pub use tree_service::TreeService;
pub use tree_store::TreeStore;
