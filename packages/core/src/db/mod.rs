//! Database Layer
//!
//! Storage plumbing for the tree engine, on an embedded libsql database:
//!
//! - Connection management and schema initialization
//! - Materialized path encoding (`PathCodec`)
//! - Tree events for subtree-level cache invalidation

mod database;
mod error;
pub mod events;
pub mod path_codec;

pub(crate) use database::NODE_COLUMNS;
pub use database::DatabaseService;
pub use error::DatabaseError;
pub use events::TreeEvent;
pub use path_codec::{PathCodec, PathError};
