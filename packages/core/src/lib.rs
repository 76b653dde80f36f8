//! ThreadTree Core
//!
//! A materialized-path engine for ranked comment trees attached to arbitrary
//! content entities ("owners", e.g. posts).
//!
//! # Architecture
//!
//! - **Materialized paths**: fixed-width base-36 segments, so string order of
//!   paths is pre-order traversal and a subtree is one range scan
//! - **Rank keys**: negated rating places higher-rated siblings first on insert
//! - **libsql**: embedded SQLite-compatible storage; every structural change is
//!   one `BEGIN IMMEDIATE` transaction
//!
//! # Modules
//!
//! - [`config`] - Engine configuration and validation
//! - [`models`] - Nodes, views, rank keys
//! - [`db`] - libsql connection, schema, path codec, events
//! - [`services`] - Tree store, rating ledger, subtree view, service facade

pub mod config;
pub mod db;
pub mod models;
pub mod services;

// Re-export commonly used types
pub use config::TreeConfig;
pub use models::*;
pub use services::*;
