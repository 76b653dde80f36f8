//! Sibling rank derivation
//!
//! The rank key is the negated rating, so ascending key order puts the
//! highest-rated sibling first. Equal keys fall back to insertion order,
//! which for this engine is node id order (ids are never reused and grow
//! with every insert).

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Ordering key derived from a node's rating
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RankKey(i64);

impl RankKey {
    /// Derive the key for a rating (`derive(a) < derive(b)` iff `a > b`)
    pub fn derive(rating: i64) -> Self {
        Self(rating.saturating_neg())
    }

    /// Rebuild a key read back from storage
    pub fn from_stored(value: i64) -> Self {
        Self(value)
    }

    pub fn value(self) -> i64 {
        self.0
    }

    /// Total order over siblings: rank key, then insertion order
    pub fn compare(a: (RankKey, i64), b: (RankKey, i64)) -> Ordering {
        a.0.cmp(&b.0).then(a.1.cmp(&b.1))
    }
}

/// A single rating step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatingDelta {
    Up,
    Down,
}

impl RatingDelta {
    pub fn value(self) -> i64 {
        match self {
            RatingDelta::Up => 1,
            RatingDelta::Down => -1,
        }
    }
}
