//! Materialized Path Encoding
//!
//! A path is the concatenation of fixed-width segments, one per level. Each
//! segment is a zero-padded base-36 number written with `0-9A-Z`, whose ASCII
//! order equals numeric order, so sorting paths as plain strings yields a
//! pre-order traversal of the forest.
//!
//! ```text
//! 0000            root #0
//! 00000000        first child of root #0
//! 00000001        second child of root #0
//! 000000010000    first child of the second child
//! 0001            root #1
//! ```

use crate::config::{ConfigError, TreeConfig, MAX_SEGMENT_WIDTH, PATH_RADIX};
use thiserror::Error;

const ALPHABET: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Sorts after every alphabet character; used as the open end of a prefix range
const RANGE_SENTINEL: char = '~';

/// Path encoding and decoding failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("segment position {position} exceeds capacity {capacity}")]
    SegmentOverflow { position: u64, capacity: u64 },

    #[error("empty path")]
    Empty,

    #[error("path '{path}' is not a multiple of segment width {width}")]
    Misaligned { path: String, width: usize },

    #[error("path '{path}' contains a character outside 0-9A-Z")]
    InvalidCharacter { path: String },
}

/// Encodes and decodes fixed-width path segments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathCodec {
    width: usize,
    capacity: u64,
}

impl PathCodec {
    /// Create a codec with the given segment width
    pub fn new(width: usize) -> Result<Self, ConfigError> {
        if width == 0 || width > MAX_SEGMENT_WIDTH {
            return Err(ConfigError::InvalidSegmentWidth {
                width,
                max: MAX_SEGMENT_WIDTH,
            });
        }
        Ok(Self {
            width,
            capacity: TreeConfig::segment_capacity(width),
        })
    }

    /// Create a codec from a validated configuration
    pub fn from_config(config: &TreeConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Self::new(config.segment_width)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of distinct positions a single segment can hold
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Encode a sibling position as a zero-padded segment
    pub fn encode_segment(&self, position: u64) -> Result<String, PathError> {
        if position >= self.capacity {
            return Err(PathError::SegmentOverflow {
                position,
                capacity: self.capacity,
            });
        }

        let mut buf = vec![b'0'; self.width];
        let mut rest = position;
        for slot in buf.iter_mut().rev() {
            *slot = ALPHABET[(rest % PATH_RADIX) as usize];
            rest /= PATH_RADIX;
        }

        // Only alphabet bytes were written
        Ok(buf.into_iter().map(char::from).collect())
    }

    /// Decode a single segment back into its position
    pub fn decode_segment(&self, segment: &str) -> Result<u64, PathError> {
        if segment.len() != self.width {
            return Err(PathError::Misaligned {
                path: segment.to_string(),
                width: self.width,
            });
        }

        segment.bytes().try_fold(0u64, |acc, byte| {
            let digit = match byte {
                b'0'..=b'9' => byte - b'0',
                b'A'..=b'Z' => byte - b'A' + 10,
                _ => {
                    return Err(PathError::InvalidCharacter {
                        path: segment.to_string(),
                    })
                }
            };
            Ok(acc * PATH_RADIX + u64::from(digit))
        })
    }

    /// Check that a stored path is well formed
    pub fn validate(&self, path: &str) -> Result<(), PathError> {
        if path.is_empty() {
            return Err(PathError::Empty);
        }
        if path.len() % self.width != 0 {
            return Err(PathError::Misaligned {
                path: path.to_string(),
                width: self.width,
            });
        }
        if !path.bytes().all(|b| b.is_ascii_digit() || b.is_ascii_uppercase()) {
            return Err(PathError::InvalidCharacter {
                path: path.to_string(),
            });
        }
        Ok(())
    }

    /// Path of the child at `position` under `parent`
    pub fn child_path(&self, parent: &str, position: u64) -> Result<String, PathError> {
        let mut path = String::with_capacity(parent.len() + self.width);
        path.push_str(parent);
        path.push_str(&self.encode_segment(position)?);
        Ok(path)
    }

    /// Path of the root at `position`
    pub fn root_path(&self, position: u64) -> Result<String, PathError> {
        self.child_path("", position)
    }

    /// Strip the last segment; `None` for a root path
    pub fn parent_path<'a>(&self, path: &'a str) -> Option<&'a str> {
        if path.len() <= self.width {
            return None;
        }
        path.get(..path.len() - self.width)
    }

    /// Trailing segment of a path
    pub fn last_segment<'a>(&self, path: &'a str) -> Option<&'a str> {
        if path.len() < self.width {
            return None;
        }
        path.get(path.len() - self.width..)
    }

    /// Position encoded in the trailing segment
    pub fn position_of(&self, path: &str) -> Result<u64, PathError> {
        let segment = self.last_segment(path).ok_or(PathError::Empty)?;
        self.decode_segment(segment)
    }

    pub fn depth_of(&self, path: &str) -> usize {
        path.len() / self.width
    }

    /// True iff `candidate` lies strictly below `ancestor`
    pub fn is_descendant(candidate: &str, ancestor: &str) -> bool {
        candidate.len() > ancestor.len() && candidate.starts_with(ancestor)
    }

    /// Inclusive upper bound of `path`'s subtree for `BETWEEN` range scans
    pub fn subtree_upper_bound(path: &str) -> String {
        let mut bound = String::with_capacity(path.len() + 1);
        bound.push_str(path);
        bound.push(RANGE_SENTINEL);
        bound
    }
}
