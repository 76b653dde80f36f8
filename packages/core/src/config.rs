//! Engine Configuration
//!
//! `TreeConfig` is validated once at startup. Segment width is the sharpest
//! operational constraint of the engine: it fixes the per-parent fan-out and
//! cannot change without re-pathing every stored node, so an insufficient
//! width is rejected before storage is touched.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Number of symbols in the path alphabet (`0-9A-Z`)
pub const PATH_RADIX: u64 = 36;

/// Widest segment whose capacity still fits in a `u64`
pub const MAX_SEGMENT_WIDTH: usize = 12;

/// Configuration errors, all fatal
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("segment_width must be between 1 and {max}, got {width}")]
    InvalidSegmentWidth { width: usize, max: usize },

    #[error("segment_width {width} holds {capacity} positions per parent, below max_fanout {max_fanout}")]
    InsufficientSegmentWidth {
        width: usize,
        capacity: u64,
        max_fanout: u64,
    },

    #[error("database was created with segment_width {stored}, configured {configured}; a full re-path migration is required")]
    SegmentWidthMismatch { stored: usize, configured: usize },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Retry behavior for retryable engine errors
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum retry attempts (0 = single attempt)
    pub max_retries: usize,

    /// Backoff before the first retry, doubled on every further attempt
    pub base_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff_ms: 10,
        }
    }
}

impl RetryPolicy {
    /// No retries at all
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_backoff_ms: 0,
        }
    }

    /// Backoff before retry number `attempt` (0-based)
    pub fn backoff(&self, attempt: usize) -> Duration {
        let factor = 1u64.checked_shl(attempt as u32).unwrap_or(u64::MAX);
        Duration::from_millis(self.base_backoff_ms.saturating_mul(factor))
    }
}

/// Configuration for the tree engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeConfig {
    /// Characters per path segment
    pub segment_width: usize,

    /// Largest number of children any single node is expected to receive
    pub max_fanout: u64,

    /// SQLite busy timeout applied to every connection
    pub busy_timeout_ms: u32,

    /// Default deadline for one engine call, retries included
    pub operation_timeout: Duration,

    /// Retry policy for `PathConflict` / `StorageUnavailable`
    pub retry: RetryPolicy,

    /// Buffer size of the tree event channel
    pub event_capacity: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            segment_width: 4,
            max_fanout: 1_000_000,
            busy_timeout_ms: 5000,
            operation_timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
            event_capacity: 256,
        }
    }
}

impl TreeConfig {
    /// Positions available per parent for a given width
    pub fn segment_capacity(width: usize) -> u64 {
        PATH_RADIX.pow(width as u32)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.segment_width == 0 || self.segment_width > MAX_SEGMENT_WIDTH {
            return Err(ConfigError::InvalidSegmentWidth {
                width: self.segment_width,
                max: MAX_SEGMENT_WIDTH,
            });
        }

        let capacity = Self::segment_capacity(self.segment_width);
        if capacity < self.max_fanout {
            return Err(ConfigError::InsufficientSegmentWidth {
                width: self.segment_width,
                capacity,
                max_fanout: self.max_fanout,
            });
        }

        if self.operation_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "operation_timeout must be greater than 0".to_string(),
            ));
        }

        if self.event_capacity == 0 {
            return Err(ConfigError::Invalid(
                "event_capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TreeConfig::default();
        assert_eq!(config.segment_width, 4);
        assert_eq!(config.max_fanout, 1_000_000);
        assert_eq!(config.retry.max_retries, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_segment_capacity() {
        assert_eq!(TreeConfig::segment_capacity(1), 36);
        assert_eq!(TreeConfig::segment_capacity(2), 1296);
        assert_eq!(TreeConfig::segment_capacity(4), 1_679_616);
    }

    #[test]
    fn test_rejects_insufficient_width() {
        let config = TreeConfig {
            segment_width: 2,
            max_fanout: 5000,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::InsufficientSegmentWidth {
                width: 2,
                capacity: 1296,
                max_fanout: 5000,
            })
        );
    }

    #[test]
    fn test_rejects_out_of_range_width() {
        let mut config = TreeConfig::default();

        config.segment_width = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidSegmentWidth { .. })
        ));

        config.segment_width = MAX_SEGMENT_WIDTH + 1;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidSegmentWidth { .. })
        ));

        config.segment_width = MAX_SEGMENT_WIDTH;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let config = TreeConfig {
            operation_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_retry_backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_millis(10));
        assert_eq!(policy.backoff(1), Duration::from_millis(20));
        assert_eq!(policy.backoff(3), Duration::from_millis(80));
        assert_eq!(RetryPolicy::none().backoff(5), Duration::ZERO);
    }

    #[test]
    fn test_config_roundtrips_through_json() {
        let config = TreeConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: TreeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.segment_width, config.segment_width);
        assert_eq!(parsed.operation_timeout, config.operation_timeout);
    }
}
