//! Sync engine configuration.

use std::time::Duration;

/// Compressed changes strictly smaller than this go inline in a batch.
pub const INLINE_THRESHOLD: usize = 10 * 1024;

/// Maximum operations the remote store accepts in one transaction.
pub const MAX_BATCH_OPS: usize = 10;

/// Timing and sizing knobs of a document session.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Period of the outbound push timer.
    pub push_interval: Duration,
    /// Fixed delay before a transient push failure is retried.
    pub retry_delay: Duration,
    /// Attempts allowed per push job; `None` retries until the session closes.
    pub retry_budget: Option<u32>,
    /// Inline/blob routing threshold for compressed changes, in bytes.
    pub inline_threshold: usize,
    /// Operations per outbound transaction.
    pub max_batch_ops: usize,
    /// Delay between attempts to open a remote stream.
    pub subscribe_retry_delay: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            push_interval: Duration::from_secs(1),
            retry_delay: Duration::from_secs(3),
            retry_budget: None,
            inline_threshold: INLINE_THRESHOLD,
            max_batch_ops: MAX_BATCH_OPS,
            subscribe_retry_delay: Duration::from_secs(3),
        }
    }
}

impl SyncConfig {
    /// Short timers for tests.
    pub fn for_testing() -> Self {
        Self {
            push_interval: Duration::from_millis(20),
            retry_delay: Duration::from_millis(30),
            subscribe_retry_delay: Duration::from_millis(30),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_config_default() {
        let config = SyncConfig::default();
        assert_eq!(config.push_interval, Duration::from_secs(1));
        assert_eq!(config.retry_delay, Duration::from_secs(3));
        assert!(config.retry_budget.is_none());
        assert_eq!(config.inline_threshold, 10_240);
        assert_eq!(config.max_batch_ops, 10);
    }

    #[test]
    fn test_sync_config_for_testing_keeps_limits() {
        let config = SyncConfig::for_testing();
        assert!(config.push_interval < Duration::from_secs(1));
        assert_eq!(config.inline_threshold, INLINE_THRESHOLD);
        assert_eq!(config.max_batch_ops, MAX_BATCH_OPS);
    }
}
