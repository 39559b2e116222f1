//! Store-level configuration.

use std::time::Duration;

/// Hard upper bound on [`StoreConfig::flush_threshold`], keeping flush
/// batches within the backing store's transactional limits.
pub const MAX_FLUSH_THRESHOLD: usize = 25;

/// Configuration for a [`Store`](crate::store::Store).
///
/// All values are fixed at construction.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Number of independent shards keys are routed across.
    pub num_shards: usize,
    /// Capacity of each shard's pending-mutation queue.
    pub queue_capacity: usize,
    /// Queue length at which a shard wakes its flush worker. Clamped to
    /// [`MAX_FLUSH_THRESHOLD`].
    pub flush_threshold: usize,
    /// Capacity of each shard's LRU cache.
    pub cache_capacity: usize,
    /// Maximum distinct keys per shard with concurrent fetch waiters.
    pub cond_set_capacity: usize,
    /// Deadline applied to every backing-store call.
    pub remote_timeout: Duration,
    /// Maximum keys per batched read request.
    pub batch_get_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            num_shards: 16,
            queue_capacity: 1 << 16,
            flush_threshold: 20,
            cache_capacity: 1 << 16,
            cond_set_capacity: 1 << 16,
            remote_timeout: Duration::from_secs(60),
            batch_get_size: 100,
        }
    }
}

impl StoreConfig {
    /// The configured flush threshold clamped to [`MAX_FLUSH_THRESHOLD`].
    #[must_use]
    pub(crate) fn effective_flush_threshold(&self) -> usize {
        self.flush_threshold.min(MAX_FLUSH_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let config = StoreConfig::default();
        assert_eq!(config.num_shards, 16);
        assert_eq!(config.queue_capacity, 1 << 16);
        assert_eq!(config.flush_threshold, 20);
        assert_eq!(config.cache_capacity, 1 << 16);
        assert_eq!(config.cond_set_capacity, 1 << 16);
        assert_eq!(config.remote_timeout, Duration::from_secs(60));
        assert_eq!(config.batch_get_size, 100);
    }

    #[test]
    fn flush_threshold_is_clamped() {
        let config = StoreConfig {
            flush_threshold: 100,
            ..StoreConfig::default()
        };
        assert_eq!(config.effective_flush_threshold(), MAX_FLUSH_THRESHOLD);

        let config = StoreConfig {
            flush_threshold: 5,
            ..StoreConfig::default()
        };
        assert_eq!(config.effective_flush_threshold(), 5);
    }
}
