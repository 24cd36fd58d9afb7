//! Configuration structures and global constants.
//!
//! All tunables are carried by explicit config structs validated once at
//! construction time. Invalid configuration is a programmer error and panics
//! immediately rather than surfacing later as a runtime failure.

use std::time::Duration;

/// Every buffer allocation must be a positive multiple of this.
pub const PAGE_ALIGNMENT: usize = 512;

/// Start-address alignment required when reinterpreting an existing byte
/// region as a header-carrying buffer.
pub const CELL_ALIGNMENT: usize = 8;

/// Smallest supported page size.
pub const MIN_PAGE_SIZE: usize = 512;

/// Largest supported page size.
pub const MAX_PAGE_SIZE: usize = 65536;

/// Default page size (4KB).
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Smallest usable pool. An overflow page can make one frame unevictable,
/// so a pool of one frame could wedge completely.
pub const MIN_POOL_SIZE: usize = 2;

/// Default number of frames in the cache.
pub const DEFAULT_POOL_SIZE: usize = 1000;

/// Default maximum percentage of frames that may be pinned at once.
pub const DEFAULT_PIN_PERCENTAGE_LIMIT: f32 = 50.0;

/// Default K for LRU-K eviction.
pub const DEFAULT_LRU_K: usize = 2;

/// Default correlated reference period, in logical clock ticks.
pub const DEFAULT_CRP: u64 = 0;

/// Default number of requests that triggers a disk batch flush.
pub const DEFAULT_BATCH_SIZE: usize = 64;

/// Default interval after which a partial disk batch is flushed anyway.
pub const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_millis(10);

/// Buffer pool configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of frames.
    pub max_size: usize,
    /// Size in bytes of every cached page.
    pub page_size: usize,
    /// Percentage (0..=100) of frames that may be pinned concurrently.
    pub pin_percentage_limit: f32,
    /// LRU-K order. Must be at least 1.
    pub k: usize,
    /// Correlated reference period in logical clock ticks.
    pub crp: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            max_size: DEFAULT_POOL_SIZE,
            page_size: DEFAULT_PAGE_SIZE,
            pin_percentage_limit: DEFAULT_PIN_PERCENTAGE_LIMIT,
            k: DEFAULT_LRU_K,
            crp: DEFAULT_CRP,
        }
    }
}

impl CacheConfig {
    /// Panics on invalid configuration. Called once by [`crate::Cache::new`].
    pub fn validate(&self) {
        assert!(
            self.max_size >= MIN_POOL_SIZE,
            "buffer pool size must be at least {MIN_POOL_SIZE}, got {}",
            self.max_size
        );
        assert!(
            (MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&self.page_size)
                && self.page_size.is_power_of_two(),
            "page size must be a power of two between {MIN_PAGE_SIZE} and {MAX_PAGE_SIZE}, got {}",
            self.page_size
        );
        assert!(
            (0.0..=100.0).contains(&self.pin_percentage_limit),
            "pin_percentage_limit must be a percentage (0..=100), got {}",
            self.pin_percentage_limit
        );
        assert!(self.k >= 1, "K must be at least 1");
    }
}

/// Disk scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of queued requests that triggers a batch flush.
    pub batch_size: usize,
    /// A partial batch is flushed once this long has passed since the last
    /// flush.
    pub batch_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            batch_size: DEFAULT_BATCH_SIZE,
            batch_timeout: DEFAULT_BATCH_TIMEOUT,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) {
        assert!(self.batch_size >= 1, "batch size must be at least 1");
        assert!(
            !self.batch_timeout.is_zero(),
            "batch timeout must be non-zero"
        );
    }
}

/// Top-level pager configuration.
#[derive(Debug, Clone, Default)]
pub struct PagerConfig {
    pub cache: CacheConfig,
    pub scheduler: SchedulerConfig,
}
