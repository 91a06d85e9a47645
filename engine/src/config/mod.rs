// Configuration types for the engine

/// Configuration for the crawler engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum number of concurrent requests
    pub concurrent_requests: usize,

    /// Capacity of the channel feeding the item pipelines
    pub concurrent_items: usize,

    /// Stop scheduling new requests once this many items were scraped
    pub closespider_itemcount: Option<usize>,

    /// Whether to log stats
    pub log_stats: bool,

    /// Interval for logging stats in seconds
    pub stats_interval_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrent_requests: 16,
            concurrent_items: 100,
            closespider_itemcount: None,
            log_stats: true,
            stats_interval_secs: 60,
        }
    }
}
