//! 横切的观测能力：定位器缓存、耗时记录、指标采集
//!
//! 三者都由程序入口创建，通过 `Arc` 注入 provider 和编排层

pub mod metrics;
pub mod performance;
pub mod selector_cache;

pub use metrics::{MetricsCollector, MetricsSnapshot};
pub use performance::{OperationStats, PerformanceTracker};
pub use selector_cache::{
    CacheStats, CacheStatsSource, LocatorCache, SelectorCache, SelectorKey, DEFAULT_SELECTOR_TTL,
};
