//! 通用 TTL 缓存
//!
//! 确定性 provider 用它缓存"语义选择器 → 实际定位器"的解析结果。
//! 进程内共享，底层是 moka 并发缓存，可被多个 worker 同时访问。

use moka::sync::Cache;
use serde::Serialize;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// 缓存统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
    pub entries: u64,
}

impl CacheStats {
    /// 命中率，未访问过时为 0
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// 能提供缓存统计的对象（供指标采集使用）
pub trait CacheStatsSource: Send + Sync {
    fn cache_stats(&self) -> CacheStats;
}

/// TTL 缓存，过期由 moka 负责
pub struct SelectorCache<K, V> {
    ttl: Duration,
    cache: Cache<K, V>,
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
}

/// 定位器缓存的键：(页面上下文, 语义选择器 ID)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SelectorKey {
    pub page_context: String,
    pub selector_id: String,
}

impl SelectorKey {
    pub fn new(page_context: impl Into<String>, selector_id: impl Into<String>) -> Self {
        Self {
            page_context: page_context.into(),
            selector_id: selector_id.into(),
        }
    }
}

/// 确定性 provider 使用的定位器缓存
pub type LocatorCache = SelectorCache<SelectorKey, String>;

/// 默认 TTL 300 秒
pub const DEFAULT_SELECTOR_TTL: Duration = Duration::from_secs(300);

impl<K, V> SelectorCache<K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            cache: Cache::builder().time_to_live(ttl).build(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    /// 查询；过期条目视为未命中
    pub fn get(&self, key: &K) -> Option<V> {
        let value = self.cache.get(key);
        if value.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        value
    }

    pub fn insert(&self, key: K, value: V) {
        self.cache.insert(key, value);
    }

    /// 失效一个条目，返回是否确实存在
    pub fn invalidate(&self, key: &K) -> bool {
        let removed = self.cache.remove(key).is_some();
        if removed {
            self.invalidations.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    pub fn stats(&self) -> CacheStats {
        // entry_count 是最终一致的，先处理掉挂起的过期和写入
        self.cache.run_pending_tasks();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            entries: self.cache.entry_count(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

impl<K, V> CacheStatsSource for SelectorCache<K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn cache_stats(&self) -> CacheStats {
        self.stats()
    }
}
