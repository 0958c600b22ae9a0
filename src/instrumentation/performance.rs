//! 操作耗时记录
//!
//! 每次 provider 操作记录一条 {开始, 结束, 是否成功}，按需计算平均/最小/最大耗时。

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::models::ProviderKind;

/// 最多保留的记录条数
const DEFAULT_CAPACITY: usize = 10_000;

/// 一次操作的记录
#[derive(Debug, Clone, Serialize)]
pub struct OperationRecord {
    pub operation: String,
    pub provider: ProviderKind,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration: Duration,
    pub success: bool,
}

/// 计时句柄，由 [`PerformanceTracker::start`] 返回
#[derive(Debug)]
pub struct OperationTimer {
    operation: String,
    provider: ProviderKind,
    started_at: DateTime<Utc>,
    started: Instant,
}

impl OperationTimer {
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// 单个操作的统计
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationStats {
    pub count: usize,
    pub successes: usize,
    pub failures: usize,
    pub avg: Duration,
    pub min: Duration,
    pub max: Duration,
}

/// 性能记录器
pub struct PerformanceTracker {
    capacity: usize,
    records: Mutex<VecDeque<OperationRecord>>,
}

impl Default for PerformanceTracker {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl PerformanceTracker {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            records: Mutex::new(VecDeque::new()),
        }
    }

    pub fn start(&self, operation: impl Into<String>, provider: ProviderKind) -> OperationTimer {
        OperationTimer {
            operation: operation.into(),
            provider,
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    /// 结束计时并保存记录
    pub fn finish(&self, timer: OperationTimer, success: bool) -> OperationRecord {
        let record = OperationRecord {
            duration: timer.started.elapsed(),
            operation: timer.operation,
            provider: timer.provider,
            started_at: timer.started_at,
            ended_at: Utc::now(),
            success,
        };

        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record.clone());
        record
    }

    /// 某个操作的统计（跨 provider）
    pub fn stats(&self, operation: &str) -> Option<OperationStats> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        summarize(records.iter().filter(|r| r.operation == operation))
    }

    /// 某个 provider 下某个操作的统计
    pub fn stats_for(&self, provider: ProviderKind, operation: &str) -> Option<OperationStats> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        summarize(
            records
                .iter()
                .filter(|r| r.provider == provider && r.operation == operation),
        )
    }

    /// 全部操作的统计，按操作名排序
    pub fn all_stats(&self) -> BTreeMap<String, OperationStats> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let mut grouped: BTreeMap<String, Vec<&OperationRecord>> = BTreeMap::new();
        for record in records.iter() {
            grouped.entry(record.operation.clone()).or_default().push(record);
        }
        grouped
            .into_iter()
            .filter_map(|(op, recs)| summarize(recs.into_iter()).map(|s| (op, s)))
            .collect()
    }
}

fn summarize<'a>(records: impl Iterator<Item = &'a OperationRecord>) -> Option<OperationStats> {
    let mut count = 0usize;
    let mut successes = 0usize;
    let mut total = Duration::ZERO;
    let mut min = Duration::MAX;
    let mut max = Duration::ZERO;

    for record in records {
        count += 1;
        if record.success {
            successes += 1;
        }
        total += record.duration;
        min = min.min(record.duration);
        max = max.max(record.duration);
    }

    if count == 0 {
        return None;
    }

    Some(OperationStats {
        count,
        successes,
        failures: count - successes,
        avg: total / count as u32,
        min,
        max,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_min_max_avg() {
        let tracker = PerformanceTracker::default();

        let t1 = tracker.start("login", ProviderKind::Deterministic);
        std::thread::sleep(Duration::from_millis(5));
        tracker.finish(t1, true);

        let t2 = tracker.start("login", ProviderKind::Deterministic);
        std::thread::sleep(Duration::from_millis(20));
        tracker.finish(t2, false);

        let stats = tracker.stats("login").unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.successes, 1);
        assert_eq!(stats.failures, 1);
        assert!(stats.min <= stats.avg && stats.avg <= stats.max);
        assert!(stats.max >= Duration::from_millis(20));
        assert!(tracker.stats("publish").is_none());
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let tracker = PerformanceTracker::with_capacity(2);
        for op in ["a", "b", "c"] {
            let t = tracker.start(op, ProviderKind::Agent);
            tracker.finish(t, true);
        }
        let all = tracker.all_stats();
        assert!(!all.contains_key("a"));
        assert_eq!(all.len(), 2);
        assert!(tracker.stats_for(ProviderKind::Agent, "c").is_some());
        assert!(tracker.stats_for(ProviderKind::Deterministic, "c").is_none());
    }
}
