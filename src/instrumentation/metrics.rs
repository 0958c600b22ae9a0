//! 指标采集（Prometheus）
//!
//! 由程序入口创建并注入，不使用全局注册表。通过 [`MetricsCollector::export_text`]
//! 拉取 Prometheus 文本格式，或通过 [`MetricsCollector::snapshot`] 拉取 JSON 结构。

use prometheus::{
    Counter, CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, IntCounter, IntCounterVec,
    Opts, Registry, TextEncoder,
};
use serde::Serialize;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::error::AppError;
use crate::instrumentation::selector_cache::{CacheStats, CacheStatsSource};
use crate::models::{Phase, ProviderKind, TaskStatus};

/// 单个 provider 的汇总
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderMetrics {
    pub provider: ProviderKind,
    pub tasks_succeeded: u64,
    pub tasks_failed: u64,
    pub cost_usd: f64,
}

/// 单个操作的汇总
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationMetrics {
    pub provider: ProviderKind,
    pub operation: String,
    pub count: u64,
    pub failures: u64,
    pub total_seconds: f64,
    pub cost_usd: f64,
}

/// 指标快照
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub providers: Vec<ProviderMetrics>,
    pub operations: Vec<OperationMetrics>,
    pub fallbacks: u64,
    pub tasks_cancelled: u64,
    pub cache: CacheStats,
    pub cache_hit_ratio: f64,
    pub total_cost_usd: f64,
}

/// 指标采集器
pub struct MetricsCollector {
    registry: Registry,
    tasks_total: IntCounterVec,
    tasks_cancelled: IntCounter,
    operation_duration: HistogramVec,
    operation_failures: IntCounterVec,
    fallbacks: IntCounter,
    cost_usd: CounterVec,
    cost_total: Counter,
    operation_cost: CounterVec,
    cache_hit_ratio: Gauge,
    cache_source: RwLock<Option<Arc<dyn CacheStatsSource>>>,
}

impl MetricsCollector {
    pub fn new() -> Result<Self, AppError> {
        let registry = Registry::new();

        let tasks_total = IntCounterVec::new(
            Opts::new("publish_tasks_total", "发布任务结果（按最终 provider）"),
            &["provider", "outcome"],
        )?;
        let tasks_cancelled =
            IntCounter::new("publish_tasks_cancelled_total", "被取消的发布任务数")?;
        let operation_duration = HistogramVec::new(
            HistogramOpts::new("provider_operation_duration_seconds", "provider 单次操作耗时")
                .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
            &["provider", "operation"],
        )?;
        let operation_failures = IntCounterVec::new(
            Opts::new("provider_operation_failures_total", "provider 操作失败次数"),
            &["provider", "operation"],
        )?;
        let fallbacks = IntCounter::new("provider_fallbacks_total", "触发兜底 provider 的次数")?;
        let cost_usd = CounterVec::new(
            Opts::new("publish_cost_usd_total", "预估花费（美元，按 provider）"),
            &["provider"],
        )?;
        let cost_total = Counter::new("publish_cost_usd_sum", "预估花费总计（美元）")?;
        let operation_cost = CounterVec::new(
            Opts::new("provider_operation_cost_usd_total", "单个操作的预估花费（美元）"),
            &["provider", "operation"],
        )?;
        let cache_hit_ratio = Gauge::new("selector_cache_hit_ratio", "定位器缓存命中率")?;

        registry.register(Box::new(tasks_total.clone()))?;
        registry.register(Box::new(tasks_cancelled.clone()))?;
        registry.register(Box::new(operation_duration.clone()))?;
        registry.register(Box::new(operation_failures.clone()))?;
        registry.register(Box::new(fallbacks.clone()))?;
        registry.register(Box::new(cost_usd.clone()))?;
        registry.register(Box::new(cost_total.clone()))?;
        registry.register(Box::new(operation_cost.clone()))?;
        registry.register(Box::new(cache_hit_ratio.clone()))?;

        Ok(Self {
            registry,
            tasks_total,
            tasks_cancelled,
            operation_duration,
            operation_failures,
            fallbacks,
            cost_usd,
            cost_total,
            operation_cost,
            cache_hit_ratio,
            cache_source: RwLock::new(None),
        })
    }

    /// 挂接定位器缓存，导出时读取命中率
    pub fn attach_cache(&self, source: Arc<dyn CacheStatsSource>) {
        if let Ok(mut slot) = self.cache_source.write() {
            *slot = Some(source);
        }
    }

    pub fn record_operation(
        &self,
        provider: ProviderKind,
        phase: Phase,
        elapsed: Duration,
        success: bool,
    ) {
        let labels = [provider.as_str(), phase.as_str()];
        self.operation_duration
            .with_label_values(&labels)
            .observe(elapsed.as_secs_f64());
        if !success {
            self.operation_failures.with_label_values(&labels).inc();
        }
    }

    /// 记录任务终态；取消的任务不计入 provider 成败
    pub fn record_task(&self, provider: Option<ProviderKind>, status: TaskStatus) {
        match (status, provider) {
            (TaskStatus::Cancelled, _) => self.tasks_cancelled.inc(),
            (TaskStatus::Completed, Some(p)) => {
                self.tasks_total.with_label_values(&[p.as_str(), "success"]).inc()
            }
            (TaskStatus::Failed, Some(p)) => {
                self.tasks_total.with_label_values(&[p.as_str(), "failure"]).inc()
            }
            (TaskStatus::Failed, None) => {
                self.tasks_total.with_label_values(&["none", "failure"]).inc()
            }
            _ => {}
        }
    }

    pub fn record_fallback(&self) {
        self.fallbacks.inc();
    }

    pub fn add_cost(&self, provider: ProviderKind, usd: f64) {
        if usd > 0.0 && usd.is_finite() {
            self.cost_usd.with_label_values(&[provider.as_str()]).inc_by(usd);
            self.cost_total.inc_by(usd);
        }
    }

    /// 单个操作的花费；会话合计仍由 `add_cost` 在任务结束时记录
    pub fn record_operation_cost(&self, provider: ProviderKind, phase: Phase, usd: f64) {
        if usd > 0.0 && usd.is_finite() {
            self.operation_cost
                .with_label_values(&[provider.as_str(), phase.as_str()])
                .inc_by(usd);
        }
    }

    fn cache_stats(&self) -> CacheStats {
        self.cache_source
            .read()
            .ok()
            .and_then(|slot| slot.as_ref().map(|s| s.cache_stats()))
            .unwrap_or_default()
    }

    fn refresh_gauges(&self) -> CacheStats {
        let stats = self.cache_stats();
        self.cache_hit_ratio.set(stats.hit_ratio());
        stats
    }

    /// Prometheus 文本格式导出
    pub fn export_text(&self) -> Result<String, AppError> {
        self.refresh_gauges();
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| AppError::Other(format!("指标编码失败: {}", e)))
    }

    /// JSON 快照
    pub fn snapshot(&self) -> MetricsSnapshot {
        let cache = self.refresh_gauges();

        let providers = ProviderKind::ALL
            .iter()
            .map(|p| ProviderMetrics {
                provider: *p,
                tasks_succeeded: self
                    .tasks_total
                    .with_label_values(&[p.as_str(), "success"])
                    .get(),
                tasks_failed: self
                    .tasks_total
                    .with_label_values(&[p.as_str(), "failure"])
                    .get(),
                cost_usd: self.cost_usd.with_label_values(&[p.as_str()]).get(),
            })
            .collect();

        let mut operations = Vec::new();
        for provider in ProviderKind::ALL {
            for phase in Phase::ATTEMPT_STEPS
                .iter()
                .chain(std::iter::once(&Phase::SaveDraft))
            {
                let labels = [provider.as_str(), phase.as_str()];
                let histogram = self.operation_duration.with_label_values(&labels);
                let count = histogram.get_sample_count();
                if count == 0 {
                    continue;
                }
                operations.push(OperationMetrics {
                    provider,
                    operation: phase.as_str().to_string(),
                    count,
                    failures: self.operation_failures.with_label_values(&labels).get(),
                    total_seconds: histogram.get_sample_sum(),
                    cost_usd: self.operation_cost.with_label_values(&labels).get(),
                });
            }
        }

        MetricsSnapshot {
            providers,
            operations,
            fallbacks: self.fallbacks.get(),
            tasks_cancelled: self.tasks_cancelled.get(),
            cache_hit_ratio: cache.hit_ratio(),
            cache,
            total_cost_usd: self.cost_total.get(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrumentation::selector_cache::{LocatorCache, SelectorKey, DEFAULT_SELECTOR_TTL};

    #[test]
    fn test_snapshot_counts() {
        let metrics = MetricsCollector::new().unwrap();
        metrics.record_operation(
            ProviderKind::Deterministic,
            Phase::Login,
            Duration::from_millis(120),
            true,
        );
        metrics.record_operation(
            ProviderKind::Deterministic,
            Phase::Login,
            Duration::from_millis(80),
            false,
        );
        metrics.record_task(Some(ProviderKind::Agent), TaskStatus::Completed);
        metrics.record_task(None, TaskStatus::Cancelled);
        metrics.record_fallback();
        metrics.add_cost(ProviderKind::Agent, 0.25);
        metrics.add_cost(ProviderKind::Agent, 0.5);
        metrics.record_operation(
            ProviderKind::Agent,
            Phase::CreateArticle,
            Duration::from_millis(900),
            true,
        );
        metrics.record_operation_cost(ProviderKind::Agent, Phase::CreateArticle, 0.04);

        let snapshot = metrics.snapshot();
        let login = snapshot
            .operations
            .iter()
            .find(|o| o.operation == "login")
            .unwrap();
        assert_eq!(login.count, 2);
        assert_eq!(login.failures, 1);
        assert_eq!(snapshot.fallbacks, 1);
        assert_eq!(snapshot.tasks_cancelled, 1);
        let agent = snapshot
            .providers
            .iter()
            .find(|p| p.provider == ProviderKind::Agent)
            .unwrap();
        assert_eq!(agent.tasks_succeeded, 1);
        assert!((snapshot.total_cost_usd - 0.75).abs() < 1e-9);
        let create = snapshot
            .operations
            .iter()
            .find(|o| o.provider == ProviderKind::Agent && o.operation == "create_article")
            .unwrap();
        assert!((create.cost_usd - 0.04).abs() < 1e-9);
        assert_eq!(login.cost_usd, 0.0);
    }

    #[test]
    fn test_export_text_includes_cache_ratio() {
        let metrics = MetricsCollector::new().unwrap();
        let cache = Arc::new(LocatorCache::new(DEFAULT_SELECTOR_TTL));
        let key = SelectorKey::new("editor", "editor.title");
        cache.insert(key.clone(), "h1".into());
        cache.get(&key);
        metrics.attach_cache(cache);

        let text = metrics.export_text().unwrap();
        assert!(text.contains("selector_cache_hit_ratio 1"));
        assert!(text.contains("provider_fallbacks_total 0"));
    }
}
