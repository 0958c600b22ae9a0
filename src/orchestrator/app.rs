//! 应用入口 - 编排层
//!
//! ## 职责
//!
//! 本模块是程序的顶层，负责资源的创建、注入和回收。
//!
//! ## 核心功能
//!
//! 1. **应用初始化**：日志文件、浏览器、存储、缓存、指标、LLM、provider 工厂
//! 2. **恢复**：把上次进程遗留的未完成任务标记为失败
//! 3. **投递**：扫描 TOML 投递目录，逐篇提交，等待全部结束
//! 4. **文件清理**：发布成功的投递文件删除，失败的保留以便排查
//! 5. **HTTP 接口**：配置了监听地址时常驻，直到 Ctrl-C
//! 6. **全局统计**：汇总完成/失败/取消数量和花费
//!
//! ## 设计特点
//!
//! - **资源所有者**：唯一持有 Browser、TaskStore、指标采集器的模块
//! - **向下委托**：单篇文章的发布完全交给 `PublishService`

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::browser::BrowserHandle;
use crate::config::Config;
use crate::infrastructure::PageSource;
use crate::instrumentation::{LocatorCache, MetricsCollector, OperationStats, PerformanceTracker};
use crate::models::{load_all_submissions, TaskId, TaskStatus};
use crate::orchestrator::PublishService;
use crate::providers::DefaultProviderFactory;
use crate::server;
use crate::services::{LlmService, Reasoner, ScreenshotWriter};
use crate::store::TaskStore;
use crate::utils::logging::{
    init_log_file, log_startup, log_submissions_loaded, print_final_stats, RunStats,
};

/// 轮询任务终态的间隔
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// 应用主结构
pub struct App {
    config: Config,
    browser: Arc<BrowserHandle>,
    service: Arc<PublishService>,
}

impl App {
    /// 初始化应用
    pub async fn initialize(config: Config) -> Result<Self> {
        init_log_file(&config.output_log_file)?;
        log_startup(config.max_concurrent_tasks, &config.cms_site_url);

        let browser = BrowserHandle::start(&config).await?;
        let store = TaskStore::open(&config.store_dir)
            .await
            .with_context(|| format!("无法打开任务存储: {}", config.store_dir))?;

        let cache = Arc::new(LocatorCache::new(config.selector_cache_ttl()));
        let metrics = Arc::new(MetricsCollector::new()?);
        metrics.attach_cache(cache.clone());
        let perf = Arc::new(PerformanceTracker::default());

        let reasoner: Option<Arc<dyn Reasoner>> = if config.llm_api_key.trim().is_empty() {
            warn!("⚠️ 未配置 LLM_API_KEY，AI 代理 provider 不可用");
            None
        } else {
            Some(Arc::new(LlmService::new(&config)))
        };
        let screenshots = Arc::new(ScreenshotWriter::new(&config.screenshot_dir));

        // 浏览器句柄同时作为页面来源交给 provider
        let browser = Arc::new(browser);
        let pages: Arc<dyn PageSource> = browser.clone();
        let factory = Arc::new(DefaultProviderFactory::new(
            &config,
            pages,
            cache,
            reasoner,
            screenshots,
        ));
        let service = Arc::new(PublishService::new(&config, store, factory, metrics, perf));
        service.recover_interrupted().await?;

        Ok(Self {
            config,
            browser,
            service,
        })
    }

    /// 运行应用主逻辑
    pub async fn run(self) -> Result<()> {
        let shutdown = CancellationToken::new();
        let http = self.config.http_bind.clone().map(|bind| {
            let service = self.service.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                if let Err(e) = server::serve(&bind, service, shutdown).await {
                    error!("❌ HTTP 接口异常退出: {}", e);
                }
            })
        });

        let stats = self.process_intake().await?;

        if let Some(http) = http {
            info!("💡 HTTP 接口运行中，按 Ctrl-C 退出");
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("⚠️ 无法监听 Ctrl-C: {}", e);
            }
            shutdown.cancel();
            let _ = http.await;
            let running = self.service.running();
            if running > 0 {
                info!("⏳ 等待 {} 个运行中的任务结束...", running);
            }
        }

        self.service.shutdown().await;
        self.browser.shutdown().await;

        if let Some(stats) = stats {
            print_final_stats(&stats, &self.config.output_log_file);
        }
        log_operation_stats(&self.service.performance().all_stats());
        Ok(())
    }

    /// 处理投递目录；目录不存在或为空时返回 None
    async fn process_intake(&self) -> Result<Option<RunStats>> {
        info!("\n📁 正在扫描待发布的文章...");
        let submissions = match load_all_submissions(&self.config.intake_folder).await {
            Ok(submissions) => submissions,
            Err(e) => {
                warn!("⚠️ {}", e);
                return Ok(None);
            }
        };
        if submissions.is_empty() {
            warn!("⚠️ 没有找到待处理的TOML文件");
            return Ok(None);
        }
        log_submissions_loaded(submissions.len(), self.config.max_concurrent_tasks);

        let mut submitted: Vec<(TaskId, Option<PathBuf>)> = Vec::new();
        let mut stats = RunStats {
            total: submissions.len(),
            ..Default::default()
        };
        for submission in submissions {
            let file = submission.file_path.clone();
            match self.service.submit_submission(submission).await {
                Ok(task_id) => submitted.push((task_id, file)),
                Err(e) => {
                    error!(
                        "❌ 提交失败 ({}): {}",
                        file.as_deref().map(|p| p.display().to_string()).unwrap_or_default(),
                        e
                    );
                    stats.failed += 1;
                }
            }
        }

        for (task_id, file) in submitted {
            let (status, cost) = self.wait_for_terminal(&task_id).await?;
            match status {
                TaskStatus::Completed => {
                    stats.completed += 1;
                    if let Some(path) = file {
                        cleanup_file(&path).await;
                    }
                }
                TaskStatus::Cancelled => stats.cancelled += 1,
                _ => stats.failed += 1,
            }
            stats.total_cost_usd += cost;
        }
        Ok(Some(stats))
    }

    /// 等待任务进入终态，返回 (终态, 花费)
    async fn wait_for_terminal(&self, task_id: &TaskId) -> Result<(TaskStatus, f64)> {
        loop {
            let task = self.service.get_task(task_id).await?;
            if task.status.is_terminal() {
                let cost = match (&task.result, &task.error) {
                    (Some(result), _) => result.cost_estimate_usd,
                    (None, Some(error)) => error.cost_usd,
                    (None, None) => 0.0,
                };
                return Ok((task.status, cost));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

/// 按操作输出耗时统计
fn log_operation_stats(stats: &BTreeMap<String, OperationStats>) {
    if stats.is_empty() {
        return;
    }
    info!("⏱️ 操作耗时统计:");
    for (operation, s) in stats {
        info!(
            "  {:<16} 次数 {:>4} | 失败 {:>3} | 平均 {:>7.2}s | 最短 {:>7.2}s | 最长 {:>7.2}s",
            operation,
            s.count,
            s.failures,
            s.avg.as_secs_f64(),
            s.min.as_secs_f64(),
            s.max.as_secs_f64()
        );
    }
}

/// 删除已发布成功的投递文件
async fn cleanup_file(path: &std::path::Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => info!("🗑️ 已删除投递文件: {}", path.display()),
        Err(e) => warn!("⚠️ 删除投递文件失败 {}: {}", path.display(), e),
    }
}
