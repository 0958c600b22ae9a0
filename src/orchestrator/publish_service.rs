//! 发布服务 - 对外接口
//!
//! ## 职责
//!
//! 本模块是库的对外入口，HTTP 接口和 TOML 投递都只调用这里。
//!
//! - `submit`：形状校验 → 建任务 → 入队
//! - `get_status` / `get_logs` / `summary`：只读查询
//! - `cancel`：终态冲突、排队中直接取消、运行中发信号由流程在阶段边界处理
//! - `metrics_text` / `metrics_snapshot`：指标导出
//! - `recover_interrupted`：进程重启后收尾上次未完成的任务

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult, PublishError, StoreError};
use crate::instrumentation::{MetricsCollector, MetricsSnapshot, PerformanceTracker};
use crate::models::{
    phase_history, Article, ArticleMetadata, ArticleRef, ArticleSnapshot, ArticleSubmission,
    EventSummary, EventType, ExecutionEvent, NewEvent, Phase, ProviderPreference, PublishIntent,
    PublishTask, TaskError, TaskId, TaskResult, TaskStatus,
};
use crate::models::short_id;
use crate::orchestrator::worker_pool::{CancelRegistry, WorkerPool};
use crate::providers::ProviderFactory;
use crate::store::TaskStore;
use crate::workflow::{safety, PublishFlow, PublishJob, TaskCtx};

/// 任务状态视图（`get_status` 的返回值）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskStatusView {
    pub task_id: TaskId,
    pub status: TaskStatus,
    /// 0–100
    pub progress: u8,
    pub current_phase: Phase,
    pub retry_count: u32,
    pub result: Option<TaskResult>,
    pub error: Option<TaskError>,
    pub draft_url: Option<String>,
}

impl From<&PublishTask> for TaskStatusView {
    fn from(task: &PublishTask) -> Self {
        let progress = match task.status {
            TaskStatus::Completed => 100,
            _ => task.current_phase.progress(),
        };
        Self {
            task_id: task.id,
            status: task.status,
            progress,
            current_phase: task.current_phase,
            retry_count: task.retry_count,
            result: task.result.clone(),
            error: task.error.clone(),
            draft_url: task.draft_url.clone(),
        }
    }
}

enum CancelCheck {
    Terminal(TaskStatus),
    CancelledWhilePending(Phase),
    Signalled,
}

/// 发布服务
pub struct PublishService {
    store: TaskStore,
    pool: WorkerPool,
    cancels: Arc<CancelRegistry>,
    metrics: Arc<MetricsCollector>,
    perf: Arc<PerformanceTracker>,
    default_preference: ProviderPreference,
}

impl PublishService {
    /// 创建服务并启动工作池
    pub fn new(
        config: &Config,
        store: TaskStore,
        factory: Arc<dyn ProviderFactory>,
        metrics: Arc<MetricsCollector>,
        perf: Arc<PerformanceTracker>,
    ) -> Self {
        let flow = Arc::new(PublishFlow::new(
            config,
            store.clone(),
            factory,
            metrics.clone(),
            perf.clone(),
        ));
        let cancels = Arc::new(CancelRegistry::default());
        let pool = WorkerPool::start(
            flow,
            store.clone(),
            cancels.clone(),
            config.max_concurrent_tasks,
        );
        Self {
            store,
            pool,
            cancels,
            metrics,
            perf,
            default_preference: config.provider_preference(),
        }
    }

    /// 提交一篇文章，返回任务 ID
    ///
    /// 输入形状不合法时返回 `ValidationError`，此时不会创建任务
    pub async fn submit(
        &self,
        article: Article,
        metadata: ArticleMetadata,
        preference: Option<ProviderPreference>,
        intent: PublishIntent,
    ) -> AppResult<TaskId> {
        let snapshot = ArticleSnapshot::new(article, metadata);
        safety::validate_submission(&snapshot, &intent, Utc::now())?;

        let preference = preference.unwrap_or(self.default_preference);
        let task = PublishTask::new(ArticleRef::from(&snapshot), preference, intent);
        let task_id = task.id;
        let ctx = TaskCtx::new(&task);
        self.store.insert_task(task).await?;

        let cancel = self.cancels.register(task_id);
        let queued = self.pool.enqueue(PublishJob {
            task_id,
            snapshot,
            cancel,
        });
        if !queued {
            self.cancels.remove(&task_id);
            return Err(AppError::Other("工作池已关闭，无法接收新任务".to_string()));
        }
        info!(
            "{} 📥 已入队 (provider: {:?})",
            ctx,
            preference.attempt_plan()
        );
        Ok(task_id)
    }

    /// 提交 TOML 投递文件中的文章
    pub async fn submit_submission(&self, submission: ArticleSubmission) -> AppResult<TaskId> {
        self.submit(
            submission.article,
            submission.metadata,
            submission.provider,
            submission.intent.unwrap_or(PublishIntent::PublishNow),
        )
        .await
    }

    pub async fn get_status(&self, task_id: &TaskId) -> AppResult<TaskStatusView> {
        let task = self.store.get_task(task_id).await.map_err(lookup_error)?;
        Ok(TaskStatusView::from(&task))
    }

    pub async fn get_task(&self, task_id: &TaskId) -> AppResult<PublishTask> {
        self.store.get_task(task_id).await.map_err(lookup_error)
    }

    /// 按序号排列的全部事件
    pub async fn get_logs(&self, task_id: &TaskId) -> AppResult<Vec<ExecutionEvent>> {
        self.store.events(task_id).await.map_err(lookup_error)
    }

    pub async fn summary(&self, task_id: &TaskId) -> AppResult<EventSummary> {
        self.store.summary(task_id).await.map_err(lookup_error)
    }

    pub async fn list_tasks(&self) -> Vec<PublishTask> {
        self.store.list_tasks().await
    }

    /// 取消任务
    ///
    /// - 终态：返回 `CannotCancelTask`，不做任何修改
    /// - 排队中：直接标记取消
    /// - 运行中：发出取消信号，流程在下一个阶段边界停止并清理
    pub async fn cancel(&self, task_id: &TaskId) -> AppResult<()> {
        let current = self.store.get_task(task_id).await.map_err(lookup_error)?;
        if current.status.is_terminal() {
            return Err(PublishError::CannotCancelTask {
                task_id: *task_id,
                status: current.status,
            }
            .into());
        }

        let check = self
            .store
            .update_task(task_id, |t| {
                if t.status.is_terminal() {
                    return CancelCheck::Terminal(t.status);
                }
                if t.status == TaskStatus::Pending {
                    t.status = TaskStatus::Cancelled;
                    t.completed_at = Some(Utc::now());
                    return CancelCheck::CancelledWhilePending(t.current_phase);
                }
                CancelCheck::Signalled
            })
            .await?;

        match check {
            CancelCheck::Terminal(status) => Err(PublishError::CannotCancelTask {
                task_id: *task_id,
                status,
            }
            .into()),
            CancelCheck::CancelledWhilePending(phase) => {
                self.cancels.cancel(task_id);
                self.store
                    .append(task_id, NewEvent::new(EventType::TaskCancelled, phase))
                    .await?;
                self.metrics.record_task(None, TaskStatus::Cancelled);
                info!("[任务 {}] 🛑 排队中的任务已取消", short_id(task_id));
                Ok(())
            }
            CancelCheck::Signalled => {
                if !self.cancels.cancel(task_id) {
                    warn!(
                        "⚠️ [任务 {}] 运行中但未找到取消令牌",
                        short_id(task_id)
                    );
                }
                info!("[任务 {}] 🛑 已发出取消信号", short_id(task_id));
                Ok(())
            }
        }
    }

    /// Prometheus 文本格式
    pub fn metrics_text(&self) -> AppResult<String> {
        self.metrics.export_text()
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn performance(&self) -> &PerformanceTracker {
        &self.perf
    }

    /// 把上次进程遗留的未完成任务标记为失败，返回处理数量
    ///
    /// 必须在提交新任务之前调用
    pub async fn recover_interrupted(&self) -> AppResult<usize> {
        let mut recovered = 0;
        for task in self.store.list_tasks().await {
            if task.status.is_terminal() {
                continue;
            }
            let phase = task.current_phase;
            self.store
                .append(
                    &task.id,
                    NewEvent::new(EventType::PublishFailed, phase).payload(serde_json::json!({
                        "error": "进程重启时任务未完成",
                        "kind": "Interrupted",
                    })),
                )
                .await?;
            let history = phase_history(&self.store.events(&task.id).await?);
            self.store
                .update_task(&task.id, |t| {
                    t.status = TaskStatus::Failed;
                    t.completed_at = Some(Utc::now());
                    t.error = Some(TaskError {
                        kind: "Interrupted".to_string(),
                        message: "进程重启时任务未完成".to_string(),
                        provider: None,
                        phase,
                        phase_history: history,
                        cost_usd: 0.0,
                    });
                })
                .await?;
            recovered += 1;
        }
        if recovered > 0 {
            warn!("⚠️ {} 个上次未完成的任务已标记为失败", recovered);
        }
        Ok(recovered)
    }

    /// 正在运行的任务数
    pub fn running(&self) -> usize {
        self.pool.running()
    }

    /// 停止接收新任务，等待已提交的任务全部结束并落盘
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
        self.store.flush().await;
    }
}

/// 查询类接口把"任务不存在"归为发布错误
fn lookup_error(err: StoreError) -> AppError {
    match err {
        StoreError::TaskNotFound(id) => PublishError::TaskNotFound(id).into(),
        other => other.into(),
    }
}
