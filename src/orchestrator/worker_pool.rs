//! 有界工作池 - 编排层
//!
//! ## 职责
//!
//! 1. **排队**：提交的任务进入 mpsc 队列，按提交顺序取出
//! 2. **并发控制**：Semaphore 限制同时运行的任务数
//! 3. **隔离**：每个任务在独立的 tokio 任务中运行，panic 不影响其它任务
//! 4. **取消登记**：运行中任务的 CancellationToken 登记在这里，结束后移除
//! 5. **优雅退出**：关闭队列，等队列排空、所有运行中的任务结束

use chrono::Utc;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::models::{short_id, TaskError, TaskId, TaskStatus};
use crate::store::TaskStore;
use crate::workflow::{PublishFlow, PublishJob};

/// 任务 ID → 取消令牌
#[derive(Default)]
pub struct CancelRegistry {
    tokens: Mutex<HashMap<TaskId, CancellationToken>>,
}

impl CancelRegistry {
    /// 登记任务，返回它的令牌
    pub fn register(&self, task_id: TaskId) -> CancellationToken {
        let token = CancellationToken::new();
        self.lock().insert(task_id, token.clone());
        token
    }

    /// 触发取消；任务不在登记表中返回 false
    pub fn cancel(&self, task_id: &TaskId) -> bool {
        match self.lock().get(task_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, task_id: &TaskId) {
        self.lock().remove(task_id);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<TaskId, CancellationToken>> {
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// 有界工作池
pub struct WorkerPool {
    queue: Mutex<Option<mpsc::UnboundedSender<PublishJob>>>,
    dispatcher: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
}

impl WorkerPool {
    /// 启动调度循环
    pub fn start(
        flow: Arc<PublishFlow>,
        store: TaskStore,
        registry: Arc<CancelRegistry>,
        max_concurrent: usize,
    ) -> Self {
        let max_concurrent = max_concurrent.max(1);
        let semaphore = Arc::new(Semaphore::new(max_concurrent));
        let (tx, rx) = mpsc::unbounded_channel();

        let dispatcher = tokio::spawn(dispatch_loop(
            rx,
            flow,
            store,
            registry,
            semaphore.clone(),
        ));
        info!("🚀 工作池已启动 (并发上限: {})", max_concurrent);

        Self {
            queue: Mutex::new(Some(tx)),
            dispatcher: tokio::sync::Mutex::new(Some(dispatcher)),
            semaphore,
            max_concurrent,
        }
    }

    /// 放入队列；池已关闭时返回 false
    pub fn enqueue(&self, job: PublishJob) -> bool {
        let queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        match queue.as_ref() {
            Some(tx) => tx.send(job).is_ok(),
            None => false,
        }
    }

    /// 正在运行的任务数
    pub fn running(&self) -> usize {
        self.max_concurrent - self.semaphore.available_permits()
    }

    /// 停止接收新任务，等已排队和运行中的任务全部结束
    pub async fn shutdown(&self) {
        let sender = self
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(sender);

        if let Some(dispatcher) = self.dispatcher.lock().await.take() {
            if let Err(e) = dispatcher.await {
                error!("❌ 调度循环异常退出: {}", e);
            }
        }
        // 拿到全部许可即表示没有任务在运行
        match self.semaphore.acquire_many(self.max_concurrent as u32).await {
            Ok(_all) => info!("✓ 工作池已排空"),
            Err(e) => warn!("⚠️ 等待任务结束失败: {}", e),
        }
    }
}

async fn dispatch_loop(
    mut rx: mpsc::UnboundedReceiver<PublishJob>,
    flow: Arc<PublishFlow>,
    store: TaskStore,
    registry: Arc<CancelRegistry>,
    semaphore: Arc<Semaphore>,
) {
    while let Some(job) = rx.recv().await {
        let permit = match semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        let flow = flow.clone();
        let store = store.clone();
        let registry = registry.clone();
        tokio::spawn(async move {
            let _permit = permit;
            run_job(&flow, &store, &registry, job).await;
        });
    }
    debug!("任务队列已关闭");
}

async fn run_job(flow: &PublishFlow, store: &TaskStore, registry: &CancelRegistry, job: PublishJob) {
    let task_id = job.task_id;
    match AssertUnwindSafe(flow.run(job)).catch_unwind().await {
        Ok(Ok(status)) => debug!("[任务 {}] 结束: {}", short_id(&task_id), status),
        Ok(Err(e)) => {
            error!("[任务 {}] ❌ 存储错误: {}", short_id(&task_id), e);
            mark_failed(store, &task_id, "StoreError", &e.to_string()).await;
        }
        Err(_) => {
            error!("[任务 {}] ❌ 编排流程 panic", short_id(&task_id));
            mark_failed(store, &task_id, "InternalError", "编排流程异常退出").await;
        }
    }
    registry.remove(&task_id);
}

/// 流程没能写入终态时兜底标记失败
async fn mark_failed(store: &TaskStore, task_id: &TaskId, kind: &str, message: &str) {
    let updated = store
        .update_task(task_id, |t| {
            if t.status.is_terminal() {
                return;
            }
            t.status = TaskStatus::Failed;
            t.completed_at = Some(Utc::now());
            t.error = Some(TaskError {
                kind: kind.to_string(),
                message: message.to_string(),
                provider: None,
                phase: t.current_phase,
                phase_history: Vec::new(),
                cost_usd: 0.0,
            });
        })
        .await;
    if let Err(e) = updated {
        error!("[任务 {}] ❌ 无法写入失败状态: {}", short_id(task_id), e);
    }
}
