//! 任务存储
//!
//! - 每个任务一条可变的任务记录（状态、结果、错误）
//! - 每个任务一条只追加的事件流，序号由这里分配
//!
//! 不同任务之间没有共享锁：全局表只在查找条目时短暂加读锁，
//! 追加事件只锁该任务自己的事件流。

use chrono::Utc;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::error::StoreError;
use crate::models::{EventSummary, ExecutionEvent, NewEvent, PublishTask, TaskId};
use crate::store::writer::{io_error, EventWriter, StoreLayout};

struct TaskEntry {
    record: Mutex<PublishTask>,
    events: Mutex<Vec<ExecutionEvent>>,
}

struct StoreInner {
    tasks: RwLock<HashMap<TaskId, Arc<TaskEntry>>>,
    writer: Option<EventWriter>,
}

/// 任务存储，可廉价克隆
#[derive(Clone)]
pub struct TaskStore {
    inner: Arc<StoreInner>,
}

impl TaskStore {
    /// 纯内存存储（测试和一次性运行使用）
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(StoreInner {
                tasks: RwLock::new(HashMap::new()),
                writer: None,
            }),
        }
    }

    /// 打开磁盘存储，加载已有的任务和事件
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let layout = StoreLayout::new(root.as_ref());
        layout.ensure_dirs().await?;

        let mut tasks = HashMap::new();
        let tasks_dir = layout.tasks_dir();
        let mut entries = fs::read_dir(&tasks_dir)
            .await
            .map_err(|source| io_error(&tasks_dir, source))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| io_error(&tasks_dir, source))?
        {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            let task = match load_task(&path).await {
                Ok(task) => task,
                Err(e) => {
                    warn!("跳过无法读取的任务记录 {}: {}", path.display(), e);
                    continue;
                }
            };
            let events = load_events(&layout.events_path(&task.id)).await?;
            tasks.insert(
                task.id,
                Arc::new(TaskEntry {
                    record: Mutex::new(task),
                    events: Mutex::new(events),
                }),
            );
        }

        info!("📂 任务存储已加载: {} 个任务 ({})", tasks.len(), root.as_ref().display());

        Ok(Self {
            inner: Arc::new(StoreInner {
                tasks: RwLock::new(tasks),
                writer: Some(EventWriter::spawn(layout)),
            }),
        })
    }

    async fn entry(&self, id: &TaskId) -> Result<Arc<TaskEntry>, StoreError> {
        self.inner
            .tasks
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or(StoreError::TaskNotFound(*id))
    }

    /// 新建任务记录
    pub async fn insert_task(&self, task: PublishTask) -> Result<(), StoreError> {
        let mut tasks = self.inner.tasks.write().await;
        if tasks.contains_key(&task.id) {
            return Err(StoreError::DuplicateTask(task.id));
        }
        if let Some(writer) = &self.inner.writer {
            writer.write_task(task.clone());
        }
        tasks.insert(
            task.id,
            Arc::new(TaskEntry {
                record: Mutex::new(task),
                events: Mutex::new(Vec::new()),
            }),
        );
        Ok(())
    }

    pub async fn get_task(&self, id: &TaskId) -> Result<PublishTask, StoreError> {
        let entry = self.entry(id).await?;
        let record = entry.record.lock().await;
        Ok(record.clone())
    }

    /// 在任务锁内修改任务记录并落盘
    ///
    /// 闭包的返回值原样返回，可用于"检查并修改"
    pub async fn update_task<R>(
        &self,
        id: &TaskId,
        f: impl FnOnce(&mut PublishTask) -> R,
    ) -> Result<R, StoreError> {
        let entry = self.entry(id).await?;
        let mut record = entry.record.lock().await;
        let result = f(&mut record);
        if let Some(writer) = &self.inner.writer {
            writer.write_task(record.clone());
        }
        Ok(result)
    }

    /// 追加事件，分配序号和时间戳
    pub async fn append(&self, id: &TaskId, event: NewEvent) -> Result<ExecutionEvent, StoreError> {
        let entry = self.entry(id).await?;
        let mut events = entry.events.lock().await;

        let event = ExecutionEvent {
            task_id: *id,
            seq: events.last().map_or(1, |e| e.seq + 1),
            timestamp: Utc::now(),
            event_type: event.event_type,
            phase: event.phase,
            retry_count: event.retry_count,
            provider: event.provider,
            payload: event.payload,
        };
        events.push(event.clone());

        // 持锁发送，保证写入器收到的顺序与序号一致
        if let Some(writer) = &self.inner.writer {
            writer.write_event(event.clone());
        }
        Ok(event)
    }

    pub async fn events(&self, id: &TaskId) -> Result<Vec<ExecutionEvent>, StoreError> {
        let entry = self.entry(id).await?;
        let events = entry.events.lock().await;
        Ok(events.clone())
    }

    pub async fn summary(&self, id: &TaskId) -> Result<EventSummary, StoreError> {
        let events = self.events(id).await?;
        Ok(EventSummary::from_events(&events))
    }

    /// 全部任务，按创建时间排序
    pub async fn list_tasks(&self) -> Vec<PublishTask> {
        let entries: Vec<Arc<TaskEntry>> = self.inner.tasks.read().await.values().cloned().collect();
        let mut tasks = Vec::with_capacity(entries.len());
        for entry in entries {
            tasks.push(entry.record.lock().await.clone());
        }
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }

    /// 等待后台写入完成（内存存储直接返回）
    pub async fn flush(&self) {
        if let Some(writer) = &self.inner.writer {
            writer.flush().await;
        }
    }
}

async fn load_task(path: &Path) -> Result<PublishTask, StoreError> {
    let raw = fs::read(path).await.map_err(|source| io_error(path, source))?;
    serde_json::from_slice(&raw).map_err(|e| StoreError::Corrupt {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

async fn load_events(path: &Path) -> Result<Vec<ExecutionEvent>, StoreError> {
    let raw = match fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => return Err(io_error(path, source)),
    };

    let mut events: Vec<ExecutionEvent> = Vec::new();
    for (line_no, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ExecutionEvent>(line) {
            // 只接受严格递增的序号，防止重复行
            Ok(event) if events.last().map_or(true, |last| event.seq > last.seq) => {
                events.push(event)
            }
            Ok(event) => warn!(
                "忽略乱序事件 {} 第 {} 行 (序号 {})",
                path.display(),
                line_no + 1,
                event.seq
            ),
            // 崩溃时最后一行可能只写了一半
            Err(e) => warn!("忽略损坏的事件行 {} 第 {} 行: {}", path.display(), line_no + 1, e),
        }
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        ArticleRef, EventType, Phase, ProviderKind, ProviderPreference, PublishIntent, TaskStatus,
    };
    use tokio_test::{assert_err, assert_ok};

    fn sample_task() -> PublishTask {
        PublishTask::new(
            ArticleRef {
                article_id: Some("a-1".into()),
                title: "一篇测试文章的标题".into(),
            },
            ProviderPreference {
                primary: ProviderKind::Deterministic,
                fallback: Some(ProviderKind::Agent),
            },
            PublishIntent::PublishNow,
        )
    }

    #[tokio::test]
    async fn test_append_assigns_monotonic_seq() {
        let store = TaskStore::in_memory();
        let task = sample_task();
        let id = task.id;
        assert_ok!(store.insert_task(task).await);

        for _ in 0..5 {
            store
                .append(&id, NewEvent::new(EventType::PhaseStart, Phase::Login))
                .await
                .unwrap();
        }
        let seqs: Vec<u64> = store.events(&id).await.unwrap().iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_unknown_task_and_duplicate() {
        let store = TaskStore::in_memory();
        let task = sample_task();
        assert_ok!(store.insert_task(task.clone()).await);
        assert!(matches!(
            store.insert_task(task).await,
            Err(StoreError::DuplicateTask(_))
        ));
        assert_err!(store.events(&uuid::Uuid::new_v4()).await);
    }

    #[tokio::test]
    async fn test_concurrent_appends_per_task_stay_ordered() {
        let store = TaskStore::in_memory();
        let mut ids = Vec::new();
        for _ in 0..4 {
            let task = sample_task();
            ids.push(task.id);
            store.insert_task(task).await.unwrap();
        }

        let mut handles = Vec::new();
        for id in ids.clone() {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..50 {
                    store
                        .append(&id, NewEvent::new(EventType::PhaseStart, Phase::Publish))
                        .await
                        .unwrap();
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        for id in ids {
            let events = store.events(&id).await.unwrap();
            assert_eq!(events.len(), 50);
            assert!(events.windows(2).all(|w| w[0].seq + 1 == w[1].seq));
        }
    }

    #[tokio::test]
    async fn test_reopen_restores_tasks_and_events() {
        let dir = tempfile::tempdir().unwrap();
        let task = sample_task();
        let id = task.id;

        {
            let store = TaskStore::open(dir.path()).await.unwrap();
            store.insert_task(task).await.unwrap();
            store
                .append(
                    &id,
                    NewEvent::new(EventType::PhaseStart, Phase::Validation),
                )
                .await
                .unwrap();
            store
                .append(
                    &id,
                    NewEvent::new(EventType::PhaseSuccess, Phase::Validation),
                )
                .await
                .unwrap();
            store
                .update_task(&id, |t| t.status = TaskStatus::Completed)
                .await
                .unwrap();
            store.flush().await;
        }

        let reopened = TaskStore::open(dir.path()).await.unwrap();
        let restored = reopened.get_task(&id).await.unwrap();
        assert_eq!(restored.status, TaskStatus::Completed);
        let summary = reopened.summary(&id).await.unwrap();
        assert_eq!(summary.total_events, 2);
        assert_eq!(summary.total_phases, 1);

        // 重新打开后继续追加，序号接着走
        let next = reopened
            .append(&id, NewEvent::new(EventType::Warning, Phase::Finished))
            .await
            .unwrap();
        assert_eq!(next.seq, 3);
    }

    #[tokio::test]
    async fn test_truncated_event_line_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let task = sample_task();
        let id = task.id;
        {
            let store = TaskStore::open(dir.path()).await.unwrap();
            store.insert_task(task).await.unwrap();
            store
                .append(&id, NewEvent::new(EventType::PhaseStart, Phase::Login))
                .await
                .unwrap();
            store.flush().await;
        }
        let events_path = StoreLayout::new(dir.path()).events_path(&id);
        let mut raw = std::fs::read_to_string(&events_path).unwrap();
        raw.push_str("{\"task_id\": \"trunc");
        std::fs::write(&events_path, raw).unwrap();

        let reopened = TaskStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.events(&id).await.unwrap().len(), 1);
    }
}
