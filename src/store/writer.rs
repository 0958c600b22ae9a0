//! 持久化写入器
//!
//! 业务逻辑只负责产生事件，落盘由独立的后台任务完成，避免磁盘 IO 拖慢发布流程。
//! 同一任务的事件按发送顺序写入，保证文件内序号严格递增。

use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use crate::error::StoreError;
use crate::models::{ExecutionEvent, PublishTask, TaskId};

/// 目录布局
///
/// ```text
/// <root>/tasks/<task_id>.json      可变的任务记录
/// <root>/events/<task_id>.jsonl    只追加的事件日志
/// ```
#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn tasks_dir(&self) -> PathBuf {
        self.root.join("tasks")
    }

    pub fn events_dir(&self) -> PathBuf {
        self.root.join("events")
    }

    pub fn task_path(&self, id: &TaskId) -> PathBuf {
        self.tasks_dir().join(format!("{}.json", id))
    }

    pub fn events_path(&self, id: &TaskId) -> PathBuf {
        self.events_dir().join(format!("{}.jsonl", id))
    }

    pub async fn ensure_dirs(&self) -> Result<(), StoreError> {
        for dir in [self.tasks_dir(), self.events_dir()] {
            fs::create_dir_all(&dir).await.map_err(|source| io_error(&dir, source))?;
        }
        Ok(())
    }
}

enum WriteCommand {
    Event(ExecutionEvent),
    Task(Box<PublishTask>),
    Flush(oneshot::Sender<()>),
}

/// 写入器句柄
#[derive(Clone)]
pub struct EventWriter {
    tx: mpsc::UnboundedSender<WriteCommand>,
}

impl EventWriter {
    /// 启动后台写入任务
    pub fn spawn(layout: StoreLayout) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(layout, rx));
        Self { tx }
    }

    pub fn write_event(&self, event: ExecutionEvent) {
        if self.tx.send(WriteCommand::Event(event)).is_err() {
            error!("事件写入器已关闭，事件未落盘");
        }
    }

    pub fn write_task(&self, task: PublishTask) {
        if self.tx.send(WriteCommand::Task(Box::new(task))).is_err() {
            error!("事件写入器已关闭，任务记录未落盘");
        }
    }

    /// 等待此前提交的所有写入完成
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(WriteCommand::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }
}

async fn run_writer(layout: StoreLayout, mut rx: mpsc::UnboundedReceiver<WriteCommand>) {
    while let Some(command) = rx.recv().await {
        match command {
            WriteCommand::Event(event) => {
                if let Err(e) = append_event(&layout, &event).await {
                    error!("事件落盘失败 (任务 {} 序号 {}): {}", event.task_id, event.seq, e);
                }
            }
            WriteCommand::Task(task) => {
                if let Err(e) = write_task(&layout, &task).await {
                    error!("任务记录落盘失败 ({}): {}", task.id, e);
                }
            }
            WriteCommand::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
    debug!("事件写入器退出");
}

async fn append_event(layout: &StoreLayout, event: &ExecutionEvent) -> Result<(), StoreError> {
    let path = layout.events_path(&event.task_id);
    let mut line = serde_json::to_string(event)?;
    line.push('\n');

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await
        .map_err(|source| io_error(&path, source))?;
    file.write_all(line.as_bytes())
        .await
        .map_err(|source| io_error(&path, source))?;
    file.flush().await.map_err(|source| io_error(&path, source))?;
    Ok(())
}

async fn write_task(layout: &StoreLayout, task: &PublishTask) -> Result<(), StoreError> {
    let path = layout.task_path(&task.id);
    let tmp = path.with_extension("json.tmp");
    let body = serde_json::to_vec_pretty(task)?;

    // 先写临时文件再改名，避免崩溃时留下半个 JSON
    fs::write(&tmp, body)
        .await
        .map_err(|source| io_error(&tmp, source))?;
    fs::rename(&tmp, &path)
        .await
        .map_err(|source| io_error(&path, source))?;
    Ok(())
}

pub(crate) fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}
