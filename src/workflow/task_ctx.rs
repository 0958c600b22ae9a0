//! 任务处理上下文
//!
//! 封装"我正在处理哪一个发布任务"这一信息，只用于日志前缀

use std::fmt::Display;

use crate::models::{short_id, PublishTask, TaskId};
use crate::utils::logging::truncate_text;

/// 任务处理上下文
#[derive(Debug, Clone)]
pub struct TaskCtx {
    pub task_id: TaskId,

    /// 文章标题（截断后，仅用于日志显示）
    pub title: String,
}

impl TaskCtx {
    pub fn new(task: &PublishTask) -> Self {
        Self {
            task_id: task.id,
            title: truncate_text(&task.article.title, 30),
        }
    }
}

impl Display for TaskCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[任务 {}]", short_id(&self.task_id))
    }
}
