//! 任务与事件存储
//!
//! - `task_store` - 内存索引 + 追加式事件日志
//! - `writer` - 后台写盘任务

pub mod task_store;
pub mod writer;

pub use task_store::TaskStore;
pub use writer::{EventWriter, StoreLayout};
