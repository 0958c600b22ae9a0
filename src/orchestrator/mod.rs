//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责任务的排队、并发调度和对外接口，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `app` - 应用入口
//! - 管理应用生命周期（初始化、运行、清理）
//! - 创建并注入共享资源（Browser、TaskStore、缓存、指标）
//! - 扫描 TOML 投递目录并输出全局统计
//!
//! ### `publish_service` - 发布服务
//! - submit / get_status / get_logs / cancel / 指标导出
//! - 进程重启后的任务恢复
//!
//! ### `worker_pool` - 有界工作池
//! - mpsc 队列 + Semaphore 控制并发
//! - 取消令牌登记
//!
//! ## 层次关系
//!
//! ```text
//! app (资源所有者)
//!     ↓
//! publish_service (对外接口) ← server (HTTP)
//!     ↓
//! worker_pool (并发调度)
//!     ↓
//! workflow::PublishFlow (处理单个任务)
//!     ↓
//! providers (确定性 / AI 代理)
//!     ↓
//! infrastructure (BrowserPage)
//! ```

pub mod app;
pub mod publish_service;
pub mod worker_pool;

pub use app::App;
pub use publish_service::{PublishService, TaskStatusView};
pub use worker_pool::{CancelRegistry, WorkerPool};
