//! # Article Publisher
//!
//! 把已审核通过的文章自动发布到 CMS 的编排引擎
//!
//! ## 架构设计
//!
//! 本系统采用分层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `browser/` - 连接或启动浏览器，为每个 provider 会话开独立标签页
//! - `infrastructure/` - `BrowserPage` 能力抽象与 chromiumoxide 实现
//! - `store/` - 任务记录 + 只追加的事件流（JSON / JSONL 落盘）
//!
//! ### ② 能力层（Services / Instrumentation）
//! - `services/` - LLM 推理、截图落盘、发布地址校验
//! - `instrumentation/` - 定位器缓存、耗时记录、Prometheus 指标
//!
//! ### ③ 执行层（Providers）
//! - `providers/deterministic` - 基于 DOM 和 REST 的确定性自动化
//! - `providers/agent` - 基于截图推理的 AI 代理，受 token 预算约束
//!
//! ### ④ 流程层（Workflow）
//! - `workflow/` - 一篇文章的完整发布流程（校验 → 尝试 → 重试 → 兜底 → 存草稿）
//!
//! ### ⑤ 编排层（Orchestration）
//! - `orchestrator/` - 工作池、对外服务、应用生命周期
//! - `server` - HTTP 接口
//!
//! ## 模块结构

pub mod browser;
pub mod config;
pub mod error;
pub mod infrastructure;
pub mod instrumentation;
pub mod logger;
pub mod models;
pub mod orchestrator;
pub mod providers;
pub mod server;
pub mod services;
pub mod store;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::Config;
pub use error::{AppError, AppResult, PublishError};
pub use models::{Article, ArticleMetadata, ProviderKind, PublishIntent, TaskStatus};
pub use orchestrator::{App, PublishService, TaskStatusView};
pub use providers::{ProviderFactory, PublishProvider};
pub use store::TaskStore;
pub use workflow::{PublishFlow, PublishJob};
