//! 执行后端（Provider）
//!
//! ## 职责
//!
//! 每个 provider 实现同一套发布能力（[`PublishProvider`]），编排层只面对这个 trait：
//!
//! ```text
//! initialize → login → create_article → upload_images → configure_seo → publish
//!                                                  capture_screenshot / cleanup
//! ```
//!
//! - `deterministic` - 基于 DOM 的确定性浏览器自动化，成本几乎为零
//! - `agent` - 基于截图推理的 AI 代理，按 token 计费，只做兜底或显式指定
//!
//! 选择哪个实现由 [`ProviderKind`] 标签决定，通过 [`ProviderFactory`] 创建。

pub mod agent;
pub mod deterministic;
pub mod factory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::PublishError;
use crate::infrastructure::SessionCookie;
use crate::models::{Article, ArticleMetadata, ImageAsset, ProviderKind, PublishIntent, SeoMetadata, TaskId};
use crate::services::ScreenshotWriter;

pub use agent::{AgentProvider, AgentSettings};
pub use deterministic::{DeterministicProvider, DeterministicSettings};
pub use factory::{DefaultProviderFactory, ProviderFactory};

/// CMS 登录凭据
#[derive(Clone, Default, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// 登录后的会话
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub site_url: String,
    pub username: String,
}

/// CMS 中的草稿
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftHandle {
    /// CMS 内部 ID（拿不到时为空）
    pub post_id: Option<String>,
    /// 草稿编辑地址
    pub edit_url: String,
}

/// 已上传的图片
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadedAssetRef {
    pub source: PathBuf,
    pub media_id: Option<String>,
    pub url: Option<String>,
    pub featured: bool,
}

/// 图片上传结果：单张失败只收集，不中断
#[derive(Debug, Clone, Default)]
pub struct UploadOutcome {
    pub uploaded: Vec<UploadedAssetRef>,
    pub failures: Vec<PublishError>,
}

/// SEO 配置结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeoOutcome {
    Applied,
    /// 目标 CMS 没有 SEO 工具
    Unsupported { reason: String },
}

/// 发布结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishResult {
    /// 文章地址；保存草稿时为编辑地址
    pub url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

/// 截图引用
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScreenshotRef {
    pub step: String,
    pub path: PathBuf,
}

/// 切换 provider 时携带的会话状态
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CarryOver {
    pub cookies: Vec<SessionCookie>,
    pub draft: Option<DraftHandle>,
}

/// provider 创建时拿到的上下文
#[derive(Clone)]
pub struct ProviderContext {
    pub task_id: TaskId,
    pub screenshots: Arc<ScreenshotWriter>,
}

/// 发布能力
///
/// 约定：
/// - 同一实例的操作严格串行调用
/// - `create_article` 可重入：本实例已有草稿时直接返回，不会重复创建
/// - `capture_screenshot` 尽力而为，失败只记日志
/// - `cleanup` 由编排层在每条退出路径上调用且只调用一次
#[async_trait]
pub trait PublishProvider: Send {
    fn kind(&self) -> ProviderKind;

    /// 获取会话资源；重复调用无副作用
    async fn initialize(&mut self, carry_over: Option<&CarryOver>) -> Result<(), PublishError>;

    async fn login(&mut self, site_url: &str, credentials: &Credentials) -> Result<Session, PublishError>;

    async fn create_article(
        &mut self,
        article: &Article,
        metadata: &ArticleMetadata,
    ) -> Result<DraftHandle, PublishError>;

    async fn upload_images(&mut self, images: &[ImageAsset]) -> Result<UploadOutcome, PublishError>;

    async fn configure_seo(&mut self, seo: &SeoMetadata) -> Result<SeoOutcome, PublishError>;

    async fn publish(&mut self, intent: &PublishIntent) -> Result<PublishResult, PublishError>;

    async fn capture_screenshot(&mut self, step: &str) -> Option<ScreenshotRef>;

    async fn cleanup(&mut self);

    /// 当前草稿（如果已创建）
    fn draft(&self) -> Option<&DraftHandle>;

    /// 导出可以交给另一个 provider 的会话状态
    async fn carry_over(&mut self) -> CarryOver;

    /// 到目前为止的花费（美元）
    fn cost_usd(&self) -> f64;
}

/// 把截图交给写入服务，失败只记日志
pub(crate) async fn persist_screenshot(
    ctx: &ProviderContext,
    step: &str,
    png: Result<Vec<u8>, PublishError>,
) -> Option<ScreenshotRef> {
    let png = match png {
        Ok(png) => png,
        Err(e) => {
            tracing::warn!("截图失败 ({}): {}", step, e);
            return None;
        }
    };
    match ctx.screenshots.write(&ctx.task_id, step, &png).await {
        Ok(path) => Some(ScreenshotRef {
            step: step.to_string(),
            path,
        }),
        Err(e) => {
            tracing::warn!("截图写入失败 ({}): {}", step, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_debug_hides_password() {
        let credentials = Credentials {
            username: "editor".into(),
            password: "hunter2".into(),
        };
        let debug = format!("{:?}", credentials);
        assert!(debug.contains("editor"));
        assert!(!debug.contains("hunter2"));
    }
}
