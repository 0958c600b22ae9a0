//! AI 代理 provider
//!
//! 截图 → 模型给出一步动作 → 本地执行，循环直到模型宣布完成。
//! 每次调用都计 token，受会话和单次操作两级预算约束。
//! 界面改版时确定性选择器失效，它仍能按视觉完成任务，所以用作兜底。

pub mod actions;
pub mod budget;

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::PublishError;
use crate::infrastructure::{BrowserPage, PageOptions, PageSource};
use crate::models::{Article, ArticleMetadata, ImageAsset, ProviderKind, PublishIntent, SeoMetadata};
use crate::providers::deterministic::{extract_post_id, scripts};
use crate::providers::{
    persist_screenshot, CarryOver, Credentials, DraftHandle, ProviderContext, PublishProvider,
    PublishResult, ScreenshotRef, SeoOutcome, Session, UploadOutcome, UploadedAssetRef,
};
use crate::services::{Reasoner, ReasoningRequest};

use actions::{parse_action, AgentAction, FailKind, Placeholders};
use budget::{TokenBudget, TokenPricing};

const SYSTEM_PROMPT: &str = r#"你在操作一个 CMS 后台的浏览器页面。每一步会收到当前截图和目标。
只返回一个 JSON 对象，不要解释：
{"action":"click","x":<px>,"y":<px>}
{"action":"type","text":"..."}
{"action":"press","key":"Enter"}
{"action":"scroll","dy":<px>}
{"action":"navigate","url":"..."}
{"action":"attach_file","path":"..."}
{"action":"done","result":"<可选，例如文章地址>"}
{"action":"fail","reason":"...","kind":"auth|not_found|unsupported"}
需要输入敏感内容时原样使用占位符（例如 {{password}}），不要猜测真实值。"#;

/// 代理 provider 的参数
#[derive(Debug, Clone)]
pub struct AgentSettings {
    /// 单个目标最多执行的步数
    pub max_steps: u32,
    /// 每次调用前用于预算检查的估算 token 数
    pub estimated_step_tokens: u64,
    pub operation_token_limit: u64,
    pub session_token_limit: u64,
    pub pricing: TokenPricing,
    /// 每步动作后等待页面稳定
    pub settle_delay: Duration,
}

impl AgentSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_steps: config.agent_max_steps,
            estimated_step_tokens: config.agent_estimated_step_tokens,
            operation_token_limit: config.agent_operation_token_limit,
            session_token_limit: config.agent_session_token_limit,
            pricing: TokenPricing {
                input_per_million: config.agent_input_cost_per_million,
                output_per_million: config.agent_output_cost_per_million,
            },
            settle_delay: Duration::from_millis(500),
        }
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// 一个目标的结局
enum GoalOutcome {
    Done(Option<String>),
    Unsupported(String),
}

/// AI 代理 provider
pub struct AgentProvider {
    ctx: ProviderContext,
    pages: Arc<dyn PageSource>,
    reasoner: Option<Arc<dyn Reasoner>>,
    settings: AgentSettings,
    budget: TokenBudget,
    placeholders: Placeholders,
    page: Option<Arc<dyn BrowserPage>>,
    site_url: Option<String>,
    draft: Option<DraftHandle>,
    expected_title: Option<String>,
}

impl AgentProvider {
    pub fn new(
        ctx: ProviderContext,
        pages: Arc<dyn PageSource>,
        reasoner: Option<Arc<dyn Reasoner>>,
        settings: AgentSettings,
    ) -> Self {
        let budget = TokenBudget::new(
            settings.operation_token_limit,
            settings.session_token_limit,
            settings.pricing,
        );
        Self {
            ctx,
            pages,
            reasoner,
            settings,
            budget,
            placeholders: Placeholders::default(),
            page: None,
            site_url: None,
            draft: None,
            expected_title: None,
        }
    }

    fn page(&self) -> Result<Arc<dyn BrowserPage>, PublishError> {
        self.page.clone().ok_or_else(|| PublishError::Initialization {
            provider: ProviderKind::Agent,
            message: "会话尚未初始化".to_string(),
        })
    }

    fn reasoner(&self) -> Result<Arc<dyn Reasoner>, PublishError> {
        self.reasoner.clone().ok_or_else(|| PublishError::Initialization {
            provider: ProviderKind::Agent,
            message: "未配置 LLM，代理 provider 不可用".to_string(),
        })
    }

    fn require_draft(&self) -> Result<DraftHandle, PublishError> {
        self.draft
            .clone()
            .ok_or_else(|| PublishError::safety("CMS 中还没有草稿，拒绝发布"))
    }

    async fn open_editor(&self, page: &dyn BrowserPage) -> Result<DraftHandle, PublishError> {
        let draft = self.require_draft()?;
        if page.current_url().await? != draft.edit_url {
            page.goto(&draft.edit_url).await?;
        }
        Ok(draft)
    }

    /// 让模型一步步完成一个目标
    async fn pursue(&mut self, operation: &str, goal: &str) -> Result<GoalOutcome, PublishError> {
        let page = self.page()?;
        let reasoner = self.reasoner()?;
        self.budget.begin_operation();

        let started = Instant::now();
        let mut history: Vec<String> = Vec::new();

        for step in 1..=self.settings.max_steps {
            self.budget.ensure_capacity(self.settings.estimated_step_tokens)?;

            let png = page.screenshot().await?;
            let prompt = self.prompt(goal, step, &history);
            let reply = reasoner
                .reason(ReasoningRequest {
                    system: SYSTEM_PROMPT,
                    prompt,
                    screenshot_png: Some(&png),
                })
                .await?;
            self.budget.record(reply.usage);

            let action = parse_action(&reply.content)?;
            debug!("🤖 [{}] 第 {} 步: {}", operation, step, action);

            match action {
                AgentAction::Done { result } => {
                    info!(
                        "✓ 代理完成 {} ({} 步，累计 {} tokens)",
                        operation,
                        step,
                        self.budget.session_used()
                    );
                    return Ok(GoalOutcome::Done(result));
                }
                AgentAction::Fail { reason, kind } => {
                    return match kind {
                        FailKind::Unsupported => Ok(GoalOutcome::Unsupported(reason)),
                        FailKind::Auth => Err(PublishError::Authentication(reason)),
                        FailKind::NotFound => Err(PublishError::element_not_found(
                            format!("agent:{} ({})", operation, reason),
                            started.elapsed().as_millis() as u64,
                        )),
                        FailKind::Other => Err(PublishError::network(format!(
                            "代理放弃 {}: {}",
                            operation, reason
                        ))),
                    };
                }
                other => {
                    self.execute(page.as_ref(), &other).await?;
                    history.push(other.to_string());
                }
            }

            sleep(self.settings.settle_delay).await;
        }

        Err(PublishError::element_not_found(
            format!("agent:{} ({} 步内未完成)", operation, self.settings.max_steps),
            started.elapsed().as_millis() as u64,
        ))
    }

    fn prompt(&self, goal: &str, step: u32, history: &[String]) -> String {
        let history = if history.is_empty() {
            "（无）".to_string()
        } else {
            history.join("\n")
        };
        format!(
            "目标：{}\n可用占位符：{}\n当前是第 {}/{} 步。已执行的动作：\n{}",
            goal,
            self.placeholders.names().join(", "),
            step,
            self.settings.max_steps,
            history
        )
    }

    async fn execute(&self, page: &dyn BrowserPage, action: &AgentAction) -> Result<(), PublishError> {
        match action {
            AgentAction::Click { x, y } => page.click_at(*x, *y).await,
            AgentAction::Type { text } => page.insert_text(&self.placeholders.resolve(text)).await,
            AgentAction::Press { key } => page.press_key(key).await,
            AgentAction::Scroll { dy } => page.scroll_by(*dy).await,
            AgentAction::Navigate { url } => page.goto(&self.placeholders.resolve(url)).await,
            AgentAction::AttachFile { path } => {
                let path = PathBuf::from(self.placeholders.resolve(path));
                page.set_files("input[type=file]", &[path]).await
            }
            AgentAction::Done { .. } | AgentAction::Fail { .. } => Ok(()),
        }
    }

    async fn verify_target(&self, page: &dyn BrowserPage) -> Result<(), PublishError> {
        let Some(expected) = self.expected_title.as_deref() else {
            return Ok(());
        };
        // 标题读取走页面脚本，不消耗 token
        let actual: String = page.eval_as(&scripts::edited_title()).await?;
        if !actual.is_empty() && actual.trim() != expected.trim() {
            return Err(PublishError::safety(format!(
                "编辑器标题与文章不一致: 期望 '{}'，实际 '{}'",
                expected, actual
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl PublishProvider for AgentProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Agent
    }

    async fn initialize(&mut self, carry_over: Option<&CarryOver>) -> Result<(), PublishError> {
        self.reasoner()?;
        if self.page.is_some() {
            return Ok(());
        }

        // 代理依赖截图，不拦截图片和字体
        let page = self
            .pages
            .open_page(PageOptions {
                block_resources: false,
            })
            .await
            .map_err(|e| PublishError::Initialization {
                provider: ProviderKind::Agent,
                message: e.to_string(),
            })?;

        if let Some(carry) = carry_over {
            if let Err(e) = page.set_cookies(&carry.cookies).await {
                warn!("⚠️ 恢复会话 cookie 失败: {}", e);
            }
            if self.draft.is_none() {
                self.draft = carry.draft.clone();
            }
        }

        self.page = Some(page);
        Ok(())
    }

    async fn login(&mut self, site_url: &str, credentials: &Credentials) -> Result<Session, PublishError> {
        let page = self.page()?;
        let site = site_url.trim_end_matches('/').to_string();
        if credentials.username.is_empty() {
            return Err(PublishError::Authentication("未配置 CMS 账号".to_string()));
        }

        self.placeholders.set("username", credentials.username.clone());
        self.placeholders.set("password", credentials.password.clone());
        page.goto(&format!("{}/wp-admin/", site)).await?;

        self.pursue(
            "login",
            "登录 CMS 后台。用户名填 {{username}}，密码填 {{password}}。\
             已经看到后台管理界面就返回 done；提示账号或密码错误时返回 kind=auth 的 fail。",
        )
        .await?;

        self.site_url = Some(site.clone());
        Ok(Session {
            site_url: site,
            username: credentials.username.clone(),
        })
    }

    async fn create_article(
        &mut self,
        article: &Article,
        _metadata: &ArticleMetadata,
    ) -> Result<DraftHandle, PublishError> {
        self.expected_title = Some(article.title.clone());
        if let Some(draft) = &self.draft {
            return Ok(draft.clone());
        }

        let page = self.page()?;
        let site = self
            .site_url
            .clone()
            .ok_or_else(|| PublishError::network("尚未登录 CMS"))?;

        self.placeholders.set("title", article.title.clone());
        self.placeholders.set("content", article.content.clone());
        page.goto(&format!("{}/wp-admin/post-new.php", site)).await?;

        self.pursue(
            "create_article",
            "新建文章：标题填 {{title}}，正文填 {{content}}，然后保存为草稿（不要发布）。\
             看到已保存提示后返回 done。",
        )
        .await?;

        let current = page.current_url().await?;
        let post_id = extract_post_id(&current);
        let edit_url = match &post_id {
            Some(id) => format!("{}/wp-admin/post.php?post={}&action=edit", site, id),
            None => current,
        };
        let draft = DraftHandle { post_id, edit_url };
        info!("✓ 代理已创建草稿: {}", draft.edit_url);
        self.draft = Some(draft.clone());
        Ok(draft)
    }

    async fn upload_images(&mut self, images: &[ImageAsset]) -> Result<UploadOutcome, PublishError> {
        let mut outcome = UploadOutcome::default();
        if images.is_empty() {
            return Ok(outcome);
        }
        let page = self.page()?;
        self.open_editor(page.as_ref()).await?;

        for image in images {
            let path_display = image.file_path.display().to_string();
            if tokio::fs::metadata(&image.file_path).await.is_err() {
                let err = PublishError::AssetUpload {
                    path: path_display,
                    message: "文件不存在".to_string(),
                };
                warn!("⚠️ {}", err);
                outcome.failures.push(err);
                continue;
            }

            self.placeholders.set("image", path_display.clone());
            let goal = format!(
                "向文章插入一张图片：打开添加媒体/图片入口，上传文件时使用 attach_file，path 填 {{{{image}}}}。\
                 替代文本：{}。{}完成后返回 done，result 填图片地址（如可见）。",
                image.alt_text.as_deref().unwrap_or("（无）"),
                if image.is_featured { "同时把它设为特色图片。" } else { "" }
            );

            match self.pursue("upload_image", &goal).await {
                Ok(GoalOutcome::Done(url)) => outcome.uploaded.push(UploadedAssetRef {
                    source: image.file_path.clone(),
                    media_id: None,
                    url,
                    featured: image.is_featured,
                }),
                Ok(GoalOutcome::Unsupported(reason)) => outcome.failures.push(PublishError::AssetUpload {
                    path: path_display,
                    message: reason,
                }),
                Err(e @ PublishError::TokenBudgetExceeded { .. })
                | Err(e @ PublishError::Authentication(_)) => return Err(e),
                Err(e) => {
                    warn!("⚠️ 图片上传失败 {}: {}", path_display, e);
                    outcome.failures.push(PublishError::AssetUpload {
                        path: path_display,
                        message: e.to_string(),
                    });
                }
            }
        }

        Ok(outcome)
    }

    async fn configure_seo(&mut self, seo: &SeoMetadata) -> Result<SeoOutcome, PublishError> {
        if seo.is_empty() {
            return Ok(SeoOutcome::Applied);
        }
        let page = self.page()?;
        self.open_editor(page.as_ref()).await?;

        let mut fields = Vec::new();
        if let Some(v) = &seo.meta_title {
            fields.push(format!("SEO 标题: {}", v));
        }
        if let Some(v) = &seo.meta_description {
            fields.push(format!("SEO 描述: {}", v));
        }
        if let Some(v) = &seo.focus_keyword {
            fields.push(format!("焦点关键词: {}", v));
        }
        let goal = format!(
            "在编辑页的 SEO 设置区域填写以下字段并保存草稿：{}。\
             页面上没有任何 SEO 设置区域时返回 kind=unsupported 的 fail。",
            fields.join("；")
        );

        match self.pursue("configure_seo", &goal).await? {
            GoalOutcome::Done(_) => Ok(SeoOutcome::Applied),
            GoalOutcome::Unsupported(reason) => Ok(SeoOutcome::Unsupported { reason }),
        }
    }

    async fn publish(&mut self, intent: &PublishIntent) -> Result<PublishResult, PublishError> {
        let page = self.page()?;
        let draft = self.open_editor(page.as_ref()).await?;
        self.verify_target(page.as_ref()).await?;

        let goal = match intent {
            PublishIntent::SaveDraft => "保存当前文章为草稿（不要发布），看到已保存提示后返回 done。".to_string(),
            PublishIntent::PublishNow => "发布当前文章：点击发布并在确认面板再次确认。\
                 看到已发布提示后返回 done，result 填文章的公开地址。"
                .to_string(),
            PublishIntent::Schedule { at } => format!(
                "把当前文章的发布时间改为 {}（UTC），然后点击定时发布并确认。完成后返回 done，result 填文章地址。",
                at.format("%Y-%m-%d %H:%M")
            ),
        };

        let url = match self.pursue("publish", &goal).await? {
            GoalOutcome::Done(url) => url,
            GoalOutcome::Unsupported(reason) => {
                return Err(PublishError::network(format!("代理无法发布: {}", reason)))
            }
        };

        Ok(match intent {
            PublishIntent::SaveDraft => PublishResult {
                url: Some(draft.edit_url),
                published_at: None,
            },
            PublishIntent::Schedule { at } => PublishResult {
                url,
                published_at: Some(*at),
            },
            PublishIntent::PublishNow => PublishResult {
                url,
                published_at: Some(chrono::Utc::now()),
            },
        })
    }

    async fn capture_screenshot(&mut self, step: &str) -> Option<ScreenshotRef> {
        let page = self.page.clone()?;
        persist_screenshot(&self.ctx, step, page.screenshot().await).await
    }

    async fn cleanup(&mut self) {
        if let Some(page) = self.page.take() {
            if let Err(e) = page.close().await {
                debug!("关闭页面失败: {}", e);
            }
        }
    }

    fn draft(&self) -> Option<&DraftHandle> {
        self.draft.as_ref()
    }

    async fn carry_over(&mut self) -> CarryOver {
        let cookies = match &self.page {
            Some(page) => page.cookies().await.unwrap_or_default(),
            None => Vec::new(),
        };
        CarryOver {
            cookies,
            draft: self.draft.clone(),
        }
    }

    fn cost_usd(&self) -> f64 {
        self.budget.cost_usd()
    }
}

#[cfg(test)]
mod tests;
