//! 确定性 provider
//!
//! 通过 DOM 驱动 WordPress 风格的后台：
//! - 所有交互先经 [`Locator`] 等待元素可交互，定位结果进缓存
//! - 会话建立时拦截图片/字体/统计请求
//! - 正文、媒体、SEO、定时发布走页面内 REST / 编辑器 store
//! - 边际成本为零

pub mod locator;
pub mod scripts;
pub mod selectors;

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::error::PublishError;
use crate::infrastructure::{BrowserPage, PageOptions, PageSource};
use crate::instrumentation::LocatorCache;
use crate::models::{Article, ArticleMetadata, ImageAsset, ProviderKind, PublishIntent, SeoMetadata};
use crate::providers::{
    persist_screenshot, CarryOver, Credentials, DraftHandle, ProviderContext, PublishProvider,
    PublishResult, ScreenshotRef, SeoOutcome, Session, UploadOutcome, UploadedAssetRef,
};
use crate::services::UrlVerifier;

use locator::{Locator, WaitFor};
use selectors::*;

/// 确定性 provider 的参数
#[derive(Debug, Clone)]
pub struct DeterministicSettings {
    /// 单个元素的等待上限
    pub element_timeout: Duration,
    pub poll_interval: Duration,
    /// 可选元素（SEO 字段、发布面板开关）的探测时间
    pub optional_probe: Duration,
    pub block_resources: bool,
    /// 发布后是否 HEAD 校验文章地址
    pub verify_published_url: bool,
}

impl Default for DeterministicSettings {
    fn default() -> Self {
        Self {
            element_timeout: Duration::from_secs(20),
            poll_interval: Duration::from_millis(250),
            optional_probe: Duration::from_secs(2),
            block_resources: true,
            verify_published_url: true,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreateReply {
    ok: bool,
    #[serde(default)]
    post_id: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RestReply {
    ok: bool,
    #[serde(default)]
    data: JsonValue,
    #[serde(default)]
    status: Option<u16>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SeoReply {
    plugin: Option<String>,
}

/// 确定性 provider
pub struct DeterministicProvider {
    ctx: ProviderContext,
    pages: Arc<dyn PageSource>,
    cache: Arc<LocatorCache>,
    verifier: UrlVerifier,
    settings: DeterministicSettings,
    page: Option<Arc<dyn BrowserPage>>,
    site_url: Option<String>,
    draft: Option<DraftHandle>,
    expected_title: Option<String>,
}

impl DeterministicProvider {
    pub fn new(
        ctx: ProviderContext,
        pages: Arc<dyn PageSource>,
        cache: Arc<LocatorCache>,
        verifier: UrlVerifier,
        settings: DeterministicSettings,
    ) -> Self {
        Self {
            ctx,
            pages,
            cache,
            verifier,
            settings,
            page: None,
            site_url: None,
            draft: None,
            expected_title: None,
        }
    }

    fn page(&self) -> Result<Arc<dyn BrowserPage>, PublishError> {
        self.page.clone().ok_or_else(|| PublishError::Initialization {
            provider: ProviderKind::Deterministic,
            message: "会话尚未初始化".to_string(),
        })
    }

    fn site(&self) -> Result<&str, PublishError> {
        self.site_url
            .as_deref()
            .ok_or_else(|| PublishError::network("尚未登录 CMS"))
    }

    fn locator<'a>(&'a self, page: &'a dyn BrowserPage) -> Locator<'a> {
        Locator::new(
            page,
            &self.cache,
            self.settings.element_timeout,
            self.settings.poll_interval,
        )
    }

    fn require_draft(&self) -> Result<&DraftHandle, PublishError> {
        self.draft
            .as_ref()
            .ok_or_else(|| PublishError::safety("CMS 中还没有草稿，拒绝发布"))
    }

    /// 确保当前在草稿的编辑页
    async fn ensure_editor(&self, page: &dyn BrowserPage) -> Result<(), PublishError> {
        let draft = self.require_draft()?;
        let current = page.current_url().await?;
        let on_editor = match &draft.post_id {
            Some(id) => extract_post_id(&current).as_deref() == Some(id.as_str()),
            None => current == draft.edit_url,
        };
        if !on_editor {
            page.goto(&draft.edit_url).await?;
        }
        self.locator(page)
            .resolve(CTX_EDITOR, EDITOR_TITLE, WaitFor::Actionable)
            .await?;
        Ok(())
    }

    async fn rest(
        &self,
        page: &dyn BrowserPage,
        path: &str,
        method: &str,
        body: Option<&JsonValue>,
    ) -> Result<JsonValue, PublishError> {
        let reply: RestReply = page
            .eval_as(&scripts::rest_request(path, method, body))
            .await?;
        if reply.ok {
            return Ok(reply.data);
        }
        let message = reply.message.unwrap_or_else(|| "未知错误".to_string());
        match reply.status {
            Some(401) | Some(403) => Err(PublishError::Authentication(format!(
                "{} {} 被拒绝: {}",
                method, path, message
            ))),
            _ => Err(PublishError::network(format!("{} {} 失败: {}", method, path, message))),
        }
    }

    /// 经典编辑器：填表单、点保存、从地址里读文章 ID
    async fn create_classic(
        &self,
        page: &dyn BrowserPage,
        article: &Article,
    ) -> Result<Option<String>, PublishError> {
        let locator = self.locator(page);
        locator.fill(CTX_EDITOR, EDITOR_TITLE, &article.title).await?;
        locator
            .fill(CTX_EDITOR, EDITOR_CONTENT_CLASSIC, &article.content)
            .await?;
        locator.click(CTX_EDITOR, EDITOR_SAVE_DRAFT).await?;

        let started = Instant::now();
        while started.elapsed() < self.settings.element_timeout {
            if let Some(id) = extract_post_id(&page.current_url().await?) {
                return Ok(Some(id));
            }
            sleep(self.settings.poll_interval).await;
        }
        Ok(None)
    }

    async fn upload_one(
        &self,
        page: &dyn BrowserPage,
        image: &ImageAsset,
    ) -> Result<UploadedAssetRef, PublishError> {
        let path_display = image.file_path.display().to_string();
        let bytes = tokio::fs::read(&image.file_path)
            .await
            .map_err(|e| PublishError::AssetUpload {
                path: path_display.clone(),
                message: format!("读取文件失败: {}", e),
            })?;
        let file_name = image
            .file_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "image".to_string());

        let js = scripts::upload_media(
            &file_name,
            mime_for(&image.file_path),
            &base64::engine::general_purpose::STANDARD.encode(&bytes),
            image.alt_text.as_deref(),
            image.title.as_deref(),
            image.caption.as_deref(),
        );
        let reply: RestReply = page.eval_as(&js).await?;
        if !reply.ok {
            return Err(PublishError::AssetUpload {
                path: path_display,
                message: reply.message.unwrap_or_else(|| "媒体库拒绝上传".to_string()),
            });
        }

        Ok(UploadedAssetRef {
            source: image.file_path.clone(),
            media_id: json_id(&reply.data["id"]),
            url: reply.data["source_url"].as_str().map(str::to_string),
            featured: image.is_featured,
        })
    }

    /// 经典编辑器的 SEO 字段
    async fn configure_seo_classic(
        &self,
        page: &dyn BrowserPage,
        seo: &SeoMetadata,
    ) -> Result<SeoOutcome, PublishError> {
        let locator = self.locator(page);
        let probe = self.settings.optional_probe;
        let fields = [
            (SEO_META_TITLE, seo.meta_title.as_deref()),
            (SEO_META_DESCRIPTION, seo.meta_description.as_deref()),
            (SEO_FOCUS_KEYWORD, seo.focus_keyword.as_deref()),
        ];

        let mut applied = 0;
        for (id, value) in fields {
            let Some(value) = value else { continue };
            if locator
                .find_optional(CTX_EDITOR, id, WaitFor::Actionable, probe)
                .await?
                .is_some()
            {
                locator.fill(CTX_EDITOR, id, value).await?;
                applied += 1;
            }
        }

        if applied == 0 {
            return Ok(SeoOutcome::Unsupported {
                reason: "未检测到 SEO 插件".to_string(),
            });
        }
        locator.click(CTX_EDITOR, EDITOR_SAVE_DRAFT).await?;
        Ok(SeoOutcome::Applied)
    }

    async fn save_draft(&self, page: &dyn BrowserPage) -> Result<PublishResult, PublishError> {
        let saved: JsonValue = page.eval(&scripts::save_post()).await?;
        if saved["reason"] == "no-block-editor" {
            self.locator(page).click(CTX_EDITOR, EDITOR_SAVE_DRAFT).await?;
        } else if saved["ok"] != true {
            return Err(PublishError::network("保存草稿失败"));
        }
        let draft = self.require_draft()?;
        Ok(PublishResult {
            url: Some(draft.edit_url.clone()),
            published_at: None,
        })
    }

    async fn schedule(
        &self,
        page: &dyn BrowserPage,
        at: DateTime<Utc>,
    ) -> Result<PublishResult, PublishError> {
        let post_id = self.post_id()?;
        let body = json!({
            "status": "future",
            "date_gmt": at.format("%Y-%m-%dT%H:%M:%S").to_string(),
        });
        let data = self
            .rest(page, &format!("/wp/v2/posts/{}", post_id), "POST", Some(&body))
            .await?;
        if data["status"] != "future" {
            return Err(PublishError::network(format!(
                "定时发布未生效，文章状态: {}",
                data["status"]
            )));
        }
        Ok(PublishResult {
            url: data["link"].as_str().map(str::to_string),
            published_at: Some(at),
        })
    }

    async fn publish_now(&self, page: &dyn BrowserPage) -> Result<PublishResult, PublishError> {
        let locator = self.locator(page);

        // 块编辑器先打开发布面板，经典编辑器没有这一步
        if locator
            .find_optional(
                CTX_EDITOR,
                EDITOR_PUBLISH_TOGGLE,
                WaitFor::Actionable,
                self.settings.optional_probe,
            )
            .await?
            .is_some()
        {
            locator.click(CTX_EDITOR, EDITOR_PUBLISH_TOGGLE).await?;
        }
        locator.click(CTX_EDITOR, EDITOR_PUBLISH_CONFIRM).await?;

        // 轮询文章状态，而不是等页面网络空闲
        let post_id = self.post_id()?;
        let path = format!("/wp/v2/posts/{}?context=edit", post_id);
        let started = Instant::now();
        loop {
            let data = self.rest(page, &path, "GET", None).await?;
            if data["status"] == "publish" {
                return Ok(PublishResult {
                    url: data["link"].as_str().map(str::to_string),
                    published_at: Some(Utc::now()),
                });
            }
            if started.elapsed() >= self.settings.element_timeout {
                return Err(PublishError::network(format!(
                    "点击发布后文章仍为 {}",
                    data["status"]
                )));
            }
            sleep(self.settings.poll_interval).await;
        }
    }

    fn post_id(&self) -> Result<String, PublishError> {
        self.require_draft()?
            .post_id
            .clone()
            .ok_or_else(|| PublishError::safety("草稿缺少文章 ID，无法确认发布对象"))
    }

    /// 发布前校验：草稿存在且编辑器里是同一篇文章
    async fn verify_target(&self, page: &dyn BrowserPage) -> Result<(), PublishError> {
        self.require_draft()?;
        let Some(expected) = self.expected_title.as_deref() else {
            return Ok(());
        };
        let actual: String = page.eval_as(&scripts::edited_title()).await?;
        if actual.trim() != expected.trim() {
            return Err(PublishError::safety(format!(
                "编辑器标题与文章不一致: 期望 '{}'，实际 '{}'",
                expected, actual
            )));
        }
        Ok(())
    }

    async fn verify_published_url(&self, url: &str) {
        if !self.settings.verify_published_url {
            return;
        }
        match self.verifier.check(url).await {
            Ok(status) if status.is_success() || status.is_redirection() => {
                debug!("✓ 文章地址可访问: {} ({})", url, status)
            }
            Ok(status) => warn!("⚠️ 文章地址返回 {}: {}", status, url),
            Err(e) => warn!("⚠️ 文章地址校验失败 {}: {}", url, e),
        }
    }
}

#[async_trait]
impl PublishProvider for DeterministicProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Deterministic
    }

    async fn initialize(&mut self, carry_over: Option<&CarryOver>) -> Result<(), PublishError> {
        if self.page.is_some() {
            return Ok(());
        }

        let page = self
            .pages
            .open_page(PageOptions {
                block_resources: self.settings.block_resources,
            })
            .await
            .map_err(|e| PublishError::Initialization {
                provider: ProviderKind::Deterministic,
                message: e.to_string(),
            })?;

        if let Some(carry) = carry_over {
            if let Err(e) = page.set_cookies(&carry.cookies).await {
                warn!("⚠️ 恢复会话 cookie 失败，将重新登录: {}", e);
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
        let locator = self.locator(page.as_ref());

        page.goto(&format!("{}/wp-admin/", site)).await?;
        let landed = locator.first_of(CTX_ADMIN, &[ADMIN_BAR, LOGIN_USERNAME]).await?;

        if landed == LOGIN_USERNAME {
            if credentials.username.is_empty() {
                return Err(PublishError::Authentication("未配置 CMS 账号".to_string()));
            }
            locator
                .fill(CTX_LOGIN, LOGIN_USERNAME, &credentials.username)
                .await?;
            locator
                .fill(CTX_LOGIN, LOGIN_PASSWORD, &credentials.password)
                .await?;
            locator.click(CTX_LOGIN, LOGIN_SUBMIT).await?;

            if locator.first_of(CTX_ADMIN, &[ADMIN_BAR, LOGIN_ERROR]).await? == LOGIN_ERROR {
                let message: String = page.eval_as(&scripts::login_error_text()).await?;
                return Err(PublishError::Authentication(if message.is_empty() {
                    "账号或密码错误".to_string()
                } else {
                    message
                }));
            }
        } else {
            debug!("会话 cookie 仍有效，跳过登录表单");
        }

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
            debug!("已有草稿，跳过创建: {}", draft.edit_url);
            return Ok(draft.clone());
        }

        let page = self.page()?;
        let site = self.site()?.to_string();
        page.goto(&format!("{}/wp-admin/post-new.php", site)).await?;
        self.locator(page.as_ref())
            .resolve(CTX_EDITOR, EDITOR_TITLE, WaitFor::Actionable)
            .await?;

        let reply: CreateReply = page
            .eval_as(&scripts::create_post(&article.title, &article.content))
            .await?;

        let post_id = if reply.ok {
            reply.post_id
        } else if reply.reason.as_deref() == Some("no-block-editor") {
            self.create_classic(page.as_ref(), article).await?
        } else {
            return Err(PublishError::network(format!(
                "保存草稿失败: {}",
                reply.reason.unwrap_or_default()
            )));
        };

        let current = page.current_url().await?;
        let post_id = post_id.or_else(|| extract_post_id(&current));
        let edit_url = match &post_id {
            Some(id) => format!("{}/wp-admin/post.php?post={}&action=edit", site, id),
            None => current,
        };

        let draft = DraftHandle { post_id, edit_url };
        info!("✓ 草稿已创建: {}", draft.edit_url);
        self.draft = Some(draft.clone());
        Ok(draft)
    }

    async fn upload_images(&mut self, images: &[ImageAsset]) -> Result<UploadOutcome, PublishError> {
        let mut outcome = UploadOutcome::default();
        if images.is_empty() {
            return Ok(outcome);
        }

        let page = self.page()?;
        self.ensure_editor(page.as_ref()).await?;

        for image in images {
            match self.upload_one(page.as_ref(), image).await {
                Ok(asset) => outcome.uploaded.push(asset),
                Err(e @ PublishError::AssetUpload { .. }) => {
                    warn!("⚠️ {}", e);
                    outcome.failures.push(e);
                }
                Err(e) => return Err(e),
            }
        }

        let featured = outcome
            .uploaded
            .iter()
            .find(|a| a.featured)
            .and_then(|a| a.media_id.clone().map(|id| (a.source.clone(), id)));
        if let Some((source, media_id)) = featured {
            match media_id.parse::<u64>() {
                Ok(media_id) => {
                    let post_id = self.post_id()?;
                    let body = json!({ "featured_media": media_id });
                    self.rest(page.as_ref(), &format!("/wp/v2/posts/{}", post_id), "POST", Some(&body))
                        .await?;
                }
                // 传 0 会清空特色图片
                Err(_) => {
                    let e = PublishError::AssetUpload {
                        path: source.display().to_string(),
                        message: format!("媒体 ID 无法识别，未设置特色图片: {}", media_id),
                    };
                    warn!("⚠️ {}", e);
                    outcome.failures.push(e);
                }
            }
        }

        Ok(outcome)
    }

    async fn configure_seo(&mut self, seo: &SeoMetadata) -> Result<SeoOutcome, PublishError> {
        let page = self.page()?;
        self.ensure_editor(page.as_ref()).await?;

        let reply: SeoReply = page.eval_as(&scripts::apply_seo(seo)).await?;
        match reply.plugin {
            Some(plugin) => {
                debug!("通过 {} 写入 SEO 字段", plugin);
                let saved: JsonValue = page.eval(&scripts::save_post()).await?;
                if saved["ok"] != true {
                    return Err(PublishError::network("保存 SEO 字段失败"));
                }
                Ok(SeoOutcome::Applied)
            }
            None => self.configure_seo_classic(page.as_ref(), seo).await,
        }
    }

    async fn publish(&mut self, intent: &PublishIntent) -> Result<PublishResult, PublishError> {
        let page = self.page()?;
        self.ensure_editor(page.as_ref()).await?;
        self.verify_target(page.as_ref()).await?;

        let result = match intent {
            PublishIntent::SaveDraft => return self.save_draft(page.as_ref()).await,
            PublishIntent::Schedule { at } => self.schedule(page.as_ref(), *at).await?,
            PublishIntent::PublishNow => self.publish_now(page.as_ref()).await?,
        };

        if let Some(url) = &result.url {
            self.verify_published_url(url).await;
        }
        Ok(result)
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
            Some(page) => page.cookies().await.unwrap_or_else(|e| {
                debug!("读取 cookie 失败: {}", e);
                Vec::new()
            }),
            None => Vec::new(),
        };
        CarryOver {
            cookies,
            draft: self.draft.clone(),
        }
    }

    fn cost_usd(&self) -> f64 {
        0.0
    }
}

/// 从编辑地址里取文章 ID（`post=123`）
pub fn extract_post_id(url: &str) -> Option<String> {
    static POST_ID: OnceLock<Option<Regex>> = OnceLock::new();
    POST_ID
        .get_or_init(|| Regex::new(r"[?&]post=(\d+)").ok())
        .as_ref()?
        .captures(url)
        .map(|c| c[1].to_string())
}

fn json_id(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        _ => "image/jpeg",
    }
}

#[cfg(test)]
mod tests;
