//! 页面驱动 - 基础设施层
//!
//! 持有一个 chromiumoxide Page，实现 [`BrowserPage`]

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::dom::SetFileInputFilesParams;
use chromiumoxide::cdp::browser_protocol::fetch::{
    EnableParams, EventRequestPaused, FailRequestParams, RequestPattern, RequestStage,
};
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchKeyEventType, InsertTextParams,
};
use chromiumoxide::cdp::browser_protocol::network::{CookieParam, ErrorReason, ResourceType};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::error::CdpError;
use chromiumoxide::layout::Point;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use serde_json::Value as JsonValue;
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::PublishError;
use crate::infrastructure::page::{js_string, BrowserPage, ElementState, PageOptions, SessionCookie};

/// 会话建立时拦截的资源类型
const BLOCKED_RESOURCE_TYPES: [ResourceType; 3] =
    [ResourceType::Image, ResourceType::Font, ResourceType::Media];

/// 会话建立时拦截的统计脚本
const BLOCKED_URL_PATTERNS: [&str; 6] = [
    "*google-analytics.com*",
    "*googletagmanager.com*",
    "*doubleclick.net*",
    "*connect.facebook.net*",
    "*hotjar.com*",
    "*stats.wp.com*",
];

/// 页面驱动
///
/// 职责：
/// - 持有唯一的 Page 资源
/// - 把 CDP 调用翻译成 [`BrowserPage`] 的原子能力
/// - 不认识文章和 provider
pub struct PageDriver {
    page: Page,
    blocker: Mutex<Option<JoinHandle<()>>>,
}

impl PageDriver {
    /// 接管一个页面，按选项完成会话初始化
    pub async fn attach(page: Page, options: PageOptions) -> Result<Self, PublishError> {
        let blocker = if options.block_resources {
            Some(enable_resource_blocking(&page).await.map_err(cdp_error)?)
        } else {
            None
        };

        Ok(Self {
            page,
            blocker: Mutex::new(blocker),
        })
    }

    /// 获取 page 的引用
    pub fn page(&self) -> &Page {
        &self.page
    }
}

/// 开启 Fetch 拦截，把命中的请求直接判失败
async fn enable_resource_blocking(page: &Page) -> Result<JoinHandle<()>, CdpError> {
    let mut paused = page.event_listener::<EventRequestPaused>().await?;

    let patterns: Vec<RequestPattern> = BLOCKED_RESOURCE_TYPES
        .iter()
        .map(|resource_type| RequestPattern {
            url_pattern: Some("*".to_string()),
            resource_type: Some(resource_type.clone()),
            request_stage: Some(RequestStage::Request),
        })
        .chain(BLOCKED_URL_PATTERNS.iter().map(|pattern| RequestPattern {
            url_pattern: Some(pattern.to_string()),
            resource_type: None,
            request_stage: Some(RequestStage::Request),
        }))
        .collect();

    page.execute(EnableParams {
        patterns: Some(patterns),
        handle_auth_requests: None,
    })
    .await?;
    debug!("已开启资源拦截");

    let page = page.clone();
    Ok(tokio::spawn(async move {
        while let Some(event) = paused.next().await {
            let params = FailRequestParams::new(event.request_id.clone(), ErrorReason::BlockedByClient);
            if let Err(e) = page.execute(params).await {
                debug!("拦截请求失败（页面可能已关闭）: {}", e);
                break;
            }
        }
    }))
}

fn cdp_error(err: CdpError) -> PublishError {
    PublishError::network(format!("浏览器调用失败: {}", err))
}

/// 特殊按键的 (key, code, keyCode, text)
fn key_definition(key: &str) -> (&str, &str, i64, Option<&'static str>) {
    match key {
        "Enter" => ("Enter", "Enter", 13, Some("\r")),
        "Tab" => ("Tab", "Tab", 9, None),
        "Escape" => ("Escape", "Escape", 27, None),
        "Backspace" => ("Backspace", "Backspace", 8, None),
        "PageDown" => ("PageDown", "PageDown", 34, None),
        "PageUp" => ("PageUp", "PageUp", 33, None),
        other => (other, other, 0, None),
    }
}

#[async_trait]
impl BrowserPage for PageDriver {
    async fn goto(&self, url: &str) -> Result<(), PublishError> {
        self.page.goto(url).await.map_err(cdp_error)?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String, PublishError> {
        Ok(self.page.url().await.map_err(cdp_error)?.unwrap_or_default())
    }

    async fn eval(&self, js: &str) -> Result<JsonValue, PublishError> {
        let result = self.page.evaluate(js.to_string()).await.map_err(cdp_error)?;
        Ok(result.value().cloned().unwrap_or(JsonValue::Null))
    }

    async fn probe(&self, selector: &str) -> Result<ElementState, PublishError> {
        let js = format!(
            r#"
            (() => {{
                const el = document.querySelector({sel});
                if (!el) return {{ present: false, visible: false, enabled: false }};
                const rect = el.getBoundingClientRect();
                const style = window.getComputedStyle(el);
                const visible = rect.width > 0 && rect.height > 0
                    && style.visibility !== 'hidden' && style.display !== 'none';
                const enabled = !el.disabled && el.getAttribute('aria-disabled') !== 'true';
                return {{ present: true, visible, enabled }};
            }})()
            "#,
            sel = js_string(selector)
        );
        (self as &dyn BrowserPage).eval_as(&js).await
    }

    async fn click(&self, selector: &str) -> Result<(), PublishError> {
        let element = self.page.find_element(selector).await.map_err(cdp_error)?;
        element.click().await.map_err(cdp_error)?;
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<(), PublishError> {
        let js = format!(
            r#"
            (() => {{
                const el = document.querySelector({sel});
                if (!el) return false;
                el.focus();
                if (el.isContentEditable) {{
                    el.textContent = {val};
                }} else {{
                    const proto = el.tagName === 'TEXTAREA'
                        ? HTMLTextAreaElement.prototype
                        : HTMLInputElement.prototype;
                    Object.getOwnPropertyDescriptor(proto, 'value').set.call(el, {val});
                }}
                el.dispatchEvent(new Event('input', {{ bubbles: true }}));
                el.dispatchEvent(new Event('change', {{ bubbles: true }}));
                return true;
            }})()
            "#,
            sel = js_string(selector),
            val = js_string(value)
        );
        match self.eval(&js).await? {
            JsonValue::Bool(true) => Ok(()),
            _ => Err(PublishError::element_not_found(selector, 0)),
        }
    }

    async fn set_files(&self, selector: &str, files: &[PathBuf]) -> Result<(), PublishError> {
        let element = self.page.find_element(selector).await.map_err(cdp_error)?;
        let mut params =
            SetFileInputFilesParams::new(files.iter().map(|f| f.display().to_string()).collect());
        params.backend_node_id = Some(element.backend_node_id);
        self.page.execute(params).await.map_err(cdp_error)?;
        Ok(())
    }

    async fn click_at(&self, x: f64, y: f64) -> Result<(), PublishError> {
        self.page.click(Point::new(x, y)).await.map_err(cdp_error)?;
        Ok(())
    }

    async fn insert_text(&self, text: &str) -> Result<(), PublishError> {
        self.page
            .execute(InsertTextParams::new(text))
            .await
            .map_err(cdp_error)?;
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<(), PublishError> {
        let (key, code, key_code, text) = key_definition(key);
        for event_type in [DispatchKeyEventType::KeyDown, DispatchKeyEventType::KeyUp] {
            let mut params = DispatchKeyEventParams::new(event_type.clone());
            params.key = Some(key.to_string());
            params.code = Some(code.to_string());
            if key_code > 0 {
                params.windows_virtual_key_code = Some(key_code);
            }
            if event_type == DispatchKeyEventType::KeyDown {
                params.text = text.map(str::to_string);
            }
            self.page.execute(params).await.map_err(cdp_error)?;
        }
        Ok(())
    }

    async fn scroll_by(&self, dy: f64) -> Result<(), PublishError> {
        self.eval(&format!("window.scrollBy(0, {})", dy)).await?;
        Ok(())
    }

    async fn screenshot(&self) -> Result<Vec<u8>, PublishError> {
        self.page
            .screenshot(
                ScreenshotParams::builder()
                    .format(CaptureScreenshotFormat::Png)
                    .build(),
            )
            .await
            .map_err(cdp_error)
    }

    async fn cookies(&self) -> Result<Vec<SessionCookie>, PublishError> {
        let cookies = self.page.get_cookies().await.map_err(cdp_error)?;
        Ok(cookies
            .into_iter()
            .map(|c| SessionCookie {
                name: c.name,
                value: c.value,
                domain: c.domain,
                path: c.path,
            })
            .collect())
    }

    async fn set_cookies(&self, cookies: &[SessionCookie]) -> Result<(), PublishError> {
        if cookies.is_empty() {
            return Ok(());
        }
        let params: Vec<CookieParam> = cookies
            .iter()
            .map(|c| {
                let mut param = CookieParam::new(c.name.clone(), c.value.clone());
                param.domain = Some(c.domain.clone());
                param.path = Some(c.path.clone());
                param
            })
            .collect();
        self.page.set_cookies(params).await.map_err(cdp_error)?;
        Ok(())
    }

    async fn close(&self) -> Result<(), PublishError> {
        let blocker = self.blocker.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = blocker {
            handle.abort();
        }
        self.page.clone().close().await.map_err(cdp_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_definition_enter_has_text() {
        let (key, _, code, text) = key_definition("Enter");
        assert_eq!(key, "Enter");
        assert_eq!(code, 13);
        assert_eq!(text, Some("\r"));
        assert_eq!(key_definition("a").2, 0);
    }
}
