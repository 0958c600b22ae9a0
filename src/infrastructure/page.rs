//! 页面能力抽象 - 基础设施层
//!
//! provider 只通过这里的 trait 操作浏览器，不直接接触 chromiumoxide，
//! 测试时可以换成脚本化的假页面。

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::PublishError;

/// 元素当前状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct ElementState {
    pub present: bool,
    pub visible: bool,
    pub enabled: bool,
}

impl ElementState {
    /// 可以交互：存在、可见、未禁用
    pub fn is_actionable(&self) -> bool {
        self.present && self.visible && self.enabled
    }
}

/// 会话 cookie（provider 之间传递登录态）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
}

/// 打开页面时的选项
#[derive(Debug, Clone, Copy, Default)]
pub struct PageOptions {
    /// 拦截图片/字体/媒体和统计脚本请求
    pub block_resources: bool,
}

/// 一个浏览器标签页
///
/// 职责：
/// - 暴露导航、执行 JS、点击、输入、截图等原子能力
/// - 不认识文章、任务、provider
/// - 不做等待和重试（由调用方决定）
#[async_trait]
pub trait BrowserPage: Send + Sync {
    async fn goto(&self, url: &str) -> Result<(), PublishError>;

    async fn current_url(&self) -> Result<String, PublishError>;

    /// 执行 JS 并返回 JSON 结果
    async fn eval(&self, js: &str) -> Result<JsonValue, PublishError>;

    /// 查询元素状态，找不到时返回 `present = false`
    async fn probe(&self, selector: &str) -> Result<ElementState, PublishError>;

    async fn click(&self, selector: &str) -> Result<(), PublishError>;

    /// 填写输入框，触发 input / change 事件
    async fn fill(&self, selector: &str, value: &str) -> Result<(), PublishError>;

    /// 给 `<input type=file>` 设置文件
    async fn set_files(&self, selector: &str, files: &[PathBuf]) -> Result<(), PublishError>;

    /// 按视口坐标点击
    async fn click_at(&self, x: f64, y: f64) -> Result<(), PublishError>;

    /// 向当前焦点元素输入文本
    async fn insert_text(&self, text: &str) -> Result<(), PublishError>;

    async fn press_key(&self, key: &str) -> Result<(), PublishError>;

    async fn scroll_by(&self, dy: f64) -> Result<(), PublishError>;

    /// 视口截图（PNG）
    async fn screenshot(&self) -> Result<Vec<u8>, PublishError>;

    async fn cookies(&self) -> Result<Vec<SessionCookie>, PublishError>;

    async fn set_cookies(&self, cookies: &[SessionCookie]) -> Result<(), PublishError>;

    async fn close(&self) -> Result<(), PublishError>;
}

impl<'p> dyn BrowserPage + 'p {
    /// 执行 JS 并反序列化为指定类型
    pub async fn eval_as<T: DeserializeOwned>(&self, js: &str) -> Result<T, PublishError> {
        let value = self.eval(js).await?;
        serde_json::from_value(value)
            .map_err(|e| PublishError::network(format!("JS 返回值格式不符: {}", e)))
    }
}

/// 页面来源（浏览器）
///
/// 每个 provider 会话独占一个页面，不在并发任务之间共享
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn open_page(&self, options: PageOptions) -> Result<Arc<dyn BrowserPage>, PublishError>;
}

/// 把字符串安全地嵌入 JS 源码
pub fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_js_string_escapes_quotes_and_newlines() {
        assert_eq!(js_string(r#"a"b"#), r#""a\"b""#);
        assert_eq!(js_string("line1\nline2"), r#""line1\nline2""#);
        assert_eq!(js_string("</script>"), r#""</script>""#);
    }

    #[test]
    fn test_actionable_requires_all_flags() {
        let hidden = ElementState {
            present: true,
            visible: false,
            enabled: true,
        };
        assert!(!hidden.is_actionable());
        assert!(ElementState {
            present: true,
            visible: true,
            enabled: true
        }
        .is_actionable());
    }
}
