//! 发布地址校验 - 业务能力层
//!
//! 发布成功后对文章地址发一次 HEAD 请求，只用于告警

use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;

/// 地址校验服务
#[derive(Clone)]
pub struct UrlVerifier {
    client: Client,
}

impl UrlVerifier {
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client }
    }

    /// 返回 HTTP 状态码
    pub async fn check(&self, url: &str) -> Result<StatusCode, reqwest::Error> {
        let response = self.client.head(url).send().await?;
        debug!("HEAD {} -> {}", url, response.status());
        Ok(response.status())
    }
}

impl Default for UrlVerifier {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}
