//! 浏览器资源
//!
//! 进程内只有一个浏览器，每个 provider 会话从这里拿一个独立标签页

pub mod connection;
pub mod headless;

use async_trait::async_trait;
use chromiumoxide::Browser;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{BrowserError, PublishError};
use crate::infrastructure::{BrowserPage, PageDriver, PageOptions, PageSource};

pub use connection::connect_to_browser;
pub use headless::launch_headless_browser;

/// 共享的浏览器句柄
pub struct BrowserHandle {
    browser: Mutex<Browser>,
    events: JoinHandle<()>,
    launched: bool,
}

impl BrowserHandle {
    /// 端口为 0 时启动无头浏览器，否则连接已有浏览器
    pub async fn start(config: &Config) -> Result<Self, BrowserError> {
        let launched = config.browser_debug_port == 0;
        let (browser, events) = if launched {
            launch_headless_browser(config.browser_executable.as_deref()).await?
        } else {
            connect_to_browser(config.browser_debug_port).await?
        };
        Ok(Self {
            browser: Mutex::new(browser),
            events,
            launched,
        })
    }

    /// 关闭自己启动的浏览器；连接来的浏览器保持运行
    pub async fn shutdown(&self) {
        if self.launched {
            let mut browser = self.browser.lock().await;
            if let Err(e) = browser.close().await {
                warn!("⚠️ 关闭浏览器失败: {}", e);
            }
            let _ = browser.wait().await;
            info!("浏览器已关闭");
        }
        self.events.abort();
    }
}

#[async_trait]
impl PageSource for BrowserHandle {
    async fn open_page(&self, options: PageOptions) -> Result<Arc<dyn BrowserPage>, PublishError> {
        let page = {
            let browser = self.browser.lock().await;
            browser.new_page("about:blank").await.map_err(|source| {
                PublishError::network(BrowserError::PageCreationFailed { source }.to_string())
            })?
        };
        debug!("新标签页已创建 (拦截资源: {})", options.block_resources);
        Ok(Arc::new(PageDriver::attach(page, options).await?))
    }
}
