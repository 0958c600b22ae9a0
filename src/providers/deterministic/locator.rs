//! 元素定位
//!
//! 先用缓存里的定位器，失败立即失效并对全部候选重新轮询；
//! 每次交互前都等待元素存在且可交互，超时报 `ElementNotFoundError`。

use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::debug;

use crate::error::PublishError;
use crate::infrastructure::{BrowserPage, ElementState};
use crate::instrumentation::{LocatorCache, SelectorKey};
use crate::providers::deterministic::selectors;

/// 等待条件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitFor {
    /// 只要求存在
    Present,
    /// 存在、可见且未禁用
    Actionable,
}

impl WaitFor {
    fn satisfied_by(self, state: ElementState) -> bool {
        match self {
            WaitFor::Present => state.present,
            WaitFor::Actionable => state.is_actionable(),
        }
    }
}

enum Action<'v> {
    Click,
    Fill(&'v str),
}

/// 绑定到一个页面的定位器
pub struct Locator<'a> {
    page: &'a dyn BrowserPage,
    cache: &'a LocatorCache,
    timeout: Duration,
    poll_interval: Duration,
}

impl<'a> Locator<'a> {
    pub fn new(
        page: &'a dyn BrowserPage,
        cache: &'a LocatorCache,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            page,
            cache,
            timeout,
            poll_interval,
        }
    }

    /// 解析语义选择器，返回满足等待条件的 CSS 选择器
    pub async fn resolve(&self, context: &str, id: &str, wait: WaitFor) -> Result<String, PublishError> {
        self.resolve_within(context, id, wait, self.timeout).await
    }

    async fn resolve_within(
        &self,
        context: &str,
        id: &str,
        wait: WaitFor,
        timeout: Duration,
    ) -> Result<String, PublishError> {
        let key = SelectorKey::new(context, id);

        if let Some(cached) = self.cache.get(&key) {
            match self.page.probe(&cached).await {
                Ok(state) if wait.satisfied_by(state) => return Ok(cached),
                _ => {
                    self.cache.invalidate(&key);
                    debug!("缓存定位器已失效: {} -> {}", id, cached);
                }
            }
        }

        let candidates = selectors::candidates(id)
            .ok_or_else(|| PublishError::element_not_found(format!("{} (未登记)", id), 0))?;

        let started = Instant::now();
        loop {
            for selector in candidates {
                let state = self.page.probe(selector).await?;
                if wait.satisfied_by(state) {
                    self.cache.insert(key, selector.to_string());
                    return Ok(selector.to_string());
                }
            }
            if started.elapsed() >= timeout {
                return Err(PublishError::element_not_found(
                    id,
                    started.elapsed().as_millis() as u64,
                ));
            }
            sleep(self.poll_interval).await;
        }
    }

    /// 在较短时间内查找可选元素，找不到返回 None
    pub async fn find_optional(
        &self,
        context: &str,
        id: &str,
        wait: WaitFor,
        within: Duration,
    ) -> Result<Option<String>, PublishError> {
        match self.resolve_within(context, id, wait, within).await {
            Ok(selector) => Ok(Some(selector)),
            Err(PublishError::ElementNotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// 等待多个元素中任意一个出现，返回先出现的语义 ID
    pub async fn first_of<'i>(&self, context: &str, ids: &[&'i str]) -> Result<&'i str, PublishError> {
        let started = Instant::now();
        loop {
            for id in ids {
                if self
                    .find_optional(context, id, WaitFor::Present, Duration::ZERO)
                    .await?
                    .is_some()
                {
                    return Ok(*id);
                }
            }
            if started.elapsed() >= self.timeout {
                return Err(PublishError::element_not_found(
                    ids.join(" | "),
                    started.elapsed().as_millis() as u64,
                ));
            }
            sleep(self.poll_interval).await;
        }
    }

    pub async fn click(&self, context: &str, id: &str) -> Result<(), PublishError> {
        self.act(context, id, WaitFor::Actionable, Action::Click).await
    }

    pub async fn fill(&self, context: &str, id: &str, value: &str) -> Result<(), PublishError> {
        self.act(context, id, WaitFor::Actionable, Action::Fill(value)).await
    }

    /// 对缓存定位器的动作失败时，失效条目并重新解析一次
    async fn act(&self, context: &str, id: &str, wait: WaitFor, action: Action<'_>) -> Result<(), PublishError> {
        let selector = self.resolve(context, id, wait).await?;
        match self.perform(&selector, &action).await {
            Ok(()) => Ok(()),
            Err(first) => {
                let key = SelectorKey::new(context, id);
                self.cache.invalidate(&key);
                debug!("操作 {} ({}) 失败，重新解析: {}", id, selector, first);
                let selector = self.resolve(context, id, wait).await?;
                self.perform(&selector, &action).await
            }
        }
    }

    async fn perform(&self, selector: &str, action: &Action<'_>) -> Result<(), PublishError> {
        match action {
            Action::Click => self.page.click(selector).await,
            Action::Fill(value) => self.page.fill(selector, value).await,
        }
    }
}
