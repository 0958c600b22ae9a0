//! provider 工厂
//!
//! 按类型标签创建 provider 实例。每个任务的每次尝试拿到独立实例，
//! 页面、token 预算、草稿状态都不跨任务共享。

use std::sync::Arc;

use crate::config::Config;
use crate::infrastructure::PageSource;
use crate::instrumentation::LocatorCache;
use crate::models::{ProviderKind, TaskId};
use crate::providers::{
    AgentProvider, AgentSettings, DeterministicProvider, DeterministicSettings, ProviderContext,
    PublishProvider,
};
use crate::services::{Reasoner, ScreenshotWriter, UrlVerifier};

/// 按类型创建 provider
pub trait ProviderFactory: Send + Sync {
    fn create(&self, kind: ProviderKind, task_id: TaskId) -> Box<dyn PublishProvider>;
}

/// 生产环境使用的工厂
pub struct DefaultProviderFactory {
    pages: Arc<dyn PageSource>,
    cache: Arc<LocatorCache>,
    reasoner: Option<Arc<dyn Reasoner>>,
    screenshots: Arc<ScreenshotWriter>,
    verifier: UrlVerifier,
    deterministic: DeterministicSettings,
    agent: AgentSettings,
}

impl DefaultProviderFactory {
    pub fn new(
        config: &Config,
        pages: Arc<dyn PageSource>,
        cache: Arc<LocatorCache>,
        reasoner: Option<Arc<dyn Reasoner>>,
        screenshots: Arc<ScreenshotWriter>,
    ) -> Self {
        Self {
            pages,
            cache,
            reasoner,
            screenshots,
            verifier: UrlVerifier::default(),
            deterministic: DeterministicSettings {
                element_timeout: config.element_timeout(),
                block_resources: config.block_resources,
                ..Default::default()
            },
            agent: AgentSettings::from_config(config),
        }
    }
}

impl ProviderFactory for DefaultProviderFactory {
    fn create(&self, kind: ProviderKind, task_id: TaskId) -> Box<dyn PublishProvider> {
        let ctx = ProviderContext {
            task_id,
            screenshots: self.screenshots.clone(),
        };
        match kind {
            ProviderKind::Deterministic => Box::new(DeterministicProvider::new(
                ctx,
                self.pages.clone(),
                self.cache.clone(),
                self.verifier.clone(),
                self.deterministic.clone(),
            )),
            ProviderKind::Agent => Box::new(AgentProvider::new(
                ctx,
                self.pages.clone(),
                self.reasoner.clone(),
                self.agent.clone(),
            )),
        }
    }
}
