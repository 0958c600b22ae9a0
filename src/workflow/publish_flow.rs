//! 发布流程 - 流程层
//!
//! 核心职责：定义"一篇文章"的完整发布流程
//!
//! 流程顺序：
//! 1. 发布前安全校验（不通过直接失败，零次 provider 尝试）
//! 2. 主 provider：initialize → login → create_article → upload_images → configure_seo → publish
//!    每个阶段按错误分类重试，指数退避
//! 3. 主 provider 用尽重试且配置了不同类型的兜底 → 携带会话切换，只兜底一层
//! 4. 仍失败 → 用走得最远的 provider 尽力保存草稿，任务标记失败
//! 5. 所有退出路径上每个 provider 都 cleanup 恰好一次
//!
//! 每个决定之前先写事件，事件是任务历史的唯一来源

use chrono::Utc;
use futures::FutureExt;
use serde_json::json;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{PublishError, RetryClass, StoreError};
use crate::instrumentation::{MetricsCollector, PerformanceTracker};
use crate::models::{
    phase_history, ArticleSnapshot, EventType, NewEvent, Phase, ProviderKind, PublishIntent,
    TaskError, TaskId, TaskResult, TaskStatus,
};
use crate::providers::{
    CarryOver, Credentials, ProviderFactory, PublishProvider, PublishResult, SeoOutcome,
};
use crate::store::TaskStore;
use crate::workflow::retry::{RetryDecision, RetryPolicy};
use crate::workflow::safety;
use crate::workflow::task_ctx::TaskCtx;

/// 交给流程执行的一项工作
#[derive(Debug, Clone)]
pub struct PublishJob {
    pub task_id: TaskId,
    pub snapshot: ArticleSnapshot,
    pub cancel: CancellationToken,
}

/// 单阶段的产出
enum StepOutput {
    Done,
    Published(PublishResult),
}

/// 单阶段提前结束
enum StepStop {
    Failed(PublishError),
    Cancelled,
}

/// 一次 provider 尝试的结局
enum AttemptEnd {
    Published(PublishResult),
    Failed { error: PublishError, phase: Phase },
    Cancelled,
}

/// 一个 provider 实例及其进度
struct Attempt {
    provider: Box<dyn PublishProvider>,
    /// 已成功完成的最远阶段
    furthest: Option<Phase>,
    /// 最后一个阶段失败的次数
    failures: u32,
}

/// 发布流程
///
/// - 编排完整的发布流程（校验、重试、兜底、保存草稿）
/// - 不持有浏览器资源，provider 由工厂按需创建
/// - 任务状态只在这里和取消接口中修改
pub struct PublishFlow {
    store: TaskStore,
    factory: Arc<dyn ProviderFactory>,
    metrics: Arc<MetricsCollector>,
    perf: Arc<PerformanceTracker>,
    policy: RetryPolicy,
    site_url: String,
    credentials: Credentials,
}

impl PublishFlow {
    pub fn new(
        config: &Config,
        store: TaskStore,
        factory: Arc<dyn ProviderFactory>,
        metrics: Arc<MetricsCollector>,
        perf: Arc<PerformanceTracker>,
    ) -> Self {
        Self {
            store,
            factory,
            metrics,
            perf,
            policy: RetryPolicy::from_config(config),
            site_url: config.cms_site_url.clone(),
            credentials: Credentials {
                username: config.cms_username.clone(),
                password: config.cms_password.clone(),
            },
        }
    }

    /// 执行一个任务直到终态，返回终态
    pub async fn run(&self, job: PublishJob) -> Result<TaskStatus, StoreError> {
        let task = self.store.get_task(&job.task_id).await?;
        let ctx = TaskCtx::new(&task);
        if task.status != TaskStatus::Pending {
            debug!("{} 状态为 {}，跳过", ctx, task.status);
            return Ok(task.status);
        }
        info!("{} 📤 开始处理: {}", ctx, ctx.title);

        if let Some(err) = self.validate(&ctx, &job).await {
            return self.fail_before_attempt(&ctx, err).await;
        }

        let started = self
            .store
            .update_task(&job.task_id, |t| {
                if t.status != TaskStatus::Pending {
                    return false;
                }
                t.status = TaskStatus::Running;
                t.started_at = Some(Utc::now());
                true
            })
            .await?;
        if !started {
            // 校验期间被取消
            return Ok(self.store.get_task(&job.task_id).await?.status);
        }

        let started_at = Instant::now();
        let intent = task.intent.clone();
        let plan = task.preference().attempt_plan();
        let mut attempts: Vec<Attempt> = Vec::with_capacity(plan.len());
        let mut end = AttemptEnd::Cancelled;

        for kind in plan {
            let carry = match (attempts.last_mut(), &end) {
                (Some(_), AttemptEnd::Failed { .. }) if job.cancel.is_cancelled() => {
                    info!("{} 🛑 已收到取消，不再切换到 {}", ctx, kind);
                    break;
                }
                (Some(previous), AttemptEnd::Failed { error, phase }) => {
                    Some(self.fall_back(&ctx, previous, kind, error, *phase).await)
                }
                _ => None,
            };

            let mut attempt = Attempt {
                provider: self.factory.create(kind, job.task_id),
                furthest: None,
                failures: 0,
            };
            end = self
                .attempt(&ctx, &job, &intent, &mut attempt, carry.as_ref())
                .await;
            attempts.push(attempt);

            let can_fall_back = matches!(
                &end,
                AttemptEnd::Failed { error, .. } if error.retry_class() != RetryClass::TaskFatal
            );
            if !can_fall_back {
                break;
            }
        }

        let cost: f64 = attempts.iter().map(|a| a.provider.cost_usd()).sum();
        for attempt in &attempts {
            self.metrics
                .add_cost(attempt.provider.kind(), attempt.provider.cost_usd());
        }
        let last_provider = attempts.last().map(|a| a.provider.kind());

        match end {
            AttemptEnd::Published(result) => {
                self.cleanup_all(&ctx, &mut attempts).await;
                let provider_used = last_provider.unwrap_or(task.requested_provider);
                let task_result = TaskResult {
                    published_url: result.url,
                    provider_used,
                    fallback_triggered: attempts.len() > 1,
                    duration_seconds: started_at.elapsed().as_secs_f64(),
                    cost_estimate_usd: cost,
                };
                info!(
                    "{} ✓ 发布完成 (provider: {}, 兜底: {}, 耗时 {:.1}s, 花费 ${:.4}) {}",
                    ctx,
                    provider_used,
                    task_result.fallback_triggered,
                    task_result.duration_seconds,
                    cost,
                    task_result.published_url.as_deref().unwrap_or("")
                );
                self.store
                    .update_task(&job.task_id, |t| {
                        t.status = TaskStatus::Completed;
                        t.current_phase = Phase::Finished;
                        t.completed_at = Some(Utc::now());
                        t.result = Some(task_result);
                    })
                    .await?;
                self.metrics
                    .record_task(Some(provider_used), TaskStatus::Completed);
                Ok(TaskStatus::Completed)
            }
            AttemptEnd::Cancelled => {
                let phase = self.store.get_task(&job.task_id).await?.current_phase;
                self.cleanup_all(&ctx, &mut attempts).await;
                self.finish_cancelled(&ctx, phase, last_provider).await
            }
            AttemptEnd::Failed { error, phase } => {
                // 失败的任务必须留下草稿，取消信号不影响这一步
                let draft_url = self.save_draft_best_effort(&ctx, &job, &mut attempts).await;
                self.cleanup_all(&ctx, &mut attempts).await;
                self.finish_failed(&ctx, error, phase, last_provider, draft_url, cost)
                    .await
            }
        }
    }

    /// 发布前校验；返回 Some 表示不能继续
    async fn validate(&self, ctx: &TaskCtx, job: &PublishJob) -> Option<PublishError> {
        let id = &job.task_id;
        self.set_phase(id, Phase::Validation, 0).await;
        self.emit(id, NewEvent::new(EventType::PhaseStart, Phase::Validation))
            .await;

        let report = safety::validate(&job.snapshot);
        for warning in &report.warnings {
            debug!("{} 校验提示: {}", ctx, warning);
            self.emit(
                id,
                NewEvent::new(EventType::Warning, Phase::Validation)
                    .payload(json!({ "message": warning })),
            )
            .await;
        }

        match report.into_error() {
            None => {
                self.emit(id, NewEvent::new(EventType::PhaseSuccess, Phase::Validation))
                    .await;
                None
            }
            Some(err) => {
                warn!("{} ❌ 发布前校验未通过: {}", ctx, err);
                self.emit(
                    id,
                    NewEvent::new(EventType::PhaseFailure, Phase::Validation).payload(json!({
                        "error": err.to_string(),
                        "kind": err.kind(),
                    })),
                )
                .await;
                Some(err)
            }
        }
    }

    /// 一个 provider 走完全部阶段
    async fn attempt(
        &self,
        ctx: &TaskCtx,
        job: &PublishJob,
        intent: &PublishIntent,
        attempt: &mut Attempt,
        carry: Option<&CarryOver>,
    ) -> AttemptEnd {
        info!("{} 🚀 使用 {} provider", ctx, attempt.provider.kind());
        let mut published = None;

        for step in Phase::ATTEMPT_STEPS {
            // 只保存草稿的请求不调用发布
            let phase = if step == Phase::Publish && *intent == PublishIntent::SaveDraft {
                Phase::SaveDraft
            } else {
                step
            };

            match self.run_step(ctx, job, intent, attempt, phase, carry).await {
                Ok(StepOutput::Done) => attempt.furthest = Some(phase),
                Ok(StepOutput::Published(result)) => {
                    attempt.furthest = Some(phase);
                    published = Some(result);
                }
                Err(StepStop::Cancelled) => return AttemptEnd::Cancelled,
                Err(StepStop::Failed(error))
                    if phase == Phase::ConfigureSeo
                        && error.retry_class() != RetryClass::TaskFatal =>
                {
                    warn!("{} ⚠️ SEO 配置失败，继续发布: {}", ctx, error);
                    self.emit(
                        &job.task_id,
                        NewEvent::new(EventType::Warning, phase)
                            .provider(attempt.provider.kind())
                            .payload(json!({
                                "message": "SEO 配置失败，已跳过",
                                "error": error.to_string(),
                            })),
                    )
                    .await;
                }
                Err(StepStop::Failed(error)) => return AttemptEnd::Failed { error, phase },
            }
        }

        match published {
            Some(result) => AttemptEnd::Published(result),
            None => AttemptEnd::Failed {
                error: PublishError::network("发布阶段没有返回结果"),
                phase: Phase::Publish,
            },
        }
    }

    /// 执行单个阶段，包含重试
    async fn run_step(
        &self,
        ctx: &TaskCtx,
        job: &PublishJob,
        intent: &PublishIntent,
        attempt: &mut Attempt,
        phase: Phase,
        carry: Option<&CarryOver>,
    ) -> Result<StepOutput, StepStop> {
        let id = &job.task_id;
        let kind = attempt.provider.kind();
        let mut failures: u32 = 0;

        loop {
            if job.cancel.is_cancelled() {
                return Err(StepStop::Cancelled);
            }
            self.set_phase(id, phase, failures).await;
            self.emit(
                id,
                NewEvent::new(EventType::PhaseStart, phase)
                    .provider(kind)
                    .retry_count(failures),
            )
            .await;

            let timer = self.perf.start(phase.as_str(), kind);
            let cost_before = attempt.provider.cost_usd();
            let result = self
                .invoke(attempt.provider.as_mut(), phase, job, intent, carry)
                .await;
            let op_cost = (attempt.provider.cost_usd() - cost_before).max(0.0);
            let record = self.perf.finish(timer, result.is_ok());
            self.metrics
                .record_operation(kind, phase, record.duration, result.is_ok());
            if op_cost > 0.0 {
                self.metrics.record_operation_cost(kind, phase, op_cost);
            }
            let elapsed_ms = record.duration.as_millis() as u64;

            let error = match result {
                Ok((output, warnings)) => {
                    self.emit(
                        id,
                        NewEvent::new(EventType::PhaseSuccess, phase)
                            .provider(kind)
                            .retry_count(failures)
                            .payload(json!({ "elapsed_ms": elapsed_ms, "cost_usd": op_cost })),
                    )
                    .await;
                    for warning in warnings {
                        warn!("{} ⚠️ {}", ctx, warning);
                        self.emit(
                            id,
                            NewEvent::new(EventType::Warning, phase)
                                .provider(kind)
                                .payload(json!({ "message": warning })),
                        )
                        .await;
                    }
                    debug!("{} ✓ {} 完成 ({}ms)", ctx, phase, elapsed_ms);
                    attempt.failures = 0;
                    return Ok(output);
                }
                Err(error) => error,
            };

            self.emit(
                id,
                NewEvent::new(EventType::PhaseFailure, phase)
                    .provider(kind)
                    .retry_count(failures)
                    .payload(json!({
                        "error": error.to_string(),
                        "kind": error.kind(),
                        "elapsed_ms": elapsed_ms,
                        "cost_usd": op_cost,
                    })),
            )
            .await;
            failures += 1;
            attempt.failures = failures;
            warn!(
                "{} ⚠️ {} 在 {} 阶段失败 (第 {} 次): {}",
                ctx, kind, phase, failures, error
            );

            let step_name = format!("{}-{}", kind, phase);
            if let Some(shot) = attempt.provider.capture_screenshot(&step_name).await {
                self.emit(
                    id,
                    NewEvent::new(EventType::ScreenshotSaved, phase)
                        .provider(kind)
                        .retry_count(failures)
                        .payload(json!({
                            "step": shot.step,
                            "path": shot.path.display().to_string(),
                        })),
                )
                .await;
            }

            let decision = self.policy.decide(&error, failures);
            if matches!(
                error.retry_class(),
                RetryClass::Transient | RetryClass::RetryOnce
            ) {
                let delay_ms = match decision {
                    RetryDecision::Retry(delay) => delay.as_millis() as u64,
                    RetryDecision::GiveUp => 0,
                };
                self.emit(
                    id,
                    NewEvent::new(EventType::RetryAttempt, phase)
                        .provider(kind)
                        .retry_count(failures)
                        .payload(json!({
                            "will_retry": matches!(decision, RetryDecision::Retry(_)),
                            "delay_ms": delay_ms,
                            "error": error.to_string(),
                        })),
                )
                .await;
            }

            match decision {
                RetryDecision::GiveUp => return Err(StepStop::Failed(error)),
                RetryDecision::Retry(delay) => {
                    info!(
                        "{} 🔁 {}ms 后重试 {} ({}/{})",
                        ctx,
                        delay.as_millis(),
                        phase,
                        failures + 1,
                        self.policy.tries_allowed(error.retry_class())
                    );
                    tokio::select! {
                        _ = job.cancel.cancelled() => return Err(StepStop::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// 调用 provider 的对应能力；provider panic 视为 provider 致命错误
    async fn invoke(
        &self,
        provider: &mut dyn PublishProvider,
        phase: Phase,
        job: &PublishJob,
        intent: &PublishIntent,
        carry: Option<&CarryOver>,
    ) -> Result<(StepOutput, Vec<String>), PublishError> {
        let kind = provider.kind();
        match AssertUnwindSafe(self.dispatch(provider, phase, job, intent, carry))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => Err(PublishError::ProviderCrashed {
                provider: kind,
                message: panic_message(panic.as_ref()),
            }),
        }
    }

    async fn dispatch(
        &self,
        provider: &mut dyn PublishProvider,
        phase: Phase,
        job: &PublishJob,
        intent: &PublishIntent,
        carry: Option<&CarryOver>,
    ) -> Result<(StepOutput, Vec<String>), PublishError> {
        let snapshot = &job.snapshot;
        match phase {
            Phase::Initialize => {
                provider.initialize(carry).await?;
                Ok((StepOutput::Done, Vec::new()))
            }
            Phase::Login => {
                let session = provider.login(&self.site_url, &self.credentials).await?;
                debug!("已登录 {} ({})", session.site_url, session.username);
                Ok((StepOutput::Done, Vec::new()))
            }
            Phase::CreateArticle => {
                let draft = provider
                    .create_article(&snapshot.article, &snapshot.metadata)
                    .await?;
                debug!("草稿: {}", draft.edit_url);
                Ok((StepOutput::Done, Vec::new()))
            }
            Phase::UploadImages => {
                let outcome = provider.upload_images(snapshot.images()).await?;
                let warnings = outcome.failures.iter().map(|e| e.to_string()).collect();
                Ok((StepOutput::Done, warnings))
            }
            Phase::ConfigureSeo => match provider.configure_seo(snapshot.seo()).await? {
                SeoOutcome::Applied => Ok((StepOutput::Done, Vec::new())),
                SeoOutcome::Unsupported { reason } => Ok((
                    StepOutput::Done,
                    vec![format!("SEO 未配置: {}", reason)],
                )),
            },
            Phase::Publish => {
                let result = provider.publish(intent).await?;
                Ok((StepOutput::Published(result), Vec::new()))
            }
            Phase::SaveDraft => {
                let result = provider.publish(&PublishIntent::SaveDraft).await?;
                Ok((StepOutput::Published(result), Vec::new()))
            }
            other => Err(PublishError::network(format!(
                "阶段 {} 不由 provider 执行",
                other
            ))),
        }
    }

    /// 切换到兜底 provider，返回要携带的会话状态
    async fn fall_back(
        &self,
        ctx: &TaskCtx,
        previous: &mut Attempt,
        next: ProviderKind,
        error: &PublishError,
        phase: Phase,
    ) -> CarryOver {
        let from = previous.provider.kind();
        warn!(
            "{} 🔁 {} 在 {} 阶段用尽重试，切换到 {}: {}",
            ctx, from, phase, next, error
        );
        self.emit(
            &ctx.task_id,
            NewEvent::new(EventType::ProviderFallback, phase)
                .provider(next)
                .retry_count(previous.failures)
                .payload(json!({
                    "from": from,
                    "to": next,
                    "reason": error.to_string(),
                    "kind": error.kind(),
                    "retry_count": previous.failures,
                })),
        )
        .await;
        self.metrics.record_fallback();
        previous.provider.carry_over().await
    }

    /// 用走得最远的 provider 尽力保存草稿，返回草稿地址
    async fn save_draft_best_effort(
        &self,
        ctx: &TaskCtx,
        job: &PublishJob,
        attempts: &mut [Attempt],
    ) -> Option<String> {
        let index = attempts
            .iter()
            .enumerate()
            .max_by_key(|(i, a)| (a.furthest, *i))
            .map(|(i, _)| i)?;
        let attempt = &mut attempts[index];
        let kind = attempt.provider.kind();
        let id = &job.task_id;

        info!("{} 💾 尝试用 {} 保存草稿", ctx, kind);
        self.set_phase(id, Phase::SaveDraft, 0).await;
        self.emit(id, NewEvent::new(EventType::PhaseStart, Phase::SaveDraft).provider(kind))
            .await;

        let saved = AssertUnwindSafe(self.recover_draft(job, attempt.provider.as_mut()))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(PublishError::ProviderCrashed {
                    provider: kind,
                    message: panic_message(panic.as_ref()),
                })
            });

        match saved {
            Ok(url) => {
                info!("{} 💾 草稿已保存: {}", ctx, url);
                self.emit(id, NewEvent::new(EventType::PhaseSuccess, Phase::SaveDraft).provider(kind))
                    .await;
                self.emit(
                    id,
                    NewEvent::new(EventType::DraftSaved, Phase::SaveDraft)
                        .provider(kind)
                        .payload(json!({ "draft_url": url })),
                )
                .await;
                Some(url)
            }
            Err(e) => {
                error!("{} ❌ 保存草稿失败: {}", ctx, e);
                self.emit(
                    id,
                    NewEvent::new(EventType::PhaseFailure, Phase::SaveDraft)
                        .provider(kind)
                        .payload(json!({ "error": e.to_string(), "kind": e.kind() })),
                )
                .await;
                None
            }
        }
    }

    async fn recover_draft(
        &self,
        job: &PublishJob,
        provider: &mut dyn PublishProvider,
    ) -> Result<String, PublishError> {
        if provider.draft().is_none() {
            provider.initialize(None).await?;
            provider.login(&self.site_url, &self.credentials).await?;
            provider
                .create_article(&job.snapshot.article, &job.snapshot.metadata)
                .await?;
        }
        let result = provider.publish(&PublishIntent::SaveDraft).await?;
        Ok(result
            .url
            .or_else(|| provider.draft().map(|d| d.edit_url.clone()))
            .unwrap_or_default())
    }

    /// 每个 provider 实例 cleanup 一次
    async fn cleanup_all(&self, ctx: &TaskCtx, attempts: &mut [Attempt]) {
        for attempt in attempts.iter_mut() {
            let kind = attempt.provider.kind();
            self.set_phase(&ctx.task_id, Phase::Cleanup, 0).await;
            self.emit(
                &ctx.task_id,
                NewEvent::new(EventType::PhaseStart, Phase::Cleanup).provider(kind),
            )
            .await;

            let timer = self.perf.start(Phase::Cleanup.as_str(), kind);
            let cleaned = AssertUnwindSafe(attempt.provider.cleanup())
                .catch_unwind()
                .await
                .is_ok();
            self.perf.finish(timer, cleaned);

            let event_type = if cleaned {
                EventType::PhaseSuccess
            } else {
                error!("{} ❌ {} cleanup 异常退出", ctx, kind);
                EventType::PhaseFailure
            };
            self.emit(
                &ctx.task_id,
                NewEvent::new(event_type, Phase::Cleanup).provider(kind),
            )
            .await;
        }
    }

    async fn fail_before_attempt(
        &self,
        ctx: &TaskCtx,
        err: PublishError,
    ) -> Result<TaskStatus, StoreError> {
        let id = &ctx.task_id;
        self.emit(
            id,
            NewEvent::new(EventType::PublishFailed, Phase::Validation).payload(json!({
                "error": err.to_string(),
                "kind": err.kind(),
                "attempts": 0,
            })),
        )
        .await;
        let history = phase_history(&self.store.events(id).await?);
        let failed = self
            .store
            .update_task(id, |t| {
                if t.status != TaskStatus::Pending {
                    return false;
                }
                t.status = TaskStatus::Failed;
                t.current_phase = Phase::Validation;
                t.completed_at = Some(Utc::now());
                t.error = Some(TaskError {
                    kind: err.kind().to_string(),
                    message: err.to_string(),
                    provider: None,
                    phase: Phase::Validation,
                    phase_history: history,
                    cost_usd: 0.0,
                });
                true
            })
            .await?;
        if !failed {
            return Ok(self.store.get_task(id).await?.status);
        }
        self.metrics.record_task(None, TaskStatus::Failed);
        Ok(TaskStatus::Failed)
    }

    async fn finish_failed(
        &self,
        ctx: &TaskCtx,
        err: PublishError,
        phase: Phase,
        provider: Option<ProviderKind>,
        draft_url: Option<String>,
        cost_usd: f64,
    ) -> Result<TaskStatus, StoreError> {
        let id = &ctx.task_id;
        error!("{} ❌ 发布失败 ({} / {}): {}", ctx, phase, err.kind(), err);
        self.emit(
            id,
            NewEvent::new(EventType::PublishFailed, phase).payload(json!({
                "error": err.to_string(),
                "kind": err.kind(),
                "provider": provider,
                "draft_url": draft_url,
            })),
        )
        .await;

        let history = phase_history(&self.store.events(id).await?);
        self.store
            .update_task(id, |t| {
                t.status = TaskStatus::Failed;
                t.current_phase = phase;
                t.completed_at = Some(Utc::now());
                t.draft_url = draft_url;
                t.error = Some(TaskError {
                    kind: err.kind().to_string(),
                    message: err.to_string(),
                    provider,
                    phase,
                    phase_history: history,
                    cost_usd,
                });
            })
            .await?;
        self.metrics.record_task(provider, TaskStatus::Failed);
        Ok(TaskStatus::Failed)
    }

    async fn finish_cancelled(
        &self,
        ctx: &TaskCtx,
        phase: Phase,
        provider: Option<ProviderKind>,
    ) -> Result<TaskStatus, StoreError> {
        let id = &ctx.task_id;
        info!("{} 🛑 任务已取消 (阶段: {})", ctx, phase);

        let mut event = NewEvent::new(EventType::TaskCancelled, phase);
        if let Some(provider) = provider {
            event = event.provider(provider);
        }
        self.emit(id, event).await;
        self.store
            .update_task(id, |t| {
                t.status = TaskStatus::Cancelled;
                t.current_phase = phase;
                t.completed_at = Some(Utc::now());
            })
            .await?;
        self.metrics.record_task(provider, TaskStatus::Cancelled);
        Ok(TaskStatus::Cancelled)
    }

    async fn emit(&self, id: &TaskId, event: NewEvent) {
        if let Err(e) = self.store.append(id, event).await {
            error!("❌ 事件写入失败: {}", e);
        }
    }

    async fn set_phase(&self, id: &TaskId, phase: Phase, retry_count: u32) {
        let updated = self
            .store
            .update_task(id, |t| {
                t.current_phase = phase;
                t.retry_count = retry_count;
            })
            .await;
        if let Err(e) = updated {
            error!("❌ 任务状态写入失败: {}", e);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "未知 panic".to_string()
    }
}
