//! 发布任务
//!
//! 任务状态只由编排层修改，TaskStore 负责持久化

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::models::article::ArticleRef;

/// 任务 ID
pub type TaskId = Uuid;

/// 执行后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// 基于 DOM 的确定性浏览器自动化
    Deterministic,
    /// 基于截图推理的 AI 代理
    Agent,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 2] = [ProviderKind::Deterministic, ProviderKind::Agent];

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Deterministic => "deterministic",
            ProviderKind::Agent => "agent",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "deterministic" | "browser" | "playwright" => Ok(ProviderKind::Deterministic),
            "agent" | "ai" | "computer_use" => Ok(ProviderKind::Agent),
            other => Err(format!("未知的 provider 类型: {}", other)),
        }
    }
}

/// 主 provider + 可选兜底 provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderPreference {
    pub primary: ProviderKind,
    #[serde(default)]
    pub fallback: Option<ProviderKind>,
}

impl ProviderPreference {
    /// 实际执行顺序：兜底与主 provider 同类型时直接跳过
    pub fn attempt_plan(&self) -> Vec<ProviderKind> {
        match self.fallback {
            Some(fallback) if fallback != self.primary => vec![self.primary, fallback],
            _ => vec![self.primary],
        }
    }
}

/// 发布意图
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PublishIntent {
    PublishNow,
    Schedule { at: DateTime<Utc> },
    SaveDraft,
}

impl PublishIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishIntent::PublishNow => "publish_now",
            PublishIntent::Schedule { .. } => "schedule",
            PublishIntent::SaveDraft => "save_draft",
        }
    }
}

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// 任务阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Queued,
    Validation,
    Initialize,
    Login,
    CreateArticle,
    UploadImages,
    ConfigureSeo,
    Publish,
    SaveDraft,
    Cleanup,
    Finished,
}

impl Phase {
    /// provider 尝试中依次执行的阶段
    pub const ATTEMPT_STEPS: [Phase; 6] = [
        Phase::Initialize,
        Phase::Login,
        Phase::CreateArticle,
        Phase::UploadImages,
        Phase::ConfigureSeo,
        Phase::Publish,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Queued => "queued",
            Phase::Validation => "validation",
            Phase::Initialize => "initialize",
            Phase::Login => "login",
            Phase::CreateArticle => "create_article",
            Phase::UploadImages => "upload_images",
            Phase::ConfigureSeo => "configure_seo",
            Phase::Publish => "publish",
            Phase::SaveDraft => "save_draft",
            Phase::Cleanup => "cleanup",
            Phase::Finished => "finished",
        }
    }

    /// 对外展示的进度百分比
    pub fn progress(self) -> u8 {
        match self {
            Phase::Queued => 0,
            Phase::Validation => 5,
            Phase::Initialize => 10,
            Phase::Login => 25,
            Phase::CreateArticle => 45,
            Phase::UploadImages => 60,
            Phase::ConfigureSeo => 75,
            Phase::Publish | Phase::SaveDraft => 90,
            Phase::Cleanup => 95,
            Phase::Finished => 100,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 成功结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub published_url: Option<String>,
    pub provider_used: ProviderKind,
    pub fallback_triggered: bool,
    pub duration_seconds: f64,
    pub cost_estimate_usd: f64,
}

/// 阶段历史中的一条
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub phase: Phase,
    pub provider: Option<ProviderKind>,
    pub succeeded: bool,
    pub retry_count: u32,
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

/// 失败详情
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskError {
    /// 错误类型名，例如 `NetworkError`
    pub kind: String,
    pub message: String,
    pub provider: Option<ProviderKind>,
    pub phase: Phase,
    #[serde(default)]
    pub phase_history: Vec<PhaseRecord>,
    /// 失败前已经产生的花费
    #[serde(default)]
    pub cost_usd: f64,
}

/// 发布任务
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishTask {
    pub id: TaskId,
    pub article: ArticleRef,
    pub requested_provider: ProviderKind,
    pub fallback_provider: Option<ProviderKind>,
    pub intent: PublishIntent,
    pub status: TaskStatus,
    pub current_phase: Phase,
    /// 当前阶段已失败的次数
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<TaskResult>,
    pub error: Option<TaskError>,
    /// 失败兜底后保存的草稿地址
    #[serde(default)]
    pub draft_url: Option<String>,
}

impl PublishTask {
    pub fn new(article: ArticleRef, preference: ProviderPreference, intent: PublishIntent) -> Self {
        Self {
            id: Uuid::new_v4(),
            article,
            requested_provider: preference.primary,
            fallback_provider: preference.fallback,
            intent,
            status: TaskStatus::Pending,
            current_phase: Phase::Queued,
            retry_count: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            draft_url: None,
        }
    }

    pub fn preference(&self) -> ProviderPreference {
        ProviderPreference {
            primary: self.requested_provider,
            fallback: self.fallback_provider,
        }
    }

    /// 日志用的短 ID
    pub fn short_id(&self) -> String {
        short_id(&self.id)
    }
}

/// 取 UUID 前 8 位
pub fn short_id(id: &TaskId) -> String {
    id.simple().to_string().chars().take(8).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempt_plan_skips_same_kind_fallback() {
        let same = ProviderPreference {
            primary: ProviderKind::Deterministic,
            fallback: Some(ProviderKind::Deterministic),
        };
        assert_eq!(same.attempt_plan(), vec![ProviderKind::Deterministic]);

        let distinct = ProviderPreference {
            primary: ProviderKind::Deterministic,
            fallback: Some(ProviderKind::Agent),
        };
        assert_eq!(
            distinct.attempt_plan(),
            vec![ProviderKind::Deterministic, ProviderKind::Agent]
        );
    }

    #[test]
    fn test_phase_progress_is_monotonic_over_attempt_steps() {
        let progress: Vec<u8> = Phase::ATTEMPT_STEPS.iter().map(|p| p.progress()).collect();
        assert!(progress.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(Phase::Finished.progress(), 100);
    }

    #[test]
    fn test_intent_serde_tag() {
        let json = serde_json::to_value(&PublishIntent::SaveDraft).unwrap();
        assert_eq!(json["type"], "save_draft");
        let parsed: PublishIntent = serde_json::from_str(r#"{"type":"publish_now"}"#).unwrap();
        assert_eq!(parsed, PublishIntent::PublishNow);
    }

    #[test]
    fn test_provider_kind_from_str() {
        assert_eq!("Agent".parse::<ProviderKind>(), Ok(ProviderKind::Agent));
        assert!("selenium".parse::<ProviderKind>().is_err());
    }
}
