//! 执行事件（审计日志）
//!
//! 事件一旦写入即不可变，按任务内序号严格有序

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::models::task::{Phase, PhaseRecord, ProviderKind, TaskId};

/// 事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    PhaseStart,
    PhaseSuccess,
    PhaseFailure,
    ScreenshotSaved,
    ProviderFallback,
    RetryAttempt,
    /// 非致命问题（可选字段缺失、SEO 不支持、单张图片失败等）
    Warning,
    PublishFailed,
    DraftSaved,
    TaskCancelled,
}

/// 已持久化的事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionEvent {
    pub task_id: TaskId,
    /// 任务内单调递增序号，从 1 开始
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub phase: Phase,
    pub retry_count: u32,
    #[serde(default)]
    pub provider: Option<ProviderKind>,
    #[serde(default)]
    pub payload: Option<JsonValue>,
}

/// 待追加的事件，序号和时间戳由 TaskStore 分配
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub event_type: EventType,
    pub phase: Phase,
    pub retry_count: u32,
    pub provider: Option<ProviderKind>,
    pub payload: Option<JsonValue>,
}

impl NewEvent {
    pub fn new(event_type: EventType, phase: Phase) -> Self {
        Self {
            event_type,
            phase,
            retry_count: 0,
            provider: None,
            payload: None,
        }
    }

    pub fn provider(mut self, provider: ProviderKind) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn payload(mut self, payload: JsonValue) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// 单个任务的事件汇总
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSummary {
    pub total_phases: usize,
    pub failures: usize,
    pub screenshots: usize,
    pub provider_switches: usize,
    pub total_events: usize,
}

impl EventSummary {
    pub fn from_events(events: &[ExecutionEvent]) -> Self {
        let mut summary = EventSummary {
            total_events: events.len(),
            ..Default::default()
        };
        for event in events {
            match event.event_type {
                EventType::PhaseStart => summary.total_phases += 1,
                EventType::PhaseFailure => summary.failures += 1,
                EventType::ScreenshotSaved => summary.screenshots += 1,
                EventType::ProviderFallback => summary.provider_switches += 1,
                _ => {}
            }
        }
        summary
    }
}

/// 从事件流还原阶段历史（只取阶段结果事件）
pub fn phase_history(events: &[ExecutionEvent]) -> Vec<PhaseRecord> {
    events
        .iter()
        .filter(|e| matches!(e.event_type, EventType::PhaseSuccess | EventType::PhaseFailure))
        .map(|e| PhaseRecord {
            phase: e.phase,
            provider: e.provider,
            succeeded: e.event_type == EventType::PhaseSuccess,
            retry_count: e.retry_count,
            error: e
                .payload
                .as_ref()
                .and_then(|p| p.get("error"))
                .and_then(|v| v.as_str())
                .map(str::to_string),
            at: e.timestamp,
        })
        .collect()
}
