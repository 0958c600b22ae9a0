//! 代理动作
//!
//! 模型每一步只返回一个 JSON 动作。敏感值用占位符（`{{password}}`）表示，
//! 在本地执行前替换，真实值不会进入提示词。

use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

use crate::error::LlmError;

/// 模型声明失败时的原因类别
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailKind {
    /// 账号或密码被拒绝
    Auth,
    /// 找不到需要操作的界面元素
    NotFound,
    /// 目标站点没有这个功能
    Unsupported,
    #[default]
    #[serde(other)]
    Other,
}

/// 一步动作
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AgentAction {
    Click { x: f64, y: f64 },
    Type { text: String },
    Press { key: String },
    Scroll { dy: f64 },
    Navigate { url: String },
    AttachFile { path: String },
    Done {
        #[serde(default)]
        result: Option<String>,
    },
    Fail {
        reason: String,
        #[serde(default)]
        kind: FailKind,
    },
}

impl fmt::Display for AgentAction {
    /// 写入历史和日志的描述，保留占位符原文
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentAction::Click { x, y } => write!(f, "click({:.0}, {:.0})", x, y),
            AgentAction::Type { text } => write!(f, "type({})", text),
            AgentAction::Press { key } => write!(f, "press({})", key),
            AgentAction::Scroll { dy } => write!(f, "scroll({:.0})", dy),
            AgentAction::Navigate { url } => write!(f, "navigate({})", url),
            AgentAction::AttachFile { path } => write!(f, "attach_file({})", path),
            AgentAction::Done { .. } => f.write_str("done"),
            AgentAction::Fail { reason, .. } => write!(f, "fail({})", reason),
        }
    }
}

/// 从模型回复中解析动作（容忍 markdown 代码块和前后说明文字）
pub fn parse_action(reply: &str) -> Result<AgentAction, LlmError> {
    static JSON_OBJECT: OnceLock<Option<Regex>> = OnceLock::new();
    let extracted = JSON_OBJECT
        .get_or_init(|| Regex::new(r"(?s)\{.*\}").ok())
        .as_ref()
        .and_then(|re| re.find(reply))
        .map(|m| m.as_str())
        .ok_or_else(|| LlmError::ActionParseFailed {
            response: truncate(reply),
            message: "回复中没有 JSON 对象".to_string(),
        })?;

    serde_json::from_str(extracted).map_err(|e| LlmError::ActionParseFailed {
        response: truncate(reply),
        message: e.to_string(),
    })
}

fn truncate(reply: &str) -> String {
    reply.chars().take(200).collect()
}

/// 占位符表
#[derive(Clone, Default)]
pub struct Placeholders {
    values: BTreeMap<&'static str, String>,
}

impl Placeholders {
    pub fn set(&mut self, name: &'static str, value: impl Into<String>) {
        self.values.insert(name, value.into());
    }

    /// 已登记的占位符名称（写进提示词）
    pub fn names(&self) -> Vec<String> {
        self.values.keys().map(|k| format!("{{{{{}}}}}", k)).collect()
    }

    pub fn resolve(&self, text: &str) -> String {
        self.values.iter().fold(text.to_string(), |acc, (name, value)| {
            acc.replace(&format!("{{{{{}}}}}", name), value)
        })
    }
}

impl fmt::Debug for Placeholders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.values.keys()).finish()
    }
}
