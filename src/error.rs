use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{ProviderKind, TaskId, TaskStatus};

/// 错误的重试分类
///
/// 编排层根据该分类决定重试、切换 provider 还是直接终止任务
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// 瞬时错误，按退避策略重试
    Transient,
    /// 只允许重试一次（认证失败，避免账号被锁）
    RetryOnce,
    /// 对当前 provider 致命，可以触发兜底
    ProviderFatal,
    /// 对整个任务致命，不重试也不兜底
    TaskFatal,
}

/// Token 预算的作用范围
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetScope {
    Operation,
    Session,
}

/// 发布流程错误
///
/// provider、编排层和对外接口共用的错误分类
#[derive(Debug, Clone, Error)]
pub enum PublishError {
    /// 输入格式错误，任务创建前拒绝
    #[error("输入校验失败: {0}")]
    Validation(String),

    /// 发布前安全校验失败
    #[error("发布安全校验失败: {}", .reasons.join("; "))]
    PublishingSafety { reasons: Vec<String> },

    /// provider 初始化失败
    #[error("初始化失败 ({provider}): {message}")]
    Initialization {
        provider: ProviderKind,
        message: String,
    },

    /// 账号或密码错误
    #[error("登录认证失败: {0}")]
    Authentication(String),

    /// 网络 / 浏览器连接失败
    #[error("网络错误: {0}")]
    Network(String),

    /// 元素等待超时
    #[error("元素未找到: {selector} (已等待 {waited_ms}ms)")]
    ElementNotFound { selector: String, waited_ms: u64 },

    /// 单张图片上传失败
    #[error("图片上传失败 ({path}): {message}")]
    AssetUpload { path: String, message: String },

    /// AI provider 超出 token 预算
    #[error("Token 预算超限 ({scope:?}): 已用 {used} / 上限 {limit}")]
    TokenBudgetExceeded {
        scope: BudgetScope,
        used: u64,
        limit: u64,
    },

    /// provider 内部崩溃（panic）
    #[error("provider 异常退出 ({provider}): {message}")]
    ProviderCrashed {
        provider: ProviderKind,
        message: String,
    },

    /// 任务已处于终态
    #[error("任务 {task_id} 已处于终态 {status}，无法取消")]
    CannotCancelTask { task_id: TaskId, status: TaskStatus },

    /// 任务不存在
    #[error("任务不存在: {0}")]
    TaskNotFound(TaskId),
}

impl PublishError {
    /// 错误类型名（写入事件和任务错误详情）
    pub fn kind(&self) -> &'static str {
        match self {
            PublishError::Validation(_) => "ValidationError",
            PublishError::PublishingSafety { .. } => "PublishingSafetyError",
            PublishError::Initialization { .. } => "InitializationError",
            PublishError::Authentication(_) => "AuthenticationError",
            PublishError::Network(_) => "NetworkError",
            PublishError::ElementNotFound { .. } => "ElementNotFoundError",
            PublishError::AssetUpload { .. } => "AssetUploadError",
            PublishError::TokenBudgetExceeded { .. } => "TokenBudgetExceededError",
            PublishError::ProviderCrashed { .. } => "ProviderCrashedError",
            PublishError::CannotCancelTask { .. } => "CannotCancelTask",
            PublishError::TaskNotFound(_) => "TaskNotFound",
        }
    }

    /// 重试分类
    pub fn retry_class(&self) -> RetryClass {
        match self {
            PublishError::Network(_) | PublishError::ElementNotFound { .. } => RetryClass::Transient,
            PublishError::Authentication(_) => RetryClass::RetryOnce,
            PublishError::PublishingSafety { .. } | PublishError::Validation(_) => {
                RetryClass::TaskFatal
            }
            _ => RetryClass::ProviderFatal,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        PublishError::Network(message.into())
    }

    pub fn element_not_found(selector: impl Into<String>, waited_ms: u64) -> Self {
        PublishError::ElementNotFound {
            selector: selector.into(),
            waited_ms,
        }
    }

    pub fn safety(reason: impl Into<String>) -> Self {
        PublishError::PublishingSafety {
            reasons: vec![reason.into()],
        }
    }
}

/// 浏览器相关错误
#[derive(Debug, Error)]
pub enum BrowserError {
    /// 连接浏览器失败
    #[error("无法连接到浏览器 (端口: {port}): {source}")]
    ConnectionFailed {
        port: u16,
        #[source]
        source: chromiumoxide::error::CdpError,
    },
    /// 启动浏览器失败
    #[error("启动无头浏览器失败: {0}")]
    LaunchFailed(String),
    /// 创建页面失败
    #[error("创建页面失败: {source}")]
    PageCreationFailed {
        #[source]
        source: chromiumoxide::error::CdpError,
    },
    /// 浏览器配置失败
    #[error("浏览器配置失败: {0}")]
    ConfigurationFailed(String),
}

/// LLM 服务错误
#[derive(Debug, Error)]
pub enum LlmError {
    /// API 调用失败
    #[error("LLM API调用失败 (模型: {model}): {message}")]
    ApiCallFailed { model: String, message: String },
    /// 请求构建失败
    #[error("LLM 请求构建失败: {0}")]
    RequestBuildFailed(String),
    /// 返回结果为空
    #[error("LLM返回内容为空 (模型: {model})")]
    EmptyContent { model: String },
    /// 动作解析失败
    #[error("无法解析LLM返回的动作 (响应: {response}): {message}")]
    ActionParseFailed { response: String, message: String },
}

impl From<LlmError> for PublishError {
    fn from(err: LlmError) -> Self {
        match err {
            // 模型答非所问视为一次"没找到目标"，交给重试
            LlmError::ActionParseFailed { response, .. } => {
                PublishError::element_not_found(format!("agent-action: {response}"), 0)
            }
            other => PublishError::Network(other.to_string()),
        }
    }
}

/// 存储错误
#[derive(Debug, Error)]
pub enum StoreError {
    /// 文件读写失败
    #[error("存储文件读写失败 ({path}): {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// JSON 序列化失败
    #[error("JSON 序列化失败: {0}")]
    Serialize(#[from] serde_json::Error),
    /// 持久化记录损坏
    #[error("持久化记录损坏 ({path}): {message}")]
    Corrupt { path: String, message: String },
    /// 任务不存在
    #[error("任务不存在: {0}")]
    TaskNotFound(TaskId),
    /// 任务重复
    #[error("任务已存在: {0}")]
    DuplicateTask(TaskId),
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 配置文件读取失败
    #[error("读取配置文件失败 ({path}): {source}")]
    FileReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// TOML 解析失败
    #[error("TOML解析失败 ({path}): {source}")]
    TomlParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    /// 配置值不合法
    #[error("配置项 {key} 的值 '{value}' 不合法: {expected}")]
    InvalidValue {
        key: String,
        value: String,
        expected: String,
    },
}

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 浏览器相关错误
    #[error("浏览器错误: {0}")]
    Browser(#[from] BrowserError),
    /// LLM 服务错误
    #[error("LLM错误: {0}")]
    Llm(#[from] LlmError),
    /// 存储错误
    #[error("存储错误: {0}")]
    Store(#[from] StoreError),
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
    /// 发布流程错误
    #[error("发布错误: {0}")]
    Publish(#[from] PublishError),
    /// 其他错误（用于包装第三方库错误）
    #[error("错误: {0}")]
    Other(String),
}

impl From<prometheus::Error> for AppError {
    fn from(err: prometheus::Error) -> Self {
        AppError::Other(format!("指标注册失败: {}", err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Other(format!("IO 错误: {}", err))
    }
}

// ========== 分类查询 ==========

impl AppError {
    /// 对外接口的"任务不存在"
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            AppError::Publish(PublishError::TaskNotFound(_)) | AppError::Store(StoreError::TaskNotFound(_))
        )
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_class() {
        assert_eq!(PublishError::network("timeout").retry_class(), RetryClass::Transient);
        assert_eq!(
            PublishError::element_not_found("#publish", 20_000).retry_class(),
            RetryClass::Transient
        );
        assert_eq!(
            PublishError::Authentication("bad password".into()).retry_class(),
            RetryClass::RetryOnce
        );
        assert_eq!(PublishError::safety("no draft").retry_class(), RetryClass::TaskFatal);
        assert_eq!(
            PublishError::TokenBudgetExceeded {
                scope: BudgetScope::Session,
                used: 10,
                limit: 5
            }
            .retry_class(),
            RetryClass::ProviderFatal
        );
    }

    #[test]
    fn test_llm_error_maps_to_publish_error() {
        let err: PublishError = LlmError::EmptyContent {
            model: "m".into(),
        }
        .into();
        assert_eq!(err.kind(), "NetworkError");

        let err: PublishError = LlmError::ActionParseFailed {
            response: "hmm".into(),
            message: "no json".into(),
        }
        .into();
        assert_eq!(err.kind(), "ElementNotFoundError");
    }

    #[test]
    fn test_safety_error_display() {
        let err = PublishError::PublishingSafety {
            reasons: vec!["标题过短".into(), "缺少 meta_title".into()],
        };
        assert_eq!(err.to_string(), "发布安全校验失败: 标题过短; 缺少 meta_title");
    }
}
