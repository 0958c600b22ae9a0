use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::models::{ProviderKind, ProviderPreference};

/// 程序配置
///
/// 优先级：环境变量 > TOML 配置文件 > 默认值
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 同时处理的任务数量
    pub max_concurrent_tasks: usize,
    /// 浏览器调试端口（0 表示启动无头浏览器）
    pub browser_debug_port: u16,
    /// 无头浏览器可执行文件路径
    pub browser_executable: Option<String>,
    /// 是否在会话建立时拦截图片/字体/统计请求
    pub block_resources: bool,
    /// 输出日志文件
    pub output_log_file: String,
    // --- CMS 配置 ---
    pub cms_site_url: String,
    pub cms_username: String,
    pub cms_password: String,
    // --- provider 选择与重试 ---
    pub primary_provider: ProviderKind,
    pub fallback_provider: Option<ProviderKind>,
    pub max_retries: u32,
    pub backoff_initial_ms: u64,
    pub backoff_multiplier: f64,
    pub backoff_max_ms: u64,
    // --- 确定性 provider ---
    pub selector_cache_ttl_secs: u64,
    pub element_timeout_secs: u64,
    // --- LLM / 代理 provider ---
    pub llm_api_key: String,
    pub llm_api_base_url: String,
    pub llm_model_name: String,
    pub agent_max_steps: u32,
    pub agent_session_token_limit: u64,
    pub agent_operation_token_limit: u64,
    pub agent_estimated_step_tokens: u64,
    pub agent_input_cost_per_million: f64,
    pub agent_output_cost_per_million: f64,
    // --- 存储与投递 ---
    pub store_dir: String,
    pub screenshot_dir: String,
    pub intake_folder: String,
    /// HTTP 接口监听地址，不设置则不启动
    pub http_bind: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 5,
            browser_debug_port: 9222,
            browser_executable: None,
            block_resources: true,
            output_log_file: "publish_log.txt".to_string(),
            cms_site_url: "http://localhost:8080".to_string(),
            cms_username: String::new(),
            cms_password: String::new(),
            primary_provider: ProviderKind::Deterministic,
            fallback_provider: Some(ProviderKind::Agent),
            max_retries: 3,
            backoff_initial_ms: 1_000,
            backoff_multiplier: 2.0,
            backoff_max_ms: 30_000,
            selector_cache_ttl_secs: 300,
            element_timeout_secs: 20,
            llm_api_key: String::new(),
            llm_api_base_url: "https://api.openai.com/v1".to_string(),
            llm_model_name: "gpt-4o".to_string(),
            agent_max_steps: 15,
            agent_session_token_limit: 200_000,
            agent_operation_token_limit: 60_000,
            agent_estimated_step_tokens: 2_000,
            agent_input_cost_per_million: 3.0,
            agent_output_cost_per_million: 15.0,
            store_dir: "publish_store".to_string(),
            screenshot_dir: "screenshots".to_string(),
            intake_folder: "intake".to_string(),
            http_bind: None,
        }
    }
}

impl Config {
    /// 只从环境变量读取（未设置的使用默认值）
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().apply_env()
    }

    /// 读取 TOML 配置文件（可选），再叠加环境变量
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let base = match path {
            Some(path) => {
                let content =
                    std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadFailed {
                        path: path.display().to_string(),
                        source,
                    })?;
                toml::from_str(&content).map_err(|source| ConfigError::TomlParseFailed {
                    path: path.display().to_string(),
                    source,
                })?
            }
            None => Self::default(),
        };
        base.apply_env()
    }

    fn apply_env(self) -> Result<Self, ConfigError> {
        Ok(Self {
            max_concurrent_tasks: env_parse("MAX_CONCURRENT_TASKS", self.max_concurrent_tasks)?,
            browser_debug_port: env_parse("BROWSER_DEBUG_PORT", self.browser_debug_port)?,
            browser_executable: env_opt("BROWSER_EXECUTABLE").or(self.browser_executable),
            block_resources: env_parse("BLOCK_RESOURCES", self.block_resources)?,
            output_log_file: std::env::var("OUTPUT_LOG_FILE").unwrap_or(self.output_log_file),
            cms_site_url: std::env::var("CMS_SITE_URL").unwrap_or(self.cms_site_url),
            cms_username: std::env::var("CMS_USERNAME").unwrap_or(self.cms_username),
            cms_password: std::env::var("CMS_PASSWORD").unwrap_or(self.cms_password),
            primary_provider: env_parse("PRIMARY_PROVIDER", self.primary_provider)?,
            fallback_provider: match env_opt("FALLBACK_PROVIDER") {
                Some(v) if v.eq_ignore_ascii_case("none") => None,
                Some(v) => Some(parse_value("FALLBACK_PROVIDER", &v)?),
                None => self.fallback_provider,
            },
            max_retries: env_parse("MAX_RETRIES", self.max_retries)?,
            backoff_initial_ms: env_parse("BACKOFF_INITIAL_MS", self.backoff_initial_ms)?,
            backoff_multiplier: env_parse("BACKOFF_MULTIPLIER", self.backoff_multiplier)?,
            backoff_max_ms: env_parse("BACKOFF_MAX_MS", self.backoff_max_ms)?,
            selector_cache_ttl_secs: env_parse(
                "SELECTOR_CACHE_TTL_SECS",
                self.selector_cache_ttl_secs,
            )?,
            element_timeout_secs: env_parse("ELEMENT_TIMEOUT_SECS", self.element_timeout_secs)?,
            llm_api_key: std::env::var("LLM_API_KEY").unwrap_or(self.llm_api_key),
            llm_api_base_url: std::env::var("LLM_API_BASE_URL").unwrap_or(self.llm_api_base_url),
            llm_model_name: std::env::var("LLM_MODEL_NAME").unwrap_or(self.llm_model_name),
            agent_max_steps: env_parse("AGENT_MAX_STEPS", self.agent_max_steps)?,
            agent_session_token_limit: env_parse(
                "AGENT_SESSION_TOKEN_LIMIT",
                self.agent_session_token_limit,
            )?,
            agent_operation_token_limit: env_parse(
                "AGENT_OPERATION_TOKEN_LIMIT",
                self.agent_operation_token_limit,
            )?,
            agent_estimated_step_tokens: env_parse(
                "AGENT_ESTIMATED_STEP_TOKENS",
                self.agent_estimated_step_tokens,
            )?,
            agent_input_cost_per_million: env_parse(
                "AGENT_INPUT_COST_PER_MILLION",
                self.agent_input_cost_per_million,
            )?,
            agent_output_cost_per_million: env_parse(
                "AGENT_OUTPUT_COST_PER_MILLION",
                self.agent_output_cost_per_million,
            )?,
            store_dir: std::env::var("STORE_DIR").unwrap_or(self.store_dir),
            screenshot_dir: std::env::var("SCREENSHOT_DIR").unwrap_or(self.screenshot_dir),
            intake_folder: std::env::var("INTAKE_FOLDER").unwrap_or(self.intake_folder),
            http_bind: env_opt("HTTP_BIND").or(self.http_bind),
        })
    }

    /// 默认的 provider 组合
    pub fn provider_preference(&self) -> ProviderPreference {
        ProviderPreference {
            primary: self.primary_provider,
            fallback: self.fallback_provider,
        }
    }

    pub fn element_timeout(&self) -> Duration {
        Duration::from_secs(self.element_timeout_secs)
    }

    pub fn selector_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.selector_cache_ttl_secs)
    }
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match env_opt(name) {
        Some(raw) => parse_value(name, &raw),
        None => Ok(default),
    }
}

fn parse_value<T: FromStr>(name: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: name.to_string(),
        value: raw.to_string(),
        expected: std::any::type_name::<T>().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.max_concurrent_tasks, 5);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.element_timeout(), Duration::from_secs(20));
        assert_eq!(config.selector_cache_ttl(), Duration::from_secs(300));
        assert_eq!(
            config.provider_preference().attempt_plan(),
            vec![ProviderKind::Deterministic, ProviderKind::Agent]
        );
    }

    #[test]
    fn test_load_partial_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("publisher.toml");
        std::fs::write(
            &path,
            r#"
max_concurrent_tasks = 2
primary_provider = "agent"
fallback_provider = "deterministic"
cms_site_url = "https://blog.example.com"
"#,
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.primary_provider, ProviderKind::Agent);
        assert_eq!(config.fallback_provider, Some(ProviderKind::Deterministic));
        assert_eq!(config.cms_site_url, "https://blog.example.com");
        // 未出现的字段保持默认
        assert_eq!(config.element_timeout_secs, 20);
    }

    #[test]
    fn test_parse_value_reports_key() {
        let err = parse_value::<u32>("MAX_RETRIES", "three").unwrap_err();
        assert!(err.to_string().contains("MAX_RETRIES"));
    }
}
