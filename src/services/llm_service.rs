//! LLM 服务 - 业务能力层
//!
//! 只负责"看截图、给出下一步"的推理能力，不关心流程
//!
//! ## 技术栈
//! - 使用 `async-openai` crate 进行 API 调用
//! - 支持自定义 API 端点和模型
//! - 兼容 OpenAI API 的服务（如 Azure, Gemini, Doubao 等）

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImage,
        ChatCompletionRequestMessageContentPartText, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContent,
        ChatCompletionRequestUserMessageContentPart, CreateChatCompletionRequestArgs, ImageDetail,
        ImageUrl,
    },
    Client,
};
use async_trait::async_trait;
use base64::Engine;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::LlmError;

/// 一次调用的 token 用量
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// 推理请求
#[derive(Debug, Clone)]
pub struct ReasoningRequest<'a> {
    pub system: &'a str,
    pub prompt: String,
    /// 当前视口截图（PNG）
    pub screenshot_png: Option<&'a [u8]>,
}

/// 模型回复
#[derive(Debug, Clone, PartialEq)]
pub struct ModelReply {
    pub content: String,
    pub usage: TokenUsage,
}

/// 推理能力
///
/// 代理 provider 只依赖这个 trait，测试时换成脚本化实现
#[async_trait]
pub trait Reasoner: Send + Sync {
    fn model_name(&self) -> &str;

    async fn reason(&self, request: ReasoningRequest<'_>) -> Result<ModelReply, LlmError>;
}

/// LLM 服务
///
/// 职责：
/// - 调用视觉模型，把截图和目标描述交给模型
/// - 返回原始文本和 token 用量
/// - 不解析动作、不执行动作、不计费
pub struct LlmService {
    client: Client<OpenAIConfig>,
    model_name: String,
}

impl LlmService {
    /// 创建新的 LLM 服务
    pub fn new(config: &Config) -> Self {
        // 配置 OpenAI 客户端（兼容 OpenAI API 的服务）
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.llm_api_key)
            .with_api_base(&config.llm_api_base_url);

        let client = Client::with_config(openai_config);

        Self {
            client,
            model_name: config.llm_model_name.clone(),
        }
    }

    /// 通用的 LLM 调用函数
    ///
    /// # 参数
    /// - `user_message`: 用户消息内容
    /// - `system_message`: 系统消息（可选）
    /// - `imgs`: 图片 URL 列表（可以是 data URL），会追加到用户消息中
    pub async fn send_to_llm(
        &self,
        user_message: &str,
        system_message: Option<&str>,
        imgs: &[String],
    ) -> Result<ModelReply, LlmError> {
        debug!("调用 LLM API，模型: {}", self.model_name);
        debug!("用户消息长度: {} 字符，图片 {} 张", user_message.len(), imgs.len());

        let mut messages = Vec::new();

        if let Some(sys_msg) = system_message {
            let system_msg = ChatCompletionRequestSystemMessageArgs::default()
                .content(sys_msg)
                .build()
                .map_err(|e| LlmError::RequestBuildFailed(e.to_string()))?;
            messages.push(ChatCompletionRequestMessage::System(system_msg));
        }

        let user_msg = if imgs.is_empty() {
            ChatCompletionRequestUserMessageArgs::default()
                .content(user_message)
                .build()
        } else {
            // Vision：文本 + 图片
            let mut content_parts: Vec<ChatCompletionRequestUserMessageContentPart> = Vec::new();
            content_parts.push(ChatCompletionRequestUserMessageContentPart::Text(
                ChatCompletionRequestMessageContentPartText {
                    text: user_message.to_string(),
                },
            ));
            for url in imgs {
                content_parts.push(ChatCompletionRequestUserMessageContentPart::ImageUrl(
                    ChatCompletionRequestMessageContentPartImage {
                        image_url: ImageUrl {
                            url: url.clone(),
                            detail: Some(ImageDetail::High),
                        },
                    },
                ));
            }
            ChatCompletionRequestUserMessageArgs::default()
                .content(ChatCompletionRequestUserMessageContent::Array(content_parts))
                .build()
        }
        .map_err(|e| LlmError::RequestBuildFailed(e.to_string()))?;

        messages.push(ChatCompletionRequestMessage::User(user_msg));

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model_name)
            .messages(messages)
            .temperature(0.0)
            .max_tokens(512u32)
            .build()
            .map_err(|e| LlmError::RequestBuildFailed(e.to_string()))?;

        let response = self.client.chat().create(request).await.map_err(|e| {
            warn!("LLM API 调用失败: {}", e);
            LlmError::ApiCallFailed {
                model: self.model_name.clone(),
                message: e.to_string(),
            }
        })?;

        let usage = response
            .usage
            .as_ref()
            .map(|u| TokenUsage {
                input_tokens: u64::from(u.prompt_tokens),
                output_tokens: u64::from(u.completion_tokens),
            })
            .unwrap_or_default();

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| LlmError::EmptyContent {
                model: self.model_name.clone(),
            })?;

        debug!(
            "LLM API 调用成功，输入 {} / 输出 {} tokens",
            usage.input_tokens, usage.output_tokens
        );

        Ok(ModelReply {
            content: content.trim().to_string(),
            usage,
        })
    }
}

#[async_trait]
impl Reasoner for LlmService {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn reason(&self, request: ReasoningRequest<'_>) -> Result<ModelReply, LlmError> {
        let imgs: Vec<String> = request.screenshot_png.map(png_data_url).into_iter().collect();
        self.send_to_llm(&request.prompt, Some(request.system), &imgs)
            .await
    }
}

/// PNG 字节转 data URL
pub fn png_data_url(png: &[u8]) -> String {
    format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(png)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_png_data_url_prefix() {
        let url = png_data_url(&[0x89, b'P', b'N', b'G']);
        assert_eq!(url, "data:image/png;base64,iVBORw==");
    }

    #[test]
    fn test_token_usage_total() {
        let usage = TokenUsage {
            input_tokens: 1200,
            output_tokens: 80,
        };
        assert_eq!(usage.total(), 1280);
    }

    /// 需要真实的 LLM 服务
    #[tokio::test]
    #[ignore]
    async fn test_send_to_llm_live() {
        let config = Config::from_env().unwrap();
        let service = LlmService::new(&config);
        let reply = service
            .send_to_llm("只回复 OK 两个字母", Some("你是一个测试助手"), &[])
            .await
            .unwrap();
        assert!(reply.content.contains("OK"));
    }
}
