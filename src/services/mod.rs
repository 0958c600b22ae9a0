pub mod llm_service;
pub mod screenshot_writer;
pub mod url_verifier;

pub use llm_service::{LlmService, ModelReply, ReasoningRequest, Reasoner, TokenUsage};
pub use screenshot_writer::ScreenshotWriter;
pub use url_verifier::UrlVerifier;
