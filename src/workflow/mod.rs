pub mod publish_flow;
pub mod retry;
pub mod safety;
pub mod task_ctx;

pub use publish_flow::{PublishFlow, PublishJob};
pub use retry::{RetryDecision, RetryPolicy};
pub use safety::{validate, validate_submission, SafetyReport};
pub use task_ctx::TaskCtx;
