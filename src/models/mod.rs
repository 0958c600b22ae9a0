pub mod article;
pub mod event;
pub mod loaders;
pub mod task;

pub use article::{Article, ArticleMetadata, ArticleRef, ArticleSnapshot, ImageAsset, SeoMetadata};
pub use event::{phase_history, EventSummary, EventType, ExecutionEvent, NewEvent};
pub use loaders::{load_all_submissions, load_submission, ArticleSubmission};
pub use task::{
    short_id, Phase, PhaseRecord, ProviderKind, ProviderPreference, PublishIntent, PublishTask,
    TaskError, TaskId, TaskResult, TaskStatus,
};
