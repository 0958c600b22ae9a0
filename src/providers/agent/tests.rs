use super::*;
use crate::error::{BudgetScope, LlmError};
use crate::infrastructure::{ElementState, SessionCookie};
use crate::services::{ModelReply, ScreenshotWriter, TokenUsage};
use serde_json::{json, Value as JsonValue};
use std::collections::VecDeque;
use std::sync::Mutex;
use uuid::Uuid;

const SITE: &str = "https://cms.test";

/// 按脚本回复的模型，记录收到的提示词
struct ScriptedReasoner {
    replies: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
    usage: TokenUsage,
}

impl ScriptedReasoner {
    fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            prompts: Mutex::new(Vec::new()),
            usage: TokenUsage {
                input_tokens: 1_000,
                output_tokens: 50,
            },
        })
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Reasoner for ScriptedReasoner {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn reason(&self, request: ReasoningRequest<'_>) -> Result<ModelReply, LlmError> {
        assert!(request.screenshot_png.is_some());
        self.prompts.lock().unwrap().push(request.prompt);
        let content = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| r#"{"action":"scroll","dy":300}"#.to_string());
        Ok(ModelReply {
            content,
            usage: self.usage,
        })
    }
}

/// 只记录动作的页面
#[derive(Default)]
struct RecordingPage {
    url: Mutex<String>,
    typed: Mutex<Vec<String>>,
    clicks: Mutex<Vec<(f64, f64)>>,
    files: Mutex<Vec<PathBuf>>,
    title: Mutex<String>,
}

#[async_trait]
impl BrowserPage for RecordingPage {
    async fn goto(&self, url: &str) -> Result<(), PublishError> {
        *self.url.lock().unwrap() = url.to_string();
        Ok(())
    }

    async fn current_url(&self) -> Result<String, PublishError> {
        Ok(self.url.lock().unwrap().clone())
    }

    async fn eval(&self, js: &str) -> Result<JsonValue, PublishError> {
        if js.contains("getEditedPostAttribute") {
            return Ok(json!(self.title.lock().unwrap().clone()));
        }
        Ok(JsonValue::Null)
    }

    async fn probe(&self, _selector: &str) -> Result<ElementState, PublishError> {
        Ok(ElementState::default())
    }

    async fn click(&self, _selector: &str) -> Result<(), PublishError> {
        Ok(())
    }

    async fn fill(&self, _selector: &str, _value: &str) -> Result<(), PublishError> {
        Ok(())
    }

    async fn set_files(&self, _selector: &str, files: &[PathBuf]) -> Result<(), PublishError> {
        self.files.lock().unwrap().extend_from_slice(files);
        Ok(())
    }

    async fn click_at(&self, x: f64, y: f64) -> Result<(), PublishError> {
        self.clicks.lock().unwrap().push((x, y));
        Ok(())
    }

    async fn insert_text(&self, text: &str) -> Result<(), PublishError> {
        self.typed.lock().unwrap().push(text.to_string());
        // 模拟保存草稿后跳转到编辑页
        if text.starts_with("<p>") {
            *self.url.lock().unwrap() = format!("{}/wp-admin/post.php?post=77&action=edit", SITE);
        }
        Ok(())
    }

    async fn press_key(&self, _key: &str) -> Result<(), PublishError> {
        Ok(())
    }

    async fn scroll_by(&self, _dy: f64) -> Result<(), PublishError> {
        Ok(())
    }

    async fn screenshot(&self) -> Result<Vec<u8>, PublishError> {
        Ok(vec![0x89, b'P', b'N', b'G'])
    }

    async fn cookies(&self) -> Result<Vec<SessionCookie>, PublishError> {
        Ok(Vec::new())
    }

    async fn set_cookies(&self, _cookies: &[SessionCookie]) -> Result<(), PublishError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), PublishError> {
        Ok(())
    }
}

struct SinglePage(Arc<RecordingPage>);

#[async_trait]
impl PageSource for SinglePage {
    async fn open_page(&self, options: PageOptions) -> Result<Arc<dyn BrowserPage>, PublishError> {
        assert!(!options.block_resources);
        Ok(self.0.clone())
    }
}

fn settings() -> AgentSettings {
    AgentSettings {
        max_steps: 5,
        estimated_step_tokens: 1_000,
        operation_token_limit: 50_000,
        session_token_limit: 100_000,
        pricing: TokenPricing {
            input_per_million: 3.0,
            output_per_million: 15.0,
        },
        settle_delay: Duration::ZERO,
    }
}

fn agent(page: &Arc<RecordingPage>, reasoner: Option<Arc<dyn Reasoner>>, settings: AgentSettings) -> AgentProvider {
    AgentProvider::new(
        ProviderContext {
            task_id: Uuid::new_v4(),
            screenshots: Arc::new(ScreenshotWriter::new(std::env::temp_dir())),
        },
        Arc::new(SinglePage(page.clone())),
        reasoner,
        settings,
    )
}

fn credentials() -> Credentials {
    Credentials {
        username: "editor".into(),
        password: "hunter2".into(),
    }
}

#[tokio::test]
async fn test_login_resolves_placeholders_locally() {
    let page = Arc::new(RecordingPage::default());
    let reasoner = ScriptedReasoner::new(&[
        r#"{"action":"click","x":600,"y":300}"#,
        r#"{"action":"type","text":"{{username}}"}"#,
        r#"{"action":"type","text":"{{password}}"}"#,
        r#"```json
{"action":"press","key":"Enter"}
```"#,
        r#"{"action":"done"}"#,
    ]);
    let mut provider = agent(&page, Some(reasoner.clone()), settings());

    provider.initialize(None).await.unwrap();
    let session = provider.login(SITE, &credentials()).await.unwrap();

    assert_eq!(session.username, "editor");
    assert_eq!(*page.typed.lock().unwrap(), vec!["editor", "hunter2"]);
    assert_eq!(page.clicks.lock().unwrap().len(), 1);
    let prompts = reasoner.prompts();
    assert_eq!(prompts.len(), 5);
    assert!(prompts.iter().all(|p| !p.contains("hunter2")));
    assert!(prompts[4].contains("type({{password}})"));

    // 5 次调用，每次 1000 输入 + 50 输出
    let expected = 5.0 * (1_000.0 * 3.0 + 50.0 * 15.0) / 1_000_000.0;
    assert!((provider.cost_usd() - expected).abs() < 1e-9);
}

#[tokio::test]
async fn test_missing_reasoner_fails_initialization() {
    let page = Arc::new(RecordingPage::default());
    let mut provider = agent(&page, None, settings());
    let err = provider.initialize(None).await.unwrap_err();
    assert!(matches!(err, PublishError::Initialization { provider: ProviderKind::Agent, .. }));
}

#[tokio::test]
async fn test_session_budget_stops_before_next_call() {
    let page = Arc::new(RecordingPage::default());
    let reasoner = ScriptedReasoner::new(&[]);
    let mut tight = settings();
    tight.session_token_limit = 2_500;
    let mut provider = agent(&page, Some(reasoner.clone()), tight);

    provider.initialize(None).await.unwrap();
    let err = provider.login(SITE, &credentials()).await.unwrap_err();

    assert!(matches!(
        err,
        PublishError::TokenBudgetExceeded {
            scope: BudgetScope::Session,
            used: 2_100,
            limit: 2_500
        }
    ));
    assert_eq!(reasoner.prompts().len(), 2);
}

#[tokio::test]
async fn test_step_limit_is_element_not_found() {
    let page = Arc::new(RecordingPage::default());
    let reasoner = ScriptedReasoner::new(&[]);
    let mut provider = agent(&page, Some(reasoner.clone()), settings());

    provider.initialize(None).await.unwrap();
    let err = provider.login(SITE, &credentials()).await.unwrap_err();
    assert!(matches!(err, PublishError::ElementNotFound { .. }));
    assert_eq!(reasoner.prompts().len(), 5);
}

#[tokio::test]
async fn test_unparseable_reply_is_retryable() {
    let page = Arc::new(RecordingPage::default());
    let reasoner = ScriptedReasoner::new(&["我看不清这个页面"]);
    let mut provider = agent(&page, Some(reasoner), settings());

    provider.initialize(None).await.unwrap();
    let err = provider.login(SITE, &credentials()).await.unwrap_err();
    assert_eq!(err.retry_class(), crate::error::RetryClass::Transient);
}

#[tokio::test]
async fn test_model_reported_auth_failure() {
    let page = Arc::new(RecordingPage::default());
    let reasoner = ScriptedReasoner::new(&[r#"{"action":"fail","reason":"密码错误","kind":"auth"}"#]);
    let mut provider = agent(&page, Some(reasoner), settings());

    provider.initialize(None).await.unwrap();
    let err = provider.login(SITE, &credentials()).await.unwrap_err();
    assert!(matches!(err, PublishError::Authentication(_)));
}

#[tokio::test]
async fn test_create_article_then_publish() {
    let page = Arc::new(RecordingPage::default());
    *page.title.lock().unwrap() = "代理发布的文章".to_string();
    let reasoner = ScriptedReasoner::new(&[
        r#"{"action":"done"}"#,
        r#"{"action":"type","text":"{{title}}"}"#,
        r#"{"action":"type","text":"{{content}}"}"#,
        r#"{"action":"done"}"#,
        r#"{"action":"done","result":"https://cms.test/agent-post"}"#,
    ]);
    let mut provider = agent(&page, Some(reasoner), settings());
    let article = Article {
        title: "代理发布的文章".into(),
        content: "<p>正文</p>".into(),
    };

    provider.initialize(None).await.unwrap();
    provider.login(SITE, &credentials()).await.unwrap();
    let draft = provider
        .create_article(&article, &ArticleMetadata::default())
        .await
        .unwrap();
    assert_eq!(draft.post_id.as_deref(), Some("77"));

    let result = provider.publish(&PublishIntent::PublishNow).await.unwrap();
    assert_eq!(result.url.as_deref(), Some("https://cms.test/agent-post"));
}

#[tokio::test]
async fn test_seo_unsupported_and_missing_image() {
    let page = Arc::new(RecordingPage::default());
    let reasoner = ScriptedReasoner::new(&[r#"{"action":"fail","reason":"没有 SEO 面板","kind":"unsupported"}"#]);
    let mut provider = agent(&page, Some(reasoner), settings());
    provider.initialize(Some(&CarryOver {
        cookies: Vec::new(),
        draft: Some(DraftHandle {
            post_id: Some("9".into()),
            edit_url: format!("{}/wp-admin/post.php?post=9&action=edit", SITE),
        }),
    }))
    .await
    .unwrap();

    let seo = SeoMetadata {
        meta_title: Some("标题".into()),
        ..Default::default()
    };
    assert!(matches!(
        provider.configure_seo(&seo).await.unwrap(),
        SeoOutcome::Unsupported { .. }
    ));

    let outcome = provider
        .upload_images(&[ImageAsset {
            file_path: PathBuf::from("/nonexistent/cover.png"),
            alt_text: None,
            title: None,
            caption: None,
            is_featured: true,
        }])
        .await
        .unwrap();
    assert!(outcome.uploaded.is_empty());
    assert_eq!(outcome.failures.len(), 1);
    assert!(page.files.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_publish_without_draft_is_refused() {
    let page = Arc::new(RecordingPage::default());
    let reasoner = ScriptedReasoner::new(&[]);
    let mut provider = agent(&page, Some(reasoner.clone()), settings());
    provider.initialize(None).await.unwrap();

    let err = provider.publish(&PublishIntent::PublishNow).await.unwrap_err();
    assert!(matches!(err, PublishError::PublishingSafety { .. }));
    assert!(reasoner.prompts().is_empty());
}
