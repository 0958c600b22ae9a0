use super::*;
use crate::infrastructure::{ElementState, SessionCookie};
use crate::instrumentation::SelectorKey;
use crate::services::ScreenshotWriter;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Mutex;
use uuid::Uuid;

const SITE: &str = "https://cms.test";
const TITLE: &str = "Rust 异步编程实践指南";

/// 脚本化的 WordPress 后台
struct FakeWpPage {
    state: Mutex<FakeState>,
}

struct FakeState {
    url: String,
    password: String,
    logged_in: bool,
    login_failed: bool,
    block_editor: bool,
    seo_plugin: Option<&'static str>,
    edited_title: String,
    post_status: String,
    missing: HashSet<&'static str>,
    filled: Vec<(String, String)>,
    clicks: Vec<String>,
    create_calls: usize,
    media_id: JsonValue,
    rest_calls: Vec<String>,
    cookies: Vec<SessionCookie>,
    closed: bool,
}

impl FakeWpPage {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeState {
                url: "about:blank".to_string(),
                password: "secret".to_string(),
                logged_in: false,
                login_failed: false,
                block_editor: true,
                seo_plugin: Some("yoast"),
                edited_title: TITLE.to_string(),
                post_status: "draft".to_string(),
                missing: HashSet::new(),
                filled: Vec::new(),
                clicks: Vec::new(),
                create_calls: 0,
                media_id: json!(7),
                rest_calls: Vec::new(),
                cookies: Vec::new(),
                closed: false,
            }),
        })
    }

    fn with<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }
}

impl FakeState {
    fn visible(&self, selector: &str) -> bool {
        if self.missing.contains(selector) {
            return false;
        }
        let on_login = self.url.contains("wp-login.php");
        let on_editor = self.url.contains("post-new.php") || self.url.contains("post.php");
        match selector {
            "#user_login" | "#user_pass" | "#wp-submit" => on_login,
            "#login_error" => on_login && self.login_failed,
            "#wpadminbar" => self.logged_in && self.url.contains("/wp-admin/"),
            ".editor-post-title__input" => on_editor && self.block_editor,
            "#title" | "#content" | "#save-post" => on_editor && !self.block_editor,
            ".editor-post-publish-panel__toggle" | ".editor-post-publish-button" => {
                on_editor && self.block_editor
            }
            _ => false,
        }
    }

    fn filled(&self, selector: &str) -> Option<&str> {
        self.filled
            .iter()
            .rev()
            .find(|(s, _)| s == selector)
            .map(|(_, v)| v.as_str())
    }
}

#[async_trait]
impl BrowserPage for FakeWpPage {
    async fn goto(&self, url: &str) -> Result<(), PublishError> {
        self.with(|s| {
            s.url = if url.contains("/wp-admin/") && !s.logged_in {
                format!("{}/wp-login.php", SITE)
            } else {
                url.to_string()
            };
        });
        Ok(())
    }

    async fn current_url(&self) -> Result<String, PublishError> {
        Ok(self.with(|s| s.url.clone()))
    }

    async fn eval(&self, js: &str) -> Result<JsonValue, PublishError> {
        Ok(self.with(|s| {
            if js.contains("resetBlocks") {
                s.create_calls += 1;
                if !s.block_editor {
                    return json!({ "ok": false, "reason": "no-block-editor" });
                }
                s.url = format!("{}/wp-admin/post.php?post=42&action=edit", SITE);
                json!({ "ok": true, "post_id": "42" })
            } else if js.contains("FormData") {
                json!({ "ok": true, "data": { "id": s.media_id, "source_url": "https://cms.test/cover.png" } })
            } else if js.contains("yoast-seo/editor") {
                json!({ "plugin": s.seo_plugin })
            } else if js.contains("getEditedPostAttribute") {
                json!(s.edited_title)
            } else if js.contains("didPostSaveRequestFail") {
                json!({ "ok": true })
            } else if js.contains("/wp/v2/posts/") {
                s.rest_calls.push(js.to_string());
                if js.contains(r#"const method = "GET";"#) {
                    json!({ "ok": true, "data": { "status": s.post_status, "link": "https://cms.test/?p=42" } })
                } else if js.contains("future") {
                    json!({ "ok": true, "data": { "status": "future", "link": "https://cms.test/?p=42" } })
                } else {
                    json!({ "ok": true, "data": {} })
                }
            } else if js.contains("#login_error") {
                json!("错误：密码不正确")
            } else {
                JsonValue::Null
            }
        }))
    }

    async fn probe(&self, selector: &str) -> Result<ElementState, PublishError> {
        let visible = self.with(|s| s.visible(selector));
        Ok(ElementState {
            present: visible,
            visible,
            enabled: visible,
        })
    }

    async fn click(&self, selector: &str) -> Result<(), PublishError> {
        self.with(|s| {
            s.clicks.push(selector.to_string());
            match selector {
                "#wp-submit" => {
                    if s.filled("#user_pass") == Some(s.password.as_str()) {
                        s.logged_in = true;
                        s.url = format!("{}/wp-admin/", SITE);
                    } else {
                        s.login_failed = true;
                    }
                }
                ".editor-post-publish-button" => s.post_status = "publish".to_string(),
                "#save-post" => s.url = format!("{}/wp-admin/post.php?post=43&action=edit", SITE),
                _ => {}
            }
        });
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<(), PublishError> {
        self.with(|s| s.filled.push((selector.to_string(), value.to_string())));
        Ok(())
    }

    async fn set_files(&self, _selector: &str, _files: &[PathBuf]) -> Result<(), PublishError> {
        Ok(())
    }

    async fn click_at(&self, _x: f64, _y: f64) -> Result<(), PublishError> {
        Ok(())
    }

    async fn insert_text(&self, _text: &str) -> Result<(), PublishError> {
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
        Ok(vec![SessionCookie {
            name: "wordpress_logged_in".into(),
            value: "token".into(),
            domain: "cms.test".into(),
            path: "/".into(),
        }])
    }

    async fn set_cookies(&self, cookies: &[SessionCookie]) -> Result<(), PublishError> {
        self.with(|s| {
            s.cookies = cookies.to_vec();
            s.logged_in = !cookies.is_empty();
        });
        Ok(())
    }

    async fn close(&self) -> Result<(), PublishError> {
        self.with(|s| s.closed = true);
        Ok(())
    }
}

struct FakePages {
    page: Arc<FakeWpPage>,
}

#[async_trait]
impl PageSource for FakePages {
    async fn open_page(&self, _options: PageOptions) -> Result<Arc<dyn BrowserPage>, PublishError> {
        Ok(self.page.clone())
    }
}

fn settings() -> DeterministicSettings {
    DeterministicSettings {
        element_timeout: Duration::from_millis(200),
        poll_interval: Duration::from_millis(10),
        optional_probe: Duration::from_millis(20),
        block_resources: true,
        verify_published_url: false,
    }
}

fn provider_with(page: &Arc<FakeWpPage>, cache: Arc<LocatorCache>, shots: PathBuf) -> DeterministicProvider {
    DeterministicProvider::new(
        ProviderContext {
            task_id: Uuid::new_v4(),
            screenshots: Arc::new(ScreenshotWriter::new(shots)),
        },
        Arc::new(FakePages { page: page.clone() }),
        cache,
        UrlVerifier::default(),
        settings(),
    )
}

fn provider(page: &Arc<FakeWpPage>) -> DeterministicProvider {
    provider_with(
        page,
        Arc::new(LocatorCache::new(Duration::from_secs(60))),
        std::env::temp_dir(),
    )
}

fn credentials(password: &str) -> Credentials {
    Credentials {
        username: "editor".into(),
        password: password.into(),
    }
}

fn article() -> Article {
    Article {
        title: TITLE.to_string(),
        content: "<p>正文</p>".repeat(30),
    }
}

async fn logged_in_with_draft(page: &Arc<FakeWpPage>) -> DeterministicProvider {
    let mut p = provider(page);
    p.initialize(None).await.unwrap();
    p.login(SITE, &credentials("secret")).await.unwrap();
    p.create_article(&article(), &ArticleMetadata::default()).await.unwrap();
    p
}

#[tokio::test]
async fn test_publish_now_happy_path_uses_cache() {
    let page = FakeWpPage::new();
    let cache = Arc::new(LocatorCache::new(Duration::from_secs(60)));
    let mut p = provider_with(&page, cache.clone(), std::env::temp_dir());

    p.initialize(None).await.unwrap();
    let session = p.login(&format!("{}/", SITE), &credentials("secret")).await.unwrap();
    assert_eq!(session.site_url, SITE);

    let draft = p.create_article(&article(), &ArticleMetadata::default()).await.unwrap();
    assert_eq!(draft.post_id.as_deref(), Some("42"));
    assert_eq!(draft.edit_url, format!("{}/wp-admin/post.php?post=42&action=edit", SITE));

    let seo = SeoMetadata {
        meta_title: Some("Rust 异步".into()),
        ..Default::default()
    };
    assert_eq!(p.configure_seo(&seo).await.unwrap(), SeoOutcome::Applied);

    let result = p.publish(&PublishIntent::PublishNow).await.unwrap();
    assert_eq!(result.url.as_deref(), Some("https://cms.test/?p=42"));
    assert!(result.published_at.is_some());

    // 编辑器标题在 create / configure_seo / publish 中被重复解析
    assert!(cache.stats().hits >= 2);
    assert!(page.with(|s| s.clicks.contains(&".editor-post-publish-panel__toggle".to_string())));
}

#[tokio::test]
async fn test_wrong_password_is_authentication_error() {
    let page = FakeWpPage::new();
    let mut p = provider(&page);
    p.initialize(None).await.unwrap();

    let err = p.login(SITE, &credentials("wrong")).await.unwrap_err();
    match err {
        PublishError::Authentication(message) => assert!(message.contains("密码")),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_stale_cached_locator_is_invalidated() {
    let page = FakeWpPage::new();
    let cache = Arc::new(LocatorCache::new(Duration::from_secs(60)));
    cache.insert(SelectorKey::new(CTX_LOGIN, LOGIN_USERNAME), "#gone".to_string());

    let mut p = provider_with(&page, cache.clone(), std::env::temp_dir());
    p.initialize(None).await.unwrap();
    p.login(SITE, &credentials("secret")).await.unwrap();

    assert_eq!(
        cache.get(&SelectorKey::new(CTX_LOGIN, LOGIN_USERNAME)).as_deref(),
        Some("#user_login")
    );
    assert!(cache.stats().invalidations >= 1);
    assert_eq!(page.with(|s| s.filled("#user_login").map(str::to_string)), Some("editor".to_string()));
}

#[tokio::test]
async fn test_missing_element_times_out() {
    let page = FakeWpPage::new();
    page.with(|s| {
        s.missing.insert("#user_login");
    });
    let mut p = provider(&page);
    p.initialize(None).await.unwrap();

    let err = p.login(SITE, &credentials("secret")).await.unwrap_err();
    assert!(matches!(err, PublishError::ElementNotFound { .. }), "{:?}", err);
    assert_eq!(err.kind(), "ElementNotFoundError");
}

#[tokio::test]
async fn test_publish_without_draft_is_refused() {
    let page = FakeWpPage::new();
    let mut p = provider(&page);
    p.initialize(None).await.unwrap();
    p.login(SITE, &credentials("secret")).await.unwrap();

    let err = p.publish(&PublishIntent::PublishNow).await.unwrap_err();
    assert!(matches!(err, PublishError::PublishingSafety { .. }));
    assert_eq!(page.with(|s| s.post_status.clone()), "draft");
}

#[tokio::test]
async fn test_publish_refused_when_editor_shows_other_article() {
    let page = FakeWpPage::new();
    let mut p = logged_in_with_draft(&page).await;
    page.with(|s| s.edited_title = "另一篇文章".to_string());

    let err = p.publish(&PublishIntent::PublishNow).await.unwrap_err();
    assert!(matches!(err, PublishError::PublishingSafety { .. }));
    assert_eq!(page.with(|s| s.post_status.clone()), "draft");
}

#[tokio::test]
async fn test_create_article_is_resumable() {
    let page = FakeWpPage::new();
    let mut p = logged_in_with_draft(&page).await;
    let again = p.create_article(&article(), &ArticleMetadata::default()).await.unwrap();

    assert_eq!(again.post_id.as_deref(), Some("42"));
    assert_eq!(page.with(|s| s.create_calls), 1);
}

#[tokio::test]
async fn test_classic_editor_fallback() {
    let page = FakeWpPage::new();
    page.with(|s| s.block_editor = false);
    let mut p = provider(&page);
    p.initialize(None).await.unwrap();
    p.login(SITE, &credentials("secret")).await.unwrap();

    let draft = p.create_article(&article(), &ArticleMetadata::default()).await.unwrap();
    assert_eq!(draft.post_id.as_deref(), Some("43"));
    assert_eq!(page.with(|s| s.filled("#title").map(str::to_string)), Some(TITLE.to_string()));
}

#[tokio::test]
async fn test_image_failures_are_collected() {
    let dir = tempfile::tempdir().unwrap();
    let cover = dir.path().join("cover.png");
    std::fs::write(&cover, [0x89, b'P', b'N', b'G']).unwrap();

    let page = FakeWpPage::new();
    let mut p = logged_in_with_draft(&page).await;
    let images = vec![
        ImageAsset {
            file_path: cover.clone(),
            alt_text: Some("封面".into()),
            title: None,
            caption: None,
            is_featured: true,
        },
        ImageAsset {
            file_path: dir.path().join("missing.png"),
            alt_text: None,
            title: None,
            caption: None,
            is_featured: false,
        },
    ];

    let outcome = p.upload_images(&images).await.unwrap();
    assert_eq!(outcome.uploaded.len(), 1);
    assert_eq!(outcome.uploaded[0].media_id.as_deref(), Some("7"));
    assert_eq!(outcome.failures.len(), 1);
    assert!(matches!(outcome.failures[0], PublishError::AssetUpload { .. }));
    assert!(page.with(|s| s.rest_calls.iter().any(|js| js.contains("featured_media"))));
}

#[tokio::test]
async fn test_unrecognised_media_id_keeps_featured_image() {
    let dir = tempfile::tempdir().unwrap();
    let cover = dir.path().join("cover.png");
    std::fs::write(&cover, [0x89, b'P', b'N', b'G']).unwrap();

    let page = FakeWpPage::new();
    page.with(|s| s.media_id = json!("media-7"));
    let mut p = logged_in_with_draft(&page).await;
    let images = vec![ImageAsset {
        file_path: cover.clone(),
        alt_text: Some("封面".into()),
        title: None,
        caption: None,
        is_featured: true,
    }];

    let outcome = p.upload_images(&images).await.unwrap();
    assert_eq!(outcome.uploaded.len(), 1);
    assert_eq!(outcome.failures.len(), 1);
    assert!(matches!(
        &outcome.failures[0],
        PublishError::AssetUpload { path, .. } if path == &cover.display().to_string()
    ));
    assert!(!page.with(|s| s.rest_calls.iter().any(|js| js.contains("featured_media"))));
}

#[tokio::test]
async fn test_seo_without_plugin_is_unsupported() {
    let page = FakeWpPage::new();
    page.with(|s| s.seo_plugin = None);
    let mut p = logged_in_with_draft(&page).await;

    let seo = SeoMetadata {
        meta_title: Some("标题".into()),
        meta_description: Some("描述".into()),
        focus_keyword: None,
    };
    let outcome = p.configure_seo(&seo).await.unwrap();
    assert!(matches!(outcome, SeoOutcome::Unsupported { .. }));
}

#[tokio::test]
async fn test_schedule_and_save_draft_intents() {
    let page = FakeWpPage::new();
    let mut p = logged_in_with_draft(&page).await;

    let draft = p.publish(&PublishIntent::SaveDraft).await.unwrap();
    assert_eq!(draft.url.as_deref(), Some("https://cms.test/wp-admin/post.php?post=42&action=edit"));
    assert!(draft.published_at.is_none());

    let at = Utc::now() + chrono::Duration::hours(2);
    let scheduled = p.publish(&PublishIntent::Schedule { at }).await.unwrap();
    assert_eq!(scheduled.published_at, Some(at));
    assert!(page.with(|s| s.rest_calls.iter().any(|js| js.contains("\"future\""))));
}

#[tokio::test]
async fn test_carry_over_restores_session_and_draft() {
    let page = FakeWpPage::new();
    let mut first = logged_in_with_draft(&page).await;
    let carry = first.carry_over().await;
    first.cleanup().await;
    assert!(page.with(|s| s.closed));
    assert_eq!(carry.draft.as_ref().and_then(|d| d.post_id.as_deref()), Some("42"));

    let fresh = FakeWpPage::new();
    let mut second = provider(&fresh);
    second.initialize(Some(&carry)).await.unwrap();
    assert_eq!(second.draft(), carry.draft.as_ref());
    assert_eq!(fresh.with(|s| s.cookies.len()), 1);

    // cookie 有效时跳过登录表单
    second.login(SITE, &credentials("secret")).await.unwrap();
    assert!(fresh.with(|s| s.filled.is_empty()));
}

#[tokio::test]
async fn test_screenshot_is_written() {
    let dir = tempfile::tempdir().unwrap();
    let page = FakeWpPage::new();
    let mut p = provider_with(
        &page,
        Arc::new(LocatorCache::new(Duration::from_secs(60))),
        dir.path().to_path_buf(),
    );

    assert!(p.capture_screenshot("login").await.is_none());
    p.initialize(None).await.unwrap();
    let shot = p.capture_screenshot("login failure").await.unwrap();
    assert!(shot.path.exists());
    assert_eq!(shot.step, "login failure");
}

#[test]
fn test_extract_post_id() {
    assert_eq!(
        extract_post_id("https://cms.test/wp-admin/post.php?post=128&action=edit").as_deref(),
        Some("128")
    );
    assert_eq!(extract_post_id("https://cms.test/wp-admin/post-new.php"), None);
}
