//! 语义选择器目录
//!
//! 语义 ID → 按优先级排列的候选 CSS 选择器。
//! 同时覆盖块编辑器和经典编辑器，解析时取第一个满足等待条件的候选。

use phf::phf_map;

/// 页面上下文（定位器缓存键的一部分）
pub const CTX_LOGIN: &str = "login";
pub const CTX_ADMIN: &str = "admin";
pub const CTX_EDITOR: &str = "editor";

pub const LOGIN_USERNAME: &str = "login.username";
pub const LOGIN_PASSWORD: &str = "login.password";
pub const LOGIN_SUBMIT: &str = "login.submit";
pub const LOGIN_ERROR: &str = "login.error";
pub const ADMIN_BAR: &str = "admin.bar";
pub const EDITOR_TITLE: &str = "editor.title";
pub const EDITOR_CONTENT_CLASSIC: &str = "editor.content_classic";
pub const EDITOR_SAVE_DRAFT: &str = "editor.save_draft";
pub const EDITOR_PUBLISH_TOGGLE: &str = "editor.publish_toggle";
pub const EDITOR_PUBLISH_CONFIRM: &str = "editor.publish_confirm";
pub const SEO_META_TITLE: &str = "seo.meta_title";
pub const SEO_META_DESCRIPTION: &str = "seo.meta_description";
pub const SEO_FOCUS_KEYWORD: &str = "seo.focus_keyword";

static SELECTORS: phf::Map<&'static str, &'static [&'static str]> = phf_map! {
    "login.username" => &["#user_login", "input[name='log']"],
    "login.password" => &["#user_pass", "input[name='pwd']"],
    "login.submit" => &["#wp-submit", "input[type='submit'][name='wp-submit']"],
    "login.error" => &["#login_error", ".login .notice-error"],
    "admin.bar" => &["#wpadminbar", "#adminmenu"],
    "editor.title" => &[
        ".editor-post-title__input",
        "h1.wp-block-post-title",
        "#title",
    ],
    "editor.content_classic" => &["#content", "textarea.wp-editor-area"],
    "editor.save_draft" => &[
        ".editor-post-save-draft",
        "button.editor-post-saved-state",
        "#save-post",
    ],
    "editor.publish_toggle" => &[
        ".editor-post-publish-panel__toggle",
        "button.editor-post-publish-button__button[aria-haspopup]",
    ],
    "editor.publish_confirm" => &[
        ".editor-post-publish-panel__header-publish-button button",
        ".editor-post-publish-button",
        "#publish",
    ],
    "seo.meta_title" => &[
        "#yoast_wpseo_title",
        "#rank_math_title",
        "input[name='aioseo_title']",
    ],
    "seo.meta_description" => &[
        "#yoast_wpseo_metadesc",
        "#rank_math_description",
        "textarea[name='aioseo_description']",
    ],
    "seo.focus_keyword" => &[
        "#yoast_wpseo_focuskw",
        "#focus-keyword-input-metabox",
        "#rank_math_focus_keyword",
    ],
};

/// 候选选择器，未知 ID 返回 None
pub fn candidates(id: &str) -> Option<&'static [&'static str]> {
    SELECTORS.get(id).copied()
}
