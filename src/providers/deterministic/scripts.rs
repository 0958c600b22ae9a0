//! 页面内执行的 JS
//!
//! REST 调用在页面上下文里发起，复用已登录的 cookie 和 nonce

use serde_json::{json, Value as JsonValue};

use crate::infrastructure::js_string;
use crate::models::SeoMetadata;

/// 页面上下文里的 REST 调用，返回 `{ ok, data?, status?, message? }`
pub fn rest_request(path: &str, method: &str, body: Option<&JsonValue>) -> String {
    let body = body.map_or_else(|| "null".to_string(), |b| b.to_string());
    format!(
        r#"
        (async () => {{
            const path = {path};
            const method = {method};
            const body = {body};
            try {{
                if (window.wp && wp.apiFetch) {{
                    const data = await wp.apiFetch({{ path, method, data: body === null ? undefined : body }});
                    return {{ ok: true, data }};
                }}
                const settings = window.wpApiSettings || {{}};
                const root = settings.root || '/wp-json/';
                const res = await fetch(root + path.replace(/^\//, ''), {{
                    method,
                    credentials: 'include',
                    headers: {{
                        'Content-Type': 'application/json',
                        'X-WP-Nonce': settings.nonce || ''
                    }},
                    body: body === null ? undefined : JSON.stringify(body)
                }});
                const data = await res.json();
                return res.ok
                    ? {{ ok: true, data }}
                    : {{ ok: false, status: res.status, message: data.message || res.statusText }};
            }} catch (error) {{
                return {{ ok: false, message: error.message || String(error) }};
            }}
        }})()
        "#,
        path = js_string(path),
        method = js_string(method),
        body = body
    )
}

/// 块编辑器：写入标题和正文并保存为草稿
///
/// 没有块编辑器时返回 `{ ok: false, reason: 'no-block-editor' }`
pub fn create_post(title: &str, content: &str) -> String {
    format!(
        r#"
        (async () => {{
            if (!window.wp || !wp.data || !wp.data.select('core/editor')) {{
                return {{ ok: false, reason: 'no-block-editor' }};
            }}
            try {{
                const editor = wp.data.dispatch('core/editor');
                editor.editPost({{ title: {title} }});
                const blocks = wp.blocks.rawHandler({{ HTML: {content} }});
                wp.data.dispatch('core/block-editor').resetBlocks(blocks);
                await editor.savePost();
                const select = wp.data.select('core/editor');
                if (select.didPostSaveRequestFail()) {{
                    return {{ ok: false, reason: 'save-failed' }};
                }}
                return {{ ok: true, post_id: String(select.getCurrentPostId()) }};
            }} catch (error) {{
                return {{ ok: false, reason: error.message || String(error) }};
            }}
        }})()
        "#,
        title = js_string(title),
        content = js_string(content)
    )
}

/// 编辑器里当前的标题
pub fn edited_title() -> String {
    r#"
    (() => {
        if (window.wp && wp.data && wp.data.select('core/editor')) {
            return wp.data.select('core/editor').getEditedPostAttribute('title') || '';
        }
        const input = document.querySelector('#title');
        return input ? input.value : '';
    })()
    "#
    .to_string()
}

/// 块编辑器保存当前文章
pub fn save_post() -> String {
    r#"
    (async () => {
        if (!window.wp || !wp.data || !wp.data.select('core/editor')) {
            return { ok: false, reason: 'no-block-editor' };
        }
        await wp.data.dispatch('core/editor').savePost();
        return { ok: !wp.data.select('core/editor').didPostSaveRequestFail() };
    })()
    "#
    .to_string()
}

/// 登录页错误提示文本
pub fn login_error_text() -> String {
    r#"
    (() => {
        const el = document.querySelector('#login_error') || document.querySelector('.login .notice-error');
        return el ? el.textContent.trim() : '';
    })()
    "#
    .to_string()
}

/// 上传一张图片到媒体库，返回 `{ ok, data: { id, source_url } }`
pub fn upload_media(
    file_name: &str,
    mime: &str,
    base64_data: &str,
    alt_text: Option<&str>,
    title: Option<&str>,
    caption: Option<&str>,
) -> String {
    let meta = json!({
        "alt_text": alt_text,
        "title": title,
        "caption": caption,
    });
    format!(
        r#"
        (async () => {{
            try {{
                const bytes = Uint8Array.from(atob({data}), c => c.charCodeAt(0));
                const form = new FormData();
                form.append('file', new Blob([bytes], {{ type: {mime} }}), {name});
                const meta = {meta};
                for (const [key, value] of Object.entries(meta)) {{
                    if (value !== null) form.append(key, value);
                }}
                if (window.wp && wp.apiFetch) {{
                    const data = await wp.apiFetch({{ path: '/wp/v2/media', method: 'POST', body: form }});
                    return {{ ok: true, data }};
                }}
                const settings = window.wpApiSettings || {{}};
                const res = await fetch((settings.root || '/wp-json/') + 'wp/v2/media', {{
                    method: 'POST',
                    credentials: 'include',
                    headers: {{ 'X-WP-Nonce': settings.nonce || '' }},
                    body: form
                }});
                const data = await res.json();
                return res.ok
                    ? {{ ok: true, data }}
                    : {{ ok: false, status: res.status, message: data.message || res.statusText }};
            }} catch (error) {{
                return {{ ok: false, message: error.message || String(error) }};
            }}
        }})()
        "#,
        data = js_string(base64_data),
        mime = js_string(mime),
        name = js_string(file_name),
        meta = meta
    )
}

/// 通过 SEO 插件的前端 store 写入字段，返回 `{ plugin }`（未检测到插件时为 null）
pub fn apply_seo(seo: &SeoMetadata) -> String {
    let values = json!({
        "title": seo.meta_title,
        "description": seo.meta_description,
        "keyword": seo.focus_keyword,
    });
    format!(
        r#"
        (() => {{
            const seo = {values};
            const data = window.wp && wp.data;
            if (data && data.select('yoast-seo/editor')) {{
                const yoast = data.dispatch('yoast-seo/editor');
                yoast.updateData({{ title: seo.title || '', description: seo.description || '' }});
                if (seo.keyword) yoast.setFocusKeyword(seo.keyword);
                return {{ plugin: 'yoast' }};
            }}
            if (data && data.select('rank-math')) {{
                const rankMath = data.dispatch('rank-math');
                if (seo.title) rankMath.updateTitle(seo.title);
                if (seo.description) rankMath.updateDescription(seo.description);
                if (seo.keyword) rankMath.updateKeywords(seo.keyword);
                return {{ plugin: 'rank_math' }};
            }}
            return {{ plugin: null }};
        }})()
        "#,
        values = values
    )
}
