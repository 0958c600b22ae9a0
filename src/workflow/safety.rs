//! 发布前安全校验
//!
//! 两道关：
//! - [`validate_submission`] 在任务创建前检查输入形状，失败报 `ValidationError`
//! - [`validate`] 在任何 provider 尝试之前检查内容质量，必填项缺失报 `PublishingSafetyError`

use chrono::{DateTime, Utc};

use crate::error::PublishError;
use crate::models::{ArticleSnapshot, PublishIntent};

pub const TITLE_MIN_CHARS: usize = 10;
pub const TITLE_MAX_CHARS: usize = 200;
pub const CONTENT_MIN_CHARS: usize = 100;
/// 标题 / 正文的字节上限
pub const MAX_FIELD_BYTES: usize = 1 << 20;
const META_TITLE_RECOMMENDED_CHARS: usize = 60;
const META_DESCRIPTION_RECOMMENDED_CHARS: usize = 160;

/// 校验结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SafetyReport {
    /// 阻止发布的问题
    pub errors: Vec<String>,
    /// 只记录的问题
    pub warnings: Vec<String>,
}

impl SafetyReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// 有错误时转成 `PublishingSafetyError`
    pub fn into_error(self) -> Option<PublishError> {
        if self.errors.is_empty() {
            None
        } else {
            Some(PublishError::PublishingSafety {
                reasons: self.errors,
            })
        }
    }
}

/// 内容质量校验
pub fn validate(snapshot: &ArticleSnapshot) -> SafetyReport {
    let mut report = SafetyReport::default();

    let title_chars = snapshot.article.title.trim().chars().count();
    if title_chars < TITLE_MIN_CHARS || title_chars > TITLE_MAX_CHARS {
        report.errors.push(format!(
            "标题长度 {} 不在 {}-{} 字符之间",
            title_chars, TITLE_MIN_CHARS, TITLE_MAX_CHARS
        ));
    }

    let content_chars = snapshot.article.content.trim().chars().count();
    if content_chars < CONTENT_MIN_CHARS {
        report.errors.push(format!(
            "正文长度 {} 少于 {} 字符",
            content_chars, CONTENT_MIN_CHARS
        ));
    }

    let seo = snapshot.seo();
    match non_blank(&seo.meta_title) {
        None => report.errors.push("缺少 SEO 标题 (meta_title)".to_string()),
        Some(v) if v.chars().count() > META_TITLE_RECOMMENDED_CHARS => report.warnings.push(format!(
            "SEO 标题超过建议长度 {} 字符",
            META_TITLE_RECOMMENDED_CHARS
        )),
        Some(_) => {}
    }
    match non_blank(&seo.meta_description) {
        None => report
            .errors
            .push("缺少 SEO 描述 (meta_description)".to_string()),
        Some(v) if v.chars().count() > META_DESCRIPTION_RECOMMENDED_CHARS => {
            report.warnings.push(format!(
                "SEO 描述超过建议长度 {} 字符",
                META_DESCRIPTION_RECOMMENDED_CHARS
            ))
        }
        Some(_) => {}
    }
    if non_blank(&seo.focus_keyword).is_none() {
        report.warnings.push("未设置焦点关键词".to_string());
    }

    for image in snapshot.images() {
        if non_blank(&image.alt_text).is_none() {
            report
                .warnings
                .push(format!("图片缺少替代文本: {}", image.file_path.display()));
        }
    }

    report
}

/// 输入形状校验（任务创建前）
pub fn validate_submission(
    snapshot: &ArticleSnapshot,
    intent: &PublishIntent,
    now: DateTime<Utc>,
) -> Result<(), PublishError> {
    if snapshot.article.title.len() > MAX_FIELD_BYTES {
        return Err(PublishError::Validation("标题超过 1 MiB".to_string()));
    }
    if snapshot.article.content.len() > MAX_FIELD_BYTES {
        return Err(PublishError::Validation("正文超过 1 MiB".to_string()));
    }
    if snapshot
        .images()
        .iter()
        .any(|image| image.file_path.as_os_str().is_empty())
    {
        return Err(PublishError::Validation("图片路径为空".to_string()));
    }
    let featured = snapshot.images().iter().filter(|i| i.is_featured).count();
    if featured > 1 {
        return Err(PublishError::Validation(format!(
            "最多一张特色图片，实际 {} 张",
            featured
        )));
    }
    if let PublishIntent::Schedule { at } = intent {
        if *at <= now {
            return Err(PublishError::Validation(format!(
                "定时发布时间 {} 不在未来",
                at.to_rfc3339()
            )));
        }
    }
    Ok(())
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Article, ArticleMetadata, ImageAsset, SeoMetadata};
    use std::path::PathBuf;

    fn snapshot(title: &str, content_len: usize) -> ArticleSnapshot {
        ArticleSnapshot::new(
            Article {
                title: title.to_string(),
                content: "字".repeat(content_len),
            },
            ArticleMetadata {
                article_id: None,
                seo: SeoMetadata {
                    focus_keyword: Some("rust".into()),
                    meta_title: Some("Rust 异步".into()),
                    meta_description: Some("一篇关于 tokio 的文章".into()),
                },
                images: Vec::new(),
            },
        )
    }

    fn image(path: &str, featured: bool) -> ImageAsset {
        ImageAsset {
            file_path: PathBuf::from(path),
            alt_text: None,
            title: None,
            caption: None,
            is_featured: featured,
        }
    }

    #[test]
    fn test_valid_article_passes() {
        let report = validate(&snapshot("十五个字符的文章标题示例一二三", 150));
        assert!(report.is_ok(), "{:?}", report);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_empty_content_is_safety_error() {
        let report = validate(&snapshot("十五个字符的文章标题示例一二三", 0));
        assert!(!report.is_ok());
        assert!(matches!(
            report.into_error(),
            Some(PublishError::PublishingSafety { .. })
        ));
    }

    #[test]
    fn test_title_bounds_count_chars() {
        assert!(!validate(&snapshot("太短的标题", 150)).is_ok());
        assert!(validate(&snapshot(&"题".repeat(200), 150)).is_ok());
        assert!(!validate(&snapshot(&"题".repeat(201), 150)).is_ok());
    }

    #[test]
    fn test_optional_fields_are_warnings() {
        let mut snap = snapshot("十五个字符的文章标题示例一二三", 150);
        snap.metadata.seo.focus_keyword = None;
        snap.metadata.images.push(image("cover.png", true));
        let report = validate(&snap);
        assert!(report.is_ok());
        assert_eq!(report.warnings.len(), 2);
    }

    #[test]
    fn test_missing_meta_description_blocks() {
        let mut snap = snapshot("十五个字符的文章标题示例一二三", 150);
        snap.metadata.seo.meta_description = Some("   ".into());
        assert_eq!(validate(&snap).errors.len(), 1);
    }

    #[test]
    fn test_submission_shape() {
        let now = Utc::now();
        let mut snap = snapshot("十五个字符的文章标题示例一二三", 150);
        assert!(validate_submission(&snap, &PublishIntent::PublishNow, now).is_ok());

        let past = PublishIntent::Schedule {
            at: now - chrono::Duration::minutes(1),
        };
        assert!(matches!(
            validate_submission(&snap, &past, now),
            Err(PublishError::Validation(_))
        ));

        snap.metadata.images = vec![image("a.png", true), image("b.png", true)];
        assert!(validate_submission(&snap, &PublishIntent::PublishNow, now).is_err());

        snap.metadata.images = vec![image("", false)];
        assert!(validate_submission(&snap, &PublishIntent::PublishNow, now).is_err());

        let huge = snapshot(&"a".repeat(MAX_FIELD_BYTES + 1), 150);
        assert!(validate_submission(&huge, &PublishIntent::SaveDraft, now).is_err());
    }
}
