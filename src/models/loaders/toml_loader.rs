use crate::models::article::{Article, ArticleMetadata};
use crate::models::task::{ProviderPreference, PublishIntent};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::fs;

/// 待发布文章（TOML 投递文件）
///
/// ```toml
/// [article]
/// title = "..."
/// content = "..."
///
/// [metadata.seo]
/// meta_title = "..."
///
/// [[metadata.images]]
/// file_path = "images/cover.png"
/// is_featured = true
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct ArticleSubmission {
    pub article: Article,
    #[serde(default)]
    pub metadata: ArticleMetadata,
    #[serde(default)]
    pub provider: Option<ProviderPreference>,
    #[serde(default)]
    pub intent: Option<PublishIntent>,
    /// 源文件路径（加载时设置）
    #[serde(skip)]
    pub file_path: Option<PathBuf>,
}

/// 从 TOML 文件加载一篇待发布文章
pub async fn load_submission(toml_file_path: &Path) -> Result<ArticleSubmission> {
    let content = fs::read_to_string(toml_file_path)
        .await
        .with_context(|| format!("无法读取TOML文件: {}", toml_file_path.display()))?;

    let mut submission: ArticleSubmission = toml::from_str(&content)
        .with_context(|| format!("无法解析TOML文件: {}", toml_file_path.display()))?;

    // 图片路径相对投递文件所在目录
    if let Some(base) = toml_file_path.parent() {
        for image in submission.metadata.images.iter_mut() {
            if image.file_path.is_relative() {
                image.file_path = base.join(&image.file_path);
            }
        }
    }

    submission.file_path = Some(toml_file_path.to_path_buf());

    Ok(submission)
}

/// 从文件夹中加载所有待发布文章
///
/// 单个文件解析失败只记录警告，不影响其它文件
pub async fn load_all_submissions(folder_path: &str) -> Result<Vec<ArticleSubmission>> {
    let folder = PathBuf::from(folder_path);

    if !folder.exists() {
        anyhow::bail!("文件夹不存在: {}", folder_path);
    }

    let mut paths = Vec::new();
    let mut entries = fs::read_dir(&folder)
        .await
        .with_context(|| format!("无法读取文件夹: {}", folder_path))?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            paths.push(path);
        }
    }
    // 按文件名排序，保证投递顺序稳定
    paths.sort();

    let mut submissions = Vec::new();
    for path in paths {
        tracing::info!(
            "正在加载: {}",
            path.file_name().unwrap_or_default().to_string_lossy()
        );

        match load_submission(&path).await {
            Ok(submission) => {
                tracing::info!(
                    "成功加载文章: {} ({} 张图片)",
                    submission.article.title,
                    submission.metadata.images.len()
                );
                submissions.push(submission);
            }
            Err(e) => {
                tracing::warn!("加载文件失败 {}: {}", path.display(), e);
            }
        }
    }

    Ok(submissions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::task::ProviderKind;

    const SAMPLE: &str = r#"
intent = { type = "save_draft" }

[provider]
primary = "agent"

[article]
title = "Rust 异步编程入门"
content = "正文内容"

[metadata]
article_id = "a-42"

[metadata.seo]
meta_title = "Rust 异步"
meta_description = "介绍 tokio"

[[metadata.images]]
file_path = "cover.png"
alt_text = "封面"
is_featured = true
"#;

    #[tokio::test]
    async fn test_load_submission_resolves_relative_images() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("001.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let submission = load_submission(&path).await.unwrap();
        assert_eq!(submission.article.title, "Rust 异步编程入门");
        assert_eq!(submission.intent, Some(PublishIntent::SaveDraft));
        assert_eq!(
            submission.provider.map(|p| p.primary),
            Some(ProviderKind::Agent)
        );
        assert_eq!(
            submission.metadata.images[0].file_path,
            dir.path().join("cover.png")
        );
        assert_eq!(submission.file_path.as_deref(), Some(path.as_path()));
    }

    #[tokio::test]
    async fn test_load_all_skips_broken_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.toml"), SAMPLE).unwrap();
        std::fs::write(dir.path().join("b.toml"), "not = [valid").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let all = load_all_submissions(dir.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_load_all_missing_folder() {
        assert!(load_all_submissions("/definitely/not/here").await.is_err());
    }
}
