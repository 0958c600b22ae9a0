//! 文章快照
//!
//! 外部系统在提交时给出的、已审核通过的文章内容。本系统只读不改。

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 文章正文
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    pub title: String,
    pub content: String,
}

/// SEO 元数据
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeoMetadata {
    #[serde(default)]
    pub focus_keyword: Option<String>,
    #[serde(default)]
    pub meta_title: Option<String>,
    #[serde(default)]
    pub meta_description: Option<String>,
}

impl SeoMetadata {
    /// 三个字段是否全部为空
    pub fn is_empty(&self) -> bool {
        [&self.focus_keyword, &self.meta_title, &self.meta_description]
            .iter()
            .all(|field| field.as_deref().map_or(true, |v| v.trim().is_empty()))
    }
}

/// 待上传图片
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageAsset {
    pub file_path: PathBuf,
    #[serde(default)]
    pub alt_text: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub is_featured: bool,
}

/// 提交时附带的元数据
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleMetadata {
    /// 外部文章库中的 ID（仅用于追溯）
    #[serde(default)]
    pub article_id: Option<String>,
    #[serde(default)]
    pub seo: SeoMetadata,
    #[serde(default)]
    pub images: Vec<ImageAsset>,
}

/// 一次发布任务使用的完整快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleSnapshot {
    pub article: Article,
    pub metadata: ArticleMetadata,
}

impl ArticleSnapshot {
    pub fn new(article: Article, metadata: ArticleMetadata) -> Self {
        Self { article, metadata }
    }

    pub fn seo(&self) -> &SeoMetadata {
        &self.metadata.seo
    }

    pub fn images(&self) -> &[ImageAsset] {
        &self.metadata.images
    }
}

/// 任务记录中保存的文章引用（不落正文）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleRef {
    pub article_id: Option<String>,
    pub title: String,
}

impl From<&ArticleSnapshot> for ArticleRef {
    fn from(snapshot: &ArticleSnapshot) -> Self {
        Self {
            article_id: snapshot.metadata.article_id.clone(),
            title: snapshot.article.title.clone(),
        }
    }
}
