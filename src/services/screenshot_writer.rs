//! 截图写入服务 - 业务能力层
//!
//! 只负责"把截图写到磁盘"能力，不关心流程

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tracing::debug;

use crate::models::TaskId;

/// 截图写入服务
///
/// 文件布局：`<root>/<task_id>/<序号>-<步骤>.png`
pub struct ScreenshotWriter {
    root: PathBuf,
    counter: AtomicU64,
}

impl ScreenshotWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            counter: AtomicU64::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 写入一张截图，返回文件路径
    pub async fn write(&self, task_id: &TaskId, step: &str, png: &[u8]) -> std::io::Result<PathBuf> {
        let dir = self.root.join(task_id.to_string());
        fs::create_dir_all(&dir).await?;

        let seq = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let path = dir.join(format!("{:04}-{}.png", seq, sanitize_step(step)));
        fs::write(&path, png).await?;

        debug!("截图已保存: {} ({} 字节)", path.display(), png.len());
        Ok(path)
    }
}

/// 步骤名只保留字母数字、`-` 和 `_`
fn sanitize_step(step: &str) -> String {
    let cleaned: String = step
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "step".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_creates_task_dir_and_orders_files() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ScreenshotWriter::new(dir.path());
        let task_id = uuid::Uuid::new_v4();

        let first = writer.write(&task_id, "login/failure 1", b"png").await.unwrap();
        let second = writer.write(&task_id, "publish", b"png").await.unwrap();

        assert!(first.ends_with(format!("{}/0001-login_failure_1.png", task_id)));
        assert!(second.file_name().unwrap().to_string_lossy().starts_with("0002-"));
        assert_eq!(std::fs::read(&second).unwrap(), b"png");
    }

    #[test]
    fn test_sanitize_step() {
        assert_eq!(sanitize_step(""), "step");
        assert_eq!(sanitize_step("upload_images-2"), "upload_images-2");
    }
}
