//! Local directory object source.
//!
//! Mirrors a bucket layout on disk: object `path` in `bucket` is read from
//! `<root>/<bucket>/<path>`. Used for development and tests.

use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

use crate::traits::ObjectSource;

pub struct LocalObjectSource {
    root: PathBuf,
    max_object_bytes: u64,
}

impl LocalObjectSource {
    pub fn new(root: impl Into<PathBuf>, max_object_bytes: u64) -> Self {
        Self {
            root: root.into(),
            max_object_bytes,
        }
    }

    fn resolve(&self, bucket: &str, path: &str) -> Result<PathBuf> {
        for part in [bucket, path] {
            let escapes = Path::new(part)
                .components()
                .any(|c| !matches!(c, Component::Normal(_)));
            if part.is_empty() || escapes {
                bail!("invalid object location: {}/{}", bucket, path);
            }
        }
        Ok(self.root.join(bucket).join(path))
    }
}

#[async_trait]
impl ObjectSource for LocalObjectSource {
    fn kind(&self) -> &str {
        "filesystem"
    }

    async fn fetch(&self, bucket: &str, path: &str) -> Result<Vec<u8>> {
        let file = self.resolve(bucket, path)?;
        let meta = tokio::fs::metadata(&file)
            .await
            .with_context(|| format!("Failed to stat {}", file.display()))?;
        if meta.len() > self.max_object_bytes {
            bail!(
                "object {} is {} bytes, limit is {}",
                file.display(),
                meta.len(),
                self.max_object_bytes
            );
        }
        tokio::fs::read(&file)
            .await
            .with_context(|| format!("Failed to read {}", file.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn reads_object_under_bucket_dir() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("docs/hr")).unwrap();
        std::fs::write(tmp.path().join("docs/hr/a.txt"), b"hello").unwrap();

        let source = LocalObjectSource::new(tmp.path(), 1024);
        assert_eq!(source.fetch("docs", "hr/a.txt").await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn rejects_paths_leaving_the_root() {
        let source = LocalObjectSource::new("/tmp/uploads", 1024);
        assert!(source.fetch("docs", "../secret").await.is_err());
        assert!(source.fetch("..", "a.txt").await.is_err());
        assert!(source.fetch("docs", "/etc/passwd").await.is_err());
    }

    #[tokio::test]
    async fn enforces_size_limit() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("docs")).unwrap();
        std::fs::write(tmp.path().join("docs/big.bin"), vec![0u8; 64]).unwrap();

        let source = LocalObjectSource::new(tmp.path(), 16);
        let err = source.fetch("docs", "big.bin").await.unwrap_err();
        assert!(err.to_string().contains("limit"));
    }
}
