use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::info;

/// Object storage used by the audio, summary and document stages to persist
/// artifacts before recording their URL on the conversation.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Store bytes under bucket/key and return an addressable URL.
    async fn upload(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<String>;

    /// Fetch bytes previously stored at the given URL.
    async fn download(&self, url: &str) -> Result<Vec<u8>>;
}

/// Filesystem-backed storage writing artifacts under a configured root
/// directory, one subdirectory per bucket.
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ObjectStorage for FsStorage {
    async fn upload(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<String> {
        let dir = self.root.join(bucket);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create bucket directory {:?}", dir))?;

        let path = dir.join(key);
        let len = bytes.len();
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("Failed to write artifact {:?}", path))?;

        info!("Stored artifact {:?} ({} bytes)", path, len);
        Ok(format!("file://{}", path.display()))
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let path = url
            .strip_prefix("file://")
            .context("FsStorage can only resolve file:// URLs")?;
        tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read artifact {}", path))
    }
}
