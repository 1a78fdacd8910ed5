use std::path::Path;

use async_trait::async_trait;

use crate::error::NodeResult;

/// File-system and OS integration offered to node computations.
#[async_trait]
pub trait NativeApi: Send + Sync {
    async fn read_text_file(&self, path: &Path) -> NodeResult<String>;
    async fn write_text_file(&self, path: &Path, contents: &str) -> NodeResult<()>;
    async fn read_dir(&self, path: &Path) -> NodeResult<Vec<String>>;
    async fn exists(&self, path: &Path) -> bool;
}

/// [`NativeApi`] backed by `tokio::fs`.
#[derive(Debug, Default, Clone)]
pub struct TokioNativeApi;

#[async_trait]
impl NativeApi for TokioNativeApi {
    async fn read_text_file(&self, path: &Path) -> NodeResult<String> {
        Ok(tokio::fs::read_to_string(path).await?)
    }

    async fn write_text_file(&self, path: &Path, contents: &str) -> NodeResult<()> {
        Ok(tokio::fs::write(path, contents).await?)
    }

    async fn read_dir(&self, path: &Path) -> NodeResult<Vec<String>> {
        let mut entries = tokio::fs::read_dir(path).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }
}
