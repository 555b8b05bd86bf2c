use super::source::{decide, BackupSource, DedupDecision};
use crate::hash_handler::HashHandler;
use crate::settings::SearchMethod;
use crate::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs as async_fs;

/// Plain filesystem source: drives and directories.
pub struct LocalDriveSource {
    hash_handler: Arc<HashHandler>,
}

impl LocalDriveSource {
    pub fn new(hash_handler: Arc<HashHandler>) -> Self {
        Self { hash_handler }
    }

    async fn list_entries(dir: &Path, directories: bool) -> Result<Vec<PathBuf>> {
        let mut entries = async_fs::read_dir(dir).await?;
        let mut children = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            let wanted = if directories {
                file_type.is_dir()
            } else {
                file_type.is_file()
            };
            if wanted {
                children.push(entry.path());
            }
        }
        Ok(children)
    }
}

#[async_trait]
impl BackupSource for LocalDriveSource {
    async fn enumerate_subdirectories(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        Self::list_entries(dir, true).await
    }

    async fn enumerate_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        Self::list_entries(dir, false).await
    }

    async fn directory_exists(&self, dir: &Path) -> bool {
        async_fs::metadata(dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    async fn copy_file(&self, source: &Path, destination: &Path) -> Result<()> {
        async_fs::copy(source, destination).await?;
        Ok(())
    }

    async fn compute_dedup_decision(
        &self,
        file: &Path,
        relative_path: &str,
        search_method: SearchMethod,
    ) -> Result<DedupDecision> {
        decide(
            &self.hash_handler,
            relative_path,
            search_method,
            self.hash_handler.calculate_hash(file),
        )
        .await
    }
}
