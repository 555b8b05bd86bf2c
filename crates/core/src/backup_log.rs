use crate::Result;
use chrono::Local;
use std::path::{Path, PathBuf};
use tokio::fs::{self as async_fs, OpenOptions};
use tokio::io::AsyncWriteExt;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Append-only record of completed backup runs, one
/// `<timestamp> --- <description>` line each.
#[derive(Debug, Clone)]
pub struct BackupTimeLog {
    path: PathBuf,
}

impl BackupTimeLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, description: Option<&str>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            async_fs::create_dir_all(parent).await?;
        }

        let line = format!(
            "{} --- {}\n",
            Local::now().format(TIMESTAMP_FORMAT),
            description.unwrap_or("unnamed")
        );
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
