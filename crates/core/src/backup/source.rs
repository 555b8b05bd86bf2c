use crate::hash_handler::HashHandler;
use crate::settings::SearchMethod;
use crate::Result;
use async_trait::async_trait;
use std::future::Future;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Outcome of checking one candidate file against the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupDecision {
    /// `None` when the file could not be hashed.
    pub hash: Option<String>,
    pub already_backed_up: bool,
}

/// What the orchestrator needs from a kind of source (local drive, media
/// device). Paths are in the source's own namespace.
#[async_trait]
pub trait BackupSource: Send + Sync {
    async fn enumerate_subdirectories(&self, dir: &Path) -> Result<Vec<PathBuf>>;

    async fn enumerate_files(&self, dir: &Path) -> Result<Vec<PathBuf>>;

    async fn directory_exists(&self, dir: &Path) -> bool;

    /// Copy a source file to a local destination path.
    async fn copy_file(&self, source: &Path, destination: &Path) -> Result<()>;

    /// Database errors propagate; hashing errors yield `hash: None`.
    async fn compute_dedup_decision(
        &self,
        file: &Path,
        relative_path: &str,
        search_method: SearchMethod,
    ) -> Result<DedupDecision>;
}

/// Shared dedup policy. `hash_file` is only awaited when a hash is needed:
/// always for [`SearchMethod::Hash`], and only for unknown paths with
/// [`SearchMethod::FilePath`].
pub(crate) async fn decide<F>(
    handler: &HashHandler,
    relative_path: &str,
    search_method: SearchMethod,
    hash_file: F,
) -> Result<DedupDecision>
where
    F: Future<Output = Result<String>>,
{
    match search_method {
        SearchMethod::Hash => match hash_file.await {
            Ok(hash) => {
                let already_backed_up = handler.is_hash_exists(&hash).await?;
                Ok(DedupDecision {
                    hash: Some(hash),
                    already_backed_up,
                })
            }
            Err(e) => {
                debug!("Hashing {} failed: {}", relative_path, e);
                Ok(DedupDecision {
                    hash: None,
                    already_backed_up: false,
                })
            }
        },
        SearchMethod::FilePath => {
            if handler.is_file_path_exist(relative_path).await? {
                return Ok(DedupDecision {
                    hash: None,
                    already_backed_up: true,
                });
            }
            let hash = match hash_file.await {
                Ok(hash) => Some(hash),
                Err(e) => {
                    debug!("Hashing {} failed: {}", relative_path, e);
                    None
                }
            };
            Ok(DedupDecision {
                hash,
                already_backed_up: false,
            })
        }
    }
}
