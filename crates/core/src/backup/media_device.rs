use super::source::{decide, BackupSource, DedupDecision};
use crate::hash_handler::HashHandler;
use crate::media::MediaDevice;
use crate::settings::SearchMethod;
use crate::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Source backed by a [`MediaDevice`]. Files are hashed by streaming them off
/// the device and copied with the device's download call.
pub struct MediaDeviceSource {
    device: Arc<dyn MediaDevice>,
    hash_handler: Arc<HashHandler>,
}

impl MediaDeviceSource {
    pub fn new(device: Arc<dyn MediaDevice>, hash_handler: Arc<HashHandler>) -> Self {
        Self {
            device,
            hash_handler,
        }
    }

    async fn hash_device_file(&self, file: &Path) -> Result<String> {
        let reader = self.device.open_read(file).await?;
        self.hash_handler.calculate_reader_hash(reader).await
    }
}

#[async_trait]
impl BackupSource for MediaDeviceSource {
    async fn enumerate_subdirectories(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        self.device.list_directories(dir).await
    }

    async fn enumerate_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        self.device.list_files(dir).await
    }

    async fn directory_exists(&self, dir: &Path) -> bool {
        self.device.directory_exists(dir).await
    }

    async fn copy_file(&self, source: &Path, destination: &Path) -> Result<()> {
        self.device.download(source, destination).await
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
            self.hash_device_file(file),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::LocalDatabase;
    use crate::media::MountedMediaDevice;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_device_file_hash_matches_local_hash() {
        let temp_dir = TempDir::new().unwrap();
        let mount = temp_dir.path().join("phone");
        std::fs::create_dir_all(mount.join("DCIM")).unwrap();
        std::fs::write(mount.join("DCIM/a.jpg"), "pixels").unwrap();

        let handler = Arc::new(HashHandler::new(Arc::new(LocalDatabase::new(
            temp_dir.path().join("db"),
        ))));
        handler.load("main").await.unwrap();
        let source = MediaDeviceSource::new(
            Arc::new(MountedMediaDevice::new("phone", &mount)),
            handler.clone(),
        );

        let decision = source
            .compute_dedup_decision(Path::new("DCIM/a.jpg"), "DCIM/a.jpg", SearchMethod::Hash)
            .await
            .unwrap();
        let local_hash = handler.calculate_hash(&mount.join("DCIM/a.jpg")).await.unwrap();
        assert_eq!(decision.hash, Some(local_hash));
        assert!(!decision.already_backed_up);

        let files = source.enumerate_files(Path::new("DCIM")).await.unwrap();
        assert_eq!(files, vec![PathBuf::from("DCIM/a.jpg")]);
    }
}
