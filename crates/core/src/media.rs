//! Media device access (phones, cameras and other MTP-style devices).
//!
//! Devices are addressed by name; paths on a device are relative to the
//! device root. [`MountedMediaDevices`] covers devices that the desktop
//! exposes as mounted filesystems (gvfs, `/media`, `/mnt`).

use crate::{BackupError, Result};
use async_trait::async_trait;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::fs as async_fs;
use tracing::{debug, info};

#[async_trait]
pub trait MediaDevice: Send + Sync {
    fn name(&self) -> &str;

    async fn list_directories(&self, path: &Path) -> Result<Vec<PathBuf>>;

    async fn list_files(&self, path: &Path) -> Result<Vec<PathBuf>>;

    async fn directory_exists(&self, path: &Path) -> bool;

    /// Blocking reader over a device file, consumed off the async executor.
    async fn open_read(&self, path: &Path) -> Result<Box<dyn Read + Send>>;

    /// Copy a device file to a local path.
    async fn download(&self, path: &Path, destination: &Path) -> Result<()>;
}

pub trait MediaDeviceProvider: Send + Sync {
    fn find_device(&self, name: &str) -> Option<Arc<dyn MediaDevice>>;
}

/// A device reachable through a filesystem mount.
#[derive(Debug, Clone)]
pub struct MountedMediaDevice {
    name: String,
    mount_point: PathBuf,
}

impl MountedMediaDevice {
    pub fn new(name: impl Into<String>, mount_point: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            mount_point: mount_point.into(),
        }
    }

    fn resolve(&self, path: &Path) -> Result<PathBuf> {
        let escapes = path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)));
        if escapes {
            return Err(BackupError::unsupported(format!(
                "path {} leaves device {}",
                path.display(),
                self.name
            )));
        }
        let relative = path.strip_prefix("/").unwrap_or(path);
        Ok(self.mount_point.join(relative))
    }

    /// Children of `path`, relative to the device root, filtered by kind.
    async fn list_entries(&self, path: &Path, directories: bool) -> Result<Vec<PathBuf>> {
        let absolute = self.resolve(path)?;
        let mut entries = async_fs::read_dir(&absolute).await?;
        let mut children = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            let wanted = if directories {
                file_type.is_dir()
            } else {
                file_type.is_file()
            };
            if wanted {
                children.push(path.join(entry.file_name()));
            }
        }
        Ok(children)
    }
}

#[async_trait]
impl MediaDevice for MountedMediaDevice {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_directories(&self, path: &Path) -> Result<Vec<PathBuf>> {
        self.list_entries(path, true).await
    }

    async fn list_files(&self, path: &Path) -> Result<Vec<PathBuf>> {
        self.list_entries(path, false).await
    }

    async fn directory_exists(&self, path: &Path) -> bool {
        match self.resolve(path) {
            Ok(absolute) => async_fs::metadata(absolute)
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    async fn open_read(&self, path: &Path) -> Result<Box<dyn Read + Send>> {
        let file = std::fs::File::open(self.resolve(path)?)?;
        Ok(Box::new(file))
    }

    async fn download(&self, path: &Path, destination: &Path) -> Result<()> {
        async_fs::copy(self.resolve(path)?, destination).await?;
        Ok(())
    }
}

/// Finds devices among the mount points the desktop uses for MTP devices.
#[derive(Debug, Clone)]
pub struct MountedMediaDevices {
    search_roots: Vec<PathBuf>,
}

impl Default for MountedMediaDevices {
    fn default() -> Self {
        Self::new()
    }
}

impl MountedMediaDevices {
    pub fn new() -> Self {
        let mut search_roots = vec![PathBuf::from("/media"), PathBuf::from("/mnt")];
        if let Some(runtime_dir) = dirs::runtime_dir() {
            search_roots.push(runtime_dir.join("gvfs"));
        }
        Self { search_roots }
    }

    pub fn with_mount_points(search_roots: Vec<PathBuf>) -> Self {
        Self { search_roots }
    }

    fn looks_like_device(name: &str) -> bool {
        let name = name.to_lowercase();
        name.contains("mtp") || name.contains("android") || name.contains("phone")
    }

    /// Mounted entries that look like media devices.
    pub fn list_devices(&self) -> Vec<MountedMediaDevice> {
        let mut devices = Vec::new();

        for root in &self.search_roots {
            let entries = match std::fs::read_dir(root) {
                Ok(entries) => entries,
                Err(_) => continue,
            };
            for entry in entries.flatten() {
                let entry_path = entry.path();
                if !entry_path.is_dir() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy().to_string();
                if Self::looks_like_device(&name) {
                    info!("Found potential media device mount: {}", entry_path.display());
                    devices.push(MountedMediaDevice::new(name, entry_path));
                }
            }
        }

        devices
    }
}

impl MediaDeviceProvider for MountedMediaDevices {
    fn find_device(&self, name: &str) -> Option<Arc<dyn MediaDevice>> {
        debug!("Looking for media device {}", name);
        self.list_devices()
            .into_iter()
            .find(|device| device.name() == name || device.name().contains(name))
            .map(|device| Arc::new(device) as Arc<dyn MediaDevice>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_mounted_device_listing() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("mtp-host-Pixel_7");
        std::fs::create_dir_all(root.join("DCIM/Camera")).unwrap();
        std::fs::write(root.join("DCIM/a.jpg"), "a").unwrap();
        std::fs::write(root.join("DCIM/Camera/b.jpg"), "b").unwrap();

        let device = MountedMediaDevice::new("Pixel", &root);
        assert!(device.directory_exists(Path::new("DCIM")).await);
        assert!(!device.directory_exists(Path::new("Music")).await);

        let dirs = device.list_directories(Path::new("DCIM")).await.unwrap();
        assert_eq!(dirs, vec![PathBuf::from("DCIM/Camera")]);
        let files = device.list_files(Path::new("DCIM")).await.unwrap();
        assert_eq!(files, vec![PathBuf::from("DCIM/a.jpg")]);

        let mut content = String::new();
        device
            .open_read(Path::new("DCIM/Camera/b.jpg"))
            .await
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "b");

        let target = temp_dir.path().join("b.jpg");
        device.download(Path::new("DCIM/Camera/b.jpg"), &target).await.unwrap();
        assert_eq!(std::fs::read_to_string(target).unwrap(), "b");
    }

    #[tokio::test]
    async fn test_paths_cannot_escape_device() {
        let temp_dir = TempDir::new().unwrap();
        let device = MountedMediaDevice::new("phone", temp_dir.path());
        assert!(device.list_files(Path::new("../")).await.is_err());
        assert!(!device.directory_exists(Path::new("..")).await);
    }

    #[test]
    fn test_provider_matches_device_mounts() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir(temp_dir.path().join("mtp-host-Pixel_7")).unwrap();
        std::fs::create_dir(temp_dir.path().join("usb-stick")).unwrap();

        let provider = MountedMediaDevices::with_mount_points(vec![
            temp_dir.path().to_path_buf(),
            temp_dir.path().join("missing"),
        ]);
        assert_eq!(provider.list_devices().len(), 1);
        assert!(provider.find_device("Pixel_7").is_some());
        assert!(provider.find_device("usb-stick").is_none());
    }
}
