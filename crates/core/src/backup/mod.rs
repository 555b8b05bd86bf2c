//! Backup orchestration.
//!
//! For every directory mapping in a [`BackupSettings`], the runner walks the
//! source tree breadth-first, asks the [`HashHandler`] whether each file is
//! already backed up, and stages the rest. The copy of each mapping's staged
//! files is one job on a [`TaskRunner`], so at most four mappings (or one,
//! without multithreading) copy at the same time. A run that finishes
//! without cancellation appends a line to the backup-time log.

pub mod local;
pub mod media_device;
pub mod source;

pub use local::LocalDriveSource;
pub use media_device::MediaDeviceSource;
pub use source::{BackupSource, DedupDecision};

use crate::backup_log::BackupTimeLog;
use crate::cancel::CancelSignal;
use crate::hash_handler::HashHandler;
use crate::media::MediaDeviceProvider;
use crate::settings::{BackupSettings, DirectoriesMap, SearchMethod, SourceType};
use crate::task_runner::{TaskRunner, MULTITHREADED_CAPACITY};
use crate::{BackupError, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::fs as async_fs;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Suffix of the in-progress copy; renamed into place once complete.
const PARTIAL_SUFFIX: &str = ".partial";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingReport {
    pub source_directory: String,
    pub staged: usize,
    pub copied: usize,
    pub failed: usize,
    pub skipped_existing: usize,
    pub hash_failures: usize,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupSummary {
    pub run_id: Uuid,
    pub mappings: Vec<MappingReport>,
    pub cancelled: bool,
}

impl BackupSummary {
    pub fn files_copied(&self) -> usize {
        self.mappings.iter().map(|m| m.copied).sum()
    }

    pub fn files_failed(&self) -> usize {
        self.mappings.iter().map(|m| m.failed + m.hash_failures).sum()
    }
}

#[derive(Debug, Clone)]
struct StagedFile {
    source: PathBuf,
    relative_path: String,
    hash: String,
}

pub struct BackupRunner {
    hash_handler: Arc<HashHandler>,
    backup_directory: PathBuf,
    time_log: BackupTimeLog,
    media_devices: Option<Arc<dyn MediaDeviceProvider>>,
}

impl BackupRunner {
    /// `hash_handler` must already be loaded.
    pub fn new(
        hash_handler: Arc<HashHandler>,
        backup_directory: impl Into<PathBuf>,
        time_log: BackupTimeLog,
    ) -> Self {
        Self {
            hash_handler,
            backup_directory: backup_directory.into(),
            time_log,
            media_devices: None,
        }
    }

    pub fn with_media_devices(mut self, provider: Arc<dyn MediaDeviceProvider>) -> Self {
        self.media_devices = Some(provider);
        self
    }

    /// Pick the source implementation for the settings' source type.
    pub fn create_source(&self, settings: &BackupSettings) -> Result<Arc<dyn BackupSource>> {
        match settings.source_type() {
            SourceType::DriveOrDirectory => {
                Ok(Arc::new(LocalDriveSource::new(self.hash_handler.clone())))
            }
            SourceType::MediaDevice => {
                if !settings.should_backup_to_known_directory() {
                    return Err(BackupError::unsupported(
                        "media devices can only be backed up to the known directory",
                    ));
                }
                let name = settings
                    .media_device_name()
                    .ok_or_else(|| BackupError::unsupported("media device settings without a device name"))?;
                let provider = self
                    .media_devices
                    .as_ref()
                    .ok_or_else(|| BackupError::unsupported("no media device access configured"))?;
                let device = provider.find_device(name).ok_or_else(|| {
                    BackupError::unsupported(format!("media device {} not found", name))
                })?;
                Ok(Arc::new(MediaDeviceSource::new(
                    device,
                    self.hash_handler.clone(),
                )))
            }
        }
    }

    /// (source base, destination base) for the settings' direction. In the
    /// reverse direction mappings still resolve their source directory under
    /// the backup directory, so each mapping restores only its own subtree.
    fn bases(&self, settings: &BackupSettings) -> (PathBuf, PathBuf) {
        let root = settings.root_directory().to_path_buf();
        if settings.should_backup_to_known_directory() {
            (root, self.backup_directory.clone())
        } else {
            (self.backup_directory.clone(), root)
        }
    }

    pub async fn backup_files(
        &self,
        settings: &BackupSettings,
        cancel: &CancelSignal,
    ) -> Result<BackupSummary> {
        let source = self.create_source(settings)?;
        self.backup_files_with_source(settings, source, cancel).await
    }

    /// Run the backup against an explicit source instead of the one
    /// `create_source` would pick.
    pub async fn backup_files_with_source(
        &self,
        settings: &BackupSettings,
        source: Arc<dyn BackupSource>,
        cancel: &CancelSignal,
    ) -> Result<BackupSummary> {
        let run_id = Uuid::new_v4();
        let (source_base, dest_base) = self.bases(settings);
        let capacity = if settings.allow_multithreading() {
            MULTITHREADED_CAPACITY
        } else {
            1
        };
        info!(
            "Backup run {} ({}): {} mappings from {} to {}",
            run_id,
            settings.description().unwrap_or("unnamed"),
            settings.directories_maps().len(),
            source_base.display(),
            dest_base.display()
        );

        let mut runner: TaskRunner<Result<MappingReport>> = TaskRunner::new(capacity);
        let mut reports = Vec::new();
        let mut cancelled = false;

        for map in settings.directories_maps() {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let source_dir = source_base.join(mapping_prefix(&map.source_relative_directory));
            let mut report = MappingReport {
                source_directory: map.source_relative_directory.clone(),
                ..Default::default()
            };

            if !source.directory_exists(&source_dir).await {
                warn!("Source directory {} does not exist, skipping", source_dir.display());
                reports.push(report);
                continue;
            }

            let staged = stage_files(
                source.as_ref(),
                &source_base,
                &source_dir,
                settings.search_method(),
                cancel,
                &mut report,
            )
            .await?;
            if report.cancelled {
                cancelled = true;
                reports.push(report);
                break;
            }

            if staged.is_empty() {
                info!("Nothing new under {}, skipping", source_dir.display());
                reports.push(report);
                continue;
            }

            info!("Scheduling {} files from {}", staged.len(), source_dir.display());
            let job = copy_mapping(
                source.clone(),
                self.hash_handler.clone(),
                map.clone(),
                staged,
                dest_base.clone(),
                settings.save_interval(),
                cancel.clone(),
                report,
            );
            if !runner.run_task(job, cancel).await? {
                cancelled = true;
                break;
            }
        }

        if !runner.wait_all(cancel).await? {
            cancelled = true;
            // Started jobs stop at their next file; wait so no copy outlives the run.
            runner.drain().await?;
        }
        for finished in runner.take_completed() {
            reports.push(finished?);
        }
        cancelled |= cancel.is_cancelled() || reports.iter().any(|r| r.cancelled);

        let summary = BackupSummary {
            run_id,
            mappings: reports,
            cancelled,
        };

        if cancelled {
            info!("Backup run {} cancelled after copying {} files", run_id, summary.files_copied());
        } else {
            self.time_log.append(settings.description()).await?;
            info!(
                "Backup run {} complete: {} copied, {} failed",
                run_id,
                summary.files_copied(),
                summary.files_failed()
            );
        }
        Ok(summary)
    }
}

/// Breadth-first walk of `source_dir`, returning files that are not backed up yet.
async fn stage_files(
    source: &dyn BackupSource,
    source_base: &Path,
    source_dir: &Path,
    search_method: SearchMethod,
    cancel: &CancelSignal,
    report: &mut MappingReport,
) -> Result<Vec<StagedFile>> {
    let mut staged = Vec::new();
    let mut queue = VecDeque::from([source_dir.to_path_buf()]);

    loop {
        if cancel.is_cancelled() {
            report.cancelled = true;
            return Ok(staged);
        }
        let Some(dir) = queue.pop_front() else {
            break;
        };

        match source.enumerate_subdirectories(&dir).await {
            Ok(subdirectories) => queue.extend(subdirectories),
            Err(e) => {
                warn!("Cannot list directories in {}: {}", dir.display(), e);
                continue;
            }
        }

        let files = match source.enumerate_files(&dir).await {
            Ok(files) => files,
            Err(e) => {
                warn!("Cannot list files in {}: {}", dir.display(), e);
                continue;
            }
        };

        for file in files {
            if cancel.is_cancelled() {
                report.cancelled = true;
                return Ok(staged);
            }

            let Some(relative_path) = relative_key(&file, source_base) else {
                warn!("{} is outside {}, skipping", file.display(), source_base.display());
                continue;
            };

            let decision = source
                .compute_dedup_decision(&file, &relative_path, search_method)
                .await?;
            if decision.already_backed_up {
                debug!("Already backed up: {}", relative_path);
                report.skipped_existing += 1;
                continue;
            }
            match decision.hash {
                Some(hash) => staged.push(StagedFile {
                    source: file,
                    relative_path,
                    hash,
                }),
                None => {
                    error!("Could not hash {}, skipping", file.display());
                    report.hash_failures += 1;
                }
            }
        }
    }

    report.staged = staged.len();
    Ok(staged)
}

/// Copy one mapping's staged files and register them. Per-file failures are
/// logged and skipped; database failures abort the job.
#[allow(clippy::too_many_arguments)]
async fn copy_mapping(
    source: Arc<dyn BackupSource>,
    hash_handler: Arc<HashHandler>,
    map: DirectoriesMap,
    staged: Vec<StagedFile>,
    dest_base: PathBuf,
    save_interval: u16,
    cancel: CancelSignal,
    mut report: MappingReport,
) -> Result<MappingReport> {
    let mut since_save = 0u16;

    for file in &staged {
        if cancel.is_cancelled() {
            report.cancelled = true;
            break;
        }

        let destination = dest_base.join(destination_relative_path(&file.relative_path, &map));
        match copy_one(source.as_ref(), &file.source, &destination).await {
            Ok(()) => {
                hash_handler.add_file_hash(&file.hash, &file.relative_path).await?;
                report.copied += 1;
                since_save += 1;
                if save_interval > 0 && since_save >= save_interval {
                    hash_handler.save().await?;
                    since_save = 0;
                }
            }
            Err(e) => {
                error!(
                    "Failed to copy {} to {}: {}",
                    file.source.display(),
                    destination.display(),
                    e
                );
                report.failed += 1;
            }
        }
    }

    hash_handler.save().await?;
    debug!(
        "Mapping {} done: {} copied, {} failed",
        report.source_directory, report.copied, report.failed
    );
    Ok(report)
}

/// Copy next to the destination, then rename, so a destination file is either
/// absent or complete.
async fn copy_one(source: &dyn BackupSource, from: &Path, destination: &Path) -> Result<()> {
    if let Some(parent) = destination.parent() {
        async_fs::create_dir_all(parent).await?;
    }

    let mut partial = destination.as_os_str().to_owned();
    partial.push(PARTIAL_SUFFIX);
    let partial = PathBuf::from(partial);

    let copied = match source.copy_file(from, &partial).await {
        Ok(()) => async_fs::rename(&partial, destination)
            .await
            .map_err(BackupError::from),
        Err(e) => Err(e),
    };
    if copied.is_err() {
        let _ = async_fs::remove_file(&partial).await;
    }
    copied
}

/// `path` relative to `base`, with `/` separators.
fn relative_key(path: &Path, base: &Path) -> Option<String> {
    let relative = path.strip_prefix(base).ok()?;
    let parts: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// A mapping directory as plain path segments. Settings may be written on
/// another platform, so `\` separates segments too, and `.` or `..` are dropped.
fn mapping_prefix(directory: &str) -> PathBuf {
    let unified = directory.replace('\\', "/");
    Path::new(&unified)
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect()
}

/// Swap the mapping's source prefix for its destination prefix. An empty
/// destination keeps the source structure.
fn destination_relative_path(relative_path: &str, map: &DirectoriesMap) -> PathBuf {
    let relative = Path::new(relative_path);
    let dest_prefix = mapping_prefix(&map.dest_relative_directory);
    if dest_prefix.as_os_str().is_empty() {
        return relative.to_path_buf();
    }

    match relative.strip_prefix(mapping_prefix(&map.source_relative_directory)) {
        Ok(rest) => dest_prefix.join(rest),
        Err(_) => relative.to_path_buf(),
    }
}
