//! Bidirectional reconciliation between two backup databases.
//!
//! The remote side may hold several hashes for one path, one per backup of
//! changed content. Pulling keeps the newest of them, unless local already
//! points the path at a hash the remote has never seen: that is a local
//! backup which has not been pushed yet. Pushing only sends records the
//! remote does not hold, so existing backup times are left alone. Each
//! insert is idempotent on its own: an interrupted sync leaves both stores
//! valid and a rerun picks up where it stopped.

use crate::cancel::CancelSignal;
use crate::database::BackupDatabase;
use crate::record::{BackupRecord, RecordSearchModel};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Records that changed the local database.
    pub pulled: usize,
    /// Records the remote database did not hold yet.
    pub pushed: usize,
    pub cancelled: bool,
}

pub struct DatabaseSynchronizer {
    local: Arc<dyn BackupDatabase>,
    remote: Arc<dyn BackupDatabase>,
    database_name: String,
}

/// One record per path: the latest backup, ties broken by hash so the
/// choice does not depend on store order.
fn newest_per_path(records: Vec<BackupRecord>) -> Vec<BackupRecord> {
    let mut newest: HashMap<String, BackupRecord> = HashMap::new();
    for record in records {
        let replace = newest.get(&record.file_path).map_or(true, |current| {
            (current.backup_time, &current.file_hash) < (record.backup_time, &record.file_hash)
        });
        if replace {
            newest.insert(record.file_path.clone(), record);
        }
    }
    newest.into_values().collect()
}

impl DatabaseSynchronizer {
    pub fn new(
        local: Arc<dyn BackupDatabase>,
        remote: Arc<dyn BackupDatabase>,
        database_name: impl Into<String>,
    ) -> Self {
        Self {
            local,
            remote,
            database_name: database_name.into(),
        }
    }

    async fn local_hash_for(&self, path: &str) -> Result<Option<String>> {
        Ok(self
            .local
            .find(&RecordSearchModel::by_path(path))
            .await?
            .and_then(|mut records| records.pop())
            .map(|record| record.file_hash))
    }

    pub async fn sync_databases(&self, cancel: &CancelSignal) -> Result<SyncReport> {
        let mut report = SyncReport::default();

        self.local.load(&self.database_name).await?;
        self.remote.load(&self.database_name).await?;

        let remote_records = self.remote.get_all().await?;
        let remote_keys: HashSet<String> = remote_records
            .iter()
            .map(|record| BackupRecord::compound_key(&record.file_hash, &record.file_path))
            .collect();

        info!("Pulling remote records into local database {}", self.database_name);
        for record in newest_per_path(remote_records) {
            if cancel.is_cancelled() {
                break;
            }
            match self.local_hash_for(&record.file_path).await? {
                Some(hash) if hash == record.file_hash => continue,
                Some(hash)
                    if !remote_keys
                        .contains(&BackupRecord::compound_key(&hash, &record.file_path)) =>
                {
                    debug!("Keeping unpushed local hash for {}", record.file_path);
                    continue;
                }
                _ => {}
            }
            self.local.insert(record).await?;
            report.pulled += 1;
        }
        // Whatever was pulled before a cancellation is still worth keeping.
        self.local.save().await?;

        if cancel.is_cancelled() {
            info!("Sync cancelled after pulling {} records", report.pulled);
            report.cancelled = true;
            return Ok(report);
        }

        info!("Pushing local records into remote database {}", self.database_name);
        for record in self.local.get_all().await? {
            if cancel.is_cancelled() {
                info!("Sync cancelled after pushing {} records", report.pushed);
                report.cancelled = true;
                return Ok(report);
            }
            let key = BackupRecord::compound_key(&record.file_hash, &record.file_path);
            if remote_keys.contains(&key) {
                continue;
            }
            self.remote.insert(record).await?;
            report.pushed += 1;
        }
        self.remote.save().await?;

        info!(
            "Sync of {} complete: {} pulled, {} pushed",
            self.database_name, report.pulled, report.pushed
        );
        Ok(report)
    }
}
