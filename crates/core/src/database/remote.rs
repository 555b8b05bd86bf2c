use super::store::DocumentStore;
use super::{non_empty, BackupDatabase};
use crate::record::{BackupRecord, RecordSearchModel};
use crate::{BackupError, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Database whose records live in a [`DocumentStore`] collection. Every
/// insert is durable on return, so `save` has nothing to do.
pub struct RemoteDatabase {
    store: Arc<dyn DocumentStore>,
    collection: RwLock<Option<String>>,
}

impl RemoteDatabase {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            collection: RwLock::new(None),
        }
    }

    fn collection(&self) -> Result<String> {
        self.collection
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .ok_or(BackupError::NotLoaded)
    }
}

#[async_trait]
impl BackupDatabase for RemoteDatabase {
    async fn load(&self, name: &str) -> Result<()> {
        debug!("Selecting remote collection {}", name);
        *self
            .collection
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(name.to_string());
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<BackupRecord>> {
        let collection = self.collection()?;
        self.store.all(&collection).await
    }

    async fn insert(&self, mut record: BackupRecord) -> Result<()> {
        let collection = self.collection()?;
        record.id = BackupRecord::compound_key(&record.file_hash, &record.file_path);
        if record.backup_time.is_none() {
            record.backup_time = Some(Utc::now());
        }
        self.store.upsert(&collection, &record.id, &record).await
    }

    async fn save(&self) -> Result<()> {
        self.collection()?;
        Ok(())
    }

    async fn find(&self, search: &RecordSearchModel) -> Result<Option<Vec<BackupRecord>>> {
        let collection = self.collection()?;

        if let Some(hash) = &search.file_hash {
            let filter = RecordSearchModel::by_hash(hash.clone());
            Ok(non_empty(self.store.find(&collection, &filter).await?))
        } else if let Some(path) = &search.file_path {
            let filter = RecordSearchModel::by_path(path.clone());
            let newest = self
                .store
                .find(&collection, &filter)
                .await?
                .into_iter()
                .max_by_key(|record| record.backup_time);
            Ok(newest.map(|record| vec![record]))
        } else if let Some(id) = &search.id {
            Ok(self.store.get(&collection, id).await?.map(|record| vec![record]))
        } else {
            Ok(None)
        }
    }
}
