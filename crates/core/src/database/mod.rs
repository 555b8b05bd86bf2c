//! Backup database contract and its two backends.
//!
//! [`LocalDatabase`] keeps a hash -> paths index in a JSON file and mirrors it
//! in memory; [`RemoteDatabase`] writes every record straight through to a
//! [`DocumentStore`]. Both must be [`load`](BackupDatabase::load)ed before use;
//! any other call on an unloaded database fails with
//! [`BackupError::NotLoaded`](crate::BackupError::NotLoaded).

pub mod local;
pub mod remote;
pub mod store;

pub use local::LocalDatabase;
pub use remote::RemoteDatabase;
pub use store::{DirectoryDocumentStore, DocumentStore, MemoryDocumentStore};

use crate::record::{BackupRecord, RecordSearchModel};
use crate::Result;
use async_trait::async_trait;

#[async_trait]
pub trait BackupDatabase: Send + Sync {
    /// Select the named database. Switching names with unsaved changes
    /// saves the previous one first.
    async fn load(&self, name: &str) -> Result<()>;

    /// Every record, in no particular order.
    async fn get_all(&self) -> Result<Vec<BackupRecord>>;

    /// Idempotent upsert.
    async fn insert(&self, record: BackupRecord) -> Result<()>;

    async fn save(&self) -> Result<()>;

    /// `None` when nothing matches, so callers can test existence directly.
    async fn find(&self, search: &RecordSearchModel) -> Result<Option<Vec<BackupRecord>>>;
}

pub(crate) fn non_empty(records: Vec<BackupRecord>) -> Option<Vec<BackupRecord>> {
    if records.is_empty() {
        None
    } else {
        Some(records)
    }
}
