//! # fleetbackup-core
//!
//! Content-addressed file backup for drives, directories and media devices.
//!
//! - [`backup::BackupRunner`] copies files that are not yet recorded as backed
//!   up, one bounded-concurrency job per directory mapping.
//! - [`hash_handler::HashHandler`] turns SHA-256 digests and database lookups
//!   into dedup decisions.
//! - [`database`] holds the local (JSON file) and remote (document store)
//!   backends, and [`sync::DatabaseSynchronizer`] merges the two.
//!
//! ```rust,no_run
//! use fleetbackup_core::{
//!     backup::BackupRunner, backup_log::BackupTimeLog, cancel::CancelSource,
//!     database::LocalDatabase, hash_handler::HashHandler, settings::BackupSettings,
//! };
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> fleetbackup_core::Result<()> {
//! let handler = Arc::new(HashHandler::new(Arc::new(LocalDatabase::new("./db"))));
//! handler.load("backups").await?;
//!
//! let runner = BackupRunner::new(handler, "./backup", BackupTimeLog::new("./times.log"));
//! let settings = BackupSettings::from_file(Path::new("/mnt/usb/backup.json"), "/mnt/usb")?;
//! let summary = runner.backup_files(&settings, &CancelSource::new().signal()).await?;
//! println!("{} files copied", summary.files_copied());
//! # Ok(())
//! # }
//! ```

pub mod backup;
pub mod backup_log;
pub mod cancel;
pub mod config;
pub mod database;
pub mod error;
pub mod hash;
pub mod hash_handler;
pub mod logging;
pub mod media;
pub mod record;
pub mod settings;
pub mod sync;
pub mod task_runner;

pub use error::{BackupError, Result};
