use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use fleetbackup_core::{
    backup::BackupRunner,
    backup_log::BackupTimeLog,
    cancel::{CancelSignal, CancelSource},
    config::EngineConfig,
    database::{BackupDatabase, DirectoryDocumentStore, LocalDatabase, RemoteDatabase},
    hash_handler::HashHandler,
    logging,
    media::MountedMediaDevices,
    record::RecordSearchModel,
    settings::BackupSettings,
    sync::DatabaseSynchronizer,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "fleetbackup")]
#[command(about = "Content-addressed file backup for drives and media devices")]
#[command(version, author)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Config file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Back up the mappings declared in a settings file
    Backup {
        /// Settings file (JSON)
        #[arg(long)]
        settings: PathBuf,
        /// Root directory the settings' relative paths start from
        #[arg(long)]
        root: PathBuf,
        /// Skip synchronising with the remote database afterwards
        #[arg(long)]
        local_only: bool,
    },
    /// Merge the local and remote databases
    Sync,
    /// Check whether a hash or path is recorded as backed up
    Lookup(LookupArgs),
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct LookupArgs {
    #[arg(long)]
    hash: Option<String>,
    #[arg(long)]
    path: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.log_file {
        Some(path) => logging::init_file_logging(path, cli.verbose)?,
        None => logging::init_logging(cli.verbose)?,
    }

    let config = match &cli.config {
        Some(path) => EngineConfig::load_from(path)?,
        None => EngineConfig::load()?,
    };

    let cancel_source = CancelSource::new();
    let cancel = cancel_source.signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current file");
            cancel_source.cancel();
        }
    });

    match cli.command {
        Commands::Backup {
            settings,
            root,
            local_only,
        } => handle_backup(&config, settings, root, local_only, &cancel).await,
        Commands::Sync => handle_sync(&config, &cancel).await,
        Commands::Lookup(args) => handle_lookup(&config, args).await,
    }
}

fn local_database(config: &EngineConfig) -> Arc<LocalDatabase> {
    Arc::new(LocalDatabase::new(&config.database_directory))
}

fn remote_database(config: &EngineConfig) -> Option<Arc<RemoteDatabase>> {
    config.remote_store_directory.as_ref().map(|dir| {
        Arc::new(RemoteDatabase::new(Arc::new(DirectoryDocumentStore::new(dir))))
    })
}

async fn handle_backup(
    config: &EngineConfig,
    settings_path: PathBuf,
    root: PathBuf,
    local_only: bool,
    cancel: &CancelSignal,
) -> Result<()> {
    let settings = BackupSettings::from_file(&settings_path, &root)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;

    let local = local_database(config);
    let handler = Arc::new(HashHandler::new(local.clone()));
    handler.load(&config.database_name).await?;

    let runner = BackupRunner::new(
        handler,
        &config.backup_directory,
        BackupTimeLog::new(&config.backup_time_log),
    )
    .with_media_devices(Arc::new(MountedMediaDevices::new()));

    let summary = runner.backup_files(&settings, cancel).await?;

    println!("Backup {}", summary.run_id);
    println!("==================");
    for mapping in &summary.mappings {
        println!(
            "{:<30} copied {:>6}  failed {:>4}  already backed up {:>6}",
            mapping.source_directory,
            mapping.copied,
            mapping.failed + mapping.hash_failures,
            mapping.skipped_existing
        );
    }
    if summary.cancelled {
        println!("Backup cancelled");
        return Ok(());
    }

    if !local_only {
        if let Some(remote) = remote_database(config) {
            let synchronizer =
                DatabaseSynchronizer::new(local, remote, config.database_name.clone());
            let report = synchronizer.sync_databases(cancel).await?;
            info!("Post-backup sync: {} pulled, {} pushed", report.pulled, report.pushed);
        }
    }
    Ok(())
}

async fn handle_sync(config: &EngineConfig, cancel: &CancelSignal) -> Result<()> {
    let Some(remote) = remote_database(config) else {
        bail!("No remote_store_directory configured");
    };

    let synchronizer = DatabaseSynchronizer::new(
        local_database(config),
        remote,
        config.database_name.clone(),
    );
    let report = synchronizer.sync_databases(cancel).await?;

    println!("Pulled {} records, pushed {} records", report.pulled, report.pushed);
    if report.cancelled {
        println!("Sync cancelled");
    }
    Ok(())
}

async fn handle_lookup(config: &EngineConfig, args: LookupArgs) -> Result<()> {
    let database = local_database(config);
    database.load(&config.database_name).await?;

    let search = match (args.hash, args.path) {
        (Some(hash), _) => RecordSearchModel::by_hash(hash),
        (None, Some(path)) => RecordSearchModel::by_path(path),
        (None, None) => bail!("Either --hash or --path is required"),
    };

    match database.find(&search).await? {
        Some(records) => {
            for record in records {
                println!("{}  {}", record.file_hash, record.file_path);
            }
        }
        None => println!("Not backed up"),
    }
    Ok(())
}
