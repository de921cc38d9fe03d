use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};
use yte_adapters::{
    fetch_thumbnail, upload_image, upload_to_destination, RemoteStorage, ServiceAccountKey,
};
use yte_storage::SnapshotFormat;
use yte_sync::{CheckOutcome, DailyRunSummary, SyncConfig};

#[derive(Debug, Parser)]
#[command(name = "yte-cli")]
#[command(about = "YouTube trending explorer: daily snapshots uploaded to Google Drive")]
struct Cli {
    /// Snapshot file format.
    #[arg(long, value_enum, global = true, default_value_t = FormatArg::Csv)]
    format: FormatArg,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    Csv,
    Parquet,
}

impl From<FormatArg> for SnapshotFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Csv => SnapshotFormat::Csv,
            FormatArg::Parquet => SnapshotFormat::Parquet,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the scheduler until interrupted (default).
    Run,
    /// Run the daily routine now.
    Once,
    /// Run a double check now.
    Check,
    /// Upload a local file to `parent/.../name` in Drive.
    Upload {
        local: PathBuf,
        destination: String,
        #[arg(long)]
        mime: Option<String>,
    },
    /// Delete a Drive file by id.
    Delete { file_id: String },
    /// Download a thumbnail image, optionally uploading it to Drive.
    Thumbnail {
        link: String,
        local: PathBuf,
        /// Drive destination (`parent/.../name`) for the downloaded image.
        #[arg(long)]
        upload: Option<String>,
    },
    /// Upload a local JPEG to `parent/.../name` in Drive.
    UploadImage { local: PathBuf, destination: String },
}

fn init_tracing(default_filter: &str) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    SubscriberBuilder::default()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))
}

fn print_summary(summary: &DailyRunSummary) {
    println!(
        "daily routine complete: date={} regions={} rows={} file={} sha256={} uploaded={}",
        summary.run_date,
        summary.regions,
        summary.snapshot.rows,
        summary.snapshot.path.display(),
        summary.snapshot.sha256,
        summary.uploaded_file_id.as_deref().unwrap_or("no"),
    );
    if let Some(failure) = &summary.sanity_failure {
        eprintln!("warning: {failure}");
    }
}

fn drive_from_env(config: &SyncConfig) -> Result<yte_adapters::DriveClient> {
    let key = ServiceAccountKey::from_env_or_file(&config.service_account_file)
        .context("loading service account credentials")?;
    yte_sync::build_drive_client(config, key)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    init_tracing("info")?;
    let cli = Cli::parse();
    let config = SyncConfig {
        format: cli.format.into(),
        ..Default::default()
    };

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let pipeline = yte_sync::build_pipeline_from_env(config)?;
            yte_sync::run_forever(Arc::new(pipeline)).await?;
        }
        Commands::Once => {
            let pipeline = yte_sync::build_pipeline_from_env(config)?;
            let summary = pipeline.daily_routine(Local::now().date_naive()).await?;
            print_summary(&summary);
        }
        Commands::Check => {
            let pipeline = yte_sync::build_pipeline_from_env(config)?;
            match pipeline.double_check(Local::now().date_naive()).await? {
                CheckOutcome::AlreadyUploaded => println!("double check: snapshot already uploaded"),
                CheckOutcome::Reran(summary) => print_summary(&summary),
            }
        }
        Commands::Upload {
            local,
            destination,
            mime,
        } => {
            let drive = drive_from_env(&config)?;
            let file_id = upload_to_destination(&drive, &local, &destination, mime.as_deref())
                .await
                .with_context(|| format!("uploading {} to {destination}", local.display()))?;
            println!("uploaded: id={file_id} destination={destination}");
        }
        Commands::Delete { file_id } => {
            let drive = drive_from_env(&config)?;
            drive
                .delete_file(&file_id)
                .await
                .with_context(|| format!("deleting {file_id}"))?;
            println!("deleted: id={file_id}");
        }
        Commands::Thumbnail {
            link,
            local,
            upload,
        } => {
            let http = yte_sync::build_http_fetcher(&config)?;
            let bytes = fetch_thumbnail(&http, &link, &local)
                .await
                .with_context(|| format!("downloading {link}"))?;
            println!("thumbnail saved: path={} bytes={bytes}", local.display());
            if let Some(destination) = upload {
                let drive = drive_from_env(&config)?;
                let file_id = upload_image(&drive, &local, &destination)
                    .await
                    .with_context(|| format!("uploading {} to {destination}", local.display()))?;
                println!("uploaded: id={file_id} destination={destination}");
            }
        }
        Commands::UploadImage { local, destination } => {
            let drive = drive_from_env(&config)?;
            let file_id = upload_image(&drive, &local, &destination)
                .await
                .with_context(|| format!("uploading {} to {destination}", local.display()))?;
            println!("uploaded: id={file_id} destination={destination}");
        }
    }

    Ok(())
}
