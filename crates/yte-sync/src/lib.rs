//! Trending pipeline orchestration: aggregate, snapshot, upload, verify.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};
use yte_adapters::credentials::{API_KEY_FILE, SERVICE_ACCOUNT_FILE};
use yte_adapters::{
    normalize_video, split_destination, upload_to_destination, ApiError, ApiKey, DriveClient,
    ParseError, RemoteStorage, ServiceAccountKey, TrendingSource, UploadError, YouTubeDataApi,
};
use yte_core::{RegionCode, VideoRecord, MAX_PAGE_SIZE};
use yte_storage::{HttpClientConfig, HttpFetcher, SnapshotFormat, SnapshotStore, WrittenSnapshot};

pub mod scheduler;

pub use scheduler::{ScheduledTask, Scheduler};

pub const CRATE_NAME: &str = "yte-sync";

pub const DEFAULT_REMOTE_DIR: &str = "data/youtube_trending_explorer";

fn at_hour(hour: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, 0, 0).unwrap_or_default()
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub regions: Vec<RegionCode>,
    pub page_size: u32,
    pub data_dir: PathBuf,
    pub remote_dir: String,
    pub format: SnapshotFormat,
    pub daily_at: NaiveTime,
    pub double_check_at: Vec<NaiveTime>,
    pub poll_interval: Duration,
    pub http_timeout_secs: u64,
    pub user_agent: String,
    pub api_key_file: PathBuf,
    pub service_account_file: PathBuf,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            regions: RegionCode::defaults(),
            page_size: MAX_PAGE_SIZE,
            data_dir: PathBuf::from("./data"),
            remote_dir: DEFAULT_REMOTE_DIR.to_string(),
            format: SnapshotFormat::Csv,
            daily_at: at_hour(8),
            double_check_at: [11, 14, 17, 20].into_iter().map(at_hour).collect(),
            poll_interval: Duration::from_secs(1),
            http_timeout_secs: 60,
            user_agent: "yte-bot/0.1".to_string(),
            api_key_file: PathBuf::from(API_KEY_FILE),
            service_account_file: PathBuf::from(SERVICE_ACCOUNT_FILE),
        }
    }
}

impl SyncConfig {
    /// Page size actually requested per region.
    pub fn effective_page_size(&self) -> u32 {
        self.page_size.clamp(1, MAX_PAGE_SIZE)
    }

    /// Row count a complete daily run produces.
    pub fn expected_rows(&self) -> usize {
        self.regions.len() * self.effective_page_size() as usize
    }

    pub fn remote_destination(&self, file_name: &str) -> String {
        let dir = self.remote_dir.trim_matches('/');
        if dir.is_empty() {
            file_name.to_string()
        } else {
            format!("{dir}/{file_name}")
        }
    }

    fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            ..Default::default()
        }
    }
}

/// Secrets read from the environment, with on-disk fallbacks.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub api_key: ApiKey,
    pub service_account: ServiceAccountKey,
}

impl Credentials {
    pub fn from_env(config: &SyncConfig) -> Result<Self> {
        Ok(Self {
            api_key: ApiKey::from_env_or_file(&config.api_key_file)
                .context("loading YouTube API key")?,
            service_account: ServiceAccountKey::from_env_or_file(&config.service_account_file)
                .context("loading service account credentials")?,
        })
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("item {position} of region {region} could not be normalized: {source}")]
    Parse {
        region: RegionCode,
        position: u32,
        #[source]
        source: ParseError,
    },
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error(transparent)]
    Snapshot(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Number of videos is lesser than expected: expected {expected}, got {actual}")]
pub struct SanityCheckFailure {
    pub expected: usize,
    pub actual: usize,
}

#[derive(Debug, Clone)]
pub struct DailyRunSummary {
    pub run_date: NaiveDate,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub regions: usize,
    pub snapshot: WrittenSnapshot,
    pub uploaded_file_id: Option<String>,
    pub sanity_failure: Option<SanityCheckFailure>,
}

impl DailyRunSummary {
    pub fn uploaded(&self) -> bool {
        self.uploaded_file_id.is_some()
    }
}

#[derive(Debug, Clone)]
pub enum CheckOutcome {
    AlreadyUploaded,
    Reran(DailyRunSummary),
}

pub struct TrendingPipeline {
    config: SyncConfig,
    source: Arc<dyn TrendingSource>,
    remote: Arc<dyn RemoteStorage>,
    store: SnapshotStore,
}

impl TrendingPipeline {
    pub fn new(
        config: SyncConfig,
        source: Arc<dyn TrendingSource>,
        remote: Arc<dyn RemoteStorage>,
    ) -> Self {
        let store = SnapshotStore::new(config.data_dir.clone());
        Self {
            config,
            source,
            remote,
            store,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// One page per region, concatenated in region order. The first failing
    /// fetch or item aborts the whole aggregation.
    pub async fn fetch_trending_data(&self) -> Result<Vec<VideoRecord>, SyncError> {
        let page_size = self.config.effective_page_size();
        let mut records = Vec::with_capacity(self.config.expected_rows());

        for region in &self.config.regions {
            let created_ts = Local::now().naive_local();
            let items = self.source.fetch_trending_page(region, page_size).await?;
            let now = Utc::now();
            let count = items.len();

            for (idx, item) in items.iter().enumerate() {
                let position = idx as u32 + 1;
                let draft = normalize_video(item, now).map_err(|source| SyncError::Parse {
                    region: region.clone(),
                    position,
                    source,
                })?;
                records.push(draft.into_record(position, region.clone(), created_ts));
            }
            info!(region = %region, items = count, "fetched trending page");
        }
        Ok(records)
    }

    pub async fn write_snapshot(
        &self,
        date: NaiveDate,
        records: &[VideoRecord],
    ) -> Result<WrittenSnapshot, SyncError> {
        let snapshot = self
            .store
            .write(date, self.config.format, records)
            .await
            .with_context(|| format!("writing snapshot for {date}"))?;
        info!(
            path = %snapshot.path.display(),
            rows = snapshot.rows,
            bytes = snapshot.bytes,
            sha256 = %snapshot.sha256,
            "snapshot written"
        );
        Ok(snapshot)
    }

    pub async fn upload_snapshot(&self, snapshot: &WrittenSnapshot) -> Result<String, SyncError> {
        let destination = self.config.remote_destination(&snapshot.file_name);
        let file_id = upload_to_destination(
            self.remote.as_ref(),
            &snapshot.path,
            &destination,
            Some(snapshot.format.mime_type()),
        )
        .await?;
        info!(destination = %destination, file_id = %file_id, "snapshot uploaded");
        Ok(file_id)
    }

    /// Whether `file_name` is listed in the remote snapshot folder (exact match).
    pub async fn snapshot_uploaded(&self, file_name: &str) -> Result<bool, SyncError> {
        let (folder, _) = split_destination(&self.config.remote_destination(file_name));
        let entries = self.remote.list_folder_contents(&folder).await?;
        Ok(entries.iter().any(|entry| entry.name == file_name))
    }

    /// Fetch, write today's snapshot and upload it unless the row count is off.
    pub async fn daily_routine(&self, today: NaiveDate) -> Result<DailyRunSummary, SyncError> {
        let started_at = Utc::now();
        let records = self.fetch_trending_data().await?;
        let snapshot = self.write_snapshot(today, &records).await?;

        let expected = self.config.expected_rows();
        let (uploaded_file_id, sanity_failure) = if snapshot.rows != expected {
            let failure = SanityCheckFailure {
                expected,
                actual: snapshot.rows,
            };
            warn!(expected, actual = snapshot.rows, file = %snapshot.file_name, "{failure}; upload skipped");
            (None, Some(failure))
        } else {
            (Some(self.upload_snapshot(&snapshot).await?), None)
        };

        Ok(DailyRunSummary {
            run_date: today,
            started_at,
            finished_at: Utc::now(),
            regions: self.config.regions.len(),
            snapshot,
            uploaded_file_id,
            sanity_failure,
        })
    }

    /// Re-run the daily routine once if today's snapshot is not in the remote
    /// folder.
    pub async fn double_check(&self, today: NaiveDate) -> Result<CheckOutcome, SyncError> {
        let file_name = yte_storage::snapshot_file_name(today, self.config.format);
        if self.snapshot_uploaded(&file_name).await? {
            info!(file = %file_name, "snapshot already uploaded");
            return Ok(CheckOutcome::AlreadyUploaded);
        }
        warn!(file = %file_name, "snapshot missing from remote folder; re-running daily routine");
        Ok(CheckOutcome::Reran(self.daily_routine(today).await?))
    }
}

pub struct DailyRoutineTask {
    pipeline: Arc<TrendingPipeline>,
}

impl DailyRoutineTask {
    pub fn new(pipeline: Arc<TrendingPipeline>) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl ScheduledTask for DailyRoutineTask {
    fn name(&self) -> &str {
        "daily_routine"
    }

    async fn run(&self, now: NaiveDateTime) -> Result<()> {
        let summary = self.pipeline.daily_routine(now.date()).await?;
        info!(
            file = %summary.snapshot.file_name,
            rows = summary.snapshot.rows,
            uploaded = summary.uploaded(),
            "daily routine complete"
        );
        Ok(())
    }
}

pub struct DoubleCheckTask {
    pipeline: Arc<TrendingPipeline>,
}

impl DoubleCheckTask {
    pub fn new(pipeline: Arc<TrendingPipeline>) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl ScheduledTask for DoubleCheckTask {
    fn name(&self) -> &str {
        "double_check"
    }

    async fn run(&self, now: NaiveDateTime) -> Result<()> {
        self.pipeline.double_check(now.date()).await?;
        Ok(())
    }
}

/// The daily routine plus every double check, at the configured times.
pub fn build_scheduler(pipeline: Arc<TrendingPipeline>) -> Scheduler {
    let config = pipeline.config().clone();
    let mut scheduler = Scheduler::new();
    scheduler.every_day_at(
        config.daily_at,
        Arc::new(DailyRoutineTask::new(Arc::clone(&pipeline))),
    );
    for at in config.double_check_at {
        scheduler.every_day_at(at, Arc::new(DoubleCheckTask::new(Arc::clone(&pipeline))));
    }
    scheduler
}

/// Poll the schedule against the local clock until Ctrl-C.
pub async fn run_forever(pipeline: Arc<TrendingPipeline>) -> Result<()> {
    let poll_interval = pipeline.config().poll_interval;
    let mut scheduler = build_scheduler(pipeline);
    info!(jobs = scheduler.len(), "scheduler started");

    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                scheduler.run_pending(Local::now().naive_local()).await;
            }
            result = &mut shutdown => {
                result.context("listening for ctrl-c")?;
                info!("shutdown requested; scheduler stopped");
                return Ok(());
            }
        }
    }
}

/// Shared HTTP client carrying the configured timeout and user agent.
pub fn build_http_fetcher(config: &SyncConfig) -> Result<HttpFetcher> {
    HttpFetcher::new(config.http_client_config())
}

pub fn build_drive_client(config: &SyncConfig, key: ServiceAccountKey) -> Result<DriveClient> {
    Ok(DriveClient::new(build_http_fetcher(config)?, key))
}

pub fn build_pipeline(config: SyncConfig, credentials: Credentials) -> Result<TrendingPipeline> {
    let http = build_http_fetcher(&config)?;
    let source = YouTubeDataApi::new(http.clone(), credentials.api_key);
    let remote = DriveClient::new(http, credentials.service_account);
    Ok(TrendingPipeline::new(config, Arc::new(source), Arc::new(remote)))
}

pub fn build_pipeline_from_env(config: SyncConfig) -> Result<TrendingPipeline> {
    let credentials = Credentials::from_env(&config)?;
    build_pipeline(config, credentials)
}
