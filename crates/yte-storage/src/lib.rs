//! Snapshot file storage + HTTP fetch utilities for the trending explorer.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use arrow_array::{
    ArrayRef, Int64Array, RecordBatch, StringArray, TimestampMillisecondArray, UInt32Array,
};
use arrow_schema::{DataType, Field as ArrowField, Schema, TimeUnit};
use chrono::NaiveDate;
use parquet::arrow::ArrowWriter;
use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;
use yte_core::VideoRecord;

pub const CRATE_NAME: &str = "yte-storage";

pub const SNAPSHOT_FILE_PREFIX: &str = "video_data_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SnapshotFormat {
    #[default]
    Csv,
    Parquet,
}

impl SnapshotFormat {
    pub fn extension(self) -> &'static str {
        match self {
            SnapshotFormat::Csv => "csv",
            SnapshotFormat::Parquet => "parquet",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            SnapshotFormat::Csv => "text/csv",
            SnapshotFormat::Parquet => "application/vnd.apache.parquet",
        }
    }
}

/// `video_data_<YYYY-MM-DD>.<ext>`; stable for the whole calendar day.
pub fn snapshot_file_name(date: NaiveDate, format: SnapshotFormat) -> String {
    format!(
        "{SNAPSHOT_FILE_PREFIX}{}.{}",
        date.format("%Y-%m-%d"),
        format.extension()
    )
}

#[derive(Debug, Clone)]
pub struct WrittenSnapshot {
    pub file_name: String,
    pub path: PathBuf,
    pub format: SnapshotFormat,
    pub rows: usize,
    pub bytes: usize,
    pub sha256: String,
}

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    /// Serialize `records` and persist them as the snapshot for `date`.
    ///
    /// A second write on the same day replaces the earlier file.
    pub async fn write(
        &self,
        date: NaiveDate,
        format: SnapshotFormat,
        records: &[VideoRecord],
    ) -> anyhow::Result<WrittenSnapshot> {
        let bytes = match format {
            SnapshotFormat::Csv => encode_csv(records)?,
            SnapshotFormat::Parquet => encode_parquet(records)?,
        };
        let file_name = snapshot_file_name(date, format);
        let path = self.write_bytes(&file_name, &bytes).await?;
        debug!(path = %path.display(), rows = records.len(), "snapshot written");

        Ok(WrittenSnapshot {
            file_name,
            path,
            format,
            rows: records.len(),
            bytes: bytes.len(),
            sha256: Self::sha256_hex(&bytes),
        })
    }

    /// Write bytes under `root/file_name` using a temp file and an atomic rename.
    pub async fn write_bytes(&self, file_name: &str, bytes: &[u8]) -> anyhow::Result<PathBuf> {
        fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("creating snapshot directory {}", self.root.display()))?;

        let absolute_path = self.root.join(file_name);
        let temp_path = self
            .root
            .join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));

        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp snapshot file {}", temp_path.display()))?;
        file.write_all(bytes)
            .await
            .with_context(|| format!("writing temp snapshot file {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp snapshot file {}", temp_path.display()))?;
        drop(file);

        if let Err(err) = fs::rename(&temp_path, &absolute_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err).with_context(|| {
                format!(
                    "atomically renaming temp snapshot {} -> {}",
                    temp_path.display(),
                    absolute_path.display()
                )
            });
        }
        Ok(absolute_path)
    }
}

pub fn encode_csv(records: &[VideoRecord]) -> anyhow::Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    if records.is_empty() {
        writer
            .write_record(VideoRecord::COLUMNS)
            .context("writing csv header")?;
    }
    for record in records {
        writer
            .serialize(record)
            .with_context(|| format!("serializing csv row for video {}", record.video_id))?;
    }
    writer
        .into_inner()
        .map_err(|err| err.into_error())
        .context("flushing csv buffer")
}

pub fn read_csv_snapshot(path: impl AsRef<Path>) -> anyhow::Result<Vec<VideoRecord>> {
    let path = path.as_ref();
    let mut reader =
        csv::Reader::from_path(path).with_context(|| format!("opening {}", path.display()))?;
    reader
        .deserialize()
        .map(|row| row.with_context(|| format!("reading row from {}", path.display())))
        .collect()
}

const PUBLISHED_TS_ZONE: &str = "UTC";

fn snapshot_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        ArrowField::new("video_id", DataType::Utf8, false),
        ArrowField::new("video_title", DataType::Utf8, false),
        ArrowField::new("video_link", DataType::Utf8, false),
        ArrowField::new("channel_link", DataType::Utf8, false),
        ArrowField::new("channel_id", DataType::Utf8, false),
        ArrowField::new("channel_name", DataType::Utf8, false),
        ArrowField::new(
            "published_ts",
            DataType::Timestamp(TimeUnit::Millisecond, Some(PUBLISHED_TS_ZONE.into())),
            false,
        ),
        ArrowField::new("hours_since_publishing", DataType::Int64, false),
        ArrowField::new("tags", DataType::Utf8, true),
        ArrowField::new("likes_count", DataType::Int64, false),
        ArrowField::new("dislikes_count", DataType::Int64, false),
        ArrowField::new("views_count", DataType::Int64, false),
        ArrowField::new("comments_count", DataType::Int64, false),
        ArrowField::new("blocked_in_countries", DataType::Utf8, true),
        ArrowField::new("video_thumbnail_link", DataType::Utf8, true),
        ArrowField::new("trending_position", DataType::UInt32, false),
        ArrowField::new("region", DataType::Utf8, false),
        ArrowField::new(
            "created_ts",
            DataType::Timestamp(TimeUnit::Millisecond, None),
            false,
        ),
    ]))
}

fn utf8_column<'a>(records: &'a [VideoRecord], f: impl Fn(&'a VideoRecord) -> &'a str) -> ArrayRef {
    Arc::new(StringArray::from(records.iter().map(f).collect::<Vec<_>>()))
}

fn optional_utf8_column<'a>(
    records: &'a [VideoRecord],
    f: impl Fn(&'a VideoRecord) -> Option<&'a str>,
) -> ArrayRef {
    Arc::new(StringArray::from(records.iter().map(f).collect::<Vec<_>>()))
}

fn int64_column(records: &[VideoRecord], f: impl Fn(&VideoRecord) -> i64) -> ArrayRef {
    Arc::new(Int64Array::from(records.iter().map(f).collect::<Vec<_>>()))
}

pub fn encode_parquet(records: &[VideoRecord]) -> anyhow::Result<Vec<u8>> {
    // instants as epoch millis; created_ts stays zone-less like the CSV column
    let published = TimestampMillisecondArray::from(
        records
            .iter()
            .map(|r| r.published_ts.timestamp_millis())
            .collect::<Vec<_>>(),
    )
    .with_timezone(PUBLISHED_TS_ZONE);
    let created = TimestampMillisecondArray::from(
        records
            .iter()
            .map(|r| r.created_ts.and_utc().timestamp_millis())
            .collect::<Vec<_>>(),
    );

    let columns: Vec<ArrayRef> = vec![
        utf8_column(records, |r| r.video_id.as_str()),
        utf8_column(records, |r| r.video_title.as_str()),
        utf8_column(records, |r| r.video_link.as_str()),
        utf8_column(records, |r| r.channel_link.as_str()),
        utf8_column(records, |r| r.channel_id.as_str()),
        utf8_column(records, |r| r.channel_name.as_str()),
        Arc::new(published),
        int64_column(records, |r| r.hours_since_publishing),
        optional_utf8_column(records, |r| r.tags.as_deref()),
        int64_column(records, |r| r.likes_count),
        int64_column(records, |r| r.dislikes_count),
        int64_column(records, |r| r.views_count),
        int64_column(records, |r| r.comments_count),
        optional_utf8_column(records, |r| r.blocked_in_countries.as_deref()),
        optional_utf8_column(records, |r| r.video_thumbnail_link.as_deref()),
        Arc::new(UInt32Array::from(
            records.iter().map(|r| r.trending_position).collect::<Vec<_>>(),
        )),
        utf8_column(records, |r| r.region.as_str()),
        Arc::new(created),
    ];

    let batch = RecordBatch::try_new(snapshot_schema(), columns)
        .context("building snapshot record batch")?;

    let mut buffer = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buffer, batch.schema(), None)
        .context("opening parquet writer")?;
    writer.write(&batch).context("writing snapshot record batch")?;
    writer.close().context("closing parquet writer")?;
    Ok(buffer)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            user_agent: None,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}: {body}")]
    HttpStatus { status: u16, url: String, body: String },
}

impl FetchError {
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::HttpStatus { status, .. } => Some(*status),
            FetchError::Request(err) => err.status().map(|s| s.as_u16()),
        }
    }
}

const ERROR_BODY_LIMIT: usize = 512;

/// Drops the query string so API keys never reach logs or error messages.
fn redact_url(url: &str) -> String {
    url.split('?').next().unwrap_or(url).to_string()
}

fn truncate_body(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    if text.chars().count() <= ERROR_BODY_LIMIT {
        text.into_owned()
    } else {
        let mut out = text.chars().take(ERROR_BODY_LIMIT).collect::<String>();
        out.push('…');
        out
    }
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            backoff: config.backoff,
        })
    }

    /// Send the request produced by `build`, rebuilding it for every retry of a
    /// transport error, 429 or 5xx. Any other non-success status fails at once.
    pub async fn execute<F>(&self, label: &str, build: F) -> Result<FetchedResponse, FetchError>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let span = info_span!("http_request", label);
        self.execute_inner(build).instrument(span).await
    }

    async fn execute_inner<F>(&self, build: F) -> Result<FetchedResponse, FetchError>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let mut attempt = 0usize;
        loop {
            match build(&self.client).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = redact_url(resp.url().as_str());

                    if status.is_success() {
                        let body = resp.bytes().await?.to_vec();
                        return Ok(FetchedResponse {
                            status,
                            final_url,
                            body,
                        });
                    }

                    if classify_status(status) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        debug!(%status, attempt, "retrying http request");
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }

                    let body = resp.bytes().await.map(|b| b.to_vec()).unwrap_or_default();
                    return Err(FetchError::HttpStatus {
                        status: status.as_u16(),
                        url: final_url,
                        body: truncate_body(&body),
                    });
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        debug!(error = %err, attempt, "retrying http request");
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(FetchError::Request(err.without_url()));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, NaiveDateTime};
    use tempfile::tempdir;
    use yte_core::RegionCode;

    fn sample_record(video_id: &str, position: u32, tags: Option<&str>) -> VideoRecord {
        VideoRecord {
            video_id: video_id.to_string(),
            video_title: format!("Title, with \"quotes\" {video_id}"),
            video_link: yte_core::video_link(video_id),
            channel_link: yte_core::channel_link("UCchan"),
            channel_id: "UCchan".to_string(),
            channel_name: "Channel".to_string(),
            published_ts: DateTime::parse_from_rfc3339("2020-05-01T17:00:11Z").unwrap(),
            hours_since_publishing: 19,
            tags: tags.map(ToString::to_string),
            likes_count: 10,
            dislikes_count: -1,
            views_count: 1000,
            comments_count: 5,
            blocked_in_countries: None,
            video_thumbnail_link: Some("https://i.ytimg.com/vi/x/sddefault.jpg".to_string()),
            trending_position: position,
            region: RegionCode::parse("US").unwrap(),
            created_ts: NaiveDateTime::parse_from_str("2020-05-02 08:00:01", "%Y-%m-%d %H:%M:%S")
                .unwrap(),
        }
    }

    #[test]
    fn snapshot_hashing_is_stable() {
        let hash = SnapshotStore::sha256_hex(b"hello world");
        assert_eq!(
            hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn file_name_encodes_date_only() {
        let date = NaiveDate::from_ymd_opt(2020, 5, 2).unwrap();
        assert_eq!(
            snapshot_file_name(date, SnapshotFormat::Csv),
            "video_data_2020-05-02.csv"
        );
        assert_eq!(
            snapshot_file_name(date, SnapshotFormat::Parquet),
            "video_data_2020-05-02.parquet"
        );
    }

    #[tokio::test]
    async fn same_day_writes_are_byte_identical() {
        let dir = tempdir().expect("tempdir");
        let store = SnapshotStore::new(dir.path().join("data"));
        let date = NaiveDate::from_ymd_opt(2020, 5, 2).unwrap();
        let records = vec![
            sample_record("a1", 1, Some("music,live")),
            sample_record("b2", 2, None),
        ];

        let first = store.write(date, SnapshotFormat::Csv, &records).await.unwrap();
        let first_bytes = std::fs::read(&first.path).unwrap();
        let second = store.write(date, SnapshotFormat::Csv, &records).await.unwrap();
        let second_bytes = std::fs::read(&second.path).unwrap();

        assert_eq!(first.path, second.path);
        assert_eq!(first.file_name, "video_data_2020-05-02.csv");
        assert_eq!(first.sha256, second.sha256);
        assert_eq!(first_bytes, second_bytes);
        assert_eq!(first.rows, 2);

        let leftovers = std::fs::read_dir(store.root())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn csv_snapshot_reads_back_with_same_schema() {
        let dir = tempdir().expect("tempdir");
        let store = SnapshotStore::new(dir.path());
        let date = NaiveDate::from_ymd_opt(2020, 5, 2).unwrap();
        let records = vec![
            sample_record("a1", 1, Some("music,live")),
            sample_record("b2", 2, None),
        ];

        let written = store.write(date, SnapshotFormat::Csv, &records).await.unwrap();
        let text = std::fs::read_to_string(&written.path).unwrap();
        let header = text.lines().next().unwrap();
        assert_eq!(header, VideoRecord::COLUMNS.join(","));

        let read_back = read_csv_snapshot(&written.path).unwrap();
        assert_eq!(read_back, records);
    }

    #[test]
    fn empty_csv_still_carries_header() {
        let bytes = encode_csv(&[]).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text.trim_end(), VideoRecord::COLUMNS.join(","));
    }

    #[tokio::test]
    async fn parquet_snapshot_has_magic_and_row_count() {
        let dir = tempdir().expect("tempdir");
        let store = SnapshotStore::new(dir.path());
        let date = NaiveDate::from_ymd_opt(2020, 5, 2).unwrap();
        let records = vec![sample_record("a1", 1, None), sample_record("b2", 2, None)];

        let written = store
            .write(date, SnapshotFormat::Parquet, &records)
            .await
            .unwrap();
        let bytes = std::fs::read(&written.path).unwrap();
        assert_eq!(&bytes[..4], b"PAR1");
        assert_eq!(&bytes[bytes.len() - 4..], b"PAR1");
        assert_eq!(written.rows, 2);
    }

    #[tokio::test]
    async fn parquet_timestamps_are_typed_columns() {
        use arrow_array::Array;
        use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

        let dir = tempdir().expect("tempdir");
        let store = SnapshotStore::new(dir.path());
        let date = NaiveDate::from_ymd_opt(2020, 5, 2).unwrap();
        let written = store
            .write(date, SnapshotFormat::Parquet, &[sample_record("a1", 1, None)])
            .await
            .unwrap();

        let file = std::fs::File::open(&written.path).unwrap();
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)
            .unwrap()
            .build()
            .unwrap();
        let batches = reader.collect::<Result<Vec<_>, _>>().unwrap();
        let batch = &batches[0];
        let schema = batch.schema();

        assert_eq!(
            schema.field_with_name("published_ts").unwrap().data_type(),
            &DataType::Timestamp(TimeUnit::Millisecond, Some("UTC".into()))
        );
        assert_eq!(
            schema.field_with_name("created_ts").unwrap().data_type(),
            &DataType::Timestamp(TimeUnit::Millisecond, None)
        );

        let published = batch
            .column_by_name("published_ts")
            .unwrap()
            .as_any()
            .downcast_ref::<TimestampMillisecondArray>()
            .unwrap();
        assert_eq!(published.value(0), 1_588_352_411_000);
        let created = batch
            .column_by_name("created_ts")
            .unwrap()
            .as_any()
            .downcast_ref::<TimestampMillisecondArray>()
            .unwrap();
        assert_eq!(created.value(0), 1_588_406_401_000);
    }

    #[test]
    fn backoff_logic_is_exponential_and_capped() {
        let policy = BackoffPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(350));
    }

    #[test]
    fn quota_errors_are_not_retried() {
        assert_eq!(classify_status(StatusCode::FORBIDDEN), RetryDisposition::NonRetryable);
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::BAD_GATEWAY),
            RetryDisposition::Retryable
        );
    }

    #[test]
    fn redaction_strips_query_strings() {
        assert_eq!(
            redact_url("https://www.googleapis.com/youtube/v3/videos?key=secret"),
            "https://www.googleapis.com/youtube/v3/videos"
        );
    }

    /// Serve each scripted status once on a loopback port, counting requests.
    fn scripted_server(
        responses: Vec<(u16, &'static str)>,
    ) -> (String, std::sync::Arc<std::sync::atomic::AtomicUsize>) {
        use std::io::{BufRead, BufReader, Write};
        use std::sync::atomic::Ordering;

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let hits = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = std::sync::Arc::clone(&hits);
        std::thread::spawn(move || {
            for (status, body) in responses {
                let Ok((stream, _)) = listener.accept() else {
                    return;
                };
                let mut reader = BufReader::new(stream);
                let mut line = String::new();
                while reader.read_line(&mut line).is_ok() && line != "\r\n" && !line.is_empty() {
                    line.clear();
                }
                counter.fetch_add(1, Ordering::SeqCst);
                let mut stream = reader.into_inner();
                let _ = write!(
                    stream,
                    "HTTP/1.1 {status} Scripted\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
            }
        });
        (base_url, hits)
    }

    fn fast_fetcher() -> HttpFetcher {
        HttpFetcher::new(HttpClientConfig {
            backoff: BackoffPolicy {
                max_retries: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
            },
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn throttling_and_server_errors_are_retried() {
        let (base_url, hits) =
            scripted_server(vec![(503, "busy"), (429, "slow down"), (200, r#"{"ok":true}"#)]);
        let url = format!("{base_url}/videos?key=secret");

        let response = fast_fetcher()
            .execute("test", |client| client.get(&url))
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body, br#"{"ok":true}"#);
        assert!(!response.final_url.contains("secret"));
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn forbidden_fails_at_once_with_body() {
        let (base_url, hits) = scripted_server(vec![
            (403, r#"{"error":{"message":"quotaExceeded"}}"#),
            (200, "unused"),
        ]);
        let url = format!("{base_url}/videos?key=secret");

        let err = fast_fetcher()
            .execute("test", |client| client.get(&url))
            .await
            .unwrap_err();

        match err {
            FetchError::HttpStatus { status, url, body } => {
                assert_eq!(status, 403);
                assert!(body.contains("quotaExceeded"));
                assert!(!url.contains("secret"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
