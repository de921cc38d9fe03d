//! External collaborator contracts + the YouTube and Google Drive adapters.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use yte_core::RegionCode;
use yte_storage::FetchError;

pub mod credentials;
pub mod drive;
#[cfg(test)]
mod mock_http;
pub mod thumbnails;
pub mod youtube;

pub use credentials::{ApiKey, CredentialsError, ServiceAccountKey};
pub use drive::DriveClient;
pub use thumbnails::{fetch_thumbnail, upload_image, ThumbnailError};
pub use youtube::{normalize_video, RawVideoItem, TrendingPage, YouTubeDataApi};

pub const CRATE_NAME: &str = "yte-adapters";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("trending request for region {region} failed: {source}")]
    Fetch {
        region: RegionCode,
        #[source]
        source: FetchError,
    },
    #[error("malformed trending response for region {region}: {source}")]
    Malformed {
        region: RegionCode,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Credentials(#[from] CredentialsError),
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("trending item {video_id} is missing required field `{field}`")]
    MissingField {
        video_id: String,
        field: &'static str,
    },
    #[error("trending item {video_id} has an invalid publishedAt `{value}`: {source}")]
    InvalidTimestamp {
        video_id: String,
        value: String,
        #[source]
        source: chrono::ParseError,
    },
    #[error("trending item {video_id} has a non-numeric {field} `{value}`")]
    InvalidMetric {
        video_id: String,
        field: &'static str,
        value: String,
    },
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("destination folder `{0}` was not found")]
    FolderNotFound(String),
    #[error("reading local file {path}: {source}")]
    LocalFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("remote storage request failed: {0}")]
    Remote(#[from] FetchError),
    #[error("malformed remote storage response: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error(transparent)]
    Credentials(#[from] CredentialsError),
}

/// One entry of a remote folder listing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteEntry {
    pub id: String,
    pub name: String,
}

#[async_trait]
pub trait TrendingSource: Send + Sync {
    /// One page of the trending chart for `region`, in rank order.
    async fn fetch_trending_page(
        &self,
        region: &RegionCode,
        max_results: u32,
    ) -> Result<Vec<RawVideoItem>, ApiError>;
}

#[async_trait]
pub trait RemoteStorage: Send + Sync {
    /// Children of the folder reached by `folder_path`; an empty path lists the
    /// root and a path that does not resolve lists nothing.
    async fn list_folder_contents(
        &self,
        folder_path: &[String],
    ) -> Result<Vec<RemoteEntry>, UploadError>;

    async fn upload_file(
        &self,
        local_path: &Path,
        folder_id: &str,
        file_name: &str,
        mime_type: Option<&str>,
    ) -> Result<String, UploadError>;

    async fn delete_file(&self, file_id: &str) -> Result<(), UploadError>;

    /// Id of the folder at a non-empty `folder_path`, if it exists. The default
    /// lists the parent and matches the last segment by exact name.
    async fn find_folder(&self, folder_path: &[String]) -> Result<Option<String>, UploadError> {
        let Some((last, parents)) = folder_path.split_last() else {
            return Ok(None);
        };
        Ok(self
            .list_folder_contents(parents)
            .await?
            .into_iter()
            .find(|entry| &entry.name == last)
            .map(|entry| entry.id))
    }
}

/// Splits `parent_a/parent_b/name` into its folder segments and file name.
pub fn split_destination(destination: &str) -> (Vec<String>, String) {
    let mut segments = destination
        .split('/')
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect::<Vec<_>>();
    let name = segments.pop().unwrap_or_default();
    (segments, name)
}

/// Resolve the id of the folder at `folder_path`; an empty path is the root.
pub async fn resolve_folder_id(
    remote: &dyn RemoteStorage,
    folder_path: &[String],
) -> Result<String, UploadError> {
    if folder_path.is_empty() {
        return Ok(drive::ROOT_FOLDER_ID.to_string());
    }
    remote
        .find_folder(folder_path)
        .await?
        .ok_or_else(|| UploadError::FolderNotFound(folder_path.join("/")))
}

/// Upload `local_path` to `destination` (`parent_dirs/.../file_name`). Parent
/// folders must already exist.
pub async fn upload_to_destination(
    remote: &dyn RemoteStorage,
    local_path: &Path,
    destination: &str,
    mime_type: Option<&str>,
) -> Result<String, UploadError> {
    let (folders, file_name) = split_destination(destination);
    let folder_id = resolve_folder_id(remote, &folders).await?;
    remote
        .upload_file(local_path, &folder_id, &file_name, mime_type)
        .await
}
