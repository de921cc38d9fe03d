//! Thumbnail download and JPEG upload helpers.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs;
use tracing::debug;
use yte_storage::{FetchError, HttpFetcher};

use crate::{upload_to_destination, RemoteStorage, UploadError};

pub const IMAGE_JPEG_MIME: &str = "image/jpeg";

#[derive(Debug, Error)]
pub enum ThumbnailError {
    #[error("downloading thumbnail failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("writing thumbnail to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Download the image at `thumbnail_link` into `local_path`, replacing any
/// existing file. Returns the number of bytes written.
pub async fn fetch_thumbnail(
    http: &HttpFetcher,
    thumbnail_link: &str,
    local_path: &Path,
) -> Result<usize, ThumbnailError> {
    let response = http
        .execute("thumbnail.download", |client| client.get(thumbnail_link))
        .await?;

    let write_err = |source| ThumbnailError::Write {
        path: local_path.to_path_buf(),
        source,
    };
    if let Some(parent) = local_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await.map_err(write_err)?;
    }
    fs::write(local_path, &response.body)
        .await
        .map_err(write_err)?;

    debug!(
        url = %response.final_url,
        status = %response.status,
        path = %local_path.display(),
        bytes = response.body.len(),
        "thumbnail saved"
    );
    Ok(response.body.len())
}

/// Upload a JPEG to `destination` (`parent_dirs/.../file_name`).
pub async fn upload_image(
    remote: &dyn RemoteStorage,
    local_path: &Path,
    destination: &str,
) -> Result<String, UploadError> {
    upload_to_destination(remote, local_path, destination, Some(IMAGE_JPEG_MIME)).await
}
