//! Google Drive v3 client authenticated with a service-account JWT grant.

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;
use yte_storage::HttpFetcher;

use crate::credentials::{CredentialsError, ServiceAccountKey};
use crate::{RemoteEntry, RemoteStorage, UploadError};

pub const GOOGLE_APIS_BASE: &str = "https://www.googleapis.com";
pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";
pub const ROOT_FOLDER_ID: &str = "root";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const TOKEN_LIFETIME_SECS: i64 = 3600;
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);
const LIST_PAGE_SIZE: &str = "1000";

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    refresh_at: Instant,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<RemoteEntry>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreatedFile {
    id: String,
}

/// Quote a value for a Drive `q` string literal.
pub fn escape_query_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

fn folder_query(name: &str, parent_id: Option<&str>) -> String {
    let mut q = format!(
        "mimeType = '{FOLDER_MIME_TYPE}' and name = '{}' and trashed = false",
        escape_query_literal(name)
    );
    if let Some(parent) = parent_id {
        q.push_str(&format!(" and '{}' in parents", escape_query_literal(parent)));
    }
    q
}

fn children_query(parent_id: &str) -> String {
    format!(
        "'{}' in parents and trashed = false",
        escape_query_literal(parent_id)
    )
}

/// Body for a Drive `uploadType=multipart` request (`multipart/related`).
pub fn multipart_related_body(
    boundary: &str,
    metadata_json: &str,
    mime_type: &str,
    content: &[u8],
) -> Vec<u8> {
    let mut body = Vec::with_capacity(content.len() + metadata_json.len() + 256);
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata_json}\r\n--{boundary}\r\nContent-Type: {mime_type}\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

pub struct DriveClient {
    http: HttpFetcher,
    key: ServiceAccountKey,
    api_base: String,
    upload_base: String,
    token: Mutex<Option<CachedToken>>,
}

impl DriveClient {
    pub fn new(http: HttpFetcher, key: ServiceAccountKey) -> Self {
        Self {
            http,
            key,
            api_base: String::new(),
            upload_base: String::new(),
            token: Mutex::new(None),
        }
        .with_base_url(GOOGLE_APIS_BASE)
    }

    /// Point the metadata and upload endpoints at another host.
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        self.api_base = format!("{base}/drive/v3");
        self.upload_base = format!("{base}/upload/drive/v3");
        self
    }

    fn signed_assertion(&self) -> Result<String, CredentialsError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            iss: &self.key.client_email,
            scope: DRIVE_SCOPE,
            aud: &self.key.token_uri,
            iat: now,
            exp: now + TOKEN_LIFETIME_SECS,
        };
        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.key.private_key_id.clone();
        let key = EncodingKey::from_rsa_pem(self.key.private_key.as_bytes())?;
        Ok(encode(&header, &claims, &key)?)
    }

    async fn access_token(&self) -> Result<String, CredentialsError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.access_token.clone());
            }
        }

        let assertion = self.signed_assertion()?;
        let response = self
            .http
            .execute("drive.oauth.token", |client| {
                client.post(&self.key.token_uri).form(&[
                    ("grant_type", JWT_BEARER_GRANT),
                    ("assertion", assertion.as_str()),
                ])
            })
            .await?;
        let token: TokenResponse = serde_json::from_slice(&response.body)?;
        let lifetime = Duration::from_secs(token.expires_in.unwrap_or(TOKEN_LIFETIME_SECS as u64));
        debug!(client_email = %self.key.client_email, "drive access token refreshed");

        let access_token = token.access_token;
        *cached = Some(CachedToken {
            access_token: access_token.clone(),
            refresh_at: Instant::now() + lifetime.saturating_sub(TOKEN_REFRESH_MARGIN),
        });
        Ok(access_token)
    }

    async fn list_files(&self, q: &str) -> Result<Vec<RemoteEntry>, UploadError> {
        let token = self.access_token().await?;
        let url = format!("{}/files", self.api_base);
        let mut entries = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let response = self
                .http
                .execute("drive.files.list", |client| {
                    let mut request = client.get(&url).bearer_auth(&token).query(&[
                        ("q", q),
                        ("fields", "nextPageToken, files(id, name)"),
                        ("pageSize", LIST_PAGE_SIZE),
                        ("supportsAllDrives", "true"),
                        ("includeItemsFromAllDrives", "true"),
                    ]);
                    if let Some(page) = &page_token {
                        request = request.query(&[("pageToken", page.as_str())]);
                    }
                    request
                })
                .await?;
            let page: FileList = serde_json::from_slice(&response.body)?;
            entries.extend(page.files);
            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }
        Ok(entries)
    }
}

#[async_trait]
impl RemoteStorage for DriveClient {
    async fn list_folder_contents(
        &self,
        folder_path: &[String],
    ) -> Result<Vec<RemoteEntry>, UploadError> {
        match self.find_folder(folder_path).await? {
            Some(folder_id) => self.list_files(&children_query(&folder_id)).await,
            None => Ok(Vec::new()),
        }
    }

    /// Walks the path one folder at a time; the first segment may live
    /// anywhere the service account can see, including shared folders.
    async fn find_folder(&self, folder_path: &[String]) -> Result<Option<String>, UploadError> {
        let mut parent: Option<String> = None;
        for segment in folder_path {
            let q = folder_query(segment, parent.as_deref());
            match self.list_files(&q).await?.into_iter().next() {
                Some(folder) => parent = Some(folder.id),
                None => {
                    debug!(folder = %folder_path.join("/"), missing = %segment, "remote folder does not resolve");
                    return Ok(None);
                }
            }
        }
        Ok(Some(parent.unwrap_or_else(|| ROOT_FOLDER_ID.to_string())))
    }

    async fn upload_file(
        &self,
        local_path: &Path,
        folder_id: &str,
        file_name: &str,
        mime_type: Option<&str>,
    ) -> Result<String, UploadError> {
        let content = tokio::fs::read(local_path)
            .await
            .map_err(|source| UploadError::LocalFile {
                path: local_path.to_path_buf(),
                source,
            })?;
        let metadata = serde_json::json!({
            "name": file_name,
            "parents": [folder_id],
        })
        .to_string();
        let boundary = format!("yte-{}", Uuid::new_v4().simple());
        let mime_type = mime_type.unwrap_or("application/octet-stream");
        let body = multipart_related_body(&boundary, &metadata, mime_type, &content);
        let content_type = format!("multipart/related; boundary={boundary}");

        let token = self.access_token().await?;
        let url = format!("{}/files", self.upload_base);
        let response = self
            .http
            .execute("drive.files.create", |client| {
                client
                    .post(&url)
                    .bearer_auth(&token)
                    .query(&[
                        ("uploadType", "multipart"),
                        ("fields", "id"),
                        ("supportsAllDrives", "true"),
                    ])
                    .header(reqwest::header::CONTENT_TYPE, content_type.as_str())
                    .body(body.clone())
            })
            .await?;
        let created: CreatedFile = serde_json::from_slice(&response.body)?;
        info!(file_name, file_id = %created.id, bytes = content.len(), "uploaded file to drive");
        Ok(created.id)
    }

    async fn delete_file(&self, file_id: &str) -> Result<(), UploadError> {
        let token = self.access_token().await?;
        let url = format!("{}/files/{file_id}", self.api_base);
        self.http
            .execute("drive.files.delete", |client| {
                client
                    .delete(&url)
                    .bearer_auth(&token)
                    .query(&[("supportsAllDrives", "true")])
            })
            .await?;
        info!(file_id, "deleted drive file");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_http::MockServer;
    use crate::{resolve_folder_id, upload_to_destination};
    use yte_storage::HttpClientConfig;

    const TOKEN_BODY: &str = r#"{"access_token":"tok-1","expires_in":3600,"token_type":"Bearer"}"#;

    fn client_for(server: &MockServer) -> DriveClient {
        let fixture = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../../fixtures/drive/service_account.json");
        let mut key = ServiceAccountKey::from_json(&std::fs::read_to_string(fixture).unwrap())
            .unwrap();
        key.token_uri = format!("{}/token", server.base_url);
        let http = HttpFetcher::new(HttpClientConfig::default()).unwrap();
        DriveClient::new(http, key).with_base_url(&server.base_url)
    }

    fn form_pairs(body: &str) -> std::collections::HashMap<String, String> {
        reqwest::Url::parse(&format!("http://form/?{body}"))
            .unwrap()
            .query_pairs()
            .into_owned()
            .collect()
    }

    #[test]
    fn query_literals_escape_quotes() {
        assert_eq!(escape_query_literal("Bob's data"), "Bob\\'s data");
        assert_eq!(
            folder_query("data", None),
            "mimeType = 'application/vnd.google-apps.folder' and name = 'data' and trashed = false"
        );
        assert_eq!(
            folder_query("youtube_trending_explorer", Some("abc")),
            "mimeType = 'application/vnd.google-apps.folder' and name = 'youtube_trending_explorer' and trashed = false and 'abc' in parents"
        );
        assert_eq!(children_query("abc"), "'abc' in parents and trashed = false");
    }

    #[test]
    fn multipart_body_has_metadata_then_media() {
        let body = multipart_related_body("b1", r#"{"name":"x.csv"}"#, "text/csv", b"a,b\n1,2\n");
        let text = String::from_utf8(body).unwrap();
        assert_eq!(
            text,
            "--b1\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{\"name\":\"x.csv\"}\r\n--b1\r\nContent-Type: text/csv\r\n\r\na,b\n1,2\n\r\n--b1--\r\n"
        );
    }

    #[test]
    fn file_list_tolerates_missing_files_key() {
        let list: FileList = serde_json::from_str(r#"{"kind":"drive#fileList"}"#).unwrap();
        assert!(list.files.is_empty());
        assert!(list.next_page_token.is_none());
    }

    #[tokio::test]
    async fn listing_walks_the_folder_path_one_segment_at_a_time() {
        let server = MockServer::json(vec![
            (200, TOKEN_BODY),
            (200, r#"{"files":[{"id":"f-data","name":"data"}]}"#),
            (200, r#"{"files":[{"id":"f-yte","name":"youtube_trending_explorer"}]}"#),
            (
                200,
                r#"{"files":[{"id":"a","name":"video_data_2020-05-01.csv"}],"nextPageToken":"p2"}"#,
            ),
            (200, r#"{"files":[{"id":"b","name":"video_data_2020-05-02.csv"}]}"#),
        ]);
        let drive = client_for(&server);

        let path = vec!["data".to_string(), "youtube_trending_explorer".to_string()];
        let entries = drive.list_folder_contents(&path).await.unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(
            names,
            ["video_data_2020-05-01.csv", "video_data_2020-05-02.csv"]
        );

        let requests = server.requests();
        assert_eq!(requests.len(), 5);

        let token = &requests[0];
        assert_eq!(token.method, "POST");
        assert_eq!(token.path, "/token");
        let form = form_pairs(&token.body_text());
        assert_eq!(form["grant_type"], JWT_BEARER_GRANT);
        let header = jsonwebtoken::decode_header(&form["assertion"]).unwrap();
        assert_eq!(header.alg, Algorithm::RS256);
        assert_eq!(header.kid.as_deref(), Some("test-key-1"));

        for request in &requests[1..] {
            assert_eq!(request.method, "GET");
            assert_eq!(request.path, "/drive/v3/files");
            assert_eq!(request.header("authorization"), Some("Bearer tok-1"));
            assert_eq!(request.query["supportsAllDrives"], "true");
            assert_eq!(request.query["includeItemsFromAllDrives"], "true");
        }
        assert_eq!(requests[1].query["q"], folder_query("data", None));
        assert_eq!(
            requests[2].query["q"],
            folder_query("youtube_trending_explorer", Some("f-data"))
        );
        assert_eq!(requests[3].query["q"], children_query("f-yte"));
        assert!(!requests[3].query.contains_key("pageToken"));
        assert_eq!(requests[4].query["q"], children_query("f-yte"));
        assert_eq!(requests[4].query["pageToken"], "p2");
    }

    #[tokio::test]
    async fn missing_segment_lists_nothing() {
        let server = MockServer::json(vec![(200, TOKEN_BODY), (200, r#"{"files":[]}"#)]);
        let drive = client_for(&server);

        let path = vec!["nope".to_string(), "deeper".to_string()];
        assert!(drive.list_folder_contents(&path).await.unwrap().is_empty());
        assert_eq!(server.requests().len(), 2);
    }

    #[tokio::test]
    async fn single_segment_upload_searches_anywhere_then_creates_file() {
        let server = MockServer::json(vec![
            (200, TOKEN_BODY),
            (200, r#"{"files":[{"id":"shared-data","name":"data"}]}"#),
            (200, r#"{"files":[{"id":"shared-data","name":"data"}]}"#),
            (200, r#"{"id":"new-file"}"#),
        ]);
        let drive = client_for(&server);

        let folder = resolve_folder_id(&drive, &["data".to_string()]).await.unwrap();
        assert_eq!(folder, "shared-data");

        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("video_data_2020-05-01.csv");
        std::fs::write(&local, "video_id,title\nXy7DqJd3Kc0,hello\n").unwrap();
        let id = upload_to_destination(
            &drive,
            &local,
            "data/video_data_2020-05-01.csv",
            Some("text/csv"),
        )
        .await
        .unwrap();
        assert_eq!(id, "new-file");

        let requests = server.requests();
        // token is fetched once and reused
        assert_eq!(requests.len(), 4);
        assert_eq!(requests[1].query["q"], folder_query("data", None));
        assert_eq!(requests[2].query["q"], folder_query("data", None));

        let create = &requests[3];
        assert_eq!(create.method, "POST");
        assert_eq!(create.path, "/upload/drive/v3/files");
        assert_eq!(create.query["uploadType"], "multipart");
        assert_eq!(create.query["fields"], "id");
        assert_eq!(create.header("authorization"), Some("Bearer tok-1"));
        let content_type = create.header("content-type").unwrap();
        assert!(content_type.starts_with("multipart/related; boundary=yte-"));

        let body = create.body_text();
        let metadata = body.find(r#""name":"video_data_2020-05-01.csv""#).unwrap();
        assert!(body.contains(r#""parents":["shared-data"]"#));
        let media = body.find("Content-Type: text/csv").unwrap();
        assert!(metadata < media);
        assert!(body.contains("Xy7DqJd3Kc0,hello"));
    }
}
