//! FileLu REST client
//!
//! Every call is one GET (or one multipart POST for the upload itself)
//! authenticated with `key=` in the query string. Responses carry a numeric
//! `status`; anything other than 200 is an application error with `msg`.
//! The client holds no state besides the connection pool, so one instance
//! is shared by all in-flight operations.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::TryStreamExt;
use reqwest::multipart;
use secrecy::ExposeSecret;
use serde::Deserialize;
use tokio::io::AsyncRead;
use tokio_util::io::{ReaderStream, StreamReader};
use tokio_util::sync::CancellationToken;

use super::filelu_log;
use crate::providers::types::{FileCode, FileLuConfig, FolderId, ProviderError};

/// Byte stream of a downloaded file
pub type ByteReader = Pin<Box<dyn AsyncRead + Send>>;

/// Status value the API uses for success
const API_OK: u32 = 200;

// ─── Domain Types ────────────────────────────────────────────────────────

/// Subfolder as returned by a folder listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFolder {
    pub name: String,
    pub fld_id: FolderId,
    pub parent: Option<FolderId>,
}

/// File as returned by a folder listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub name: String,
    pub file_code: String,
    pub size: u64,
    /// Server-side dedup hash (fingerprint followed by folder id)
    pub hash: Option<String>,
    pub uploaded: Option<String>,
}

/// One folder listing, in remote order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FolderListing {
    pub folders: Vec<RemoteFolder>,
    pub files: Vec<RemoteFile>,
}

impl FolderListing {
    pub fn is_empty(&self) -> bool {
        self.folders.is_empty() && self.files.is_empty()
    }
}

/// Upload server URL plus its single-use session id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    pub url: String,
    pub sess_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectLink {
    pub url: String,
    pub size: u64,
}

/// Account usage as human-readable size strings (e.g. "10 GB")
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountUsage {
    pub storage: String,
    pub storage_used: String,
}

// ─── API Trait ───────────────────────────────────────────────────────────

/// Remote operations used by the provider
///
/// Each method is a single request/response. Every call aborts with
/// [`ProviderError::Cancelled`] as soon as `cancel` fires.
#[async_trait]
pub trait FileLuApi: Send + Sync {
    async fn list_folder(&self, fld_id: FolderId, cancel: &CancellationToken) -> Result<FolderListing, ProviderError>;

    async fn create_folder(&self, parent_id: FolderId, name: &str, cancel: &CancellationToken) -> Result<FolderId, ProviderError>;

    async fn delete_folder(&self, fld_id: FolderId, cancel: &CancellationToken) -> Result<(), ProviderError>;

    async fn upload_server(&self, cancel: &CancellationToken) -> Result<UploadSession, ProviderError>;

    /// Multipart upload of a local file into the account root
    async fn upload_file(
        &self,
        session: &UploadSession,
        file_name: &str,
        local_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<FileCode, ProviderError>;

    async fn set_file_folder(&self, file_code: &FileCode, fld_id: FolderId, cancel: &CancellationToken) -> Result<(), ProviderError>;

    async fn direct_link(&self, file_code: &FileCode, cancel: &CancellationToken) -> Result<DirectLink, ProviderError>;

    async fn delete_file(&self, file_code: &FileCode, cancel: &CancellationToken) -> Result<(), ProviderError>;

    async fn account_info(&self, cancel: &CancellationToken) -> Result<AccountUsage, ProviderError>;

    /// Stream the body behind a direct link
    async fn open_url(&self, url: &str, cancel: &CancellationToken) -> Result<ByteReader, ProviderError>;
}

/// Run `fut` unless `cancel` fires first.
pub(crate) async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, ProviderError>
where
    F: Future<Output = Result<T, ProviderError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ProviderError::Cancelled),
        res = fut => res,
    }
}

// ─── Wire Types ──────────────────────────────────────────────────────────

/// Generic API response wrapper used by FileLu for all endpoints
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    status: Option<u32>,
    msg: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct StatusOnlyResponse {
    status: Option<u32>,
    msg: Option<String>,
}

/// A folder entry returned by /folder/list
#[derive(Debug, Deserialize)]
struct FolderEntry {
    #[serde(deserialize_with = "deserialize_u64")]
    fld_id: u64,
    name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_opt_u64")]
    parent_fld_id: Option<u64>,
}

/// A file entry returned by /folder/list
/// FileLu API fields: name, size (int or string), uploaded (date string)
#[derive(Debug, Deserialize)]
struct FileEntry {
    file_code: Option<String>,
    name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_size")]
    size: u64,
    uploaded: Option<String>,
    hash: Option<String>,
}

/// Folder listing response (contains both files and subfolders)
#[derive(Debug, Deserialize)]
struct FolderListResult {
    #[serde(default)]
    files: Vec<FileEntry>,
    #[serde(default)]
    folders: Vec<FolderEntry>,
}

/// Top-level upload server response from /upload/server
/// NOTE: sess_id is at response root, result is a plain URL string.
#[derive(Debug, Deserialize)]
struct UploadServerResponse {
    status: Option<u32>,
    msg: Option<String>,
    sess_id: Option<String>,
    result: Option<String>,
}

/// Upload response entry returned by upload CGI endpoint
#[derive(Debug, Deserialize)]
struct UploadResultEntry {
    file_code: Option<String>,
    file_status: Option<String>,
}

/// Direct download link response from /file/direct_link
#[derive(Debug, Deserialize)]
struct DirectLinkResult {
    url: Option<String>,
    #[serde(default, deserialize_with = "deserialize_size")]
    size: u64,
}

/// Folder create response, `fld_id` arrives as string or number
#[derive(Debug, Deserialize)]
struct FolderCreateResult {
    #[serde(default, deserialize_with = "deserialize_opt_u64")]
    fld_id: Option<u64>,
}

/// Account information returned by /account/info
#[derive(Debug, Deserialize)]
struct AccountInfo {
    #[serde(default, deserialize_with = "deserialize_opt_string")]
    storage: Option<String>,
    #[serde(default, deserialize_with = "deserialize_opt_string")]
    storage_used: Option<String>,
}

/// Deserializer for `size` which FileLu sometimes returns as string, sometimes as integer.
fn deserialize_size<'de, D: serde::Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    use serde::de::Unexpected;
    let v = serde_json::Value::deserialize(d)?;
    match v {
        serde_json::Value::Number(n) => Ok(n.as_u64().unwrap_or(0)),
        serde_json::Value::String(s) if s.trim().is_empty() => Ok(0),
        serde_json::Value::String(s) => s.trim().parse::<u64>().map_err(|_| {
            serde::de::Error::invalid_value(Unexpected::Str(&s), &"a numeric string")
        }),
        _ => Ok(0),
    }
}

fn deserialize_u64<'de, D: serde::Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    deserialize_opt_u64(d)?.ok_or_else(|| serde::de::Error::custom("expected a numeric id"))
}

/// Deserializer for optional numeric fields that may arrive as number, string or null.
fn deserialize_opt_u64<'de, D: serde::Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
    let v = serde_json::Value::deserialize(d)?;
    match v {
        serde_json::Value::Number(n) => Ok(n.as_u64()),
        serde_json::Value::String(s) => Ok(s.trim().parse::<u64>().ok()),
        _ => Ok(None),
    }
}

/// Deserializer for size strings that sometimes arrive as bare numbers.
fn deserialize_opt_string<'de, D: serde::Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    let v = serde_json::Value::deserialize(d)?;
    match v {
        serde_json::Value::String(s) => Ok(Some(s)),
        serde_json::Value::Number(n) => Ok(Some(n.to_string())),
        _ => Ok(None),
    }
}

fn check_status(status: Option<u32>, msg: Option<String>) -> Result<(), ProviderError> {
    match status {
        Some(API_OK) => Ok(()),
        Some(s) => Err(ProviderError::Api {
            status: s,
            message: msg.unwrap_or_else(|| format!("API error {}", s)),
        }),
        None => Err(ProviderError::ParseError("API response missing 'status' field".to_string())),
    }
}

fn body_excerpt(text: &str) -> &str {
    let mut end = text.len().min(200);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

// ─── HTTP Client ─────────────────────────────────────────────────────────

/// reqwest-backed [`FileLuApi`]
pub struct HttpApiClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: secrecy::SecretString,
}

impl HttpApiClient {
    pub fn new(config: &FileLuConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| ProviderError::InvalidConfig(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn api_url_with(&self, endpoint: &str, params: &[(&str, &str)]) -> String {
        let mut url = format!("{}/{}?", self.endpoint, endpoint);
        for (k, v) in params {
            url.push_str(k);
            url.push('=');
            url.push_str(&urlencoding::encode(v));
            url.push('&');
        }
        url.push_str("key=");
        url.push_str(&urlencoding::encode(self.api_key.expose_secret()));
        url
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
        cancel: &CancellationToken,
    ) -> Result<T, ProviderError> {
        tracing::debug!("[FILELU] GET {} {:?}", endpoint, params);
        let url = self.api_url_with(endpoint, params);
        cancellable(cancel, async {
            let resp = self.client.get(&url).send().await.map_err(|e| {
                ProviderError::NetworkError(format!("GET {} failed: {}", endpoint, e.without_url()))
            })?;
            let status = resp.status();
            let text = resp.text().await.map_err(|e| {
                ProviderError::NetworkError(format!("Failed to read response: {}", e.without_url()))
            })?;
            if !status.is_success() {
                return Err(ProviderError::ServerError(format!("HTTP {}: {}", status, body_excerpt(&text))));
            }
            serde_json::from_str(&text).map_err(|e| {
                ProviderError::ParseError(format!("JSON parse error: {}. Body: {}", e, body_excerpt(&text)))
            })
        })
        .await
    }

    async fn parse_api<T: for<'de> Deserialize<'de>>(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
        cancel: &CancellationToken,
    ) -> Result<T, ProviderError> {
        let api_resp: ApiResponse<T> = self.get_json(endpoint, params, cancel).await?;
        check_status(api_resp.status, api_resp.msg)?;
        api_resp.result.ok_or_else(|| {
            ProviderError::ParseError("API response missing 'result' field".to_string())
        })
    }

    async fn ensure_api_ok(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
        cancel: &CancellationToken,
    ) -> Result<(), ProviderError> {
        let parsed: StatusOnlyResponse = self.get_json(endpoint, params, cancel).await?;
        check_status(parsed.status, parsed.msg)
    }
}

#[async_trait]
impl FileLuApi for HttpApiClient {
    async fn list_folder(&self, fld_id: FolderId, cancel: &CancellationToken) -> Result<FolderListing, ProviderError> {
        let fld_id_str = fld_id.to_string();
        let result: FolderListResult = self
            .parse_api("folder/list", &[("fld_id", &fld_id_str)], cancel)
            .await?;

        let folders = result.folders.into_iter()
            .map(|f| RemoteFolder {
                name: f.name.unwrap_or_default(),
                fld_id: f.fld_id,
                parent: f.parent_fld_id,
            })
            .collect();
        let files = result.files.into_iter()
            .map(|f| RemoteFile {
                name: f.name.unwrap_or_default(),
                file_code: f.file_code.unwrap_or_default(),
                size: f.size,
                hash: f.hash.filter(|h| !h.is_empty()),
                uploaded: f.uploaded,
            })
            .collect();
        Ok(FolderListing { folders, files })
    }

    async fn create_folder(&self, parent_id: FolderId, name: &str, cancel: &CancellationToken) -> Result<FolderId, ProviderError> {
        let parent = parent_id.to_string();
        let result: FolderCreateResult = self
            .parse_api("folder/create", &[("parent_id", &parent), ("name", name)], cancel)
            .await?;
        result.fld_id.ok_or_else(|| {
            ProviderError::ParseError("folder/create: no fld_id returned".to_string())
        })
    }

    async fn delete_folder(&self, fld_id: FolderId, cancel: &CancellationToken) -> Result<(), ProviderError> {
        let fld_id_str = fld_id.to_string();
        self.ensure_api_ok("folder/delete", &[("fld_id", &fld_id_str)], cancel).await
    }

    async fn upload_server(&self, cancel: &CancellationToken) -> Result<UploadSession, ProviderError> {
        let server_info: UploadServerResponse = self.get_json("upload/server", &[], cancel).await?;
        check_status(server_info.status, server_info.msg)?;
        let sess_id = server_info.sess_id.filter(|s| !s.is_empty()).ok_or_else(|| {
            ProviderError::ParseError("Upload server returned no session ID".to_string())
        })?;
        let url = server_info.result.filter(|s| !s.is_empty()).ok_or_else(|| {
            ProviderError::ParseError("Upload server returned no URL".to_string())
        })?;
        Ok(UploadSession { url, sess_id })
    }

    async fn upload_file(
        &self,
        session: &UploadSession,
        file_name: &str,
        local_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<FileCode, ProviderError> {
        let file = tokio::fs::File::open(local_path).await?;
        let total_size = file.metadata().await?.len();

        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let part = multipart::Part::stream_with_length(body, total_size)
            .file_name(file_name.to_string())
            .mime_str("application/octet-stream")
            .map_err(|e| ProviderError::ParseError(format!("Multipart error: {}", e)))?;

        let form = multipart::Form::new()
            .text("sess_id", session.sess_id.clone())
            .text("upload_type", "rclone")
            .text("utype", "prem")
            .part("file_0", part);

        let upload_body = cancellable(cancel, async {
            let resp = self.client.post(&session.url)
                .multipart(form)
                .send()
                .await
                .map_err(|e| ProviderError::NetworkError(format!("Upload failed: {}", e)))?;
            let status = resp.status();
            let text = resp.text().await.map_err(|e| {
                ProviderError::NetworkError(format!("Failed to read upload response: {}", e))
            })?;
            if !status.is_success() {
                return Err(ProviderError::ServerError(format!("Upload HTTP {}: {}", status, body_excerpt(&text))));
            }
            Ok(text)
        })
        .await?;

        let upload_results: Vec<UploadResultEntry> = serde_json::from_str(&upload_body).map_err(|e| {
            ProviderError::ParseError(format!("Upload result JSON error: {}. Body: {}", e, body_excerpt(&upload_body)))
        })?;
        let entry = upload_results.into_iter().next().ok_or_else(|| ProviderError::UploadRejected {
            status: "empty response".to_string(),
        })?;
        let file_status = entry.file_status.unwrap_or_default();
        if !file_status.eq_ignore_ascii_case("OK") {
            return Err(ProviderError::UploadRejected { status: file_status });
        }
        let code = entry.file_code.unwrap_or_default();
        FileCode::parse(&code)
    }

    async fn set_file_folder(&self, file_code: &FileCode, fld_id: FolderId, cancel: &CancellationToken) -> Result<(), ProviderError> {
        let fld_id_str = fld_id.to_string();
        self.ensure_api_ok(
            "file/set_folder",
            &[("file_code", file_code.as_str()), ("fld_id", &fld_id_str)],
            cancel,
        )
        .await
    }

    async fn direct_link(&self, file_code: &FileCode, cancel: &CancellationToken) -> Result<DirectLink, ProviderError> {
        let result: DirectLinkResult = self
            .parse_api("file/direct_link", &[("file_code", file_code.as_str())], cancel)
            .await?;
        let url = result.url.filter(|u| !u.is_empty()).ok_or_else(|| {
            ProviderError::ParseError("No download URL returned".to_string())
        })?;
        Ok(DirectLink { url, size: result.size })
    }

    async fn delete_file(&self, file_code: &FileCode, cancel: &CancellationToken) -> Result<(), ProviderError> {
        self.ensure_api_ok(
            "file/remove",
            &[("file_code", file_code.as_str()), ("remove", "1")],
            cancel,
        )
        .await?;
        filelu_log(&format!("Deleted file {}", file_code));
        Ok(())
    }

    async fn account_info(&self, cancel: &CancellationToken) -> Result<AccountUsage, ProviderError> {
        let info: AccountInfo = self.parse_api("account/info", &[], cancel).await?;
        Ok(AccountUsage {
            storage: info.storage.unwrap_or_default(),
            storage_used: info.storage_used.unwrap_or_default(),
        })
    }

    async fn open_url(&self, url: &str, cancel: &CancellationToken) -> Result<ByteReader, ProviderError> {
        let resp = cancellable(cancel, async {
            self.client.get(url).send().await.map_err(|e| {
                ProviderError::NetworkError(format!("Download failed: {}", e))
            })
        })
        .await?;
        if !resp.status().is_success() {
            return Err(ProviderError::ServerError(format!("Download HTTP {}", resp.status())));
        }
        let stream = resp.bytes_stream().map_err(std::io::Error::other);
        Ok(Box::pin(StreamReader::new(stream)))
    }
}
