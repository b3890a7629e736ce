//! Shared types for the FileLu provider
//!
//! This module contains the configuration structs, the unified entry
//! representation, transfer outcomes and the error type used by every
//! layer of the provider.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Default API endpoint for keys generated under "My Account → Rclone key"
pub const DEFAULT_ENDPOINT: &str = "https://filelu.com/rclone";
/// Bytes read from each end of a file when fingerprinting
pub const DEFAULT_FINGERPRINT_WINDOW: usize = 1024;
/// Nesting limit for recursive directory moves
pub const DEFAULT_MAX_MOVE_DEPTH: usize = 64;
/// The remote root folder
pub const ROOT_FOLDER: FolderId = 0;

/// Remote-assigned folder identifier, `0` is the account root.
pub type FolderId = u64;

/// Length of a FileLu file code
pub const FILE_CODE_LEN: usize = 12;

/// Check whether `s` has the shape of a file code: 12 chars of `[a-z0-9]`.
///
/// This shape is the only thing that tells a file reference apart from a
/// folder or path segment.
pub fn is_file_code(s: &str) -> bool {
    s.len() == FILE_CODE_LEN
        && s.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
}

/// Check whether `s` is a bare decimal folder id.
pub fn is_numeric(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) && s.parse::<FolderId>().is_ok()
}

/// Validated 12-character file code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FileCode(String);

impl FileCode {
    pub fn parse(s: &str) -> Result<Self, ProviderError> {
        let trimmed = s.trim();
        if is_file_code(trimmed) {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(ProviderError::InvalidFileCode(s.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for FileCode {
    type Error = ProviderError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<FileCode> for String {
    fn from(code: FileCode) -> Self {
        code.0
    }
}

/// What an upload does when the destination already holds a file with the
/// same dedup key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Skip the transfer and report [`UploadOutcome::Duplicate`]
    #[default]
    Skip,
    /// Log the duplicate and upload anyway
    Upload,
}

/// How a plain path segment matching several folders is handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AmbiguityPolicy {
    /// Take the first match in remote order
    #[default]
    First,
    /// Fail with [`ProviderError::AmbiguousPath`]
    Error,
}

/// Generic remote configuration
///
/// This is what the remotes file stores. Provider-specific tuning lives in
/// the `extra` map and is interpreted by [`FileLuConfig::from_provider_config`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Display name for this remote
    pub name: String,
    /// API endpoint (uses the public endpoint if None)
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Access key
    #[serde(default)]
    pub api_key: Option<String>,
    /// Root inside the account: a path, a folder id, `name:id` or a file code
    #[serde(default)]
    pub root: Option<String>,
    /// Extra provider-specific options
    #[serde(default)]
    pub extra: HashMap<String, String>,
}

/// FileLu configuration
#[derive(Debug, Clone)]
pub struct FileLuConfig {
    pub api_key: secrecy::SecretString,
    pub endpoint: String,
    pub root: String,
    pub duplicate_policy: DuplicatePolicy,
    pub ambiguity_policy: AmbiguityPolicy,
    /// Head/tail window for the partial fingerprint
    pub fingerprint_window: usize,
    pub max_move_depth: usize,
    pub connect_timeout_secs: u64,
}

impl FileLuConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: secrecy::SecretString::from(api_key.into()),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            root: String::new(),
            duplicate_policy: DuplicatePolicy::default(),
            ambiguity_policy: AmbiguityPolicy::default(),
            fingerprint_window: DEFAULT_FINGERPRINT_WINDOW,
            max_move_depth: DEFAULT_MAX_MOVE_DEPTH,
            connect_timeout_secs: 30,
        }
    }

    pub fn from_provider_config(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let api_key = config.api_key.clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ProviderError::InvalidConfig("FileLu key is required".to_string()))?;

        let mut out = Self::new(api_key);
        if let Some(endpoint) = config.endpoint.as_deref().filter(|e| !e.is_empty()) {
            out.endpoint = endpoint.trim_end_matches('/').to_string();
        }
        if let Some(root) = &config.root {
            out.root = root.clone();
        }

        if let Some(v) = config.extra.get("duplicate_policy") {
            out.duplicate_policy = match v.as_str() {
                "skip" => DuplicatePolicy::Skip,
                "upload" => DuplicatePolicy::Upload,
                other => {
                    return Err(ProviderError::InvalidConfig(format!(
                        "Unknown duplicate_policy: {}", other
                    )))
                }
            };
        }
        if let Some(v) = config.extra.get("ambiguity_policy") {
            out.ambiguity_policy = match v.as_str() {
                "first" => AmbiguityPolicy::First,
                "error" => AmbiguityPolicy::Error,
                other => {
                    return Err(ProviderError::InvalidConfig(format!(
                        "Unknown ambiguity_policy: {}", other
                    )))
                }
            };
        }
        if let Some(v) = config.extra.get("fingerprint_window") {
            out.fingerprint_window = v.parse().ok().filter(|w: &usize| *w > 0).ok_or_else(|| {
                ProviderError::InvalidConfig(format!("Invalid fingerprint_window: {}", v))
            })?;
        }
        out.max_move_depth = config.extra.get("max_move_depth")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_MOVE_DEPTH);
        out.connect_timeout_secs = config.extra.get("connect_timeout")
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);

        Ok(out)
    }
}

/// Remote file/directory entry
///
/// `path` is the full virtual path built from encoded `(id) name` segments,
/// `name` is the plain human name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
    /// File size in bytes (0 for directories)
    pub size: u64,
    /// Upload time as reported by the remote
    pub modified: Option<String>,
    pub mime_type: Option<String>,
    /// Set for directories
    pub folder_id: Option<FolderId>,
    /// Set for files
    pub file_code: Option<String>,
    /// Remote dedup hash, when listed
    pub hash: Option<String>,
}

impl RemoteEntry {
    pub fn directory(name: String, path: String, folder_id: FolderId) -> Self {
        Self {
            name,
            path,
            is_dir: true,
            size: 0,
            modified: None,
            mime_type: None,
            folder_id: Some(folder_id),
            file_code: None,
            hash: None,
        }
    }

    pub fn file(name: String, path: String, size: u64, file_code: String) -> Self {
        let mime_type = mime_guess::from_path(&name).first().map(|m| m.essence_str().to_string());
        Self {
            name,
            path,
            is_dir: false,
            size,
            modified: None,
            mime_type,
            folder_id: None,
            file_code: Some(file_code),
            hash: None,
        }
    }
}

/// Result of a single upload or single-file move
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Stored under `file_code` in `folder_id`
    Uploaded { file_code: FileCode, folder_id: FolderId },
    /// Skipped: the destination already lists this dedup key
    Duplicate { key: String },
}

impl UploadOutcome {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, UploadOutcome::Duplicate { .. })
    }
}

/// Summary of a move, file or directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MoveSummary {
    /// Files moved
    pub moved: usize,
    /// Source paths kept because the destination already had them
    pub duplicates: Vec<String>,
    /// Folders created at the destination
    pub folders_created: usize,
}

/// Provider error type
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("API error {status}: {message}")]
    Api { status: u32, message: String },

    #[error("Path not found: {0}")]
    NotFound(String),

    #[error("Ambiguous path: {0}")]
    AmbiguousPath(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid file code: {0:?}")]
    InvalidFileCode(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Directory not empty: {0}")]
    DirectoryNotEmpty(String),

    #[error("Upload rejected by server: {status}")]
    UploadRejected { status: String },

    #[error("Uploaded as {file_code} but not moved to folder {folder_id}: {reason}")]
    UploadedNotRelocated {
        file_code: FileCode,
        folder_id: FolderId,
        reason: String,
    },

    #[error("Copied to {new_file_code} but source {file_code} was not deleted: {reason}")]
    SourceNotDeleted {
        file_code: FileCode,
        new_file_code: FileCode,
        reason: String,
    },

    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ProviderError {
    /// Remote state already changed even though the operation failed
    pub fn is_partial_failure(&self) -> bool {
        matches!(
            self,
            ProviderError::UploadedNotRelocated { .. } | ProviderError::SourceNotDeleted { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::NotFound(_))
    }
}

/// Storage quota information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageInfo {
    /// Bytes used
    pub used: u64,
    /// Total bytes available
    pub total: u64,
    /// Bytes free
    pub free: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_code_shape() {
        assert!(is_file_code("abc123def456"));
        assert!(is_file_code("000000000000"));
        assert!(!is_file_code("abc123def45"));
        assert!(!is_file_code("ABC123DEF456"));
        assert!(!is_file_code("abc123-ef456"));
        assert!(FileCode::parse(" abc123def456 ").is_ok());
        assert!(matches!(
            FileCode::parse("nope"),
            Err(ProviderError::InvalidFileCode(_))
        ));
    }

    #[test]
    fn test_is_numeric() {
        assert!(is_numeric("0"));
        assert!(is_numeric("42"));
        assert!(!is_numeric(""));
        assert!(!is_numeric("-1"));
        assert!(!is_numeric("4a"));
        assert!(!is_numeric("99999999999999999999999"));
    }

    #[test]
    fn test_config_requires_key() {
        let cfg = ProviderConfig {
            name: "lu".into(),
            endpoint: None,
            api_key: Some("  ".into()),
            root: None,
            extra: HashMap::new(),
        };
        assert!(matches!(
            FileLuConfig::from_provider_config(&cfg),
            Err(ProviderError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_config_extra_options() {
        let mut extra = HashMap::new();
        extra.insert("duplicate_policy".to_string(), "upload".to_string());
        extra.insert("ambiguity_policy".to_string(), "error".to_string());
        extra.insert("fingerprint_window".to_string(), "16".to_string());
        let cfg = ProviderConfig {
            name: "lu".into(),
            endpoint: Some("http://localhost:9000/api/".into()),
            api_key: Some("k".into()),
            root: Some("(5) docs".into()),
            extra,
        };
        let lu = FileLuConfig::from_provider_config(&cfg).unwrap();
        assert_eq!(lu.duplicate_policy, DuplicatePolicy::Upload);
        assert_eq!(lu.ambiguity_policy, AmbiguityPolicy::Error);
        assert_eq!(lu.fingerprint_window, 16);
        assert_eq!(lu.endpoint, "http://localhost:9000/api");
        assert_eq!(lu.root, "(5) docs");
        assert_eq!(lu.max_move_depth, DEFAULT_MAX_MOVE_DEPTH);
    }

    #[test]
    fn test_config_rejects_unknown_policy() {
        let mut extra = HashMap::new();
        extra.insert("duplicate_policy".to_string(), "maybe".to_string());
        let cfg = ProviderConfig {
            name: "lu".into(),
            endpoint: None,
            api_key: Some("k".into()),
            root: None,
            extra,
        };
        assert!(FileLuConfig::from_provider_config(&cfg).is_err());
    }

    #[test]
    fn test_remote_entry_mime() {
        let file = RemoteEntry::file("a.pdf".into(), "(abc123def456) a.pdf".into(), 3, "abc123def456".into());
        assert_eq!(file.mime_type.as_deref(), Some("application/pdf"));
        let dir = RemoteEntry::directory("Pics".into(), "(3) Pics".into(), 3);
        assert!(dir.is_dir);
        assert_eq!(dir.mime_type, None);
    }
}
