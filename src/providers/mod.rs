//! Storage Providers Module
//!
//! The `StorageProvider` trait is the seam a host application calls
//! through; [`filelu::FileLuProvider`] implements it on top of the FileLu
//! API.
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │           StorageProvider Trait             │
//! │  list, stat, upload, download, rename, …    │
//! └─────────────────────────────────────────────┘
//!                      │
//!                      ▼
//!   ┌──────────────────────────────────────┐
//!   │ FileLuProvider                       │
//!   │  resolver · dedup · transfer · list  │
//!   └──────────────────────────────────────┘
//!                      │
//!                      ▼
//!          FileLuApi (HttpApiClient)
//! ```

pub mod types;
pub mod filelu;

pub use types::*;
pub use filelu::FileLuProvider;

use std::path::Path;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Unified storage provider trait
///
/// Every operation is a self-contained chain of remote calls: providers
/// keep no per-session state, so one instance can serve concurrent callers.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Get display name for this provider instance
    fn display_name(&self) -> String;

    /// List files and directories in the given path
    async fn list(&self, path: &str, cancel: &CancellationToken) -> Result<Vec<RemoteEntry>, ProviderError>;

    /// Get file/directory info
    async fn stat(&self, path: &str, cancel: &CancellationToken) -> Result<RemoteEntry, ProviderError>;

    /// Check if path exists
    async fn exists(&self, path: &str, cancel: &CancellationToken) -> Result<bool, ProviderError> {
        match self.stat(path, cancel).await {
            Ok(_) => Ok(true),
            Err(ProviderError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Create a directory
    async fn mkdir(&self, path: &str, cancel: &CancellationToken) -> Result<(), ProviderError>;

    /// Delete an empty directory
    async fn rmdir(&self, path: &str, cancel: &CancellationToken) -> Result<(), ProviderError>;

    /// Delete a file
    async fn delete(&self, path: &str, cancel: &CancellationToken) -> Result<(), ProviderError>;

    /// Upload a file from local path
    async fn upload(&self, local_path: &Path, remote_path: &str, cancel: &CancellationToken) -> Result<UploadOutcome, ProviderError>;

    /// Download a file to local path, returning bytes written
    async fn download(&self, remote_path: &str, local_path: &Path, cancel: &CancellationToken) -> Result<u64, ProviderError>;

    /// Rename/move a file or directory
    async fn rename(&self, from: &str, to: &str, cancel: &CancellationToken) -> Result<MoveSummary, ProviderError>;

    /// Get storage quota information
    async fn storage_info(&self, _cancel: &CancellationToken) -> Result<StorageInfo, ProviderError> {
        Err(ProviderError::NotSupported("storage_info".to_string()))
    }

    /// Check if provider supports share links
    fn supports_share_links(&self) -> bool {
        false
    }

    /// Generate a share link for a file
    async fn create_share_link(&self, _path: &str, _cancel: &CancellationToken) -> Result<String, ProviderError> {
        Err(ProviderError::NotSupported("share_link".to_string()))
    }
}

/// Provider factory for creating provider instances
pub struct ProviderFactory;

impl ProviderFactory {
    /// Create a new provider instance based on configuration
    pub fn create(config: &ProviderConfig) -> Result<Box<dyn StorageProvider>, ProviderError> {
        let filelu_config = FileLuConfig::from_provider_config(config)?;
        Ok(Box::new(FileLuProvider::new(filelu_config)?))
    }
}
