//! FileLu Storage Provider
//!
//! Path-based filesystem over the FileLu REST API (`/rclone` endpoint).
//! The remote only knows numeric folder ids and 12-char file codes; this
//! module maps virtual `a/b/c` paths onto them:
//!
//! - [`naming`]: `(id) name` segments published by listings
//! - [`resolver`]: path → folder id walks, root specification
//! - [`dedup`]: head/tail fingerprint duplicate detection
//! - [`transfer`]: upload, relocation and copy-then-delete moves
//! - [`listing`]: folder listings → [`RemoteEntry`] values
//!
//! All operations take `&self` and a [`CancellationToken`]; the provider
//! holds no cache, so concurrent operations only share the HTTP client.

pub mod api;
pub mod dedup;
pub mod listing;
pub mod naming;
pub mod resolver;
pub mod transfer;

#[cfg(test)]
pub(crate) mod testing;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::info;

use self::api::{cancellable, ByteReader, FileLuApi, HttpApiClient};
use self::dedup::{Fingerprinter, PartialMd5};
use self::listing::{entries_from_listing, single_file_view};
use self::naming::{decode, Segment};
use self::resolver::{normalize_path, parse_folder_ref, split_parent, split_path, PathResolver, RootSpec};
use self::transfer::UploadPipeline;
use super::types::{
    AmbiguityPolicy, FileCode, FileLuConfig, FolderId, MoveSummary, ProviderError, RemoteEntry,
    StorageInfo, UploadOutcome,
};
use super::StorageProvider;

pub(crate) fn filelu_log(msg: &str) {
    info!("[FILELU] {}", msg);
}

/// A file addressed by a virtual path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    pub file_code: FileCode,
    pub name: String,
}

pub struct FileLuProvider {
    config: FileLuConfig,
    root: RootSpec,
    api: Arc<dyn FileLuApi>,
    fingerprinter: Arc<dyn Fingerprinter>,
}

impl FileLuProvider {
    pub fn new(config: FileLuConfig) -> Result<Self, ProviderError> {
        let api = Arc::new(HttpApiClient::new(&config)?);
        Ok(Self::with_api(config, api))
    }

    /// Build on an existing client, e.g. one shared with other providers.
    pub fn with_api(config: FileLuConfig, api: Arc<dyn FileLuApi>) -> Self {
        let root = RootSpec::parse(&config.root);
        let fingerprinter = Arc::new(PartialMd5::new(config.fingerprint_window));
        Self { config, root, api, fingerprinter }
    }

    pub fn with_fingerprinter(mut self, fingerprinter: Arc<dyn Fingerprinter>) -> Self {
        self.fingerprinter = fingerprinter;
        self
    }

    pub fn config(&self) -> &FileLuConfig {
        &self.config
    }

    pub fn root(&self) -> &RootSpec {
        &self.root
    }

    fn resolver(&self) -> PathResolver<'_> {
        PathResolver::new(self.api.as_ref(), self.config.ambiguity_policy)
    }

    fn pipeline(&self) -> UploadPipeline<'_> {
        UploadPipeline::new(self.api.as_ref(), self.fingerprinter.as_ref(), self.config.duplicate_policy)
    }

    /// Folder id of the configured root.
    pub async fn base_folder(&self, cancel: &CancellationToken) -> Result<FolderId, ProviderError> {
        match &self.root {
            RootSpec::Folder { id: Some(id), .. } => Ok(*id),
            RootSpec::Folder { path, id: None } => self.resolver().resolve(path, cancel).await,
            RootSpec::File(code) => Err(ProviderError::NotSupported(format!(
                "root {} is a single file, not a folder",
                code
            ))),
        }
    }

    /// Folder id of `path` under the root. A bare number is taken as an id.
    pub async fn folder_id(&self, path: &str, cancel: &CancellationToken) -> Result<FolderId, ProviderError> {
        let base = self.base_folder(cancel).await?;
        self.resolver().resolve_ref(base, path, cancel).await
    }

    /// List the directory at `path`.
    pub async fn list(&self, path: &str, cancel: &CancellationToken) -> Result<Vec<RemoteEntry>, ProviderError> {
        let dir = normalize_path(path);
        if let RootSpec::File(code) = &self.root {
            if !dir.is_empty() {
                return Err(ProviderError::NotFound(format!("Directory not found: {}", dir)));
            }
            return single_file_view(self.api.as_ref(), code, cancel).await;
        }

        let folder = self.folder_id(&dir, cancel).await?;
        listing::list_folder(self.api.as_ref(), folder, &dir, cancel).await
    }

    /// Create the folder at `path` and return its id. The parent must exist.
    pub async fn mkdir(&self, path: &str, cancel: &CancellationToken) -> Result<FolderId, ProviderError> {
        let (parent, last) = split_parent(path);
        let name = decode(&last).name().to_string();
        if name.is_empty() {
            return Err(ProviderError::InvalidPath(format!("Cannot create {:?}", path)));
        }

        let parent_id = self.folder_id(&parent, cancel).await?;
        let id = self.api.create_folder(parent_id, &name, cancel).await?;
        filelu_log(&format!("Created folder {} (fld_id={}) in {}", name, id, parent_id));
        Ok(id)
    }

    /// Remove the empty folder at `path`.
    pub async fn rmdir(&self, path: &str, cancel: &CancellationToken) -> Result<(), ProviderError> {
        let dir = normalize_path(path);
        if dir.is_empty() {
            return Err(ProviderError::InvalidPath("Cannot remove the root folder".to_string()));
        }

        let id = self.folder_id(&dir, cancel).await?;
        let listing = self.api.list_folder(id, cancel).await?;
        if !listing.is_empty() {
            return Err(ProviderError::DirectoryNotEmpty(dir));
        }
        self.api.delete_folder(id, cancel).await?;
        filelu_log(&format!("Removed folder {} (fld_id={})", dir, id));
        Ok(())
    }

    /// Resolve `path` to a file.
    ///
    /// A `(code) name` last segment needs no remote call. A plain name is
    /// looked up among the parent's files by exact match.
    pub async fn resolve_object(&self, path: &str, cancel: &CancellationToken) -> Result<ObjectRef, ProviderError> {
        let (parent, last) = split_parent(path);

        if let RootSpec::File(code) = &self.root {
            if !parent.is_empty() {
                return Err(ProviderError::NotFound(format!("File not found: {}", path)));
            }
            let name = decode(&last).name().to_string();
            return Ok(ObjectRef { file_code: code.clone(), name });
        }

        if last.is_empty() {
            return Err(ProviderError::InvalidPath(format!("Not a file: {:?}", path)));
        }

        let segment = decode(&last);
        if let Segment::Tagged { name, id } = &segment {
            let file_code = segment.file_code().ok_or_else(|| ProviderError::InvalidFileCode(id.clone()))?;
            return Ok(ObjectRef { file_code, name: name.clone() });
        }

        let folder = self.folder_id(&parent, cancel).await?;
        let listing = self.api.list_folder(folder, cancel).await?;
        let mut matches = listing.files.into_iter().filter(|f| f.name == last);
        let file = matches.next().ok_or_else(|| ProviderError::NotFound(format!("File not found: {}", path)))?;
        if matches.next().is_some() && self.config.ambiguity_policy == AmbiguityPolicy::Error {
            return Err(ProviderError::AmbiguousPath(normalize_path(path)));
        }

        Ok(ObjectRef { file_code: FileCode::parse(&file.file_code)?, name: file.name })
    }

    /// Entry for `path`. Costs one listing of the parent.
    pub async fn stat(&self, path: &str, cancel: &CancellationToken) -> Result<RemoteEntry, ProviderError> {
        let norm = normalize_path(path);

        if let RootSpec::File(code) = &self.root {
            let entries = single_file_view(self.api.as_ref(), code, cancel).await?;
            return entries.into_iter()
                .find(|e| norm.is_empty() || decode(&norm).name() == e.name)
                .ok_or_else(|| ProviderError::NotFound(format!("File not found: {}", norm)));
        }

        if norm.is_empty() {
            let id = self.base_folder(cancel).await?;
            return Ok(RemoteEntry::directory(String::new(), String::new(), id));
        }

        let (parent, last) = split_parent(&norm);
        let segment = decode(&last);
        let parent_id = self.folder_id(&parent, cancel).await?;
        let listing = self.api.list_folder(parent_id, cancel).await?;

        entries_from_listing(listing, &parent)
            .into_iter()
            .find(|e| match &segment {
                Segment::Tagged { id, .. } => {
                    e.file_code.as_deref() == Some(id.as_str())
                        || (e.is_dir && segment.folder_id() == e.folder_id)
                }
                Segment::Plain(name) => &e.name == name,
            })
            .ok_or_else(|| ProviderError::NotFound(format!("Path not found: {}", norm)))
    }

    /// Upload the local file to `remote_path` (parent folder must exist).
    pub async fn put(&self, local_path: &Path, remote_path: &str, cancel: &CancellationToken) -> Result<UploadOutcome, ProviderError> {
        let (folder, name) = self.upload_target(remote_path, cancel).await?;
        self.pipeline().upload(local_path, &name, folder, cancel).await
    }

    /// Upload from a stream to `remote_path`.
    pub async fn put_stream<R>(&self, reader: &mut R, remote_path: &str, cancel: &CancellationToken) -> Result<UploadOutcome, ProviderError>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        let (folder, name) = self.upload_target(remote_path, cancel).await?;
        self.pipeline().upload_reader(reader, &name, folder, cancel).await
    }

    async fn upload_target(&self, remote_path: &str, cancel: &CancellationToken) -> Result<(FolderId, String), ProviderError> {
        let (parent, last) = split_parent(remote_path);
        let name = decode(&last).name().to_string();
        if name.is_empty() {
            return Err(ProviderError::InvalidPath(format!("No file name in {:?}", remote_path)));
        }
        let folder = self.folder_id(&parent, cancel).await?;
        Ok((folder, name))
    }

    /// Stream the content of the file at `path`.
    pub async fn open(&self, path: &str, cancel: &CancellationToken) -> Result<ByteReader, ProviderError> {
        let object = self.resolve_object(path, cancel).await?;
        let link = self.api.direct_link(&object.file_code, cancel).await?;
        self.api.open_url(&link.url, cancel).await
    }

    /// Download the file at `path` to `local_path`, returning the byte count.
    pub async fn download(&self, path: &str, local_path: &Path, cancel: &CancellationToken) -> Result<u64, ProviderError> {
        let mut reader = self.open(path, cancel).await?;
        let mut file = tokio::fs::File::create(local_path).await?;
        let written = cancellable(cancel, async {
            let n = tokio::io::copy(&mut reader, &mut file).await?;
            file.flush().await?;
            Ok::<u64, ProviderError>(n)
        })
        .await?;
        filelu_log(&format!("Downloaded {} ({} bytes)", path, written));
        Ok(written)
    }

    /// Direct download URL of the file at `path`.
    pub async fn link(&self, path: &str, cancel: &CancellationToken) -> Result<String, ProviderError> {
        let object = self.resolve_object(path, cancel).await?;
        Ok(self.api.direct_link(&object.file_code, cancel).await?.url)
    }

    /// Delete the file at `path`.
    pub async fn remove(&self, path: &str, cancel: &CancellationToken) -> Result<(), ProviderError> {
        let object = self.resolve_object(path, cancel).await?;
        self.api.delete_file(&object.file_code, cancel).await?;
        filelu_log(&format!("Removed {} ({})", object.name, object.file_code));
        Ok(())
    }

    /// Delete several files in order, stopping at the first failure.
    pub async fn delete_many(&self, paths: &[String], cancel: &CancellationToken) -> Result<usize, ProviderError> {
        for (done, path) in paths.iter().enumerate() {
            if let Err(e) = self.remove(path, cancel).await {
                tracing::warn!("[FILELU] delete stopped at {} after {} files: {}", path, done, e);
                return Err(e);
            }
        }
        Ok(paths.len())
    }

    /// Move a file or directory from `src` to `dst`.
    ///
    /// A file goes into `dst` when that is an existing folder, otherwise
    /// `dst` is its new path. A directory's contents go into `dst`, which
    /// is created when missing.
    pub async fn move_path(&self, src: &str, dst: &str, cancel: &CancellationToken) -> Result<MoveSummary, ProviderError> {
        if let RootSpec::File(_) = &self.root {
            return Err(ProviderError::NotSupported("move inside a single-file root".to_string()));
        }
        let src_norm = normalize_path(src);
        if src_norm.is_empty() {
            return Err(ProviderError::InvalidPath("Cannot move the root folder".to_string()));
        }
        let dst_norm = normalize_path(dst);

        let entry = self.stat(&src_norm, cancel).await?;
        let mut summary = MoveSummary::default();

        if let Some(src_id) = entry.folder_id.filter(|_| entry.is_dir) {
            let into_itself = || ProviderError::InvalidPath(format!("Cannot move {} into itself", src_norm));
            if dst_norm == src_norm || dst_norm.starts_with(&format!("{}/", src_norm)) {
                return Err(into_itself());
            }
            let dest = match parse_folder_ref(&dst_norm) {
                Some(id) => id,
                None => {
                    // Tagged segments can reach `src` under another spelling.
                    let base = self.base_folder(cancel).await?;
                    let chain = self.resolver().resolve_chain(base, &dst_norm, cancel).await?;
                    if chain.contains(&src_id) {
                        return Err(into_itself());
                    }
                    if chain.len() == split_path(&dst_norm).len() {
                        chain.last().copied().unwrap_or(base)
                    } else {
                        summary.folders_created += 1;
                        self.mkdir(&dst_norm, cancel).await?
                    }
                }
            };
            if dest == src_id {
                return Err(into_itself());
            }
            let moved = self
                .pipeline()
                .move_dir(src_id, &src_norm, dest, self.config.max_move_depth, cancel)
                .await?;
            summary.moved = moved.moved;
            summary.duplicates = moved.duplicates;
            summary.folders_created += moved.folders_created;
            return Ok(summary);
        }

        let code = entry.file_code.as_deref()
            .ok_or_else(|| ProviderError::NotFound(format!("File not found: {}", src_norm)))
            .and_then(FileCode::parse)?;

        let (dest, name) = match self.folder_id(&dst_norm, cancel).await {
            Ok(id) => (id, entry.name.clone()),
            Err(e) if e.is_not_found() || matches!(e, ProviderError::InvalidPath(_)) => {
                self.upload_target(&dst_norm, cancel).await?
            }
            Err(e) => return Err(e),
        };

        match self.pipeline().move_file(&code, &name, dest, cancel).await? {
            UploadOutcome::Uploaded { .. } => summary.moved = 1,
            UploadOutcome::Duplicate { .. } => summary.duplicates.push(src_norm),
        }
        Ok(summary)
    }

    /// Account usage in bytes.
    pub async fn about(&self, cancel: &CancellationToken) -> Result<StorageInfo, ProviderError> {
        let usage = self.api.account_info(cancel).await?;
        let total = parse_storage_to_bytes(&usage.storage)?;
        let used = parse_storage_to_bytes(&usage.storage_used)?;
        Ok(StorageInfo { used, total, free: total.saturating_sub(used) })
    }
}

/// Parse a human-readable size such as `"10 GB"` or `"512.5 MB"` into bytes.
/// Units are binary (1 KB = 1024 B); a bare number is bytes.
pub fn parse_storage_to_bytes(s: &str) -> Result<u64, ProviderError> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Ok(0);
    }

    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);
    let value: f64 = number
        .parse()
        .map_err(|_| ProviderError::ParseError(format!("Invalid storage size: {:?}", s)))?;

    let exponent = match unit.trim().to_ascii_uppercase().as_str() {
        "" | "B" | "BYTES" => 0,
        "KB" | "K" => 1,
        "MB" | "M" => 2,
        "GB" | "G" => 3,
        "TB" | "T" => 4,
        "PB" | "P" => 5,
        other => {
            return Err(ProviderError::ParseError(format!("Unknown storage unit: {:?}", other)));
        }
    };

    Ok((value * 1024f64.powi(exponent)).round() as u64)
}

#[async_trait]
impl StorageProvider for FileLuProvider {
    fn display_name(&self) -> String {
        match &self.root {
            RootSpec::Folder { path, .. } if !path.is_empty() => format!("FileLu:{}", path),
            RootSpec::Folder { id: Some(id), .. } => format!("FileLu:{}", id),
            RootSpec::Folder { .. } => "FileLu".to_string(),
            RootSpec::File(code) => format!("FileLu:{}", code),
        }
    }

    async fn list(&self, path: &str, cancel: &CancellationToken) -> Result<Vec<RemoteEntry>, ProviderError> {
        FileLuProvider::list(self, path, cancel).await
    }

    async fn stat(&self, path: &str, cancel: &CancellationToken) -> Result<RemoteEntry, ProviderError> {
        FileLuProvider::stat(self, path, cancel).await
    }

    async fn mkdir(&self, path: &str, cancel: &CancellationToken) -> Result<(), ProviderError> {
        FileLuProvider::mkdir(self, path, cancel).await.map(|_| ())
    }

    async fn rmdir(&self, path: &str, cancel: &CancellationToken) -> Result<(), ProviderError> {
        FileLuProvider::rmdir(self, path, cancel).await
    }

    async fn delete(&self, path: &str, cancel: &CancellationToken) -> Result<(), ProviderError> {
        self.remove(path, cancel).await
    }

    async fn upload(&self, local_path: &Path, remote_path: &str, cancel: &CancellationToken) -> Result<UploadOutcome, ProviderError> {
        self.put(local_path, remote_path, cancel).await
    }

    async fn download(&self, remote_path: &str, local_path: &Path, cancel: &CancellationToken) -> Result<u64, ProviderError> {
        FileLuProvider::download(self, remote_path, local_path, cancel).await
    }

    async fn rename(&self, from: &str, to: &str, cancel: &CancellationToken) -> Result<MoveSummary, ProviderError> {
        self.move_path(from, to, cancel).await
    }

    async fn storage_info(&self, cancel: &CancellationToken) -> Result<StorageInfo, ProviderError> {
        self.about(cancel).await
    }

    fn supports_share_links(&self) -> bool {
        true
    }

    async fn create_share_link(&self, path: &str, cancel: &CancellationToken) -> Result<String, ProviderError> {
        self.link(path, cancel).await
    }
}
