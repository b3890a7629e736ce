//! Upload and move pipeline
//!
//! An upload runs `session → multipart transfer → relocation`. The remote
//! always stores new files in the root, so a non-root destination needs a
//! separate `file/set_folder` call; if that call fails the file is left in
//! the root and the caller gets [`ProviderError::UploadedNotRelocated`].
//!
//! Moves are copy-then-delete: the source is only deleted once the upload
//! (and relocation) has been confirmed.

use std::collections::{HashSet, VecDeque};
use std::path::Path;

use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use super::api::{cancellable, FileLuApi};
use super::dedup::{DuplicateDetector, Fingerprinter};
use super::filelu_log;
use super::resolver::join_path;
use crate::providers::types::{
    DuplicatePolicy, FileCode, FolderId, MoveSummary, ProviderError, UploadOutcome, ROOT_FOLDER,
};

/// Copy `reader` into a fresh temp file. The file is removed when the
/// returned handle drops.
pub async fn spool<R>(reader: &mut R, cancel: &CancellationToken) -> Result<tempfile::NamedTempFile, ProviderError>
where
    R: AsyncRead + Unpin + Send + ?Sized,
{
    let tmp = tempfile::Builder::new().prefix("filelu-").tempfile()?;
    let mut file = tokio::fs::File::from_std(tmp.reopen()?);

    let written = cancellable(cancel, async {
        let n = tokio::io::copy(reader, &mut file).await?;
        file.flush().await?;
        Ok::<u64, ProviderError>(n)
    })
    .await?;

    tracing::debug!("[FILELU] spooled {} bytes to {}", written, tmp.path().display());
    Ok(tmp)
}

/// One pending folder of a directory move
struct MoveItem {
    src: FolderId,
    dest: FolderId,
    path: String,
    depth: usize,
    /// Index of the parent item in the visit order
    parent: Option<usize>,
}

pub struct UploadPipeline<'a> {
    api: &'a dyn FileLuApi,
    fingerprinter: &'a dyn Fingerprinter,
    duplicate_policy: DuplicatePolicy,
}

impl<'a> UploadPipeline<'a> {
    pub fn new(api: &'a dyn FileLuApi, fingerprinter: &'a dyn Fingerprinter, duplicate_policy: DuplicatePolicy) -> Self {
        Self { api, fingerprinter, duplicate_policy }
    }

    /// Upload a local file as `name` into `folder_id`.
    pub async fn upload(
        &self,
        local_path: &Path,
        name: &str,
        folder_id: FolderId,
        cancel: &CancellationToken,
    ) -> Result<UploadOutcome, ProviderError> {
        self.store(local_path, name, folder_id, None, cancel).await
    }

    /// Upload with the duplicate check ignoring `replaces`, the file a move
    /// is about to delete.
    async fn store(
        &self,
        local_path: &Path,
        name: &str,
        folder_id: FolderId,
        replaces: Option<&FileCode>,
        cancel: &CancellationToken,
    ) -> Result<UploadOutcome, ProviderError> {
        if name.is_empty() {
            return Err(ProviderError::InvalidPath("Empty file name".to_string()));
        }

        let detector = DuplicateDetector::new(self.api, self.fingerprinter);
        let fingerprint = detector.fingerprint(local_path).await?;
        let (key, duplicate) = detector.is_duplicate(&fingerprint, folder_id, replaces, cancel).await?;
        if duplicate {
            match self.duplicate_policy {
                DuplicatePolicy::Skip => {
                    filelu_log(&format!("Skipping {}: folder {} already holds key {}", name, folder_id, key));
                    return Ok(UploadOutcome::Duplicate { key: key.into_string() });
                }
                DuplicatePolicy::Upload => {
                    tracing::warn!("[FILELU] {} duplicates key {} in folder {}, uploading anyway", name, key, folder_id);
                }
            }
        }

        let session = self.api.upload_server(cancel).await?;
        tracing::debug!("[FILELU] upload session acquired for {}", name);

        let file_code = self.api.upload_file(&session, name, local_path, cancel).await?;
        tracing::debug!("[FILELU] uploaded {} as {}", name, file_code);

        if folder_id != ROOT_FOLDER {
            if let Err(e) = self.api.set_file_folder(&file_code, folder_id, cancel).await {
                tracing::warn!("[FILELU] {} left in root, relocation to {} failed: {}", file_code, folder_id, e);
                return Err(ProviderError::UploadedNotRelocated {
                    file_code,
                    folder_id,
                    reason: e.to_string(),
                });
            }
        }

        filelu_log(&format!("Uploaded {} -> {} (folder {})", name, file_code, folder_id));
        Ok(UploadOutcome::Uploaded { file_code, folder_id })
    }

    /// Upload from an arbitrary reader. The content is spooled to a temp
    /// file first since the fingerprint needs both ends.
    pub async fn upload_reader<R>(
        &self,
        reader: &mut R,
        name: &str,
        folder_id: FolderId,
        cancel: &CancellationToken,
    ) -> Result<UploadOutcome, ProviderError>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        let tmp = spool(reader, cancel).await?;
        self.upload(tmp.path(), name, folder_id, cancel).await
    }

    /// Move one file into `dest`: download, upload, then delete the source.
    pub async fn move_file(
        &self,
        file_code: &FileCode,
        name: &str,
        dest: FolderId,
        cancel: &CancellationToken,
    ) -> Result<UploadOutcome, ProviderError> {
        let link = self.api.direct_link(file_code, cancel).await?;
        let mut reader = self.api.open_url(&link.url, cancel).await?;
        let tmp = spool(&mut reader, cancel).await?;

        let outcome = self.store(tmp.path(), name, dest, Some(file_code), cancel).await?;
        let new_code = match &outcome {
            UploadOutcome::Duplicate { .. } => {
                tracing::info!("[FILELU] {} already present in folder {}, source kept", name, dest);
                return Ok(outcome);
            }
            UploadOutcome::Uploaded { file_code, .. } => file_code.clone(),
        };

        if let Err(e) = self.api.delete_file(file_code, cancel).await {
            tracing::warn!("[FILELU] copied {} to {} but could not delete source: {}", file_code, new_code, e);
            return Err(ProviderError::SourceNotDeleted {
                file_code: file_code.clone(),
                new_file_code: new_code,
                reason: e.to_string(),
            });
        }

        filelu_log(&format!("Moved {} ({}) -> {} in folder {}", name, file_code, new_code, dest));
        Ok(outcome)
    }

    /// Move the contents of folder `src` into `dest`. A subfolder merges
    /// into a same-named folder already in the destination, otherwise it is
    /// created. Source folders are removed bottom-up once everything
    /// below them has moved; `src` itself included.
    pub async fn move_dir(
        &self,
        src: FolderId,
        src_path: &str,
        dest: FolderId,
        max_depth: usize,
        cancel: &CancellationToken,
    ) -> Result<MoveSummary, ProviderError> {
        if src == ROOT_FOLDER {
            return Err(ProviderError::InvalidPath("Cannot move the root folder".to_string()));
        }
        if src == dest {
            return Err(ProviderError::InvalidPath(format!("Cannot move {} into itself", src_path)));
        }

        let mut summary = MoveSummary::default();
        let mut created: HashSet<FolderId> = HashSet::new();
        let mut visited: Vec<MoveItem> = Vec::new();
        let mut kept: HashSet<usize> = HashSet::new();
        let mut queue = VecDeque::from([MoveItem {
            src,
            dest,
            path: src_path.to_string(),
            depth: 0,
            parent: None,
        }]);

        while let Some(item) = queue.pop_front() {
            if item.depth > max_depth {
                return Err(ProviderError::InvalidPath(format!(
                    "Directory nesting deeper than {} levels: {}",
                    max_depth, item.path
                )));
            }
            let index = visited.len();
            let listing = self.api.list_folder(item.src, cancel).await?;
            let existing = if listing.folders.is_empty() {
                Vec::new()
            } else {
                self.api.list_folder(item.dest, cancel).await?.folders
            };

            for folder in listing.folders {
                if created.contains(&folder.fld_id) || folder.fld_id == dest {
                    mark_kept(&visited, &mut kept, index, item.parent);
                    continue;
                }
                let reuse = existing.iter().find(|f| f.name == folder.name && f.fld_id != src);
                let target = match reuse {
                    Some(found) => {
                        tracing::debug!("[FILELU] merging {} into existing folder {}", folder.name, found.fld_id);
                        found.fld_id
                    }
                    None => {
                        summary.folders_created += 1;
                        self.api.create_folder(item.dest, &folder.name, cancel).await?
                    }
                };
                created.insert(target);
                queue.push_back(MoveItem {
                    src: folder.fld_id,
                    dest: target,
                    path: join_path(&item.path, &folder.name),
                    depth: item.depth + 1,
                    parent: Some(index),
                });
            }

            for file in listing.files {
                let code = FileCode::parse(&file.file_code)?;
                let path = join_path(&item.path, &file.name);
                match self.move_file(&code, &file.name, item.dest, cancel).await? {
                    UploadOutcome::Uploaded { .. } => summary.moved += 1,
                    UploadOutcome::Duplicate { .. } => {
                        summary.duplicates.push(path);
                        mark_kept(&visited, &mut kept, index, item.parent);
                    }
                }
            }

            visited.push(item);
        }

        // Breadth-first order, so walking it backwards is bottom-up.
        for (index, item) in visited.iter().enumerate().rev() {
            if kept.contains(&index) {
                tracing::debug!("[FILELU] keeping {} (folder {}), not all children moved", item.path, item.src);
                continue;
            }
            self.api.delete_folder(item.src, cancel).await?;
        }

        filelu_log(&format!(
            "Moved directory {}: {} files, {} folders created, {} duplicates kept",
            src_path, summary.moved, summary.folders_created, summary.duplicates.len()
        ));
        Ok(summary)
    }
}

/// Flag the item at `index` and all its ancestors as still holding content.
/// The item itself may not be in `visited` yet, so its parent is passed in.
fn mark_kept(visited: &[MoveItem], kept: &mut HashSet<usize>, index: usize, parent: Option<usize>) {
    if !kept.insert(index) {
        return;
    }
    let mut parent = parent;
    while let Some(p) = parent {
        if !kept.insert(p) {
            break;
        }
        parent = visited.get(p).and_then(|it| it.parent);
    }
}
