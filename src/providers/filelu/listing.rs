//! Folder listing → virtual directory entries

use tokio_util::sync::CancellationToken;

use super::api::{FileLuApi, FolderListing};
use super::naming::{encode, EmbeddedId};
use super::resolver::join_path;
use crate::providers::types::{FileCode, FolderId, ProviderError, RemoteEntry};

/// Turn one listing into entries under `dir`: folders first, then files,
/// each group in the order the remote returned it.
pub fn entries_from_listing(listing: FolderListing, dir: &str) -> Vec<RemoteEntry> {
    let mut entries = Vec::with_capacity(listing.folders.len() + listing.files.len());

    for folder in listing.folders {
        let segment = encode(&folder.name, &EmbeddedId::Folder(folder.fld_id));
        entries.push(RemoteEntry::directory(folder.name, join_path(dir, &segment), folder.fld_id));
    }

    for file in listing.files {
        // Codes the remote sends in an unexpected shape are still shown;
        // operations on them fail later at validation.
        let segment = format!("({}) {}", file.file_code, file.name);
        let mut entry = RemoteEntry::file(file.name, join_path(dir, &segment), file.size, file.file_code);
        entry.modified = file.uploaded;
        entry.hash = file.hash;
        entries.push(entry);
    }

    entries
}

/// List `folder_id`, publishing entries under the virtual directory `dir`.
pub async fn list_folder(
    api: &dyn FileLuApi,
    folder_id: FolderId,
    dir: &str,
    cancel: &CancellationToken,
) -> Result<Vec<RemoteEntry>, ProviderError> {
    tracing::debug!("[FILELU] listing fld_id={} (directory={:?})", folder_id, dir);
    let listing = api.list_folder(folder_id, cancel).await?;
    let entries = entries_from_listing(listing, dir);
    tracing::debug!("[FILELU] {} entries in folder {}", entries.len(), folder_id);
    Ok(entries)
}

/// Single-file view used when the root itself is a file code: one entry,
/// named after the direct link's last path component.
pub async fn single_file_view(
    api: &dyn FileLuApi,
    file_code: &FileCode,
    cancel: &CancellationToken,
) -> Result<Vec<RemoteEntry>, ProviderError> {
    let link = api.direct_link(file_code, cancel).await?;
    let name = file_name_from_url(&link.url).unwrap_or_else(|| file_code.to_string());
    let path = encode(&name, &EmbeddedId::File(file_code.clone()));
    Ok(vec![RemoteEntry::file(name, path, link.size, file_code.to_string())])
}

/// Last non-empty path component of a URL, percent-decoded
pub fn file_name_from_url(url_str: &str) -> Option<String> {
    let url = url::Url::parse(url_str).ok()?;
    let last = url.path_segments()?.filter(|s| !s.is_empty()).next_back()?;
    let decoded = urlencoding::decode(last).ok()?;
    Some(decoded.into_owned())
}
