//! Partial-content duplicate detection
//!
//! The fingerprint only looks at the first and last `window` bytes, so its
//! cost does not grow with the file. Two files that share head, tail and
//! padding but differ in the middle get the same fingerprint; that false
//! positive is accepted, this is not a content hash.

use std::collections::HashSet;
use std::fmt;
use std::io::SeekFrom;
use std::path::Path;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use md5::{Digest, Md5};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt};
use tokio_util::sync::CancellationToken;

use super::api::FileLuApi;
use crate::providers::types::{FileCode, FolderId, ProviderError, DEFAULT_FINGERPRINT_WINDOW};

/// Short textual digest of a file's head and tail
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentFingerprint(String);

impl ContentFingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fingerprint bound to a destination folder, compared against the
/// `hash` field of that folder's listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey(String);

impl DedupKey {
    pub fn new(fingerprint: &ContentFingerprint, folder_id: FolderId) -> Self {
        Self(format!("{}{}", fingerprint, folder_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Strategy for fingerprinting local content
#[async_trait]
pub trait Fingerprinter: Send + Sync {
    async fn fingerprint_file(&self, path: &Path) -> Result<ContentFingerprint, ProviderError>;

    fn fingerprint_bytes(&self, data: &[u8]) -> ContentFingerprint;
}

/// MD5 over `head || tail`, base64 without padding (22 chars)
///
/// Both windows are zero-padded to `window` bytes. When the file is no
/// longer than the window the head doubles as the tail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartialMd5 {
    window: usize,
}

impl PartialMd5 {
    pub fn new(window: usize) -> Self {
        Self { window: window.max(1) }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    fn digest(head: &[u8], tail: &[u8]) -> ContentFingerprint {
        let mut hasher = Md5::new();
        hasher.update(head);
        hasher.update(tail);
        ContentFingerprint(STANDARD_NO_PAD.encode(hasher.finalize()))
    }
}

impl Default for PartialMd5 {
    fn default() -> Self {
        Self::new(DEFAULT_FINGERPRINT_WINDOW)
    }
}

/// Fill `buf` from `reader` until it is full or EOF is hit.
async fn read_window<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[async_trait]
impl Fingerprinter for PartialMd5 {
    async fn fingerprint_file(&self, path: &Path) -> Result<ContentFingerprint, ProviderError> {
        let mut file = tokio::fs::File::open(path).await?;
        let size = file.metadata().await?.len();

        let mut head = vec![0u8; self.window];
        read_window(&mut file, &mut head).await?;

        let tail = if size > self.window as u64 {
            let mut tail = vec![0u8; self.window];
            file.seek(SeekFrom::End(-(self.window as i64))).await?;
            read_window(&mut file, &mut tail).await?;
            tail
        } else {
            head.clone()
        };

        Ok(Self::digest(&head, &tail))
    }

    fn fingerprint_bytes(&self, data: &[u8]) -> ContentFingerprint {
        let mut head = vec![0u8; self.window];
        let n = data.len().min(self.window);
        head[..n].copy_from_slice(&data[..n]);

        if data.len() > self.window {
            Self::digest(&head, &data[data.len() - self.window..])
        } else {
            Self::digest(&head, &head)
        }
    }
}

/// Checks dedup keys against a folder's remote listing
pub struct DuplicateDetector<'a> {
    api: &'a dyn FileLuApi,
    fingerprinter: &'a dyn Fingerprinter,
}

impl<'a> DuplicateDetector<'a> {
    pub fn new(api: &'a dyn FileLuApi, fingerprinter: &'a dyn Fingerprinter) -> Self {
        Self { api, fingerprinter }
    }

    pub async fn fingerprint(&self, path: &Path) -> Result<ContentFingerprint, ProviderError> {
        self.fingerprinter.fingerprint_file(path).await
    }

    /// All dedup hashes currently listed in `folder_id`, leaving out the
    /// file `exclude` when given. One listing call, nothing cached.
    pub async fn remote_keys(
        &self,
        folder_id: FolderId,
        exclude: Option<&FileCode>,
        cancel: &CancellationToken,
    ) -> Result<HashSet<String>, ProviderError> {
        let listing = self.api.list_folder(folder_id, cancel).await?;
        let keys: HashSet<String> = listing
            .files
            .into_iter()
            .filter(|f| exclude.map_or(true, |code| f.file_code != code.as_str()))
            .filter_map(|f| f.hash)
            .collect();
        tracing::debug!("[FILELU] {} remote hashes in folder {}", keys.len(), folder_id);
        Ok(keys)
    }

    /// Returns the key and whether the folder already holds it. A move
    /// passes its source as `exclude` so the file never matches itself.
    pub async fn is_duplicate(
        &self,
        fingerprint: &ContentFingerprint,
        folder_id: FolderId,
        exclude: Option<&FileCode>,
        cancel: &CancellationToken,
    ) -> Result<(DedupKey, bool), ProviderError> {
        let key = DedupKey::new(fingerprint, folder_id);
        let existing = self.remote_keys(folder_id, exclude, cancel).await?;
        let found = contains_key(&existing, &key);
        Ok((key, found))
    }
}

/// Membership test against an already fetched key set
pub fn contains_key(existing: &HashSet<String>, key: &DedupKey) -> bool {
    existing.contains(key.as_str())
}
