//! In-memory `FileLuApi` for unit tests

use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::api::{
    AccountUsage, ByteReader, DirectLink, FileLuApi, FolderListing, RemoteFile, RemoteFolder,
    UploadSession,
};
use super::dedup::{DedupKey, Fingerprinter, PartialMd5};
use crate::providers::types::{FileCode, FolderId, ProviderError, ROOT_FOLDER};

const CDN: &str = "https://cdn.test/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ListFolder(FolderId),
    CreateFolder(FolderId, String),
    DeleteFolder(FolderId),
    UploadServer,
    Upload(String),
    SetFolder(String, FolderId),
    DirectLink(String),
    DeleteFile(String),
    AccountInfo,
    OpenUrl(String),
}

#[derive(Debug, Clone)]
struct MockFolder {
    name: String,
    parent: FolderId,
}

#[derive(Debug, Clone)]
pub struct MockFile {
    pub code: String,
    pub name: String,
    pub folder: FolderId,
    pub content: Vec<u8>,
}

#[derive(Debug)]
struct State {
    folders: BTreeMap<FolderId, MockFolder>,
    files: Vec<MockFile>,
    next_folder: FolderId,
    next_file: u64,
    next_session: u64,
    calls: Vec<Call>,
    fail_set_folder: bool,
    fail_delete_file: bool,
    reject_upload: Option<String>,
    storage: String,
    storage_used: String,
}

/// Folder tree and file store behind a mutex, recording every call
#[derive(Debug)]
pub struct MockApi {
    state: Mutex<State>,
}

impl MockApi {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                folders: BTreeMap::new(),
                files: Vec::new(),
                next_folder: 100,
                next_file: 1,
                next_session: 1,
                calls: Vec::new(),
                fail_set_folder: false,
                fail_delete_file: false,
                reject_upload: None,
                storage: "10 GB".to_string(),
                storage_used: "512 MB".to_string(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn add_folder(&self, parent: FolderId, name: &str) -> FolderId {
        let mut st = self.lock();
        let id = st.next_folder;
        st.next_folder += 1;
        st.folders.insert(id, MockFolder { name: name.to_string(), parent });
        id
    }

    /// Add a file with a generated code, returning the code.
    pub fn add_file(&self, folder: FolderId, name: &str, content: &[u8]) -> String {
        let code = {
            let mut st = self.lock();
            let code = format!("f{:011}", st.next_file);
            st.next_file += 1;
            code
        };
        self.add_file_with_code(folder, &code, name, content);
        code
    }

    pub fn add_file_with_code(&self, folder: FolderId, code: &str, name: &str, content: &[u8]) {
        self.lock().files.push(MockFile {
            code: code.to_string(),
            name: name.to_string(),
            folder,
            content: content.to_vec(),
        });
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn file(&self, code: &str) -> Option<MockFile> {
        self.lock().files.iter().find(|f| f.code == code).cloned()
    }

    /// Files currently stored in `folder`, in insertion order
    pub fn files_in(&self, folder: FolderId) -> Vec<MockFile> {
        self.lock().files.iter().filter(|f| f.folder == folder).cloned().collect()
    }

    pub fn folder_exists(&self, id: FolderId) -> bool {
        self.lock().folders.contains_key(&id)
    }

    /// Child folder of `parent` called `name`
    pub fn child_folder(&self, parent: FolderId, name: &str) -> Option<FolderId> {
        self.lock()
            .folders
            .iter()
            .find(|(_, f)| f.parent == parent && f.name == name)
            .map(|(id, _)| *id)
    }

    pub fn fail_set_folder(&self, fail: bool) {
        self.lock().fail_set_folder = fail;
    }

    pub fn fail_delete_file(&self, fail: bool) {
        self.lock().fail_delete_file = fail;
    }

    pub fn reject_upload(&self, status: Option<&str>) {
        self.lock().reject_upload = status.map(str::to_string);
    }

    pub fn set_usage(&self, storage: &str, used: &str) {
        let mut st = self.lock();
        st.storage = storage.to_string();
        st.storage_used = used.to_string();
    }

    /// Record `call` unless `cancel` already fired.
    fn enter(&self, call: Call, cancel: &CancellationToken) -> Result<(), ProviderError> {
        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }
        self.lock().calls.push(call);
        Ok(())
    }

    fn dedup_hash(file: &MockFile) -> String {
        let fp = PartialMd5::default().fingerprint_bytes(&file.content);
        DedupKey::new(&fp, file.folder).into_string()
    }

    fn api_error(status: u32, message: &str) -> ProviderError {
        ProviderError::Api { status, message: message.to_string() }
    }
}

impl Default for MockApi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileLuApi for MockApi {
    async fn list_folder(&self, fld_id: FolderId, cancel: &CancellationToken) -> Result<FolderListing, ProviderError> {
        self.enter(Call::ListFolder(fld_id), cancel)?;
        let st = self.lock();
        if fld_id != ROOT_FOLDER && !st.folders.contains_key(&fld_id) {
            return Err(Self::api_error(404, "Folder not found"));
        }
        let folders = st.folders.iter()
            .filter(|(_, f)| f.parent == fld_id)
            .map(|(id, f)| RemoteFolder { name: f.name.clone(), fld_id: *id, parent: Some(f.parent) })
            .collect();
        let files = st.files.iter()
            .filter(|f| f.folder == fld_id)
            .map(|f| RemoteFile {
                name: f.name.clone(),
                file_code: f.code.clone(),
                size: f.content.len() as u64,
                hash: Some(Self::dedup_hash(f)),
                uploaded: None,
            })
            .collect();
        Ok(FolderListing { folders, files })
    }

    async fn create_folder(&self, parent_id: FolderId, name: &str, cancel: &CancellationToken) -> Result<FolderId, ProviderError> {
        self.enter(Call::CreateFolder(parent_id, name.to_string()), cancel)?;
        if parent_id != ROOT_FOLDER && !self.folder_exists(parent_id) {
            return Err(Self::api_error(404, "Parent folder not found"));
        }
        Ok(self.add_folder(parent_id, name))
    }

    async fn delete_folder(&self, fld_id: FolderId, cancel: &CancellationToken) -> Result<(), ProviderError> {
        self.enter(Call::DeleteFolder(fld_id), cancel)?;
        let mut st = self.lock();
        if !st.folders.contains_key(&fld_id) {
            return Err(Self::api_error(404, "Folder not found"));
        }
        let has_children = st.folders.values().any(|f| f.parent == fld_id)
            || st.files.iter().any(|f| f.folder == fld_id);
        if has_children {
            return Err(Self::api_error(400, "Folder is not empty"));
        }
        st.folders.remove(&fld_id);
        Ok(())
    }

    async fn upload_server(&self, cancel: &CancellationToken) -> Result<UploadSession, ProviderError> {
        self.enter(Call::UploadServer, cancel)?;
        let mut st = self.lock();
        let sess_id = format!("sess{}", st.next_session);
        st.next_session += 1;
        Ok(UploadSession { url: "https://up.test/cgi-bin/upload.cgi".to_string(), sess_id })
    }

    async fn upload_file(
        &self,
        _session: &UploadSession,
        file_name: &str,
        local_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<FileCode, ProviderError> {
        self.enter(Call::Upload(file_name.to_string()), cancel)?;
        let content = tokio::fs::read(local_path).await?;
        if let Some(status) = self.lock().reject_upload.clone() {
            return Err(ProviderError::UploadRejected { status });
        }
        let code = self.add_file(ROOT_FOLDER, file_name, &content);
        FileCode::parse(&code)
    }

    async fn set_file_folder(&self, file_code: &FileCode, fld_id: FolderId, cancel: &CancellationToken) -> Result<(), ProviderError> {
        self.enter(Call::SetFolder(file_code.to_string(), fld_id), cancel)?;
        let mut st = self.lock();
        if st.fail_set_folder {
            return Err(Self::api_error(500, "set_folder failed"));
        }
        if fld_id != ROOT_FOLDER && !st.folders.contains_key(&fld_id) {
            return Err(Self::api_error(404, "Folder not found"));
        }
        let file = st.files.iter_mut()
            .find(|f| f.code == file_code.as_str())
            .ok_or_else(|| Self::api_error(404, "File not found"))?;
        file.folder = fld_id;
        Ok(())
    }

    async fn direct_link(&self, file_code: &FileCode, cancel: &CancellationToken) -> Result<DirectLink, ProviderError> {
        self.enter(Call::DirectLink(file_code.to_string()), cancel)?;
        let file = self.file(file_code.as_str())
            .ok_or_else(|| Self::api_error(404, "File not found"))?;
        Ok(DirectLink {
            url: format!("{}{}/{}", CDN, file.code, urlencoding::encode(&file.name)),
            size: file.content.len() as u64,
        })
    }

    async fn delete_file(&self, file_code: &FileCode, cancel: &CancellationToken) -> Result<(), ProviderError> {
        self.enter(Call::DeleteFile(file_code.to_string()), cancel)?;
        let mut st = self.lock();
        if st.fail_delete_file {
            return Err(Self::api_error(500, "remove failed"));
        }
        let before = st.files.len();
        st.files.retain(|f| f.code != file_code.as_str());
        if st.files.len() == before {
            return Err(Self::api_error(404, "File not found"));
        }
        Ok(())
    }

    async fn account_info(&self, cancel: &CancellationToken) -> Result<AccountUsage, ProviderError> {
        self.enter(Call::AccountInfo, cancel)?;
        let st = self.lock();
        Ok(AccountUsage { storage: st.storage.clone(), storage_used: st.storage_used.clone() })
    }

    async fn open_url(&self, url: &str, cancel: &CancellationToken) -> Result<ByteReader, ProviderError> {
        self.enter(Call::OpenUrl(url.to_string()), cancel)?;
        let code = url.strip_prefix(CDN)
            .and_then(|rest| rest.split('/').next())
            .ok_or_else(|| ProviderError::ServerError(format!("Download HTTP 404 for {}", url)))?;
        let file = self.file(code)
            .ok_or_else(|| ProviderError::ServerError("Download HTTP 404".to_string()))?;
        Ok(Box::pin(Cursor::new(file.content)))
    }
}
