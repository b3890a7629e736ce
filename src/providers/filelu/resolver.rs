//! Virtual path → folder id resolution
//!
//! Paths are walked one segment at a time from a base folder. A segment
//! that already carries its id (`(17) reports`) is adopted without a remote
//! call; a plain segment costs one listing of the current folder and an
//! exact, case-sensitive name match. Nothing is cached between calls.

use tokio_util::sync::CancellationToken;

use super::api::FileLuApi;
use super::naming::{decode, Segment};
use crate::providers::types::{
    is_file_code, is_numeric, AmbiguityPolicy, FileCode, FolderId, ProviderError, ROOT_FOLDER,
};

/// Split a virtual path into its segments, dropping empty and `.` parts and
/// applying `..`. Only `/` separates; any other character, whitespace
/// included, belongs to a name.
pub fn split_path(path: &str) -> Vec<&str> {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                let _ = segments.pop();
            }
            _ => segments.push(segment),
        }
    }
    segments
}

/// Canonical `a/b/c` form, no leading or trailing slash
pub fn normalize_path(path: &str) -> String {
    split_path(path).join("/")
}

/// Join two virtual paths
pub fn join_path(base: &str, rest: &str) -> String {
    match (normalize_path(base), normalize_path(rest)) {
        (b, r) if b.is_empty() => r,
        (b, r) if r.is_empty() => b,
        (b, r) => format!("{}/{}", b, r),
    }
}

/// Split into (parent, last segment). The parent of a single segment is "".
pub fn split_parent(path: &str) -> (String, String) {
    let mut segments = split_path(path);
    match segments.pop() {
        Some(last) => (segments.join("/"), last.to_string()),
        None => (String::new(), String::new()),
    }
}

/// Bare numeric string → folder id, without touching the remote.
pub fn parse_folder_ref(s: &str) -> Option<FolderId> {
    let trimmed = s.trim().trim_matches('/');
    if is_numeric(trimmed) {
        trimmed.parse().ok()
    } else {
        None
    }
}

/// What the configured root points at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RootSpec {
    /// A folder. `id` is known up front for numeric and `name:id` roots,
    /// otherwise `path` is resolved from the account root.
    Folder { path: String, id: Option<FolderId> },
    /// A single shared file, listed as a one-entry directory
    File(FileCode),
}

impl RootSpec {
    pub fn parse(root: &str) -> Self {
        let trimmed = root.trim().trim_matches('/');

        if let Some(id) = parse_folder_ref(trimmed) {
            return RootSpec::Folder { path: String::new(), id: Some(id) };
        }

        if let Some((name, id)) = trimmed.split_once(':') {
            if let Some(id) = parse_folder_ref(id) {
                return RootSpec::Folder { path: normalize_path(name), id: Some(id) };
            }
        }

        if is_file_code(trimmed) {
            if let Ok(code) = FileCode::parse(trimmed) {
                return RootSpec::File(code);
            }
        }

        RootSpec::Folder { path: normalize_path(trimmed), id: None }
    }

    pub fn file_code(&self) -> Option<&FileCode> {
        match self {
            RootSpec::File(code) => Some(code),
            RootSpec::Folder { .. } => None,
        }
    }
}

/// Walks virtual paths against the remote folder tree
pub struct PathResolver<'a> {
    api: &'a dyn FileLuApi,
    policy: AmbiguityPolicy,
}

impl<'a> PathResolver<'a> {
    pub fn new(api: &'a dyn FileLuApi, policy: AmbiguityPolicy) -> Self {
        Self { api, policy }
    }

    /// Resolve `path` starting at the account root.
    pub async fn resolve(&self, path: &str, cancel: &CancellationToken) -> Result<FolderId, ProviderError> {
        self.resolve_from(ROOT_FOLDER, path, cancel).await
    }

    /// Resolve a folder reference: a bare id short-circuits, anything else
    /// is walked as a path from `base`.
    pub async fn resolve_ref(&self, base: FolderId, reference: &str, cancel: &CancellationToken) -> Result<FolderId, ProviderError> {
        if let Some(id) = parse_folder_ref(reference) {
            return Ok(id);
        }
        self.resolve_from(base, reference, cancel).await
    }

    /// Resolve `path` starting at `base`. The empty path is `base` itself.
    pub async fn resolve_from(&self, base: FolderId, path: &str, cancel: &CancellationToken) -> Result<FolderId, ProviderError> {
        let mut current = base;
        let mut walked = String::new();

        for raw in split_path(path) {
            walked = join_path(&walked, raw);
            current = self.step(current, raw, &walked, cancel).await?;
        }

        tracing::debug!("[FILELU] resolved {:?} from {} to folder {}", path, base, current);
        Ok(current)
    }

    /// Folder ids along `path` from `base`, one per segment, stopping before
    /// the first segment that does not exist.
    pub async fn resolve_chain(&self, base: FolderId, path: &str, cancel: &CancellationToken) -> Result<Vec<FolderId>, ProviderError> {
        let mut chain = Vec::new();
        let mut current = base;
        let mut walked = String::new();

        for raw in split_path(path) {
            walked = join_path(&walked, raw);
            current = match self.step(current, raw, &walked, cancel).await {
                Ok(id) => id,
                Err(e) if e.is_not_found() => break,
                Err(e) => return Err(e),
            };
            chain.push(current);
        }
        Ok(chain)
    }

    async fn step(&self, current: FolderId, raw: &str, walked: &str, cancel: &CancellationToken) -> Result<FolderId, ProviderError> {
        let segment = decode(raw);
        match &segment {
            Segment::Tagged { .. } => segment
                .folder_id()
                .ok_or_else(|| ProviderError::InvalidPath(format!("Not a directory: {}", walked))),
            Segment::Plain(name) => self.lookup_child(current, name, walked, cancel).await,
        }
    }

    async fn lookup_child(
        &self,
        parent: FolderId,
        name: &str,
        walked: &str,
        cancel: &CancellationToken,
    ) -> Result<FolderId, ProviderError> {
        let listing = self.api.list_folder(parent, cancel).await?;
        let mut matches = listing.folders.iter().filter(|f| f.name == name);

        let first = matches.next().ok_or_else(|| {
            ProviderError::NotFound(format!("Directory not found: {}", walked))
        })?;

        if matches.next().is_some() {
            match self.policy {
                AmbiguityPolicy::First => {
                    tracing::debug!("[FILELU] {:?} matches several folders in {}, taking the first", name, parent);
                }
                AmbiguityPolicy::Error => {
                    return Err(ProviderError::AmbiguousPath(walked.to_string()));
                }
            }
        }

        Ok(first.fld_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::filelu::testing::{Call, MockApi};

    #[test]
    fn test_split_and_normalize() {
        assert_eq!(split_path("/a//b/./c/"), vec!["a", "b", "c"]);
        assert_eq!(normalize_path("a/b/../c"), "a/c");
        assert_eq!(normalize_path("/"), "");
        assert_eq!(join_path("", "x"), "x");
        assert_eq!(join_path("a/", "/b"), "a/b");
        assert_eq!(split_parent("a/b/c.txt"), ("a/b".to_string(), "c.txt".to_string()));
        assert_eq!(split_parent("c.txt"), (String::new(), "c.txt".to_string()));
    }

    #[test]
    fn test_split_keeps_backslashes_and_spaces() {
        assert_eq!(split_path("a\\b/c"), vec!["a\\b", "c"]);
        assert_eq!(split_path("(100) a\\b"), vec!["(100) a\\b"]);
        assert_eq!(split_path("docs/ /x"), vec!["docs", " ", "x"]);
        assert_eq!(normalize_path(" "), " ");
    }

    #[test]
    fn test_root_spec_parse() {
        assert_eq!(RootSpec::parse("/42/"), RootSpec::Folder { path: String::new(), id: Some(42) });
        assert_eq!(RootSpec::parse("docs:17"), RootSpec::Folder { path: "docs".into(), id: Some(17) });
        assert_eq!(RootSpec::parse("docs/work"), RootSpec::Folder { path: "docs/work".into(), id: None });
        assert_eq!(RootSpec::parse(""), RootSpec::Folder { path: String::new(), id: None });
        assert_eq!(
            RootSpec::parse("abc123def456"),
            RootSpec::File(FileCode::parse("abc123def456").unwrap())
        );
        assert_eq!(RootSpec::parse("a:b"), RootSpec::Folder { path: "a:b".into(), id: None });
    }

    #[tokio::test]
    async fn test_tagged_path_needs_no_listing() {
        let api = MockApi::new();
        let resolver = PathResolver::new(&api, AmbiguityPolicy::First);
        let cancel = CancellationToken::new();

        let id = resolver.resolve("(42) docs/(17) reports", &cancel).await.unwrap();
        assert_eq!(id, 17);
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_plain_path_lists_once_per_segment() {
        let api = MockApi::new();
        let docs = api.add_folder(0, "docs");
        let reports = api.add_folder(docs, "reports");
        api.add_folder(docs, "Reports");
        let resolver = PathResolver::new(&api, AmbiguityPolicy::First);
        let cancel = CancellationToken::new();

        let id = resolver.resolve("docs/reports", &cancel).await.unwrap();
        assert_eq!(id, reports);
        assert_eq!(api.calls(), vec![Call::ListFolder(0), Call::ListFolder(docs)]);
    }

    #[tokio::test]
    async fn test_mixed_path_lists_only_plain_segments() {
        let api = MockApi::new();
        let docs = api.add_folder(0, "docs");
        let inner = api.add_folder(docs, "inner");
        let resolver = PathResolver::new(&api, AmbiguityPolicy::First);
        let cancel = CancellationToken::new();

        let id = resolver.resolve(&format!("({}) docs/inner", docs), &cancel).await.unwrap();
        assert_eq!(id, inner);
        assert_eq!(api.calls(), vec![Call::ListFolder(docs)]);
    }

    #[tokio::test]
    async fn test_missing_segment_is_not_found() {
        let api = MockApi::new();
        api.add_folder(0, "docs");
        let resolver = PathResolver::new(&api, AmbiguityPolicy::First);
        let cancel = CancellationToken::new();

        let err = resolver.resolve("Docs", &cancel).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_empty_path_is_root_without_calls() {
        let api = MockApi::new();
        let resolver = PathResolver::new(&api, AmbiguityPolicy::First);
        let cancel = CancellationToken::new();

        assert_eq!(resolver.resolve("", &cancel).await.unwrap(), 0);
        assert_eq!(resolver.resolve("/", &cancel).await.unwrap(), 0);
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_numeric_reference_short_circuits() {
        let api = MockApi::new();
        let resolver = PathResolver::new(&api, AmbiguityPolicy::First);
        let cancel = CancellationToken::new();

        assert_eq!(resolver.resolve_ref(0, "123", &cancel).await.unwrap(), 123);
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_ambiguous_match_policies() {
        let api = MockApi::new();
        let first = api.add_folder(0, "dup");
        api.add_folder(0, "dup");
        let cancel = CancellationToken::new();

        let lenient = PathResolver::new(&api, AmbiguityPolicy::First);
        assert_eq!(lenient.resolve("dup", &cancel).await.unwrap(), first);

        let strict = PathResolver::new(&api, AmbiguityPolicy::Error);
        assert!(matches!(
            strict.resolve("dup", &cancel).await,
            Err(ProviderError::AmbiguousPath(_))
        ));
    }

    #[tokio::test]
    async fn test_file_segment_in_folder_path() {
        let api = MockApi::new();
        let resolver = PathResolver::new(&api, AmbiguityPolicy::First);
        let cancel = CancellationToken::new();

        let err = resolver.resolve("(abc123def456) a.txt/x", &cancel).await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidPath(_)));
    }

    #[tokio::test]
    async fn test_cancelled_walk() {
        let api = MockApi::new();
        api.add_folder(0, "docs");
        let resolver = PathResolver::new(&api, AmbiguityPolicy::First);
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(matches!(
            resolver.resolve("docs", &cancel).await,
            Err(ProviderError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn test_whitespace_folder_name_resolves() {
        let api = MockApi::new();
        let blank = api.add_folder(0, " ");
        let inner = api.add_folder(blank, "inner");
        let resolver = PathResolver::new(&api, AmbiguityPolicy::First);
        let cancel = CancellationToken::new();

        assert_eq!(resolver.resolve(" ", &cancel).await.unwrap(), blank);
        assert_eq!(resolver.resolve(" /inner", &cancel).await.unwrap(), inner);
    }

    #[tokio::test]
    async fn test_chain_stops_at_missing_segment() {
        let api = MockApi::new();
        let docs = api.add_folder(0, "docs");
        let work = api.add_folder(docs, "work");
        let resolver = PathResolver::new(&api, AmbiguityPolicy::First);
        let cancel = CancellationToken::new();

        let chain = resolver.resolve_chain(0, "docs/work/new/deeper", &cancel).await.unwrap();
        assert_eq!(chain, vec![docs, work]);

        api.clear_calls();
        let chain = resolver.resolve_chain(0, &format!("({}) docs/new", docs), &cancel).await.unwrap();
        assert_eq!(chain, vec![docs]);
        assert_eq!(api.calls(), vec![Call::ListFolder(docs)]);

        assert!(resolver.resolve_chain(0, "", &cancel).await.unwrap().is_empty());
    }
}
