//! `(id) name` segment codec
//!
//! Listings publish every folder as `(fld_id) name` and every file as
//! `(file_code) name`, so a later path walk can pick the id straight out of
//! the segment instead of listing the parent again.

use std::fmt;

use crate::providers::types::{is_file_code, is_numeric, FileCode, FolderId};

/// Identifier embedded in a path segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbeddedId {
    Folder(FolderId),
    File(FileCode),
}

impl fmt::Display for EmbeddedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmbeddedId::Folder(id) => write!(f, "{}", id),
            EmbeddedId::File(code) => write!(f, "{}", code),
        }
    }
}

/// A decoded path segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Literal name, must be looked up remotely
    Plain(String),
    /// Name carrying its remote id; `id` is the raw text between the parens
    Tagged { name: String, id: String },
}

impl Segment {
    /// Human-readable name with any tag stripped
    pub fn name(&self) -> &str {
        match self {
            Segment::Plain(name) => name,
            Segment::Tagged { name, .. } => name,
        }
    }

    /// Folder id, when the tag is a decimal number
    pub fn folder_id(&self) -> Option<FolderId> {
        match self {
            Segment::Tagged { id, .. } if is_numeric(id) => id.parse().ok(),
            _ => None,
        }
    }

    /// File code, when the tag has the file-code shape
    pub fn file_code(&self) -> Option<FileCode> {
        match self {
            Segment::Tagged { id, .. } => FileCode::parse(id).ok(),
            Segment::Plain(_) => None,
        }
    }

    /// Classify the tag. Digits win over the file-code shape, so an all-digit
    /// 12-char tag reads as a folder here; use [`Segment::file_code`] when the
    /// caller already knows it is addressing a file.
    pub fn embedded(&self) -> Option<EmbeddedId> {
        if let Some(id) = self.folder_id() {
            return Some(EmbeddedId::Folder(id));
        }
        self.file_code().map(EmbeddedId::File)
    }
}

/// Build the virtual segment for a remote object.
pub fn encode(name: &str, id: &EmbeddedId) -> String {
    format!("({}) {}", id, name)
}

/// Split a segment into name and embedded id.
///
/// Only a leading `(…)` group counts, closed by the first `)`. The group
/// must hold a folder id or a file code; anything else (including names
/// such as `(draft) notes`) stays a literal name. Never fails.
pub fn decode(segment: &str) -> Segment {
    let Some(rest) = segment.strip_prefix('(') else {
        return Segment::Plain(segment.to_string());
    };
    let Some(end) = rest.find(')') else {
        return Segment::Plain(segment.to_string());
    };

    let id = rest[..end].trim();
    if !(is_numeric(id) || is_file_code(id)) {
        return Segment::Plain(segment.to_string());
    }

    let tail = &rest[end + 1..];
    let name = tail.strip_prefix(' ').unwrap_or(tail);
    Segment::Tagged {
        name: name.to_string(),
        id: id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code(s: &str) -> FileCode {
        FileCode::parse(s).unwrap()
    }

    #[test]
    fn test_encode_template() {
        assert_eq!(encode("Pics", &EmbeddedId::Folder(3)), "(3) Pics");
        assert_eq!(
            encode("a.txt", &EmbeddedId::File(code("abc123def456"))),
            "(abc123def456) a.txt"
        );
    }

    #[test]
    fn test_decode_recovers_encoded_pair() {
        for (name, id) in [
            ("docs", EmbeddedId::Folder(42)),
            ("with space", EmbeddedId::Folder(0)),
            ("report.pdf", EmbeddedId::File(code("zz9900aa11bb"))),
            ("", EmbeddedId::Folder(7)),
        ] {
            let seg = decode(&encode(name, &id));
            assert_eq!(seg.name(), name);
            assert_eq!(seg.embedded(), Some(id));
        }
    }

    #[test]
    fn test_decode_plain_names() {
        assert_eq!(decode("docs"), Segment::Plain("docs".into()));
        assert_eq!(decode("(draft) notes"), Segment::Plain("(draft) notes".into()));
        assert_eq!(decode("(12 notes"), Segment::Plain("(12 notes".into()));
        assert_eq!(decode("notes (12)"), Segment::Plain("notes (12)".into()));
        assert_eq!(decode("()"), Segment::Plain("()".into()));
        assert_eq!(decode(""), Segment::Plain("".into()));
    }

    #[test]
    fn test_decode_names_with_delimiters() {
        let seg = decode(&encode("a(b)c", &EmbeddedId::Folder(5)));
        assert_eq!(seg.folder_id(), Some(5));
        assert_eq!(seg.name(), "a(b)c");

        let seg = decode(&encode("(x) y", &EmbeddedId::Folder(9)));
        assert_eq!(seg.folder_id(), Some(9));
        assert_eq!(seg.name(), "(x) y");

        let seg = decode(")(((");
        assert_eq!(seg, Segment::Plain(")(((".into()));
    }

    #[test]
    fn test_decode_without_space() {
        let seg = decode("(17)reports");
        assert_eq!(seg.folder_id(), Some(17));
        assert_eq!(seg.name(), "reports");
    }

    #[test]
    fn test_numeric_twelve_char_tag() {
        let seg = decode("(123456789012) x");
        assert_eq!(seg.embedded(), Some(EmbeddedId::Folder(123456789012)));
        assert_eq!(seg.file_code(), Some(code("123456789012")));
    }
}
