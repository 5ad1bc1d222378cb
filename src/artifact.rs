//! Artifact and document types shared by the pipeline stages.
//!
//! A *raw artifact* is anything found while walking the input tree: an
//! archive, a mail message or an already-final report document. Its type is
//! resolved in two steps:
//!
//! 1. By file extension (`ArtifactKind::from_path`).
//! 2. For unknown or missing extensions, by sniffing a bounded prefix of the
//!    content (`sniff_prefix`): HTML / XML text markers first, then container
//!    magic numbers.
//!
//! A *flat document* is the terminal product of extraction: an XML or HTML
//! file sitting in the extraction output directory together with the chain of
//! container names it was unpacked from.

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::errors::{IoResultExt, Result};

/// Minimum number of bytes needed to see a tar `ustar` magic.
pub const TAR_MAGIC_OFFSET: usize = 257;

const ZIP_LOCAL_HEADER: &[u8] = b"PK\x03\x04";
const ZIP_EMPTY_ARCHIVE: &[u8] = b"PK\x05\x06";
const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const CFB_MAGIC: &[u8] = &[0xd0, 0xcf, 0x11, 0xe0, 0xa1, 0xb1, 0x1a, 0xe1];

/// Markup flavour of a flat document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DocumentFormat {
    /// Machine-generated, element-structured markup.
    Xml,
    /// Loosely structured, human-oriented markup.
    Html,
}

impl DocumentFormat {
    /// Canonical extension (without dot) used when a document has to be renamed.
    pub fn extension(self) -> &'static str {
        match self {
            DocumentFormat::Xml => "xml",
            DocumentFormat::Html => "html",
        }
    }

    /// Resolve the format from a file extension alone.
    pub fn from_path(path: &Path) -> Option<Self> {
        match ArtifactKind::from_path(path)? {
            ArtifactKind::Xml => Some(DocumentFormat::Xml),
            ArtifactKind::Html => Some(DocumentFormat::Html),
            _ => None,
        }
    }

    /// True when `path` already carries an extension matching this format.
    pub fn matches_extension(self, path: &Path) -> bool {
        DocumentFormat::from_path(path) == Some(self)
    }
}

impl std::fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// Resolved type of a raw artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Zip,
    /// Single gzip stream that is not a tarball.
    Gzip,
    Tar,
    /// Gzip-compressed tarball (`.tgz`, `.tar.gz`).
    TarGz,
    /// RFC 5322 mail message.
    Eml,
    /// Outlook compound-file message.
    Msg,
    Xml,
    Html,
}

impl ArtifactKind {
    /// First-level resolution: the fixed extension table.
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().to_ascii_lowercase();
        if name.ends_with(".tar.gz") {
            return Some(ArtifactKind::TarGz);
        }
        let ext = path.extension()?.to_string_lossy().to_ascii_lowercase();
        match ext.as_str() {
            "zip" => Some(ArtifactKind::Zip),
            "gz" => Some(ArtifactKind::Gzip),
            "tar" => Some(ArtifactKind::Tar),
            "tgz" => Some(ArtifactKind::TarGz),
            "eml" => Some(ArtifactKind::Eml),
            "msg" => Some(ArtifactKind::Msg),
            "xml" => Some(ArtifactKind::Xml),
            "html" | "htm" => Some(ArtifactKind::Html),
            _ => None,
        }
    }

    /// Terminal kinds are copied to the output instead of being unpacked.
    pub fn document_format(self) -> Option<DocumentFormat> {
        match self {
            ArtifactKind::Xml => Some(DocumentFormat::Xml),
            ArtifactKind::Html => Some(DocumentFormat::Html),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ArtifactKind::Zip => "zip",
            ArtifactKind::Gzip => "gzip",
            ArtifactKind::Tar => "tar",
            ArtifactKind::TarGz => "tar.gz",
            ArtifactKind::Eml => "eml",
            ArtifactKind::Msg => "msg",
            ArtifactKind::Xml => "xml",
            ArtifactKind::Html => "html",
        }
    }
}

/// Second-level resolution: inspect the first bytes of an artifact.
///
/// Text markers are checked on the lossy UTF-8 decoding of the first
/// `text_window` bytes; container signatures on the raw bytes.
pub fn sniff_prefix(prefix: &[u8], text_window: usize) -> Option<ArtifactKind> {
    let window = &prefix[..prefix.len().min(text_window)];
    let text = String::from_utf8_lossy(window).to_ascii_lowercase();
    if text.contains("<!doctype html") || text.contains("<html") {
        return Some(ArtifactKind::Html);
    }
    if text.contains("<?xml") {
        return Some(ArtifactKind::Xml);
    }

    if prefix.starts_with(ZIP_LOCAL_HEADER) || prefix.starts_with(ZIP_EMPTY_ARCHIVE) {
        return Some(ArtifactKind::Zip);
    }
    if prefix.starts_with(GZIP_MAGIC) {
        return Some(ArtifactKind::Gzip);
    }
    if prefix.starts_with(CFB_MAGIC) {
        return Some(ArtifactKind::Msg);
    }
    if prefix.len() >= TAR_MAGIC_OFFSET + 5
        && &prefix[TAR_MAGIC_OFFSET..TAR_MAGIC_OFFSET + 5] == b"ustar"
    {
        return Some(ArtifactKind::Tar);
    }
    None
}

/// Read at most `limit` bytes from the start of a file.
pub fn read_prefix(path: &Path, limit: usize) -> Result<Vec<u8>> {
    let file = File::open(path).with_path(path, "open for sniffing")?;
    let mut buf = Vec::with_capacity(limit);
    file.take(limit as u64)
        .read_to_end(&mut buf)
        .with_path(path, "read prefix")?;
    Ok(buf)
}

/// True when the gzip magic is present at the start of the file.
pub fn has_gzip_magic(path: &Path) -> bool {
    read_prefix(path, GZIP_MAGIC.len())
        .map(|prefix| prefix.starts_with(GZIP_MAGIC))
        .unwrap_or(false)
}

/// Display name of a path (last component, lossy).
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// An XML or HTML report document produced by extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FlatDocument {
    /// Location of the document in the extraction output.
    pub path: PathBuf,
    pub format: DocumentFormat,
    /// Container names the document was unpacked from, outermost first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub origin: Vec<String>,
}

impl FlatDocument {
    pub fn new(path: impl Into<PathBuf>, format: DocumentFormat, origin: Vec<String>) -> Self {
        Self {
            path: path.into(),
            format,
            origin,
        }
    }

    /// Build a document from an on-disk file whose extension names its format.
    pub fn from_path(path: impl Into<PathBuf>) -> Option<Self> {
        let path = path.into();
        let format = DocumentFormat::from_path(&path)?;
        Some(Self::new(path, format, Vec::new()))
    }

    pub fn file_name(&self) -> String {
        display_name(&self.path)
    }

    pub fn file_stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Read the whole document, replacing invalid UTF-8.
    pub fn read_text(&self) -> Result<String> {
        let bytes = fs::read(&self.path).with_path(&self.path, "read document")?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// `outer.zip!inner.tar!report.xml` style trace.
    pub fn trace(&self) -> String {
        let mut parts = self.origin.clone();
        parts.push(self.file_name());
        parts.join("!")
    }
}
