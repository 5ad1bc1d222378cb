//! Unified error handling.
//!
//! A `thiserror`-based model with:
//!   * Typed variants for the failure domains of the pipeline
//!   * A categorization layer (`ErrorCategory`) for run reports
//!   * Helper constructors
//!   * `From` conversions for common lower-level errors
//!
//! Most of these errors never stop a run. The pipeline turns them into
//! per-artifact events and moves on to the next sibling; only an unreadable
//! input root or an invalid configuration is surfaced to the caller.
//!
//! Categories are intentionally coarse:
//!   - Input: user supplied paths / configuration
//!   - Container: archives and mail containers that could not be opened
//!   - Parse: markup that could not be parsed
//!   - Internal: I/O and unexpected states
//!
//! Usage:
//!   use dmarcsift::errors::{Result, SiftError};
//!
//!   fn do_something() -> Result<()> {
//!       Err(SiftError::Configuration { message: "max depth is zero".into() })
//!   }

use std::io;
use std::path::Path;

use thiserror::Error;

/// High-level classification for structured reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Input,
    Container,
    Parse,
    Internal,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCategory::Input => "input",
            ErrorCategory::Container => "container",
            ErrorCategory::Parse => "parse",
            ErrorCategory::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Primary application error type.
#[derive(Error, Debug)]
pub enum SiftError {
    // ------------------------ Input / Validation ----------------------------
    #[error("Input directory not found: {path}")]
    InputNotFound { path: String },

    #[error("Input path is not a directory: {path}")]
    InputNotDirectory { path: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    // ---------------------------- Containers ---------------------------------
    #[error("Corrupt {format} container {path}: {reason}")]
    CorruptContainer {
        path: String,
        format: String,
        reason: String,
    },

    #[error("Malformed mail message {path}: {reason}")]
    MalformedMail { path: String, reason: String },

    // ---------------------------- Parsing -----------------------------------
    #[error("Failed to parse XML document {path}: {reason}")]
    XmlParse { path: String, reason: String },

    // ----------------------------- I/O / FS ---------------------------------
    #[error("I/O error during {operation} on {path}: {source}")]
    Io {
        path: String,
        operation: String,
        #[source]
        source: io::Error,
    },

    // ---------------------------- Internal ----------------------------------
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl SiftError {
    /// Categorize the error for structured output.
    pub fn category(&self) -> ErrorCategory {
        use SiftError::*;
        match self {
            InputNotFound { .. } | InputNotDirectory { .. } | Configuration { .. } => {
                ErrorCategory::Input
            }

            CorruptContainer { .. } | MalformedMail { .. } => ErrorCategory::Container,

            XmlParse { .. } => ErrorCategory::Parse,

            Io { .. } | Internal { .. } => ErrorCategory::Internal,
        }
    }

    // ---------------------------- Constructors -----------------------------

    pub fn input_not_found(path: &Path) -> Self {
        Self::InputNotFound {
            path: path.display().to_string(),
        }
    }

    pub fn input_not_directory(path: &Path) -> Self {
        Self::InputNotDirectory {
            path: path.display().to_string(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn corrupt_container(
        path: &Path,
        format: impl Into<String>,
        reason: impl std::fmt::Display,
    ) -> Self {
        Self::CorruptContainer {
            path: path.display().to_string(),
            format: format.into(),
            reason: reason.to_string(),
        }
    }

    pub fn malformed_mail(path: &Path, reason: impl std::fmt::Display) -> Self {
        Self::MalformedMail {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn xml_parse(path: &Path, reason: impl std::fmt::Display) -> Self {
        Self::XmlParse {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn io(path: impl Into<String>, operation: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            operation: operation.into(),
            source,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// Public result alias.
pub type Result<T> = std::result::Result<T, SiftError>;

/// Map standard IO errors into `Io` variant (generic context).
impl From<io::Error> for SiftError {
    fn from(e: io::Error) -> Self {
        SiftError::Io {
            path: "<unknown>".into(),
            operation: "unspecified".into(),
            source: e,
        }
    }
}

/// Extension trait for enriching IO results with path + operation context.
pub trait IoResultExt<T> {
    fn with_path(self, path: impl AsRef<Path>, operation: impl Into<String>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::result::Result<T, io::Error> {
    fn with_path(self, path: impl AsRef<Path>, operation: impl Into<String>) -> Result<T> {
        self.map_err(|e| SiftError::io(path.as_ref().display().to_string(), operation.into(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_mapping() {
        assert_eq!(
            SiftError::input_not_found(Path::new("/missing")).category(),
            ErrorCategory::Input
        );
        assert_eq!(
            SiftError::corrupt_container(Path::new("a.zip"), "zip", "bad signature").category(),
            ErrorCategory::Container
        );
        assert_eq!(
            SiftError::xml_parse(Path::new("r.xml"), "unexpected eof").category(),
            ErrorCategory::Parse
        );
        assert_eq!(SiftError::internal("boom").category(), ErrorCategory::Internal);
    }

    #[test]
    fn display_snippets() {
        let e = SiftError::corrupt_container(Path::new("batch.zip"), "zip", "invalid header");
        let s = e.to_string();
        assert!(s.contains("batch.zip"));
        assert!(s.contains("zip"));
        assert!(s.contains("invalid header"));
        let i = SiftError::internal("boom");
        assert!(i.to_string().contains("Internal error"));
    }

    #[test]
    fn io_context() {
        let res: std::result::Result<(), io::Error> =
            Err(io::Error::new(io::ErrorKind::NotFound, "missing"));
        let mapped = res.with_path("/tmp/file", "read");
        match mapped.err().unwrap() {
            SiftError::Io {
                path, operation, ..
            } => {
                assert_eq!(path, "/tmp/file");
                assert_eq!(operation, "read");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
