//! Collision-safe file placement.
//!
//! Every write into an output or scratch directory goes through
//! `create_unique`: if `name.ext` is taken the next free `name_N.ext`
//! (N = 1, 2, …) is used. Files are opened with `create_new`, so an existing
//! file is never truncated even if two writers race for the same name.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use crate::errors::{IoResultExt, Result, SiftError};

/// Placeholder when an entry name sanitises to nothing.
const FALLBACK_NAME: &str = "attachment";

/// Split `name` into stem and extension (the extension keeps its dot).
fn split_name(name: &str) -> (String, String) {
    let path = Path::new(name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| FALLBACK_NAME.to_string());
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    (stem, ext)
}

/// Candidate name for the `attempt`-th try (0 = the name itself).
pub fn numbered_name(name: &str, attempt: u32) -> String {
    if attempt == 0 {
        return name.to_string();
    }
    let (stem, ext) = split_name(name);
    format!("{stem}_{attempt}{ext}")
}

/// Create a new file in `dir` named after `name`, suffixing on collision.
pub fn create_unique(dir: &Path, name: &str) -> Result<(PathBuf, File)> {
    fs::create_dir_all(dir).with_path(dir, "create directory")?;
    let mut attempt = 0u32;
    loop {
        let candidate = dir.join(numbered_name(name, attempt));
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
        {
            Ok(file) => return Ok((candidate, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                attempt = attempt
                    .checked_add(1)
                    .ok_or_else(|| SiftError::internal("exhausted collision suffixes"))?;
            }
            Err(e) => return Err(SiftError::io(candidate.display().to_string(), "create", e)),
        }
    }
}

/// Copy `src` into `dir` as `name` (or the next free suffixed name).
///
/// A failed copy removes the partial destination.
pub fn copy_unique(src: &Path, dir: &Path, name: &str) -> Result<PathBuf> {
    let mut input = File::open(src).with_path(src, "open")?;
    let (dest, mut out) = create_unique(dir, name)?;
    if let Err(e) = io::copy(&mut input, &mut out) {
        drop(out);
        discard(&dest);
        return Err(SiftError::io(dest.display().to_string(), "copy", e));
    }
    Ok(dest)
}

/// Outcome of a size-capped write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capped {
    Written(PathBuf),
    /// The payload ran past the cap; `bytes` is how much was read before stopping.
    Oversized { bytes: u64 },
}

/// Stream `reader` into a new collision-safe file, reading at most
/// `limit + 1` bytes.
///
/// Payloads over `limit` are removed again and reported as `Oversized`.
/// Read errors go through `on_error` and also remove the partial file.
pub fn write_capped<R, E>(
    dir: &Path,
    name: &str,
    reader: R,
    limit: u64,
    on_error: E,
) -> Result<Capped>
where
    R: Read,
    E: FnOnce(io::Error) -> SiftError,
{
    let (dest, mut out) = create_unique(dir, name)?;
    let copied = io::copy(&mut reader.take(limit.saturating_add(1)), &mut out);
    drop(out);
    match copied {
        Ok(bytes) if bytes > limit => {
            discard(&dest);
            Ok(Capped::Oversized { bytes })
        }
        Ok(_) => Ok(Capped::Written(dest)),
        Err(e) => {
            discard(&dest);
            Err(on_error(e))
        }
    }
}

fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        tracing::debug!("Could not remove partial file {}: {e}", path.display());
    }
}

/// Reduce an archive entry or attachment name to a safe single file name.
///
/// Directory components are dropped (both separators), as are `.`/`..` and
/// control characters. Returns `None` for names that carry nothing usable.
pub fn sanitize_entry_name(raw: &str) -> Option<String> {
    let last = raw
        .rsplit(['/', '\\'])
        .find(|segment| !segment.trim().is_empty())?;
    let cleaned: String = last.chars().filter(|c| !c.is_control()).collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        return None;
    }
    Some(cleaned.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn read_error(e: io::Error) -> SiftError {
        SiftError::io("fixture", "read", e)
    }

    #[test]
    fn numbered_names() {
        assert_eq!(numbered_name("report.xml", 0), "report.xml");
        assert_eq!(numbered_name("report.xml", 1), "report_1.xml");
        assert_eq!(numbered_name("report.xml", 12), "report_12.xml");
        assert_eq!(numbered_name("noext", 2), "noext_2");
    }

    #[test]
    fn collision_keeps_first_file() {
        let dir = tempfile::tempdir().unwrap();
        let (first, mut f1) = create_unique(dir.path(), "report.xml").unwrap();
        f1.write_all(b"first").unwrap();
        drop(f1);

        let (second, mut f2) = create_unique(dir.path(), "report.xml").unwrap();
        f2.write_all(b"second").unwrap();
        drop(f2);

        assert_eq!(first.file_name().unwrap(), "report.xml");
        assert_eq!(second.file_name().unwrap(), "report_1.xml");
        assert_eq!(fs::read(&first).unwrap(), b"first");
        assert_eq!(fs::read(&second).unwrap(), b"second");
    }

    #[test]
    fn copy_unique_suffixes() {
        let src_dir = tempfile::tempdir().unwrap();
        let out_dir = tempfile::tempdir().unwrap();
        let src = src_dir.path().join("a.html");
        fs::write(&src, "<html></html>").unwrap();

        let a = copy_unique(&src, out_dir.path(), "a.html").unwrap();
        let b = copy_unique(&src, out_dir.path(), "a.html").unwrap();
        let c = copy_unique(&src, out_dir.path(), "a.html").unwrap();
        assert_eq!(a.file_name().unwrap(), "a.html");
        assert_eq!(b.file_name().unwrap(), "a_1.html");
        assert_eq!(c.file_name().unwrap(), "a_2.html");
    }

    #[test]
    fn capped_write_within_limit() {
        let dir = tempfile::tempdir().unwrap();
        let placed = write_capped(dir.path(), "r.xml", &b"<feedback/>"[..], 11, read_error).unwrap();
        match placed {
            Capped::Written(path) => assert_eq!(fs::read(path).unwrap(), b"<feedback/>"),
            other => panic!("expected a written file, got {other:?}"),
        }
    }

    #[test]
    fn capped_write_over_limit_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let zeros = io::repeat(0).take(1 << 20);
        let placed = write_capped(dir.path(), "bomb.xml", zeros, 1024, read_error).unwrap();
        assert_eq!(placed, Capped::Oversized { bytes: 1025 });
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn failed_read_removes_partial_file() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::InvalidData, "truncated stream"))
            }
        }
        let dir = tempfile::tempdir().unwrap();
        let err = write_capped(dir.path(), "r.xml", Broken, 1024, read_error).unwrap_err();
        assert!(err.to_string().contains("truncated stream"));
        assert!(!dir.path().join("r.xml").exists());
    }

    #[test]
    fn failed_copy_removes_partial_file() {
        let src_dir = tempfile::tempdir().unwrap();
        let out_dir = tempfile::tempdir().unwrap();
        // reading a directory as a file fails after the destination is created
        assert!(copy_unique(src_dir.path(), out_dir.path(), "a.html").is_err());
        assert_eq!(fs::read_dir(out_dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn sanitize_strips_paths() {
        assert_eq!(sanitize_entry_name("dir/sub/report.xml").as_deref(), Some("report.xml"));
        assert_eq!(sanitize_entry_name("..\\..\\evil.xml").as_deref(), Some("evil.xml"));
        assert_eq!(sanitize_entry_name("/abs/path/r.html").as_deref(), Some("r.html"));
        assert_eq!(sanitize_entry_name("folder/").as_deref(), Some("folder"));
        assert_eq!(sanitize_entry_name(".."), None);
        assert_eq!(sanitize_entry_name("   "), None);
    }
}
