//! Archive containers: zip, single-stream gzip, tar and gzip-compressed tar.
//!
//! Each unpacker writes the container's regular files flat into a scratch
//! directory under sanitised, collision-safe names. Directory structure
//! inside the container is not preserved. Every entry is streamed through a
//! size cap; entries over it are dropped and listed in the result.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use flate2::read::GzDecoder;
use tracing::trace;
use zip::ZipArchive;

use super::Unpacked;
use crate::artifact::has_gzip_magic;
use crate::errors::{IoResultExt, Result, SiftError};
use crate::storage::{sanitize_entry_name, write_capped};

/// Name used for a gzip member whose file stem is empty.
const GUNZIP_FALLBACK: &str = "decompressed";

pub fn unzip_into(path: &Path, dest: &Path, limit: u64) -> Result<Unpacked> {
    let file = File::open(path).with_path(path, "open zip")?;
    let mut archive = ZipArchive::new(BufReader::new(file))
        .map_err(|e| SiftError::corrupt_container(path, "zip", e))?;

    let mut unpacked = Unpacked::default();
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| SiftError::corrupt_container(path, "zip", e))?;
        if entry.is_dir() {
            continue;
        }
        let Some(name) = sanitize_entry_name(entry.name()) else {
            trace!("Skipping unnamed zip entry #{index} in {}", path.display());
            continue;
        };
        let placed = write_capped(dest, &name, &mut entry, limit, |e| {
            SiftError::corrupt_container(path, "zip", e)
        })?;
        unpacked.place(name, placed);
    }
    Ok(unpacked)
}

/// Decompress one gzip stream to the file's stem (`report.xml.gz` -> `report.xml`).
pub fn gunzip_into(path: &Path, dest: &Path, limit: u64) -> Result<Unpacked> {
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .and_then(|s| sanitize_entry_name(&s))
        .unwrap_or_else(|| GUNZIP_FALLBACK.to_string());

    let file = File::open(path).with_path(path, "open gzip")?;
    let decoder = GzDecoder::new(BufReader::new(file));
    let placed = write_capped(dest, &name, decoder, limit, |e| {
        SiftError::corrupt_container(path, "gzip", e)
    })?;
    let mut unpacked = Unpacked::default();
    unpacked.place(name, placed);
    Ok(unpacked)
}

/// Unpack a tarball, transparently gunzipping when the gzip magic is present.
pub fn untar_into(path: &Path, dest: &Path, limit: u64) -> Result<Unpacked> {
    let gzipped = has_gzip_magic(path);
    let format = if gzipped { "tar.gz" } else { "tar" };
    let file = File::open(path).with_path(path, "open tar")?;
    let reader: Box<dyn Read> = if gzipped {
        Box::new(GzDecoder::new(BufReader::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };

    let mut archive = tar::Archive::new(reader);
    let entries = archive
        .entries()
        .map_err(|e| SiftError::corrupt_container(path, format, e))?;

    let mut unpacked = Unpacked::default();
    for entry in entries {
        let mut entry = entry.map_err(|e| SiftError::corrupt_container(path, format, e))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let raw_name = entry
            .path()
            .map_err(|e| SiftError::corrupt_container(path, format, e))?
            .to_string_lossy()
            .into_owned();
        let Some(name) = sanitize_entry_name(&raw_name) else {
            continue;
        };
        trace!("Untarring {raw_name}");
        let placed = write_capped(dest, &name, &mut entry, limit, |e| {
            SiftError::corrupt_container(path, format, e)
        })?;
        unpacked.place(name, placed);
    }
    Ok(unpacked)
}

/// Whether the file opens as a zip archive (used when sniffing found nothing).
pub fn probe_zip(path: &Path) -> bool {
    File::open(path)
        .map(|f| ZipArchive::new(BufReader::new(f)).is_ok())
        .unwrap_or(false)
}

/// Whether the first tar header of the file checks out.
pub fn probe_tar(path: &Path) -> bool {
    let Ok(file) = File::open(path) else {
        return false;
    };
    let mut archive = tar::Archive::new(BufReader::new(file));
    let Ok(mut entries) = archive.entries() else {
        return false;
    };
    let first_ok = matches!(entries.next(), Some(Ok(_)));
    first_ok
}
