//! Recursive, format-detecting extraction.
//!
//! `Extractor::extract` walks an input directory and normalizes every
//! artifact into zero or more `FlatDocument`s in the extraction directory:
//!
//! * containers (zip, gzip, tar, tar.gz, eml, msg) are unpacked into a
//!   scratch `TempDir` that lives only while that container is processed,
//!   and the scratch contents go through the same dispatch one level deeper;
//! * XML / HTML documents are copied under a collision-safe name;
//! * everything else is sniffed, then skipped if still unknown.
//!
//! Unpackers stream every entry through `max_file_size`; an entry that runs
//! past it is dropped mid-stream and reported as `TooLarge`.
//!
//! A corrupt container never stops the walk: it becomes a `Failed` event and
//! the next sibling is processed. Only an unreadable input root is an error.

pub mod archive;
pub mod mail;

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::artifact::{
    ArtifactKind, DocumentFormat, FlatDocument, TAR_MAGIC_OFFSET, display_name, read_prefix,
    sniff_prefix,
};
use crate::config::ExtractConfig;
use crate::errors::{IoResultExt, Result, SiftError};
use crate::events::{RunEvent, SkipReason, StageName};
use crate::storage::{Capped, copy_unique};

/// Counters reported after an extraction run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ExtractStats {
    /// Artifacts dispatched (containers, documents and unknown files alike)
    pub files_processed: usize,
    pub containers_unpacked: usize,
    pub documents_extracted: usize,
    pub xml_documents: usize,
    pub html_documents: usize,
}

/// Result of one extraction run.
#[derive(Debug, Clone, Default)]
pub struct ExtractionReport {
    pub documents: Vec<FlatDocument>,
    pub events: Vec<RunEvent>,
    pub stats: ExtractStats,
}

/// What one unpacker left in scratch space.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Unpacked {
    pub written: usize,
    /// Entries dropped at the size cap, with the bytes read before stopping.
    pub oversized: Vec<(String, u64)>,
}

impl Unpacked {
    pub(crate) fn place(&mut self, name: String, placed: Capped) {
        match placed {
            Capped::Written(target) => {
                trace!("{} -> {}", name, target.display());
                self.written += 1;
            }
            Capped::Oversized { bytes } => self.oversized.push((name, bytes)),
        }
    }
}

/// Per-run state: the duplicate-processing set and the accumulators.
#[derive(Debug, Default)]
pub struct ExtractContext {
    processed: HashSet<PathBuf>,
    visited_dirs: HashSet<PathBuf>,
    excluded: Option<PathBuf>,
    documents: Vec<FlatDocument>,
    events: Vec<RunEvent>,
    stats: ExtractStats,
}

impl ExtractContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Never walk `dir` (typically the output root) as input.
    pub fn exclude(&mut self, dir: &Path) {
        self.excluded = Some(canonical(dir));
    }

    fn skip(&mut self, path: &Path, reason: SkipReason) {
        self.events
            .push(RunEvent::skipped(StageName::Extract, path, reason));
    }

    fn fail(&mut self, path: &Path, error: &SiftError) {
        self.events
            .push(RunEvent::failed(StageName::Extract, path, error));
    }

    pub fn into_report(self) -> ExtractionReport {
        ExtractionReport {
            documents: self.documents,
            events: self.events,
            stats: self.stats,
        }
    }
}

fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Unpacks raw artifacts into flat documents.
#[derive(Debug, Clone)]
pub struct Extractor {
    config: ExtractConfig,
    output_dir: PathBuf,
}

impl Extractor {
    pub fn new(config: ExtractConfig, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            output_dir: output_dir.into(),
        }
    }

    /// Extract everything below `input_dir` with a fresh context.
    pub fn extract(&self, input_dir: &Path) -> Result<ExtractionReport> {
        let mut ctx = ExtractContext::new();
        self.extract_with(input_dir, &mut ctx)?;
        Ok(ctx.into_report())
    }

    /// Extract into an existing context so several roots share one
    /// duplicate-processing set.
    pub fn extract_with(&self, input_dir: &Path, ctx: &mut ExtractContext) -> Result<()> {
        if !input_dir.exists() {
            return Err(SiftError::input_not_found(input_dir));
        }
        if !input_dir.is_dir() {
            return Err(SiftError::input_not_directory(input_dir));
        }
        fs::create_dir_all(&self.output_dir).with_path(&self.output_dir, "create directory")?;
        if ctx.excluded.is_none() {
            ctx.exclude(&self.output_dir);
        }

        info!("Extracting artifacts from {}", input_dir.display());
        self.walk_dir(input_dir, &[], 0, ctx)?;
        info!(
            "Extraction done: {} artifacts, {} documents ({} xml, {} html)",
            ctx.stats.files_processed,
            ctx.stats.documents_extracted,
            ctx.stats.xml_documents,
            ctx.stats.html_documents
        );
        Ok(())
    }

    /// Walk a directory in name order. Errors reading `dir` itself are
    /// returned; anything below is recorded as an event.
    fn walk_dir(
        &self,
        dir: &Path,
        origin: &[String],
        depth: usize,
        ctx: &mut ExtractContext,
    ) -> Result<()> {
        let canonical_dir = canonical(dir);
        if ctx.excluded.as_deref() == Some(canonical_dir.as_path()) {
            debug!("Not walking output directory {}", dir.display());
            return Ok(());
        }
        if !ctx.visited_dirs.insert(canonical_dir) {
            trace!("Directory {} already walked", dir.display());
            return Ok(());
        }

        let mut entries: Vec<PathBuf> = fs::read_dir(dir)
            .with_path(dir, "read directory")?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .collect();
        entries.sort();

        for path in entries {
            if path.is_dir() {
                if let Err(e) = self.walk_dir(&path, origin, depth, ctx) {
                    warn!("{e}");
                    ctx.fail(&path, &e);
                }
            } else {
                self.process_artifact(&path, origin, depth, ctx);
            }
        }
        Ok(())
    }

    /// Dispatch a single artifact. Never fails; outcomes land in `ctx`.
    pub fn process_artifact(
        &self,
        path: &Path,
        origin: &[String],
        depth: usize,
        ctx: &mut ExtractContext,
    ) {
        if !ctx.processed.insert(canonical(path)) {
            trace!("Skipping already processed {}", path.display());
            ctx.skip(path, SkipReason::Duplicate);
            return;
        }
        ctx.stats.files_processed += 1;

        if depth > self.config.max_depth {
            warn!(
                "Skipping {}: nesting depth {} exceeds {}",
                path.display(),
                depth,
                self.config.max_depth
            );
            ctx.skip(path, SkipReason::DepthLimit { depth });
            return;
        }

        match fs::metadata(path) {
            Ok(meta) if meta.len() > self.config.max_file_size => {
                warn!("Skipping {}: {} bytes", path.display(), meta.len());
                ctx.skip(path, SkipReason::TooLarge { bytes: meta.len() });
                return;
            }
            Ok(_) => {}
            Err(e) => {
                let err = SiftError::io(path.display().to_string(), "stat", e);
                warn!("{err}");
                ctx.fail(path, &err);
                return;
            }
        }

        let kind = match ArtifactKind::from_path(path) {
            Some(kind) => Some(kind),
            None => self.sniff(path),
        };
        let Some(kind) = kind else {
            debug!("Unrecognized artifact {}", path.display());
            ctx.skip(path, SkipReason::Unrecognized);
            return;
        };

        trace!("{} resolved as {}", path.display(), kind.label());
        if let Err(e) = self.handle(kind, path, origin, depth, ctx) {
            warn!("{e}");
            ctx.fail(path, &e);
        }
    }

    /// Content-based resolution for files without a usable extension.
    fn sniff(&self, path: &Path) -> Option<ArtifactKind> {
        let window = self.config.sniff_bytes.max(TAR_MAGIC_OFFSET + 8);
        let prefix = match read_prefix(path, window) {
            Ok(prefix) => prefix,
            Err(e) => {
                debug!("Could not sniff {}: {e}", path.display());
                return None;
            }
        };
        if let Some(kind) = sniff_prefix(&prefix, self.config.sniff_bytes) {
            return Some(kind);
        }
        if archive::probe_zip(path) {
            return Some(ArtifactKind::Zip);
        }
        if archive::probe_tar(path) {
            return Some(ArtifactKind::Tar);
        }
        None
    }

    fn handle(
        &self,
        kind: ArtifactKind,
        path: &Path,
        origin: &[String],
        depth: usize,
        ctx: &mut ExtractContext,
    ) -> Result<()> {
        if let Some(format) = kind.document_format() {
            return self.emit_document(path, format, origin, ctx);
        }
        match kind {
            ArtifactKind::Xml | ArtifactKind::Html => Ok(()),
            ArtifactKind::Zip => self.unpack(path, origin, depth, ctx, archive::unzip_into),
            ArtifactKind::Gzip => self.unpack(path, origin, depth, ctx, archive::gunzip_into),
            ArtifactKind::Tar | ArtifactKind::TarGz => {
                self.unpack(path, origin, depth, ctx, archive::untar_into)
            }
            ArtifactKind::Eml => self.unpack(path, origin, depth, ctx, mail::eml_attachments_into),
            ArtifactKind::Msg => self.unpack(path, origin, depth, ctx, mail::msg_attachments_into),
        }
    }

    /// Unpack a container into scratch space and walk the result one level deeper.
    fn unpack<F>(
        &self,
        path: &Path,
        origin: &[String],
        depth: usize,
        ctx: &mut ExtractContext,
        unpacker: F,
    ) -> Result<()>
    where
        F: FnOnce(&Path, &Path, u64) -> Result<Unpacked>,
    {
        let scratch = tempfile::Builder::new()
            .prefix("dmarcsift-")
            .tempdir()
            .with_path(path, "create scratch directory")?;

        let unpacked = unpacker(path, scratch.path(), self.config.max_file_size)?;
        ctx.stats.containers_unpacked += 1;
        debug!("Unpacked {} entries from {}", unpacked.written, path.display());
        for (name, bytes) in unpacked.oversized {
            let entry = path.join(name);
            warn!(
                "Skipping {}: over {} bytes once decompressed",
                entry.display(),
                self.config.max_file_size
            );
            ctx.skip(&entry, SkipReason::TooLarge { bytes });
        }

        let mut chain = origin.to_vec();
        chain.push(display_name(path));
        self.walk_dir(scratch.path(), &chain, depth + 1, ctx)
    }

    fn emit_document(
        &self,
        path: &Path,
        format: DocumentFormat,
        origin: &[String],
        ctx: &mut ExtractContext,
    ) -> Result<()> {
        let mut name = display_name(path);
        if !format.matches_extension(path) {
            name = format!("{name}.{}", format.extension());
        }
        let dest = copy_unique(path, &self.output_dir, &name)?;
        debug!("Extracted {} -> {}", path.display(), dest.display());

        ctx.stats.documents_extracted += 1;
        match format {
            DocumentFormat::Xml => ctx.stats.xml_documents += 1,
            DocumentFormat::Html => ctx.stats.html_documents += 1,
        }
        ctx.documents
            .push(FlatDocument::new(dest, format, origin.to_vec()));
        Ok(())
    }
}
