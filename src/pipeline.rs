//! Stage orchestration.
//!
//! A run threads one `RunReport` through the selected stages. The `all`
//! stage chains extraction, classification and both record extractors;
//! the single-stage variants start from a directory prepared by an earlier
//! run (extracted documents, or documents already filed in a bucket).

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, trace, warn};

use crate::aggregate::extract_aggregate;
use crate::artifact::FlatDocument;
use crate::classify::{ClassifiedDocument, ClassifyStats, ReportKind, classify, file_into_bucket};
use crate::cli::Stage;
use crate::config::{Config, OutputLayout};
use crate::errors::{IoResultExt, Result, SiftError};
use crate::events::{RunEvent, SkipReason, StageName};
use crate::extract::{ExtractContext, ExtractStats, Extractor};
use crate::forensic::extract_forensic;
use crate::records::{AggregateLedger, ForensicRecord};

/// Everything one run produced.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Documents written by the extraction stage.
    pub documents: Vec<FlatDocument>,
    pub extract: ExtractStats,
    pub classified: Vec<ClassifiedDocument>,
    pub classify: ClassifyStats,
    pub aggregate: AggregateLedger,
    pub forensic: Vec<ForensicRecord>,
    pub events: Vec<RunEvent>,
}

impl RunReport {
    pub fn unclassified(&self) -> impl Iterator<Item = &ClassifiedDocument> {
        self.classified
            .iter()
            .filter(|c| c.verdict.kind == ReportKind::Unclassified)
    }

    pub fn failure_count(&self) -> usize {
        self.events.iter().filter(|e| e.is_failure()).count()
    }

    pub fn skipped_count(&self) -> usize {
        self.events.len() - self.failure_count()
    }
}

/// Runs stages against one configuration.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: Config,
}

impl Pipeline {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.config.layout
    }

    /// Run `stage` on `input`. Only an unusable input directory (or output
    /// directory) is an error; everything per-document lands in events.
    pub fn run(&self, stage: Stage, input: &Path) -> Result<RunReport> {
        check_input(input)?;
        let mut report = RunReport::default();

        match stage {
            Stage::All => {
                let documents = self.extract_stage(input, &mut report)?;
                let filed = self.classify_stage(&documents, &mut report);
                self.aggregate_stage(&of_kind(&filed, ReportKind::Aggregate), &mut report);
                self.forensic_stage(&of_kind(&filed, ReportKind::Forensic), &mut report);
            }
            Stage::Extract => {
                self.extract_stage(input, &mut report)?;
            }
            Stage::Classify => {
                let documents = self.scan_documents(input, StageName::Classify, &mut report)?;
                self.classify_stage(&documents, &mut report);
            }
            Stage::Aggregate => {
                let documents = self.scan_documents(input, StageName::Aggregate, &mut report)?;
                self.aggregate_stage(&documents, &mut report);
            }
            Stage::Forensic => {
                let documents = self.scan_documents(input, StageName::Forensic, &mut report)?;
                self.forensic_stage(&documents, &mut report);
            }
        }

        info!(
            "Run finished: {} aggregate records ({} failed), {} forensic records, {} events",
            report.aggregate.records.len(),
            report.aggregate.failed.len(),
            report.forensic.len(),
            report.events.len()
        );
        Ok(report)
    }

    /// Unpack raw artifacts into the extraction directory.
    pub fn extract_stage(&self, input: &Path, report: &mut RunReport) -> Result<Vec<FlatDocument>> {
        let extractor = Extractor::new(self.config.extract.clone(), self.layout().extracted_dir());
        let mut ctx = ExtractContext::new();
        // The whole output tree, not only extracted/, stays out of the walk.
        let root = &self.layout().root;
        fs::create_dir_all(root).with_path(root, "create directory")?;
        ctx.exclude(root);
        extractor.extract_with(input, &mut ctx)?;

        let extraction = ctx.into_report();
        report.extract = extraction.stats;
        report.events.extend(extraction.events);
        report.documents = extraction.documents.clone();
        Ok(extraction.documents)
    }

    /// Classify and file each document. Returns the filed copies with their
    /// kind; a document that cannot be copied is a failure event.
    pub fn classify_stage(
        &self,
        documents: &[FlatDocument],
        report: &mut RunReport,
    ) -> Vec<(ReportKind, FlatDocument)> {
        info!("Classifying {} documents", documents.len());
        let mut filed = Vec::with_capacity(documents.len());

        for doc in documents {
            let verdict = classify(doc);
            match file_into_bucket(&doc.path, verdict.kind, self.layout()) {
                Ok(destination) => {
                    report.classify.record(verdict.kind);
                    filed.push((
                        verdict.kind,
                        FlatDocument::new(destination.clone(), doc.format, doc.origin.clone()),
                    ));
                    report.classified.push(ClassifiedDocument {
                        source: doc.path.clone(),
                        verdict,
                        destination,
                    });
                }
                Err(e) => {
                    warn!("Could not file {}: {e}", doc.path.display());
                    report
                        .events
                        .push(RunEvent::failed(StageName::Classify, &doc.path, &e));
                }
            }
        }

        info!(
            "Classified: {} aggregate, {} forensic, {} unclassified",
            report.classify.aggregate, report.classify.forensic, report.classify.unclassified
        );
        filed
    }

    pub fn aggregate_stage(&self, documents: &[FlatDocument], report: &mut RunReport) {
        info!("Extracting aggregate records from {} documents", documents.len());
        for doc in documents {
            match extract_aggregate(doc) {
                Ok(records) => {
                    if records.is_empty() {
                        debug!("{}: no record rows", doc.path.display());
                    }
                    report.aggregate.extend(records);
                }
                Err(e) => {
                    warn!("{e}");
                    report
                        .events
                        .push(RunEvent::failed(StageName::Aggregate, &doc.path, &e));
                }
            }
        }
    }

    pub fn forensic_stage(&self, documents: &[FlatDocument], report: &mut RunReport) {
        info!("Extracting forensic records from {} documents", documents.len());
        for doc in documents {
            match extract_forensic(doc) {
                Ok(record) => report.forensic.push(record),
                Err(e) => {
                    warn!("{e}");
                    report
                        .events
                        .push(RunEvent::failed(StageName::Forensic, &doc.path, &e));
                }
            }
        }
    }

    /// Collect XML/HTML documents below `dir` in name order. Bucket
    /// directories other than `dir` itself are not descended into, so
    /// pointing a stage at the output root does not re-read filed copies.
    pub fn scan_documents(
        &self,
        dir: &Path,
        stage: StageName,
        report: &mut RunReport,
    ) -> Result<Vec<FlatDocument>> {
        check_input(dir)?;
        let input = canonical(dir);
        let layout = self.layout();
        let mut excluded: HashSet<PathBuf> = [
            layout.extracted_dir(),
            layout.aggregate_dir(),
            layout.forensic_dir(),
            layout.unclassified_dir(),
        ]
        .iter()
        .map(|p| canonical(p))
        .collect();
        excluded.remove(&input);

        let mut scan = Scan {
            stage,
            excluded,
            visited: HashSet::new(),
            documents: Vec::new(),
        };
        scan.walk(dir, report)?;
        debug!("Found {} documents in {}", scan.documents.len(), dir.display());
        Ok(scan.documents)
    }
}

struct Scan {
    stage: StageName,
    excluded: HashSet<PathBuf>,
    visited: HashSet<PathBuf>,
    documents: Vec<FlatDocument>,
}

impl Scan {
    fn walk(&mut self, dir: &Path, report: &mut RunReport) -> Result<()> {
        let canonical_dir = canonical(dir);
        if self.excluded.contains(&canonical_dir) || !self.visited.insert(canonical_dir) {
            trace!("Not descending into {}", dir.display());
            return Ok(());
        }

        let mut entries: Vec<PathBuf> = fs::read_dir(dir)
            .with_path(dir, "read directory")?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .collect();
        entries.sort();

        for path in entries {
            if path.is_dir() {
                if let Err(e) = self.walk(&path, report) {
                    warn!("{e}");
                    report.events.push(RunEvent::failed(self.stage, &path, &e));
                }
            } else if let Some(doc) = FlatDocument::from_path(&path) {
                self.documents.push(doc);
            } else {
                debug!("Ignoring non-document {}", path.display());
                report
                    .events
                    .push(RunEvent::skipped(self.stage, &path, SkipReason::Unrecognized));
            }
        }
        Ok(())
    }
}

fn of_kind(filed: &[(ReportKind, FlatDocument)], kind: ReportKind) -> Vec<FlatDocument> {
    filed
        .iter()
        .filter(|(k, _)| *k == kind)
        .map(|(_, doc)| doc.clone())
        .collect()
}

fn check_input(dir: &Path) -> Result<()> {
    if !dir.exists() {
        return Err(SiftError::input_not_found(dir));
    }
    if !dir.is_dir() {
        return Err(SiftError::input_not_directory(dir));
    }
    Ok(())
}

fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
