//! Two-track report classifier.
//!
//! * XML documents go through an ordered table of structural rules: the first
//!   rule whose required elements are all present decides the kind.
//! * HTML documents are scored against a weighted rule table (keywords plus
//!   structural predicates). The strictly higher non-zero score wins; a tie
//!   falls back to keywords in the file name.
//!
//! Classification never fails: unreadable or unparsable documents simply end
//! up `Unclassified` with the reason recorded in the verdict's signal.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::artifact::{DocumentFormat, FlatDocument, display_name};
use crate::config::OutputLayout;
use crate::errors::Result;
use crate::markup::HtmlDocument;
use crate::storage::copy_unique;

/// The two disjoint report kinds, plus the catch-all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    /// RUA: per-source-IP authentication summary over a time window.
    Aggregate,
    /// RUF: details of a single failing message.
    Forensic,
    Unclassified,
}

impl std::fmt::Display for ReportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReportKind::Aggregate => "aggregate",
            ReportKind::Forensic => "forensic",
            ReportKind::Unclassified => "unclassified",
        };
        f.write_str(s)
    }
}

/// Evidence behind a verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "track", rename_all = "snake_case")]
pub enum Signal {
    /// A structural XML rule matched.
    Structural { rule: String },
    /// HTML scores decided.
    Heuristic { aggregate_score: u32, forensic_score: u32 },
    /// HTML scores tied; the file name decided.
    FilenameHint {
        keyword: String,
        aggregate_score: u32,
        forensic_score: u32,
    },
    /// Nothing matched.
    NoMatch,
    /// The document could not be read or parsed.
    Unreadable { reason: String },
    /// Neither XML nor HTML.
    UnsupportedFormat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Verdict {
    pub kind: ReportKind,
    #[serde(flatten)]
    pub signal: Signal,
}

impl Verdict {
    fn new(kind: ReportKind, signal: Signal) -> Self {
        Self { kind, signal }
    }

    fn unclassified(signal: Signal) -> Self {
        Self::new(ReportKind::Unclassified, signal)
    }
}

// ---------------------------------------------------------------------------
// Rule tables
// ---------------------------------------------------------------------------

/// An XML rule: every `requires` element must appear below the root (and the
/// root must be named `root` when set).
#[derive(Debug, Clone, Copy)]
pub struct StructuralRule {
    pub name: &'static str,
    pub kind: ReportKind,
    pub root: Option<&'static str>,
    pub requires: &'static [&'static str],
}

/// Evaluated in order; first match wins.
pub const STRUCTURAL_RULES: &[StructuralRule] = &[
    StructuralRule {
        name: "report_metadata+record",
        kind: ReportKind::Aggregate,
        root: None,
        requires: &["report_metadata", "record"],
    },
    StructuralRule {
        name: "auth_failure",
        kind: ReportKind::Forensic,
        root: None,
        requires: &["auth_failure"],
    },
    StructuralRule {
        name: "feedback/policy_published+record",
        kind: ReportKind::Aggregate,
        root: Some("feedback"),
        requires: &["policy_published", "record"],
    },
    StructuralRule {
        name: "feedback/original_message",
        kind: ReportKind::Forensic,
        root: Some("feedback"),
        requires: &["original_message"],
    },
];

/// A condition over an HTML document's facts.
#[derive(Debug, Clone, Copy)]
pub enum Predicate {
    /// Lower-cased visible text contains the phrase.
    Contains(&'static str),
    /// Lower-cased visible text contains every phrase.
    ContainsAll(&'static [&'static str]),
    /// Some table has more than this many rows.
    TableRowsOver(usize),
}

#[derive(Debug, Clone, Copy)]
pub struct ScoringRule {
    pub kind: ReportKind,
    pub predicate: Predicate,
    pub weight: u32,
}

const fn keyword(kind: ReportKind, phrase: &'static str) -> ScoringRule {
    ScoringRule {
        kind,
        predicate: Predicate::Contains(phrase),
        weight: 1,
    }
}

pub const SCORING_RULES: &[ScoringRule] = &[
    keyword(ReportKind::Aggregate, "aggregate report"),
    keyword(ReportKind::Aggregate, "aggregate feedback"),
    keyword(ReportKind::Aggregate, "report metadata"),
    keyword(ReportKind::Aggregate, "policy published"),
    keyword(ReportKind::Aggregate, "source ip"),
    keyword(ReportKind::Aggregate, "message count"),
    keyword(ReportKind::Aggregate, "policy evaluated"),
    keyword(ReportKind::Aggregate, "dmarc aggregate"),
    ScoringRule {
        kind: ReportKind::Aggregate,
        predicate: Predicate::TableRowsOver(5),
        weight: 2,
    },
    keyword(ReportKind::Forensic, "forensic report"),
    keyword(ReportKind::Forensic, "failure report"),
    keyword(ReportKind::Forensic, "auth failure"),
    keyword(ReportKind::Forensic, "authentication failure"),
    keyword(ReportKind::Forensic, "original message"),
    keyword(ReportKind::Forensic, "message headers"),
    keyword(ReportKind::Forensic, "delivery result"),
    keyword(ReportKind::Forensic, "authentication-results"),
    keyword(ReportKind::Forensic, "forensic feedback"),
    keyword(ReportKind::Forensic, "dmarc forensic"),
    ScoringRule {
        kind: ReportKind::Forensic,
        predicate: Predicate::ContainsAll(&["received:", "from:", "subject:"]),
        weight: 2,
    },
];

/// Tie-breaking file name keywords, checked in order.
pub const FILENAME_HINTS: &[(&str, ReportKind)] = &[
    ("aggregate", ReportKind::Aggregate),
    ("rua", ReportKind::Aggregate),
    ("forensic", ReportKind::Forensic),
    ("ruf", ReportKind::Forensic),
    ("failure", ReportKind::Forensic),
];

/// What the scoring rules look at.
#[derive(Debug, Clone, Default)]
pub struct HtmlFacts {
    /// Lower-cased visible text.
    pub text: String,
    /// Row count of the largest table.
    pub max_table_rows: usize,
}

impl HtmlFacts {
    pub fn from_source(source: &str) -> Self {
        let doc = HtmlDocument::parse(source);
        let max_table_rows = doc.tables().iter().map(|t| t.row_count).max().unwrap_or(0);
        Self {
            text: doc.visible_text().to_lowercase(),
            max_table_rows,
        }
    }
}

impl Predicate {
    pub fn holds(&self, facts: &HtmlFacts) -> bool {
        match self {
            Predicate::Contains(phrase) => facts.text.contains(phrase),
            Predicate::ContainsAll(phrases) => phrases.iter().all(|p| facts.text.contains(p)),
            Predicate::TableRowsOver(n) => facts.max_table_rows > *n,
        }
    }
}

/// Sum of rule weights per kind: `(aggregate, forensic)`.
pub fn score(facts: &HtmlFacts) -> (u32, u32) {
    SCORING_RULES
        .iter()
        .filter(|rule| rule.predicate.holds(facts))
        .fold((0, 0), |(agg, fo), rule| match rule.kind {
            ReportKind::Aggregate => (agg + rule.weight, fo),
            ReportKind::Forensic => (agg, fo + rule.weight),
            ReportKind::Unclassified => (agg, fo),
        })
}

// ---------------------------------------------------------------------------
// Tracks
// ---------------------------------------------------------------------------

/// Structural track over XML source.
pub fn classify_xml(source: &str) -> Verdict {
    let doc = match roxmltree::Document::parse(source) {
        Ok(doc) => doc,
        Err(e) => {
            return Verdict::unclassified(Signal::Unreadable {
                reason: e.to_string(),
            });
        }
    };
    let root = doc.root_element();
    let present: HashSet<&str> = root
        .descendants()
        .skip(1)
        .filter(|n| n.is_element())
        .map(|n| n.tag_name().name())
        .collect();
    let root_name = root.tag_name().name();

    STRUCTURAL_RULES
        .iter()
        .find(|rule| {
            rule.root.is_none_or(|r| r == root_name)
                && rule.requires.iter().all(|el| present.contains(el))
        })
        .map(|rule| {
            Verdict::new(
                rule.kind,
                Signal::Structural {
                    rule: rule.name.to_string(),
                },
            )
        })
        .unwrap_or_else(|| Verdict::unclassified(Signal::NoMatch))
}

/// Heuristic track over HTML source; `file_name` breaks ties.
pub fn classify_html(source: &str, file_name: &str) -> Verdict {
    let facts = HtmlFacts::from_source(source);
    let (aggregate_score, forensic_score) = score(&facts);

    if aggregate_score > forensic_score && aggregate_score > 0 {
        return Verdict::new(
            ReportKind::Aggregate,
            Signal::Heuristic {
                aggregate_score,
                forensic_score,
            },
        );
    }
    if forensic_score > aggregate_score && forensic_score > 0 {
        return Verdict::new(
            ReportKind::Forensic,
            Signal::Heuristic {
                aggregate_score,
                forensic_score,
            },
        );
    }

    let lowered = file_name.to_lowercase();
    FILENAME_HINTS
        .iter()
        .find(|(kw, _)| lowered.contains(kw))
        .map(|(kw, kind)| {
            Verdict::new(
                *kind,
                Signal::FilenameHint {
                    keyword: kw.to_string(),
                    aggregate_score,
                    forensic_score,
                },
            )
        })
        .unwrap_or_else(|| Verdict::unclassified(Signal::NoMatch))
}

/// Classify an extracted document. Deterministic; reads the file only.
pub fn classify(doc: &FlatDocument) -> Verdict {
    let source = match doc.read_text() {
        Ok(source) => source,
        Err(e) => {
            warn!("Could not read {}: {e}", doc.path.display());
            return Verdict::unclassified(Signal::Unreadable {
                reason: e.to_string(),
            });
        }
    };
    let verdict = match doc.format {
        DocumentFormat::Xml => classify_xml(&source),
        DocumentFormat::Html => classify_html(&source, &doc.file_name()),
    };
    debug!("{} -> {} ({:?})", doc.path.display(), verdict.kind, verdict.signal);
    verdict
}

/// Classify any file; names that are neither XML nor HTML are unsupported.
pub fn classify_path(path: &Path) -> (Option<FlatDocument>, Verdict) {
    match FlatDocument::from_path(path) {
        Some(doc) => {
            let verdict = classify(&doc);
            (Some(doc), verdict)
        }
        None => (None, Verdict::unclassified(Signal::UnsupportedFormat)),
    }
}

// ---------------------------------------------------------------------------
// Filing
// ---------------------------------------------------------------------------

/// Bucket directory for a kind.
pub fn bucket_dir(layout: &OutputLayout, kind: ReportKind) -> PathBuf {
    match kind {
        ReportKind::Aggregate => layout.aggregate_dir(),
        ReportKind::Forensic => layout.forensic_dir(),
        ReportKind::Unclassified => layout.unclassified_dir(),
    }
}

/// Copy `source` into the bucket for `kind` under a collision-safe name.
/// The source file stays where it is.
pub fn file_into_bucket(source: &Path, kind: ReportKind, layout: &OutputLayout) -> Result<PathBuf> {
    copy_unique(source, &bucket_dir(layout, kind), &display_name(source))
}

/// A classified document and where it was filed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ClassifiedDocument {
    /// File that was classified.
    pub source: PathBuf,
    #[serde(flatten)]
    pub verdict: Verdict,
    /// Copy inside the kind's bucket.
    pub destination: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ClassifyStats {
    pub aggregate: usize,
    pub forensic: usize,
    pub unclassified: usize,
}

impl ClassifyStats {
    pub fn record(&mut self, kind: ReportKind) {
        match kind {
            ReportKind::Aggregate => self.aggregate += 1,
            ReportKind::Forensic => self.forensic += 1,
            ReportKind::Unclassified => self.unclassified += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.aggregate + self.forensic + self.unclassified
    }
}
