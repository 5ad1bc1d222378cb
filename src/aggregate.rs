//! Aggregate (RUA) record extraction.
//!
//! XML reports are read structurally: report metadata and the published
//! policy once, then one record per `<record>` element. HTML reports are read
//! from their tables, with metadata recovered by pattern search over the
//! visible text.

use chrono::DateTime;
use once_cell::sync::Lazy;
use regex::Regex;
use roxmltree::Node;
use tracing::debug;

use crate::artifact::{DocumentFormat, FlatDocument};
use crate::errors::{Result, SiftError};
use crate::markup::{HtmlDocument, HtmlTable, child_text, find_descendant, find_descendants};
use crate::records::{AggregateRecord, or_unknown, unknown};

/// Timestamp rendering for numeric report dates (UTC).
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A table is a record table when its header text contains one of these.
const RECORD_TABLE_KEYWORDS: [&str; 5] = ["ip", "source", "count", "dkim", "spf"];

/// Minimum number of cells for a row to be read as a record.
const MIN_ROW_CELLS: usize = 3;

/// Report-level values shared by every record of one document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportContext {
    pub org_name: Option<String>,
    pub email: Option<String>,
    pub report_id: Option<String>,
    pub date_begin: Option<String>,
    pub date_end: Option<String>,
    pub domain: Option<String>,
    pub adkim: Option<String>,
    pub aspf: Option<String>,
    pub p: Option<String>,
    pub sp: Option<String>,
    pub pct: Option<String>,
}

impl ReportContext {
    /// A record carrying only the report-level fields.
    fn base_record(&self) -> AggregateRecord {
        AggregateRecord {
            report_id: or_unknown(self.report_id.clone()),
            provider: or_unknown(self.org_name.clone()),
            contact_email: or_unknown(self.email.clone()),
            date_begin: format_report_date(self.date_begin.as_deref()),
            date_end: format_report_date(self.date_end.as_deref()),
            domain: or_unknown(self.domain.clone()),
            policy_p: or_unknown(self.p.clone()),
            policy_sp: or_unknown(self.sp.clone()),
            policy_adkim: or_unknown(self.adkim.clone()),
            policy_aspf: or_unknown(self.aspf.clone()),
            policy_pct: or_unknown(self.pct.clone()),
            ..AggregateRecord::default()
        }
    }
}

/// Render a numeric Unix timestamp; anything else passes through unchanged.
pub fn format_report_date(raw: Option<&str>) -> String {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return unknown();
    };
    raw.parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map(|dt| dt.format(DATE_FORMAT).to_string())
        .unwrap_or_else(|| raw.to_string())
}

/// Extract every record of an aggregate report document.
pub fn extract_aggregate(doc: &FlatDocument) -> Result<Vec<AggregateRecord>> {
    let source = doc.read_text()?;
    let records = match doc.format {
        DocumentFormat::Xml => {
            aggregate_from_xml(&source).map_err(|e| SiftError::xml_parse(&doc.path, e))?
        }
        DocumentFormat::Html => aggregate_from_html(&source),
    };
    debug!("{}: {} aggregate records", doc.path.display(), records.len());
    Ok(records)
}

// ---------------------------------------------------------------------------
// XML
// ---------------------------------------------------------------------------

pub fn aggregate_from_xml(source: &str) -> std::result::Result<Vec<AggregateRecord>, roxmltree::Error> {
    let doc = roxmltree::Document::parse(source)?;
    let root = doc.root_element();
    let context = xml_context(root);

    Ok(find_descendants(root, "record")
        .map(|record| xml_record(record, &context))
        .collect())
}

fn xml_context(root: Node<'_, '_>) -> ReportContext {
    let mut ctx = ReportContext::default();
    if let Some(meta) = find_descendant(root, "report_metadata") {
        ctx.org_name = child_text(meta, "org_name");
        ctx.email = child_text(meta, "email");
        ctx.report_id = child_text(meta, "report_id");
        ctx.date_begin = child_text(meta, "date_range/begin");
        ctx.date_end = child_text(meta, "date_range/end");
    }
    if let Some(policy) = find_descendant(root, "policy_published") {
        ctx.domain = child_text(policy, "domain");
        ctx.adkim = child_text(policy, "adkim");
        ctx.aspf = child_text(policy, "aspf");
        ctx.p = child_text(policy, "p");
        ctx.sp = child_text(policy, "sp");
        ctx.pct = child_text(policy, "pct");
    }
    ctx
}

fn xml_record(record: Node<'_, '_>, context: &ReportContext) -> AggregateRecord {
    let row = find_descendant(record, "row");
    let evaluated = row.and_then(|r| find_descendant(r, "policy_evaluated"));
    let identifiers = find_descendant(record, "identifiers");
    let auth_results = find_descendant(record, "auth_results");

    AggregateRecord {
        source_ip: or_unknown(text(row, "source_ip")),
        count: text(row, "count").map(|c| parse_count(&c)).unwrap_or(0),
        disposition: or_unknown(text(evaluated, "disposition")),
        dkim_result: or_unknown(text(evaluated, "dkim")),
        spf_result: or_unknown(text(evaluated, "spf")),
        dkim_pass: auth_results.is_some_and(dkim_passes),
        spf_pass: auth_results.is_some_and(spf_passes),
        header_from: or_unknown(text(identifiers, "header_from")),
        envelope_from: or_unknown(text(identifiers, "envelope_from")),
        ..context.base_record()
    }
}

fn text(node: Option<Node<'_, '_>>, path: &str) -> Option<String> {
    node.and_then(|n| child_text(n, path))
}

/// Any DKIM result equal to "pass".
pub fn dkim_passes(auth_results: Node<'_, '_>) -> bool {
    find_descendants(auth_results, "dkim")
        .any(|dkim| child_text(dkim, "result").as_deref() == Some("pass"))
}

/// Only the first SPF result counts.
pub fn spf_passes(auth_results: Node<'_, '_>) -> bool {
    find_descendant(auth_results, "spf")
        .and_then(|spf| child_text(spf, "result"))
        .as_deref()
        == Some("pass")
}

/// Message count with thousands separators removed; 0 when unparsable.
pub fn parse_count(raw: &str) -> u64 {
    raw.trim().replace(',', "").parse().unwrap_or(0)
}

// ---------------------------------------------------------------------------
// HTML
// ---------------------------------------------------------------------------

static REPORT_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)report[_\s]*id[:\s]*([^\s<]+)").expect("valid regex"));
static ORGANIZATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)organization[:\s]*([^\n<]+)").expect("valid regex"));
static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)email[:\s]*([^\s<]+@[^\s<]+)").expect("valid regex"));
static DATE_PAIR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{4}-\d{2}-\d{2})[^\d\n]+(\d{4}-\d{2}-\d{2})").expect("valid regex")
});
static DOMAIN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)domain[:\s]*([^\s<]+\.[^\s<]+)").expect("valid regex"));
static POLICY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)policy[:\s]*(none|quarantine|reject)").expect("valid regex"));
static SUBDOMAIN_POLICY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bsp\b[:=\s]*(none|quarantine|reject)").expect("valid regex")
});
static ADKIM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\badkim\b[:=\s]*([rs])\b").expect("valid regex"));
static ASPF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\baspf\b[:=\s]*([rs])\b").expect("valid regex"));
static PCT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bpct\b[:=\s]*(\d{1,3})\b").expect("valid regex"));

fn capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Best-effort report context from rendered text.
pub fn html_context(text: &str) -> ReportContext {
    let (date_begin, date_end) = DATE_PAIR
        .captures(text)
        .map(|c| (Some(c[1].to_string()), Some(c[2].to_string())))
        .unwrap_or((None, None));
    ReportContext {
        org_name: capture(&ORGANIZATION, text),
        email: capture(&EMAIL, text),
        report_id: capture(&REPORT_ID, text),
        date_begin,
        date_end,
        domain: capture(&DOMAIN, text),
        adkim: capture(&ADKIM, text).map(|s| s.to_lowercase()),
        aspf: capture(&ASPF, text).map(|s| s.to_lowercase()),
        p: capture(&POLICY, text).map(|s| s.to_lowercase()),
        sp: capture(&SUBDOMAIN_POLICY, text).map(|s| s.to_lowercase()),
        pct: capture(&PCT, text),
    }
}

pub fn aggregate_from_html(source: &str) -> Vec<AggregateRecord> {
    let doc = HtmlDocument::parse(source);
    let context = html_context(&doc.visible_text());

    doc.tables()
        .iter()
        .filter(|table| is_record_table(table))
        .flat_map(|table| {
            table
                .rows
                .iter()
                .filter(|cells| cells.len() >= MIN_ROW_CELLS)
                .map(|cells| html_record(&table.headers, cells, &context))
                .collect::<Vec<_>>()
        })
        .collect()
}

fn is_record_table(table: &HtmlTable) -> bool {
    let line = table.header_line();
    RECORD_TABLE_KEYWORDS.iter().any(|kw| line.contains(kw))
}

/// Map cells onto fields by the keyword in the header at the same position.
fn html_record(headers: &[String], cells: &[String], context: &ReportContext) -> AggregateRecord {
    let mut record = context.base_record();
    for (header, value) in headers.iter().zip(cells) {
        if header.contains("ip") || header.contains("source") {
            record.source_ip = value.clone();
        } else if header.contains("count") || header.contains("messages") {
            record.count = parse_count(value);
        } else if header.contains("dkim") {
            record.dkim_result = value.to_lowercase();
            record.dkim_pass = record.dkim_result.contains("pass");
        } else if header.contains("spf") {
            record.spf_result = value.to_lowercase();
            record.spf_pass = record.spf_result.contains("pass");
        } else if header.contains("disposition") || header.contains("action") {
            record.disposition = value.to_lowercase();
        } else if header.contains("from") {
            if header.contains("envelope") && !header.contains("header") {
                record.envelope_from = value.clone();
            } else {
                record.header_from = value.clone();
            }
        }
    }
    record
}
