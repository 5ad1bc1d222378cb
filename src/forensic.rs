//! Forensic (RUF) record extraction.
//!
//! Exactly one record per document. Each text field is declared once in a
//! lookup table per source shape (element names for XML, a regex over the
//! visible text for HTML); whatever a table cannot fill keeps the shared
//! `"Unknown"` default from `ForensicRecord::default()`.

use chrono::Local;
use once_cell::sync::Lazy;
use regex::Regex;
use roxmltree::Node;
use tracing::debug;

use crate::aggregate::DATE_FORMAT;
use crate::artifact::{DocumentFormat, FlatDocument};
use crate::errors::{Result, SiftError};
use crate::headers::MessageHeaders;
use crate::markup::{HtmlDocument, descendant_text, find_descendant};
use crate::records::{ForensicRecord, UNKNOWN};

/// Text fields of a forensic record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    ReportId,
    FeedbackType,
    UserAgent,
    Version,
    SourceIp,
    AuthenticationResults,
    DeliveryResult,
    AuthFailure,
    ReportedDomain,
    ArrivalDate,
    From,
    To,
    Subject,
    Date,
    MessageId,
    DmarcPolicy,
}

impl Field {
    fn value(self, record: &ForensicRecord) -> &str {
        match self {
            Field::ReportId => &record.report_id,
            Field::FeedbackType => &record.feedback_type,
            Field::UserAgent => &record.user_agent,
            Field::Version => &record.version,
            Field::SourceIp => &record.source_ip,
            Field::AuthenticationResults => &record.authentication_results,
            Field::DeliveryResult => &record.delivery_result,
            Field::AuthFailure => &record.auth_failure,
            Field::ReportedDomain => &record.reported_domain,
            Field::ArrivalDate => &record.arrival_date,
            Field::From => &record.from,
            Field::To => &record.to,
            Field::Subject => &record.subject,
            Field::Date => &record.date,
            Field::MessageId => &record.message_id,
            Field::DmarcPolicy => &record.dmarc_policy,
        }
    }

    fn slot(self, record: &mut ForensicRecord) -> &mut String {
        match self {
            Field::ReportId => &mut record.report_id,
            Field::FeedbackType => &mut record.feedback_type,
            Field::UserAgent => &mut record.user_agent,
            Field::Version => &mut record.version,
            Field::SourceIp => &mut record.source_ip,
            Field::AuthenticationResults => &mut record.authentication_results,
            Field::DeliveryResult => &mut record.delivery_result,
            Field::AuthFailure => &mut record.auth_failure,
            Field::ReportedDomain => &mut record.reported_domain,
            Field::ArrivalDate => &mut record.arrival_date,
            Field::From => &mut record.from,
            Field::To => &mut record.to,
            Field::Subject => &mut record.subject,
            Field::Date => &mut record.date,
            Field::MessageId => &mut record.message_id,
            Field::DmarcPolicy => &mut record.dmarc_policy,
        }
    }

    fn is_unknown(self, record: &ForensicRecord) -> bool {
        self.value(record) == UNKNOWN
    }

    /// Store `value` if it is non-empty after trimming.
    fn set(self, record: &mut ForensicRecord, value: &str) {
        let value = value.trim();
        if !value.is_empty() {
            *self.slot(record) = value.to_string();
        }
    }
}

/// Fixed label order when composing `Auth_Failure`.
const MECHANISMS: [&str; 2] = ["SPF", "DKIM"];

/// Which of SPF / DKIM a piece of failure text names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FailedMechanisms {
    pub spf: bool,
    pub dkim: bool,
}

impl FailedMechanisms {
    /// Case-insensitive mention of each mechanism.
    pub fn mentioned_in(text: &str) -> Self {
        let lowered = text.to_lowercase();
        Self {
            spf: lowered.contains("spf"),
            dkim: lowered.contains("dkim"),
        }
    }

    /// Mechanisms that share a line or `;`-separated clause with a failure word.
    pub fn failing_in(text: &str) -> Self {
        text.split(['\n', ';'])
            .filter(|clause| FAIL_WORD.is_match(clause))
            .map(Self::mentioned_in)
            .fold(Self::default(), |acc, m| Self {
                spf: acc.spf || m.spf,
                dkim: acc.dkim || m.dkim,
            })
    }

    fn apply(self, record: &mut ForensicRecord) {
        record.spf_failed = self.spf;
        record.dkim_failed = self.dkim;
    }
}

/// A failure word, so that "failover" or "failsafe" do not count.
static FAIL_WORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:soft)?fail(?:s|ed|ure|ures)?\b|\b(?:perm|temp)error\b")
        .expect("valid regex")
});

// ---------------------------------------------------------------------------
// XML
// ---------------------------------------------------------------------------

/// XML lookups: first non-empty descendant among `elements` wins.
pub struct XmlField {
    pub field: Field,
    pub elements: &'static [&'static str],
}

pub const XML_FIELDS: &[XmlField] = &[
    XmlField { field: Field::ReportId, elements: &["report_id"] },
    XmlField { field: Field::FeedbackType, elements: &["feedback_type"] },
    XmlField { field: Field::UserAgent, elements: &["user_agent"] },
    XmlField { field: Field::Version, elements: &["version"] },
    XmlField { field: Field::SourceIp, elements: &["source_ip"] },
    XmlField { field: Field::AuthenticationResults, elements: &["auth_results", "authentication_results"] },
    XmlField { field: Field::DeliveryResult, elements: &["delivery_result"] },
    XmlField { field: Field::AuthFailure, elements: &["auth_failure"] },
    XmlField { field: Field::ReportedDomain, elements: &["reported_domain"] },
    XmlField { field: Field::ArrivalDate, elements: &["arrival_date"] },
    XmlField { field: Field::From, elements: &["from"] },
    XmlField { field: Field::To, elements: &["to"] },
    XmlField { field: Field::Subject, elements: &["subject"] },
    XmlField { field: Field::Date, elements: &["date"] },
    XmlField { field: Field::MessageId, elements: &["message_id"] },
    XmlField { field: Field::DmarcPolicy, elements: &["dmarc_policy", "policy_evaluated"] },
];

pub fn forensic_from_xml(
    source: &str,
    processed_date: &str,
) -> std::result::Result<ForensicRecord, roxmltree::Error> {
    let doc = roxmltree::Document::parse(source)?;
    let root = doc.root_element();
    let mut record = ForensicRecord::default();

    for lookup in XML_FIELDS {
        if let Some(value) = lookup
            .elements
            .iter()
            .find_map(|name| descendant_text(root, name))
        {
            lookup.field.set(&mut record, &value);
        }
    }

    fill_from_original_message(root, &mut record);

    let raw_failure = descendant_text(root, "auth_failure").unwrap_or_default();
    FailedMechanisms::mentioned_in(&raw_failure).apply(&mut record);
    compose_auth_failure(&mut record);

    record.processed_date = processed_date.to_string();
    Ok(record)
}

/// Header fields missing as dedicated elements are read from the free-text
/// `original_message` block.
fn fill_from_original_message(root: Node<'_, '_>, record: &mut ForensicRecord) {
    let Some(block) = find_descendant(root, "original_message").and_then(|n| n.text()) else {
        return;
    };
    let headers = MessageHeaders::scan_block(block);
    let found = [
        (Field::From, headers.from),
        (Field::To, headers.to),
        (Field::Subject, headers.subject),
        (Field::Date, headers.date),
        (Field::MessageId, headers.message_id),
    ];
    for (field, value) in found {
        if let Some(value) = value
            && field.is_unknown(record)
        {
            field.set(record, &value);
        }
    }
}

// ---------------------------------------------------------------------------
// HTML
// ---------------------------------------------------------------------------

/// HTML lookups: capture group 1 of `pattern` over the visible text.
pub struct HtmlField {
    pub field: Field,
    pub pattern: Regex,
    pub lowercase: bool,
}

impl HtmlField {
    fn new(field: Field, pattern: &str) -> Self {
        Self {
            field,
            pattern: Regex::new(pattern).expect("valid regex"),
            lowercase: false,
        }
    }

    fn lowercased(mut self) -> Self {
        self.lowercase = true;
        self
    }
}

pub static HTML_FIELDS: Lazy<Vec<HtmlField>> = Lazy::new(|| {
    vec![
        HtmlField::new(Field::ReportId, r"(?i)report[_\s-]*id[:\s]*([^\s<]+)"),
        HtmlField::new(Field::FeedbackType, r"(?i)feedback[_\s-]*type[:\s]*([\w-]+)").lowercased(),
        HtmlField::new(Field::UserAgent, r"(?i)user[_\s-]*agent[:\s]*([^\n]+)"),
        HtmlField::new(Field::Version, r"(?i)\bversion[:\s]*(\d[\w.]*)"),
        HtmlField::new(
            Field::SourceIp,
            r"(?i)(?:source[_\s]*ip|from[_\s]*ip)[:\s]*(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})",
        ),
        HtmlField::new(
            Field::AuthenticationResults,
            r"(?i)authentication[_\s-]*results?[:\s]*([^\n]+)",
        ),
        HtmlField::new(Field::DeliveryResult, r"(?i)delivery[_\s-]*result[:\s]*([^\n]+)"),
        HtmlField::new(Field::AuthFailure, r"(?i)auth[_\s-]*failure[ \t]*:[ \t]*([^\n]+)"),
        HtmlField::new(
            Field::ReportedDomain,
            r"(?i)(?:reported[_\s]*domain|header[_\s]*from)[:\s]*@?([a-z0-9.-]+\.[a-z]{2,})",
        ),
        HtmlField::new(
            Field::ArrivalDate,
            r"(?i)(?:arrival[_\s-]*date|arrival|received[_\s-]*date|date)[:\s]*([^\n]+(?:\d{4}|[a-z]{3}\s+\d{4}))",
        ),
        HtmlField::new(
            Field::DmarcPolicy,
            r"(?i)dmarc[_\s-]*policy[:\s]*(none|quarantine|reject)",
        )
        .lowercased(),
    ]
});

pub fn forensic_from_html(source: &str, file_stem: &str, processed_date: &str) -> ForensicRecord {
    let text = HtmlDocument::parse(source).visible_text();
    let mut record = ForensicRecord::default();

    for lookup in HTML_FIELDS.iter() {
        if let Some(m) = lookup.pattern.captures(&text).and_then(|c| c.get(1)) {
            let value = if lookup.lowercase {
                m.as_str().to_lowercase()
            } else {
                m.as_str().to_string()
            };
            lookup.field.set(&mut record, &value);
        }
    }
    if Field::ReportId.is_unknown(&record) {
        Field::ReportId.set(&mut record, file_stem);
    }

    let headers = MessageHeaders::scan(&text);
    for (field, value) in [
        (Field::From, headers.from),
        (Field::To, headers.to),
        (Field::Subject, headers.subject),
        (Field::Date, headers.date),
        (Field::MessageId, headers.message_id),
    ] {
        if let Some(value) = value {
            field.set(&mut record, &value);
        }
    }

    // A labelled failure line is failure text already; otherwise look for a
    // mechanism next to a failure word anywhere in the document.
    let failed = if Field::AuthFailure.is_unknown(&record) {
        FailedMechanisms::failing_in(&text)
    } else {
        FailedMechanisms::mentioned_in(&record.auth_failure)
    };
    failed.apply(&mut record);
    compose_auth_failure(&mut record);

    record.processed_date = processed_date.to_string();
    record
}

/// Detected mechanisms win over the raw text ("SPF", "DKIM", "SPF, DKIM").
fn compose_auth_failure(record: &mut ForensicRecord) {
    let flags = [record.spf_failed, record.dkim_failed];
    let labels: Vec<&str> = MECHANISMS
        .iter()
        .zip(flags)
        .filter_map(|(label, failed)| failed.then_some(*label))
        .collect();
    if !labels.is_empty() {
        record.auth_failure = labels.join(", ");
    }
}

/// Local wall-clock stamp for `Processed_Date`.
pub fn processed_now() -> String {
    Local::now().format(DATE_FORMAT).to_string()
}

/// Extract the forensic record of one document.
pub fn extract_forensic(doc: &FlatDocument) -> Result<ForensicRecord> {
    let source = doc.read_text()?;
    let processed = processed_now();
    let record = match doc.format {
        DocumentFormat::Xml => forensic_from_xml(&source, &processed)
            .map_err(|e| SiftError::xml_parse(&doc.path, e))?,
        DocumentFormat::Html => forensic_from_html(&source, &doc.file_stem(), &processed),
    };
    debug!(
        "{}: forensic record {} (spf_failed={}, dkim_failed={})",
        doc.path.display(),
        record.report_id,
        record.spf_failed,
        record.dkim_failed
    );
    Ok(record)
}
