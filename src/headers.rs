//! Mail header line utilities.
//!
//! Forensic reports embed (parts of) the offending message as free text:
//! a header block inside an XML element, or header lines rendered into an
//! HTML page. These helpers recover single header values from such text
//! with pragmatic line regexes instead of a full MIME parse.

use once_cell::sync::Lazy;
use regex::Regex;

/// Headers recovered from an embedded message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageHeaders {
    pub from: Option<String>,
    pub to: Option<String>,
    pub subject: Option<String>,
    pub date: Option<String>,
    pub message_id: Option<String>,
}

impl MessageHeaders {
    /// Scan a raw header block, unfolding continuation lines first.
    pub fn scan_block(block: &str) -> Self {
        Self::scan(&unfold_headers(block))
    }

    /// Scan arbitrary text containing header lines (e.g. rendered HTML).
    pub fn scan(text: &str) -> Self {
        Self {
            from: header_value(text, Header::From),
            to: header_value(text, Header::To),
            subject: header_value(text, Header::Subject),
            date: header_value(text, Header::Date),
            message_id: header_value(text, Header::MessageId),
        }
    }
}

/// Header lines recovered from embedded messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Header {
    From,
    To,
    Subject,
    Date,
    MessageId,
}

impl Header {
    pub fn name(self) -> &'static str {
        match self {
            Header::From => "From",
            Header::To => "To",
            Header::Subject => "Subject",
            Header::Date => "Date",
            Header::MessageId => "Message-ID",
        }
    }

    fn pattern(self) -> &'static Regex {
        match self {
            Header::From => &FROM,
            Header::To => &TO,
            Header::Subject => &SUBJECT,
            Header::Date => &DATE,
            Header::MessageId => &MESSAGE_ID,
        }
    }
}

/// The name must start a line or follow a non-word, non-dash character, so
/// `From:` does not match inside `Envelope-From:`. The value runs to the end
/// of the line.
fn header_line(header: Header) -> Regex {
    Regex::new(&format!(
        r"(?im)(?:^|[^\w-]){}:[ \t]*([^\r\n]+)",
        regex::escape(header.name())
    ))
    .expect("valid regex")
}

static FROM: Lazy<Regex> = Lazy::new(|| header_line(Header::From));
static TO: Lazy<Regex> = Lazy::new(|| header_line(Header::To));
static SUBJECT: Lazy<Regex> = Lazy::new(|| header_line(Header::Subject));
static DATE: Lazy<Regex> = Lazy::new(|| header_line(Header::Date));
static MESSAGE_ID: Lazy<Regex> = Lazy::new(|| header_line(Header::MessageId));

/// Unfold headers: join continuation lines.
pub fn unfold_headers(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for line in raw.lines() {
        if line.starts_with(' ') || line.starts_with('\t') {
            out.push(' ');
            out.push_str(line.trim_start());
        } else {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(line.trim_end());
        }
    }
    out
}

/// First non-empty value of `header` (case-insensitive name).
pub fn header_value(text: &str, header: Header) -> Option<String> {
    header
        .pattern()
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .find(|v| !v.is_empty())
}
