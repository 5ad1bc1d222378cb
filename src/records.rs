//! Normalized record schemas.
//!
//! Serialized field names are fixed (`Report_ID`, `Source_IP`, …) so every
//! consumer sees the same columns. No field is ever omitted: missing strings
//! are the literal `"Unknown"`, missing numbers `0`, missing flags `false`.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Placeholder for any string field that could not be recovered.
pub const UNKNOWN: &str = "Unknown";

pub fn unknown() -> String {
    UNKNOWN.to_string()
}

/// `value` or the placeholder.
pub fn or_unknown(value: Option<String>) -> String {
    value.unwrap_or_else(unknown)
}

/// One row per (report, source IP, disposition) of an aggregate report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AggregateRecord {
    #[serde(rename = "Report_ID")]
    pub report_id: String,
    /// Reporting organization.
    #[serde(rename = "Provider")]
    pub provider: String,
    #[serde(rename = "Contact_Email")]
    pub contact_email: String,
    #[serde(rename = "Date_Begin")]
    pub date_begin: String,
    #[serde(rename = "Date_End")]
    pub date_end: String,
    /// Domain the published policy applies to.
    #[serde(rename = "Domain")]
    pub domain: String,
    #[serde(rename = "Source_IP")]
    pub source_ip: String,
    #[serde(rename = "Count")]
    pub count: u64,
    #[serde(rename = "Disposition")]
    pub disposition: String,
    /// Policy-evaluated DKIM outcome as reported.
    #[serde(rename = "DKIM_Result")]
    pub dkim_result: String,
    #[serde(rename = "SPF_Result")]
    pub spf_result: String,
    /// Derived from the raw authentication results, never copied from input.
    #[serde(rename = "DKIM_Pass")]
    pub dkim_pass: bool,
    #[serde(rename = "SPF_Pass")]
    pub spf_pass: bool,
    #[serde(rename = "Header_From")]
    pub header_from: String,
    #[serde(rename = "Envelope_From")]
    pub envelope_from: String,
    #[serde(rename = "Policy_P")]
    pub policy_p: String,
    #[serde(rename = "Policy_SP")]
    pub policy_sp: String,
    #[serde(rename = "Policy_ADKIM")]
    pub policy_adkim: String,
    #[serde(rename = "Policy_ASPF")]
    pub policy_aspf: String,
    #[serde(rename = "Policy_PCT")]
    pub policy_pct: String,
}

impl Default for AggregateRecord {
    fn default() -> Self {
        Self {
            report_id: unknown(),
            provider: unknown(),
            contact_email: unknown(),
            date_begin: unknown(),
            date_end: unknown(),
            domain: unknown(),
            source_ip: unknown(),
            count: 0,
            disposition: unknown(),
            dkim_result: unknown(),
            spf_result: unknown(),
            dkim_pass: false,
            spf_pass: false,
            header_from: unknown(),
            envelope_from: unknown(),
            policy_p: unknown(),
            policy_sp: unknown(),
            policy_adkim: unknown(),
            policy_aspf: unknown(),
            policy_pct: unknown(),
        }
    }
}

impl AggregateRecord {
    /// Either mechanism did not pass.
    pub fn is_failed(&self) -> bool {
        !self.dkim_pass || !self.spf_pass
    }
}

/// Records of all aggregate reports plus the subset that failed a mechanism.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AggregateLedger {
    pub records: Vec<AggregateRecord>,
    pub failed: Vec<AggregateRecord>,
}

impl AggregateLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record, mirroring it into `failed` when a pass flag is false.
    pub fn push(&mut self, record: AggregateRecord) {
        if record.is_failed() {
            self.failed.push(record.clone());
        }
        self.records.push(record);
    }

    pub fn extend(&mut self, records: impl IntoIterator<Item = AggregateRecord>) {
        for record in records {
            self.push(record);
        }
    }

    pub fn total_messages(&self) -> u64 {
        self.records.iter().map(|r| r.count).sum()
    }
}

/// One row per forensic report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ForensicRecord {
    #[serde(rename = "Report_ID")]
    pub report_id: String,
    #[serde(rename = "Feedback_Type")]
    pub feedback_type: String,
    #[serde(rename = "User_Agent")]
    pub user_agent: String,
    #[serde(rename = "Version")]
    pub version: String,
    #[serde(rename = "Source_IP")]
    pub source_ip: String,
    #[serde(rename = "Authentication_Results")]
    pub authentication_results: String,
    #[serde(rename = "Delivery_Result")]
    pub delivery_result: String,
    #[serde(rename = "Auth_Failure")]
    pub auth_failure: String,
    #[serde(rename = "Reported_Domain")]
    pub reported_domain: String,
    #[serde(rename = "Arrival_Date")]
    pub arrival_date: String,
    #[serde(rename = "From")]
    pub from: String,
    #[serde(rename = "To")]
    pub to: String,
    #[serde(rename = "Subject")]
    pub subject: String,
    #[serde(rename = "Date")]
    pub date: String,
    #[serde(rename = "Message_ID")]
    pub message_id: String,
    #[serde(rename = "DMARC_Policy")]
    pub dmarc_policy: String,
    #[serde(rename = "SPF_Failed")]
    pub spf_failed: bool,
    #[serde(rename = "DKIM_Failed")]
    pub dkim_failed: bool,
    /// Local wall-clock time the record was produced.
    #[serde(rename = "Processed_Date")]
    pub processed_date: String,
}

impl Default for ForensicRecord {
    fn default() -> Self {
        Self {
            report_id: unknown(),
            feedback_type: unknown(),
            user_agent: unknown(),
            version: unknown(),
            source_ip: unknown(),
            authentication_results: unknown(),
            delivery_result: unknown(),
            auth_failure: unknown(),
            reported_domain: unknown(),
            arrival_date: unknown(),
            from: unknown(),
            to: unknown(),
            subject: unknown(),
            date: unknown(),
            message_id: unknown(),
            dmarc_policy: unknown(),
            spf_failed: false,
            dkim_failed: false,
            processed_date: unknown(),
        }
    }
}
