//! Structured output for JSON and YAML serialization.
//!
//! `SiftOutput` is the machine-readable view of one run: tool metadata, the
//! input that was analysed, per-stage statistics, the normalized records and
//! every per-artifact event. Field names of the records themselves are the
//! fixed column names (`Report_ID`, `Source_IP`, …).

use std::path::{Path, PathBuf};

use anyhow::Result;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::classify::{ClassifiedDocument, ClassifyStats};
use crate::cli::Stage;
use crate::events::RunEvent;
use crate::extract::ExtractStats;
use crate::pipeline::RunReport;
use crate::records::{AggregateRecord, ForensicRecord};

/// Root structure for all dmarcsift output in structured formats
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub struct SiftOutput {
    /// Tool version and metadata
    pub metadata: OutputMetadata,

    /// What was analysed and where results went
    pub input: InputInfo,

    pub statistics: RunStatistics,

    /// One row per source IP of every aggregate report
    pub aggregate_records: Vec<AggregateRecord>,

    /// Aggregate rows where DKIM or SPF did not pass
    pub failed_aggregate_records: Vec<AggregateRecord>,

    /// One row per forensic report
    pub forensic_records: Vec<ForensicRecord>,

    /// Documents neither track could place
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub unclassified: Vec<ClassifiedDocument>,

    /// Skipped and failed artifacts
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub events: Vec<RunEvent>,

    pub result: ResultSummary,
}

/// Tool metadata and versioning information
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub struct OutputMetadata {
    pub tool_name: String,
    pub version: String,

    /// Timestamp when the run finished
    pub generated_at: chrono::DateTime<chrono::Utc>,

    /// Version of this output format
    pub schema_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub struct InputInfo {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Stage selection the run used
    pub stage: String,
}

/// Per-stage counters
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub struct RunStatistics {
    pub extract: ExtractStats,
    pub classify: ClassifyStats,
    pub aggregate_records: usize,
    pub failed_aggregate_records: usize,
    /// Sum of `Count` over all aggregate rows
    pub total_messages: u64,
    pub forensic_records: usize,
    pub skipped_artifacts: usize,
    pub failed_artifacts: usize,
    pub total_time_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub struct ResultSummary {
    /// True when no artifact failed
    pub success: bool,
    pub records_found: usize,
}

impl SiftOutput {
    pub fn new(input_dir: &Path, output_dir: &Path, stage: Stage) -> Self {
        Self {
            metadata: OutputMetadata {
                tool_name: "dmarcsift".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                generated_at: chrono::Utc::now(),
                schema_version: "1.0.0".to_string(),
            },
            input: InputInfo {
                input_dir: input_dir.to_path_buf(),
                output_dir: output_dir.to_path_buf(),
                stage: stage.to_string(),
            },
            statistics: RunStatistics::default(),
            aggregate_records: Vec::new(),
            failed_aggregate_records: Vec::new(),
            forensic_records: Vec::new(),
            unclassified: Vec::new(),
            events: Vec::new(),
            result: ResultSummary {
                success: true,
                records_found: 0,
            },
        }
    }

    /// Fill records, statistics and events from a finished run.
    pub fn with_report(mut self, report: &RunReport, total_time_ms: u64) -> Self {
        self.statistics = RunStatistics {
            extract: report.extract.clone(),
            classify: report.classify.clone(),
            aggregate_records: report.aggregate.records.len(),
            failed_aggregate_records: report.aggregate.failed.len(),
            total_messages: report.aggregate.total_messages(),
            forensic_records: report.forensic.len(),
            skipped_artifacts: report.skipped_count(),
            failed_artifacts: report.failure_count(),
            total_time_ms,
        };
        self.aggregate_records = report.aggregate.records.clone();
        self.failed_aggregate_records = report.aggregate.failed.clone();
        self.forensic_records = report.forensic.clone();
        self.unclassified = report.unclassified().cloned().collect();
        self.events = report.events.clone();
        self.result = ResultSummary {
            success: report.failure_count() == 0,
            records_found: report.aggregate.records.len() + report.forensic.len(),
        };
        self
    }

    /// Generate JSON schema for this output format
    pub fn generate_json_schema() -> Result<String> {
        let schema = schemars::schema_for!(SiftOutput);
        Ok(serde_json::to_string_pretty(&schema)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SiftError;
    use crate::events::StageName;
    use crate::records::AggregateLedger;

    fn sample_report() -> RunReport {
        let mut aggregate = AggregateLedger::new();
        aggregate.push(AggregateRecord {
            report_id: "R1".to_string(),
            source_ip: "10.0.0.1".to_string(),
            count: 5,
            spf_pass: true,
            ..Default::default()
        });
        RunReport {
            aggregate,
            forensic: vec![ForensicRecord::default()],
            events: vec![RunEvent::failed(
                StageName::Extract,
                Path::new("bad.zip"),
                &SiftError::corrupt_container(Path::new("bad.zip"), "zip", "truncated"),
            )],
            ..Default::default()
        }
    }

    #[test]
    fn json_carries_records_and_stats() {
        let output = SiftOutput::new(Path::new("inbox"), Path::new("reports"), Stage::All)
            .with_report(&sample_report(), 12);
        let json: serde_json::Value = serde_json::from_str(&output.to_json().unwrap()).unwrap();

        assert_eq!(json["metadata"]["tool_name"], "dmarcsift");
        assert_eq!(json["input"]["stage"], "all");
        assert_eq!(json["statistics"]["total_messages"], 5);
        assert_eq!(json["statistics"]["failed_artifacts"], 1);
        assert_eq!(json["aggregate_records"][0]["Source_IP"], "10.0.0.1");
        assert_eq!(json["failed_aggregate_records"].as_array().unwrap().len(), 1);
        assert_eq!(json["forensic_records"][0]["Report_ID"], "Unknown");
        assert_eq!(json["events"][0]["outcome"], "failed");
        assert_eq!(json["result"]["success"], false);
        assert_eq!(json["result"]["records_found"], 2);
    }

    #[test]
    fn yaml_and_roundtrip() {
        let output = SiftOutput::new(Path::new("inbox"), Path::new("reports"), Stage::Forensic)
            .with_report(&sample_report(), 0);
        let yaml = output.to_yaml().unwrap();
        assert!(yaml.contains("tool_name: dmarcsift"));
        let back: SiftOutput = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.aggregate_records, output.aggregate_records);
    }

    #[test]
    fn schema_names_record_columns() {
        let schema = SiftOutput::generate_json_schema().unwrap();
        assert!(schema.contains("SiftOutput"));
        assert!(schema.contains("Report_ID"));
        assert!(schema.contains("DKIM_Failed"));
    }
}
