//! Per-artifact outcomes collected alongside the main results of a run.
//!
//! Nothing in the pipeline aborts on a single bad artifact; it records a
//! `RunEvent` and continues with the next sibling.

use std::path::Path;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::errors::SiftError;

/// Pipeline stage an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Extract,
    Classify,
    Aggregate,
    Forensic,
}

impl std::fmt::Display for StageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StageName::Extract => "extract",
            StageName::Classify => "classify",
            StageName::Aggregate => "aggregate",
            StageName::Forensic => "forensic",
        };
        f.write_str(s)
    }
}

/// Why an artifact was left out without being an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// Same canonical path already handled in this run.
    Duplicate,
    /// Neither the extension nor the content matched a known type.
    Unrecognized,
    /// Nested deeper than the configured limit.
    DepthLimit { depth: usize },
    /// Larger than the configured size cap.
    TooLarge { bytes: u64 },
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::Duplicate => f.write_str("already processed"),
            SkipReason::Unrecognized => f.write_str("unrecognized format"),
            SkipReason::DepthLimit { depth } => write!(f, "nesting depth {depth} over limit"),
            SkipReason::TooLarge { bytes } => write!(f, "{bytes} bytes over size cap"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Skipped {
        #[serde(flatten)]
        reason: SkipReason,
    },
    Failed {
        category: String,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RunEvent {
    pub stage: StageName,
    /// Artifact or document the event is about.
    pub subject: String,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl RunEvent {
    pub fn skipped(stage: StageName, subject: &Path, reason: SkipReason) -> Self {
        Self {
            stage,
            subject: subject.display().to_string(),
            outcome: Outcome::Skipped { reason },
        }
    }

    pub fn failed(stage: StageName, subject: &Path, error: &SiftError) -> Self {
        Self {
            stage,
            subject: subject.display().to_string(),
            outcome: Outcome::Failed {
                category: error.category().to_string(),
                message: error.to_string(),
            },
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, Outcome::Failed { .. })
    }
}

impl std::fmt::Display for RunEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.outcome {
            Outcome::Skipped { reason } => {
                write!(f, "[{}] skipped {}: {}", self.stage, self.subject, reason)
            }
            Outcome::Failed { category, message } => {
                write!(f, "[{}] failed {} ({}): {}", self.stage, self.subject, category, message)
            }
        }
    }
}
