use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Command-line interface definition.
/// Unpacks, classifies and extracts DMARC aggregate and forensic reports.
///
/// Verbosity levels:
/// 0 - silent (only final output)
/// 1 - errors (default)
/// 2 - warnings + errors
/// 3 - progress
/// 4 - debug
/// 5 - trace
#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about = "Unpack nested DMARC report archives and mail, classify aggregate vs forensic reports and extract normalized records"
)]
pub struct Cli {
    /// Directory holding the raw artifacts (or, for later stages, the documents to analyse).
    #[arg(value_name = "DIR", required_unless_present_any = ["input", "generate_schema"], conflicts_with = "input")]
    pub input_dir: Option<PathBuf>,

    /// Same as the positional DIR.
    #[arg(long, short = 'i', value_name = "DIR")]
    pub input: Option<PathBuf>,

    /// Output root; buckets are created beneath it (default: ./reports)
    #[arg(long, short = 'o', value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Which stage(s) to run
    #[arg(long, value_enum, default_value_t = Stage::All)]
    pub stage: Stage,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Verbosity level (0-5)
    #[arg(long, default_value_t = 1)]
    pub verbose: u8,

    /// Disable colored text output
    #[arg(long)]
    pub no_color: bool,

    /// Maximum container nesting depth
    #[arg(long, value_name = "N")]
    pub max_depth: Option<usize>,

    /// List every skipped or failed artifact in text output
    #[arg(long)]
    pub show_events: bool,

    /// Print the JSON schema of the structured output and exit
    #[arg(long)]
    pub generate_schema: bool,
}

/// Pipeline stage selection.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Extract, classify, then extract records from both report kinds
    All,
    /// Only unpack artifacts into the extraction directory
    Extract,
    /// Classify an already-extracted directory of documents
    Classify,
    /// Extract aggregate records from a directory of aggregate reports
    Aggregate,
    /// Extract forensic records from a directory of forensic reports
    Forensic,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::All => "all",
            Stage::Extract => "extract",
            Stage::Classify => "classify",
            Stage::Aggregate => "aggregate",
            Stage::Forensic => "forensic",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final rendering format.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
    Yaml,
}

impl Cli {
    /// Parse CLI arguments from process args.
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// The input directory, from either the positional or the flag form.
    pub fn input_path(&self) -> Option<&PathBuf> {
        self.input_dir.as_ref().or(self.input.as_ref())
    }

    /// Are error-level messages enabled?
    pub fn error_enabled(&self) -> bool {
        self.verbose >= 1
    }
}
