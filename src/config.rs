//! Configuration management for dmarcsift.
//!
//! Structured configuration loaded from defaults, then environment variables,
//! then command-line arguments (CLI wins). It centralizes extraction limits,
//! the output directory layout and rendering preferences.

use std::path::PathBuf;

use crate::cli::{Cli, OutputFormat};

/// Main configuration structure for dmarcsift.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Extraction limits
    pub extract: ExtractConfig,

    /// Output directory layout
    pub layout: OutputLayout,

    /// Rendering preferences
    pub output: OutputConfig,
}

/// Limits applied while unpacking artifacts.
#[derive(Debug, Clone)]
pub struct ExtractConfig {
    /// Maximum container nesting depth followed before an artifact is skipped
    pub max_depth: usize,

    /// Number of leading bytes inspected when sniffing content
    pub sniff_bytes: usize,

    /// Maximum artifact size to process (in bytes)
    pub max_file_size: u64,
}

/// Where extracted and classified documents are written.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    /// Root of all output
    pub root: PathBuf,

    pub extracted: String,
    pub aggregate: String,
    pub forensic: String,
    pub unclassified: String,
}

/// Output and rendering configuration
#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub format: OutputFormat,

    /// Whether ANSI styling may be used
    pub color: bool,

    /// Whether per-artifact events are listed in text output
    pub show_events: bool,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            max_depth: 16,
            sniff_bytes: 1000,
            max_file_size: 50 * 1024 * 1024, // 50MB
        }
    }
}

impl Default for OutputLayout {
    fn default() -> Self {
        Self {
            root: PathBuf::from("reports"),
            extracted: "extracted".to_string(),
            aggregate: "aggregate-reports".to_string(),
            forensic: "forensic-reports".to_string(),
            unclassified: "unclassified".to_string(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::Text,
            color: true,
            show_events: false,
        }
    }
}

impl OutputLayout {
    /// Layout with default bucket names under `root`.
    pub fn under(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    pub fn extracted_dir(&self) -> PathBuf {
        self.root.join(&self.extracted)
    }

    pub fn aggregate_dir(&self) -> PathBuf {
        self.root.join(&self.aggregate)
    }

    pub fn forensic_dir(&self) -> PathBuf {
        self.root.join(&self.forensic)
    }

    pub fn unclassified_dir(&self) -> PathBuf {
        self.root.join(&self.unclassified)
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(depth) = std::env::var("DMARCSIFT_MAX_DEPTH")
            && let Ok(d) = depth.parse::<usize>()
        {
            config.extract.max_depth = d;
        }

        if let Ok(bytes) = std::env::var("DMARCSIFT_SNIFF_BYTES")
            && let Ok(n) = bytes.parse::<usize>()
        {
            config.extract.sniff_bytes = n;
        }

        if let Ok(size) = std::env::var("DMARCSIFT_MAX_FILE_SIZE")
            && let Ok(n) = size.parse::<u64>()
        {
            config.extract.max_file_size = n;
        }

        if let Ok(dir) = std::env::var("DMARCSIFT_OUTPUT_DIR")
            && !dir.trim().is_empty()
        {
            config.layout.root = PathBuf::from(dir);
        }

        config
    }

    /// Merge with CLI arguments, giving CLI precedence
    pub fn merge_with_cli(&mut self, cli: &Cli) {
        if let Some(ref dir) = cli.output_dir {
            self.layout.root = dir.clone();
        }

        if let Some(depth) = cli.max_depth {
            self.extract.max_depth = depth;
        }

        self.output.format = cli.format;
        self.output.show_events = cli.show_events;
        if cli.no_color || std::env::var_os("NO_COLOR").is_some() {
            self.output.color = false;
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.extract.max_depth == 0 {
            return Err(ConfigError::InvalidValue {
                field: "extract.max_depth".to_string(),
                value: "0".to_string(),
                reason: "Max depth must be at least 1".to_string(),
            });
        }

        if self.extract.sniff_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "extract.sniff_bytes".to_string(),
                value: "0".to_string(),
                reason: "Sniff window must be greater than 0".to_string(),
            });
        }

        if self.extract.max_file_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "extract.max_file_size".to_string(),
                value: "0".to_string(),
                reason: "Max file size must be greater than 0".to_string(),
            });
        }

        if self.layout.root.as_os_str().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "layout.root".to_string(),
            });
        }

        let buckets = [
            ("layout.extracted", &self.layout.extracted),
            ("layout.aggregate", &self.layout.aggregate),
            ("layout.forensic", &self.layout.forensic),
            ("layout.unclassified", &self.layout.unclassified),
        ];
        for (i, (field, name)) in buckets.iter().enumerate() {
            if name.trim().is_empty() {
                return Err(ConfigError::MissingRequired {
                    field: field.to_string(),
                });
            }
            if buckets[..i].iter().any(|(_, other)| other == name) {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: name.to_string(),
                    reason: "Bucket directories must be distinct".to_string(),
                });
            }
        }

        Ok(())
    }
}

/// Configuration-related errors
#[derive(Debug)]
pub enum ConfigError {
    /// Invalid configuration value
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    /// Missing required configuration
    MissingRequired { field: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue {
                field,
                value,
                reason,
            } => {
                write!(f, "Invalid value '{}' for '{}': {}", value, field, reason)
            }
            ConfigError::MissingRequired { field } => {
                write!(f, "Missing required configuration field: {}", field)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for crate::errors::SiftError {
    fn from(e: ConfigError) -> Self {
        crate::errors::SiftError::configuration(e.to_string())
    }
}
