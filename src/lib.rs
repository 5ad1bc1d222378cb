//! dmarcsift library
//!
//! Turns a directory of raw DMARC report deliveries into normalized records:
//!
//! - Recursively unpack zip, gzip, tar / tar.gz, `.eml` and Outlook `.msg`
//!   containers into flat XML / HTML documents
//! - Classify each document as an aggregate (RUA) or forensic (RUF) report
//! - Extract one `AggregateRecord` per source-IP row and one
//!   `ForensicRecord` per forensic report
//!
//! # Example
//!
//! ```rust,no_run
//! use dmarcsift::cli::Stage;
//! use dmarcsift::config::{Config, OutputLayout};
//! use dmarcsift::pipeline::Pipeline;
//! use std::path::Path;
//!
//! let mut config = Config::default();
//! config.layout = OutputLayout::under("reports");
//!
//! let report = Pipeline::new(config).run(Stage::All, Path::new("inbox"))?;
//! for record in &report.aggregate.failed {
//!     println!("{} failed from {}", record.report_id, record.source_ip);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod aggregate;
pub mod app;
pub mod artifact;
pub mod classify;
pub mod cli;
pub mod config;
pub mod errors;
pub mod events;
pub mod extract;
pub mod forensic;
pub mod headers;
pub mod logging;
pub mod markup;
pub mod pipeline;
pub mod records;
pub mod storage;
pub mod structured_output;
pub mod styled_output;

// Re-export commonly used types and functions for convenience
pub use artifact::{DocumentFormat, FlatDocument};
pub use classify::{ReportKind, Verdict, classify};
pub use errors::{Result, SiftError};
pub use events::RunEvent;
pub use extract::Extractor;
pub use pipeline::{Pipeline, RunReport};
pub use records::{AggregateLedger, AggregateRecord, ForensicRecord};
pub use structured_output::SiftOutput;
pub use styled_output::StyledFormatter;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
