//! High-level application orchestration layer.
//!
//! This module provides the CLI-facing `App` façade. It resolves the
//! configuration, runs the selected pipeline stages and renders either
//! structured (JSON/YAML) or styled text output.
//!
//! Major steps in `App::run`:
//!   1. Schema generation early-exit
//!   2. Config load / validation
//!   3. Pipeline execution for the selected stage
//!   4. Structured output or styled summary

use std::time::Instant;

use tracing::{debug, error};

use crate::cli::{Cli, OutputFormat};
use crate::config::Config;
use crate::errors::{ErrorCategory, Result, SiftError};
use crate::pipeline::Pipeline;
use crate::structured_output::SiftOutput;
use crate::styled_output::StyledFormatter;

/// Application façade.
pub struct App;

impl App {
    /// Execute the requested stages end to end.
    ///
    /// Returns: intended process exit code (0 = success, 1 = input or
    /// configuration error). Per-artifact failures do not change it.
    pub fn run(cli: &Cli) -> Result<i32> {
        if Self::maybe_print_schema(cli)? {
            return Ok(0);
        }
        let Some(config) = Self::load_config(cli) else {
            return Ok(1);
        };
        let Some(input) = cli.input_path() else {
            Self::report_error(cli, &SiftError::configuration("no input directory given"));
            return Ok(1);
        };

        let start_time = Instant::now();
        let pipeline = Pipeline::new(config.clone());
        let report = match pipeline.run(cli.stage, input) {
            Ok(report) => report,
            Err(e) if e.category() == ErrorCategory::Input => {
                Self::report_error(cli, &e);
                return Ok(1);
            }
            Err(e) => return Err(e),
        };
        let elapsed_ms = start_time.elapsed().as_millis() as u64;
        debug!("Pipeline finished in {elapsed_ms}ms");

        let output = SiftOutput::new(input, &config.layout.root, cli.stage)
            .with_report(&report, elapsed_ms);
        Self::render(&config, &output)?;
        Ok(0)
    }
}

/// Helpers
impl App {
    fn maybe_print_schema(cli: &Cli) -> Result<bool> {
        if cli.generate_schema {
            match SiftOutput::generate_json_schema() {
                Ok(schema) => {
                    println!("{schema}");
                }
                Err(e) => {
                    eprintln!("Error generating JSON schema: {e}");
                }
            }
            return Ok(true);
        }
        Ok(false)
    }

    fn load_config(cli: &Cli) -> Option<Config> {
        let mut config = Config::from_env();
        config.merge_with_cli(cli);
        if let Err(e) = config.validate() {
            Self::report_error(cli, &SiftError::from(e));
            return None;
        }
        Some(config)
    }

    /// Errors go through tracing; at `--verbose 0` nothing is printed.
    fn report_error(cli: &Cli, e: &SiftError) {
        if cli.error_enabled() {
            error!("{e}");
        }
    }

    fn render(config: &Config, output: &SiftOutput) -> Result<()> {
        let rendered = match config.output.format {
            OutputFormat::Json => output.to_json(),
            OutputFormat::Yaml => output.to_yaml(),
            OutputFormat::Text => {
                let formatter = if config.output.color {
                    StyledFormatter::new()
                } else {
                    StyledFormatter::without_colors()
                };
                return formatter
                    .print_run(output, config.output.show_events)
                    .map_err(|e| SiftError::io("stdout", "write", e));
            }
        };
        let rendered =
            rendered.map_err(|e| SiftError::internal(format!("Could not serialize output: {e}")))?;
        println!("{rendered}");
        Ok(())
    }
}
