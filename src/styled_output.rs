//! Styled terminal summary of a run using anstyle.
//!
//! Renders the same `SiftOutput` the JSON/YAML paths serialize, so text and
//! structured output never disagree.

use anstyle::{AnsiColor, Color, Style};
use std::fmt::Write;
use std::io::{self, Write as IoWrite};

use crate::events::Outcome;
use crate::records::AggregateRecord;
use crate::structured_output::SiftOutput;

const RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━";

/// Failed aggregate rows listed before the rest is summarized.
const MAX_FAILED_ROWS: usize = 20;

/// Style definitions for different UI elements
pub struct Styles {
    pub header: Style,
    pub subheader: Style,
    pub success: Style,
    pub warning: Style,
    pub error: Style,
    pub info: Style,
    pub muted: Style,
    pub bold: Style,
    pub ip: Style,
}

impl Default for Styles {
    fn default() -> Self {
        Self {
            header: Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Blue))),
            subheader: Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Cyan))),
            success: Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Green))),
            warning: Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Yellow))),
            error: Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Red))),
            info: Style::new().fg_color(Some(Color::Ansi(AnsiColor::Blue))),
            muted: Style::new().fg_color(Some(Color::Ansi(AnsiColor::BrightBlack))),
            bold: Style::new().bold(),
            ip: Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Magenta))),
        }
    }
}

/// Styled output formatter for run summaries
pub struct StyledFormatter {
    styles: Styles,
    use_colors: bool,
}

impl StyledFormatter {
    pub fn new() -> Self {
        Self {
            styles: Styles::default(),
            use_colors: Self::should_use_colors(),
        }
    }

    /// Create a formatter without colors (for non-interactive use)
    pub fn without_colors() -> Self {
        Self {
            styles: Styles::default(),
            use_colors: false,
        }
    }

    fn should_use_colors() -> bool {
        atty::is(atty::Stream::Stdout) && std::env::var("NO_COLOR").is_err()
    }

    fn styled(&self, text: &str, style: &Style) -> String {
        if self.use_colors {
            format!("{}{}{}", style.render(), text, style.render_reset())
        } else {
            text.to_string()
        }
    }

    /// Format the whole run. Events are listed one by one only when
    /// `show_events` is set; otherwise just counted.
    pub fn format_run(&self, run: &SiftOutput, show_events: bool) -> Result<String, std::fmt::Error> {
        let mut output = String::new();
        self.write_header(&mut output, run)?;
        self.write_extraction(&mut output, run)?;
        self.write_classification(&mut output, run)?;
        self.write_aggregate(&mut output, run)?;
        self.write_forensic(&mut output, run)?;
        self.write_events(&mut output, run, show_events)?;
        self.write_footer(&mut output, run)?;
        Ok(output)
    }

    fn write_header(&self, output: &mut String, run: &SiftOutput) -> Result<(), std::fmt::Error> {
        writeln!(output)?;
        writeln!(output, "{}", self.styled(RULE, &self.styles.muted))?;
        writeln!(
            output,
            "  {}",
            self.styled(
                &format!("📬 DMARC reports in {}", run.input.input_dir.display()),
                &self.styles.header
            )
        )?;
        writeln!(
            output,
            "  {} Stage: {}   Output: {}",
            self.styled("⚙", &self.styles.info),
            self.styled(&run.input.stage, &self.styles.bold),
            self.styled(&run.input.output_dir.display().to_string(), &self.styles.muted)
        )?;
        writeln!(output, "{}", self.styled(RULE, &self.styles.muted))?;
        Ok(())
    }

    fn write_extraction(&self, output: &mut String, run: &SiftOutput) -> Result<(), std::fmt::Error> {
        let stats = &run.statistics.extract;
        if stats.files_processed == 0 {
            return Ok(());
        }
        writeln!(output)?;
        writeln!(output, "  {}", self.styled("📦 Extraction", &self.styles.subheader))?;
        self.write_item(output, "├─", "Artifacts processed", stats.files_processed)?;
        self.write_item(output, "├─", "Containers unpacked", stats.containers_unpacked)?;
        writeln!(
            output,
            "    {} Documents extracted: {} ({} xml, {} html)",
            self.styled("└─", &self.styles.muted),
            self.styled(&stats.documents_extracted.to_string(), &self.styles.bold),
            stats.xml_documents,
            stats.html_documents
        )?;
        Ok(())
    }

    fn write_classification(
        &self,
        output: &mut String,
        run: &SiftOutput,
    ) -> Result<(), std::fmt::Error> {
        let stats = &run.statistics.classify;
        if stats.total() == 0 {
            return Ok(());
        }
        writeln!(output)?;
        writeln!(output, "  {}", self.styled("🗂  Classification", &self.styles.subheader))?;
        self.write_item(output, "├─", "Aggregate", stats.aggregate)?;
        self.write_item(output, "├─", "Forensic", stats.forensic)?;
        self.write_item(output, "└─", "Unclassified", stats.unclassified)?;
        for doc in &run.unclassified {
            writeln!(
                output,
                "       {} {}",
                self.styled("•", &self.styles.warning),
                self.styled(&doc.source.display().to_string(), &self.styles.muted)
            )?;
        }
        Ok(())
    }

    fn write_aggregate(&self, output: &mut String, run: &SiftOutput) -> Result<(), std::fmt::Error> {
        if run.aggregate_records.is_empty() {
            return Ok(());
        }
        let stats = &run.statistics;
        writeln!(output)?;
        writeln!(output, "  {}", self.styled("📊 Aggregate records", &self.styles.subheader))?;
        self.write_item(output, "├─", "Rows", stats.aggregate_records)?;
        self.write_item(output, "├─", "Messages", stats.total_messages)?;

        let failed = stats.failed_aggregate_records;
        let label = format!("{failed}");
        let style = if failed == 0 {
            &self.styles.success
        } else {
            &self.styles.error
        };
        writeln!(
            output,
            "    {} Failing DKIM or SPF: {}",
            self.styled("└─", &self.styles.muted),
            self.styled(&label, style)
        )?;

        for record in run.failed_aggregate_records.iter().take(MAX_FAILED_ROWS) {
            writeln!(output, "       {}", self.failed_row(record))?;
        }
        if failed > MAX_FAILED_ROWS {
            writeln!(
                output,
                "       {}",
                self.styled(
                    &format!("… {} more", failed - MAX_FAILED_ROWS),
                    &self.styles.muted
                )
            )?;
        }
        Ok(())
    }

    fn failed_row(&self, record: &AggregateRecord) -> String {
        format!(
            "{} {} ×{} from {} (dkim {}, spf {})",
            self.styled("✗", &self.styles.error),
            self.styled(&record.source_ip, &self.styles.ip),
            record.count,
            record.provider,
            pass_word(record.dkim_pass),
            pass_word(record.spf_pass)
        )
    }

    fn write_forensic(&self, output: &mut String, run: &SiftOutput) -> Result<(), std::fmt::Error> {
        if run.forensic_records.is_empty() {
            return Ok(());
        }
        writeln!(output)?;
        writeln!(output, "  {}", self.styled("🔎 Forensic records", &self.styles.subheader))?;
        let last = run.forensic_records.len() - 1;
        for (i, record) in run.forensic_records.iter().enumerate() {
            let branch = if i == last { "└─" } else { "├─" };
            writeln!(
                output,
                "    {} {} {} {}",
                self.styled(branch, &self.styles.muted),
                self.styled(&record.report_id, &self.styles.bold),
                self.styled(&record.source_ip, &self.styles.ip),
                self.styled(&format!("[{}]", record.auth_failure), &self.styles.warning)
            )?;
        }
        Ok(())
    }

    fn write_events(
        &self,
        output: &mut String,
        run: &SiftOutput,
        show_events: bool,
    ) -> Result<(), std::fmt::Error> {
        let stats = &run.statistics;
        if run.events.is_empty() {
            return Ok(());
        }
        writeln!(output)?;
        writeln!(
            output,
            "  {} {} skipped, {} failed",
            self.styled("⚠️", &self.styles.warning),
            stats.skipped_artifacts,
            stats.failed_artifacts
        )?;
        if !show_events {
            writeln!(
                output,
                "    {}",
                self.styled("(use --show-events to list them)", &self.styles.muted)
            )?;
            return Ok(());
        }
        for event in &run.events {
            let style = match event.outcome {
                Outcome::Failed { .. } => &self.styles.error,
                Outcome::Skipped { .. } => &self.styles.warning,
            };
            writeln!(
                output,
                "    {} {}",
                self.styled("•", style),
                self.styled(&event.to_string(), &self.styles.muted)
            )?;
        }
        Ok(())
    }

    fn write_footer(&self, output: &mut String, run: &SiftOutput) -> Result<(), std::fmt::Error> {
        writeln!(output)?;
        writeln!(output, "{}", self.styled(RULE, &self.styles.muted))?;
        let (mark, style) = if run.result.success {
            ("✓", &self.styles.success)
        } else {
            ("!", &self.styles.warning)
        };
        writeln!(
            output,
            "  {} {} records in {}ms",
            self.styled(mark, style),
            self.styled(&run.result.records_found.to_string(), &self.styles.bold),
            run.statistics.total_time_ms
        )?;
        writeln!(output, "{}", self.styled(RULE, &self.styles.muted))?;
        Ok(())
    }

    fn write_item(
        &self,
        output: &mut String,
        branch: &str,
        label: &str,
        value: impl ToString,
    ) -> Result<(), std::fmt::Error> {
        writeln!(
            output,
            "    {} {}: {}",
            self.styled(branch, &self.styles.muted),
            label,
            self.styled(&value.to_string(), &self.styles.bold)
        )
    }

    /// Print a run summary to stdout
    pub fn print_run(&self, run: &SiftOutput, show_events: bool) -> io::Result<()> {
        let formatted = self
            .format_run(run, show_events)
            .map_err(|e| io::Error::other(format!("{}", e)))?;
        print!("{}", formatted);
        io::stdout().flush()?;
        Ok(())
    }
}

impl Default for StyledFormatter {
    fn default() -> Self {
        Self::new()
    }
}

fn pass_word(pass: bool) -> &'static str {
    if pass { "pass" } else { "fail" }
}
