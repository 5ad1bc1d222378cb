//! Diagnostic logging setup.
//!
//! The library logs through `tracing` macros; the binary installs a plain
//! stderr subscriber whose level follows the numeric `--verbose` knob.

use tracing::level_filters::LevelFilter;

/// Map `--verbose` onto a tracing level (0 = off, 5+ = trace).
pub fn level_for(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::OFF,
        1 => LevelFilter::ERROR,
        2 => LevelFilter::WARN,
        3 => LevelFilter::INFO,
        4 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Install the global stderr subscriber. Safe to call more than once.
pub fn init(verbose: u8) {
    let _ = tracing_subscriber::fmt()
        .with_max_level(level_for(verbose))
        .with_writer(std::io::stderr)
        .with_target(verbose >= 5)
        .without_time()
        .try_init();
}
