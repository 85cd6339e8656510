//! Logging setup for PSPF binaries
//!
//! All diagnostics go to stderr through the `log` facade. Binaries call
//! [`init`] once at startup; the level is taken from `FLAVOR_LOG_LEVEL`
//! (trace, debug, info, warn, error, off) and defaults to `warn` so a
//! launched package stays quiet unless asked.

use log::LevelFilter;
use std::env;
use std::io::Write;

/// Parse a level string (case insensitive) into a filter.
fn parse_level(level: &str) -> LevelFilter {
    match level.to_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        "off" => LevelFilter::Off,
        _ => LevelFilter::Warn,
    }
}

/// Initialize logging from `FLAVOR_LOG_LEVEL` or an explicit override.
///
/// Safe to call more than once; later calls are ignored by `env_logger`.
pub fn init(explicit_level: Option<&str>) {
    let level = explicit_level
        .map(String::from)
        .or_else(|| env::var("FLAVOR_LOG_LEVEL").ok())
        .unwrap_or_else(|| "warn".to_string());

    let _ = env_logger::Builder::new()
        .filter_level(parse_level(&level))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%z"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .try_init();
}
