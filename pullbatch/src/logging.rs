use std::{error::Error, io::Write};

use clap::ValueEnum;
use env_logger::{fmt::Formatter, Builder};
use log::{Level, LevelFilter, Record};

/// Target of the single line logged when a run fails.
pub const CRITICAL_TARGET: &str = "pullbatch::critical";

const OWN_CRATES: &str = "pullbatch";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    #[value(alias = "warn")]
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    fn filter(self) -> LevelFilter {
        match self {
            Self::Debug => LevelFilter::Debug,
            Self::Info => LevelFilter::Info,
            Self::Warning => LevelFilter::Warn,
            Self::Error => LevelFilter::Error,
            Self::Critical => LevelFilter::Off,
        }
    }
}

/// `level` applies to this tool's own crates; dependencies only report
/// warnings and errors unless `RUST_LOG` says otherwise.
fn builder(level: LogLevel) -> Builder {
    let mut builder = Builder::new();
    builder
        .filter_level(LevelFilter::Warn.min(level.filter()))
        .filter_module(OWN_CRATES, level.filter())
        .filter_module(CRITICAL_TARGET, LevelFilter::Error)
        .format(format_record);
    builder
}

pub fn init(level: LogLevel) {
    let mut builder = builder(level);
    builder.parse_default_env();
    // Only fails when a logger is already installed.
    let _ = builder.try_init();
}

fn level_label(record: &Record<'_>) -> &'static str {
    if record.target() == CRITICAL_TARGET {
        return "CRITICAL";
    }
    match record.level() {
        Level::Error => "ERROR",
        Level::Warn => "WARNING",
        Level::Info => "INFO",
        Level::Debug => "DEBUG",
        Level::Trace => "TRACE",
    }
}

fn format_record(buf: &mut Formatter, record: &Record<'_>) -> std::io::Result<()> {
    let timestamp = buf.timestamp();
    writeln!(
        buf,
        "{timestamp} {} {}: {}",
        level_label(record),
        record.target(),
        record.args()
    )
}

/// `err` followed by each of its sources, separated by `: `.
pub fn error_chain(err: &dyn Error) -> String {
    let mut chain = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        chain.push_str(": ");
        chain.push_str(&cause.to_string());
        source = cause.source();
    }
    chain
}

fn failure_line(err: &dyn Error) -> String {
    format!("An error happened while running pullbatch: {}", error_chain(err))
}

pub fn critical(err: &dyn Error) {
    log::error!(target: CRITICAL_TARGET, "{}", failure_line(err));
}
