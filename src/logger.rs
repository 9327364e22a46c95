//! Logging infrastructure for CrabMMC
//!
//! The driver logs through the `log` facade. Platforms without their own
//! logger can install this one, which renders each record as a single line
//! and hands it to a [`LogSink`] (a UART, a ring buffer, a debug console).

use core::fmt;
use log::{Level, LevelFilter, Metadata, Record, SetLoggerError};

/// Line-oriented log output
pub trait LogSink: Sync {
    /// Whether the sink understands ANSI colour escapes
    fn ansi(&self) -> bool {
        false
    }

    fn write_line(&self, line: fmt::Arguments<'_>);
}

struct SinkLogger {
    sink: spin::Once<&'static dyn LogSink>,
}

impl SinkLogger {
    fn level_str(level: Level, ansi: bool) -> &'static str {
        if ansi {
            match level {
                Level::Error => "\x1b[31mERROR\x1b[0m",
                Level::Warn => "\x1b[33mWARN\x1b[0m ",
                Level::Info => "\x1b[32mINFO\x1b[0m ",
                Level::Debug => "\x1b[34mDEBUG\x1b[0m",
                Level::Trace => "\x1b[35mTRACE\x1b[0m",
            }
        } else {
            match level {
                Level::Error => "ERROR",
                Level::Warn => "WARN ",
                Level::Info => "INFO ",
                Level::Debug => "DEBUG",
                Level::Trace => "TRACE",
            }
        }
    }
}

impl log::Log for SinkLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        if let Some(sink) = self.sink.get() {
            let level = Self::level_str(record.level(), sink.ansi());
            sink.write_line(format_args!("[{}] {}", level, record.args()));
        }
    }

    fn flush(&self) {}
}

static LOGGER: SinkLogger = SinkLogger {
    sink: spin::Once::new(),
};

/// Install the logger, routing output to `sink`
///
/// Fails if another logger was installed first.
pub fn init(sink: &'static dyn LogSink, level: LevelFilter) -> Result<(), SetLoggerError> {
    LOGGER.sink.call_once(|| sink);
    log::set_logger(&LOGGER).map(|()| log::set_max_level(level))
}

/// Set the maximum log level
pub fn set_level(level: LevelFilter) {
    log::set_max_level(level);
}
