use std::sync::OnceLock;

use log::{Level, LevelFilter, Log, Metadata, Record};
use serde::Serialize;

use crate::callbacks::{self, LogEvent};

/// Level codes shared with managed callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[repr(i32)]
pub enum LogLevel {
    Debug = 3,
    Info = 4,
    Warn = 5,
    Error = 6,
    Fatal = 7,
    None = 8,
}

impl LogLevel {
    pub fn from_code(code: i32) -> Option<LogLevel> {
        match code {
            3 => Some(LogLevel::Debug),
            4 => Some(LogLevel::Info),
            5 => Some(LogLevel::Warn),
            6 => Some(LogLevel::Error),
            7 => Some(LogLevel::Fatal),
            8 => Some(LogLevel::None),
            _ => None,
        }
    }

    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn filter(self) -> LevelFilter {
        match self {
            LogLevel::Debug => LevelFilter::Trace,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Error | LogLevel::Fatal => LevelFilter::Error,
            LogLevel::None => LevelFilter::Off,
        }
    }

    /// `None` for the `None` level, which never emits.
    pub fn to_level(self) -> Option<Level> {
        match self {
            LogLevel::Debug => Some(Level::Debug),
            LogLevel::Info => Some(Level::Info),
            LogLevel::Warn => Some(Level::Warn),
            LogLevel::Error | LogLevel::Fatal => Some(Level::Error),
            LogLevel::None => None,
        }
    }
}

impl From<Level> for LogLevel {
    fn from(level: Level) -> Self {
        match level {
            Level::Trace | Level::Debug => LogLevel::Debug,
            Level::Info => LogLevel::Info,
            Level::Warn => LogLevel::Warn,
            Level::Error => LogLevel::Error,
        }
    }
}

/// Forwards records to the log subscriber, or to stderr when there is none.
struct BridgeLogger {
    fallback: env_logger::Logger,
}

impl Log for BridgeLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let event = LogEvent {
            level: record.level().into(),
            target: record.target().to_string(),
            content: record.args().to_string(),
        };
        if !callbacks::emit_log(event) {
            self.fallback.log(record);
        }
    }

    fn flush(&self) {
        self.fallback.flush();
    }
}

static INSTALLED: OnceLock<bool> = OnceLock::new();

/// Installs the bridge logger. Returns false if another logger owns the
/// `log` facade; the level is applied either way.
pub fn init(level: LogLevel) -> bool {
    let installed = *INSTALLED.get_or_init(|| {
        let fallback = env_logger::Builder::new()
            .filter_level(LevelFilter::Trace)
            .build();
        log::set_boxed_logger(Box::new(BridgeLogger { fallback })).is_ok()
    });
    set_level(level);
    installed
}

pub fn set_level(level: LogLevel) {
    log::set_max_level(level.filter());
}

pub fn level() -> LevelFilter {
    log::max_level()
}

/// Writes a line on behalf of a managed caller.
pub fn print(level: LogLevel, content: &str) {
    if let Some(level) = level.to_level() {
        log::log!(target: "bridge::host", level, "{}", content);
    }
}
