//! Engine log sink.
//!
//! The engine writes records `(severity, file, line, message)` to one
//! process-wide sink. Hosts install their own sink once at startup with
//! [`set_log_sink`]; until then records go to [`default_sink`], which
//! forwards them to `tracing` under the `libdave` target.

use std::sync::OnceLock;

/// Severity of an engine log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LoggingSeverity {
    /// Detailed tracing output.
    Verbose,
    /// Informational messages.
    Info,
    /// Recoverable problems.
    Warning,
    /// Failed operations.
    Error,
    /// Never emitted.
    None,
}

impl LoggingSeverity {
    /// Corresponding `tracing` level, or `None` for records to drop.
    pub fn as_tracing_level(self) -> Option<tracing::Level> {
        match self {
            Self::Verbose => Some(tracing::Level::DEBUG),
            Self::Info => Some(tracing::Level::INFO),
            Self::Warning => Some(tracing::Level::WARN),
            Self::Error => Some(tracing::Level::ERROR),
            Self::None => None,
        }
    }
}

/// Target name engine records are logged under.
pub const LOG_TARGET: &str = "libdave";

/// Signature of a log sink.
pub type LogSink = fn(LoggingSeverity, &'static str, u32, &str);

static SINK: OnceLock<LogSink> = OnceLock::new();

/// Installs the process-wide sink.
///
/// Returns false if a sink was already installed; the first one wins.
pub fn set_log_sink(sink: LogSink) -> bool {
    SINK.set(sink).is_ok()
}

/// Writes one record to the installed sink.
pub fn emit(severity: LoggingSeverity, file: &'static str, line: u32, message: &str) {
    let sink = SINK.get().copied().unwrap_or(default_sink);
    sink(severity, file, line, message);
}

/// Forwards a record to `tracing`.
pub fn default_sink(severity: LoggingSeverity, file: &'static str, line: u32, message: &str) {
    match severity {
        LoggingSeverity::Verbose => {
            tracing::debug!(target: LOG_TARGET, file, line, "{}", message);
        },
        LoggingSeverity::Info => tracing::info!(target: LOG_TARGET, file, line, "{}", message),
        LoggingSeverity::Warning => tracing::warn!(target: LOG_TARGET, file, line, "{}", message),
        LoggingSeverity::Error => tracing::error!(target: LOG_TARGET, file, line, "{}", message),
        LoggingSeverity::None => {},
    }
}

/// Logs a formatted engine record with the caller's location.
macro_rules! engine_log {
    ($severity:ident, $($arg:tt)+) => {
        $crate::log::emit(
            $crate::log::LoggingSeverity::$severity,
            file!(),
            line!(),
            &format!($($arg)+),
        )
    };
}

pub(crate) use engine_log;
