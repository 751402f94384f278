//! Hylog: a `log` facade sink that forwards structured records to a callback.
//!
//! Every crate of the workspace logs through `log::{trace, debug, info, warn, error}!`.
//! Installing a [`HyLogger`] turns each record into a [`LogMessage`] (level, local
//! timestamp, module, file, line, thread) and hands it to a user callback.
//!
//! ```
//! use hylog::{LogCallback, LogCreateInfo, LogLevel};
//!
//! let _ = hylog::init(LogCreateInfo {
//!     level: LogLevel::Info,
//!     callback: LogCallback::stderr(),
//! });
//! log::info!("flattened network into {} modes", 4);
//! ```

use std::fmt;
use std::io::Write;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use strum::FromRepr;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

/// Logger levels, least severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, FromRepr)]
#[repr(u32)]
pub enum LogLevel {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
}

impl LogLevel {
    pub fn to_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Trace => log::LevelFilter::Trace,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Error => log::LevelFilter::Error,
        }
    }

    fn color(self) -> Color {
        match self {
            LogLevel::Trace => Color::White,
            LogLevel::Debug => Color::Blue,
            LogLevel::Info => Color::Green,
            LogLevel::Warn => Color::Yellow,
            LogLevel::Error => Color::Red,
        }
    }
}

impl From<log::Level> for LogLevel {
    fn from(level: log::Level) -> Self {
        match level {
            log::Level::Trace => LogLevel::Trace,
            log::Level::Debug => LogLevel::Debug,
            log::Level::Info => LogLevel::Info,
            log::Level::Warn => LogLevel::Warn,
            log::Level::Error => LogLevel::Error,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        };
        f.pad(s)
    }
}

/// One log record.
#[derive(Debug, Clone)]
pub struct LogMessage {
    pub level: LogLevel,
    pub timepoint: chrono::NaiveDateTime,
    pub message: String,
    pub module: String,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub thread_name: Option<String>,
}

impl LogMessage {
    pub fn from_record(record: &log::Record<'_>) -> Self {
        Self {
            level: record.level().into(),
            timepoint: chrono::Local::now().naive_local(),
            message: record.args().to_string(),
            module: record
                .module_path()
                .unwrap_or_else(|| record.target())
                .to_string(),
            file: record.file().map(str::to_string),
            line: record.line(),
            thread_name: std::thread::current().name().map(str::to_string),
        }
    }
}

impl fmt::Display for LogMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{} {:<5} {}] {}",
            self.timepoint.format("%H:%M:%S%.3f"),
            self.level,
            self.module,
            self.message
        )
    }
}

/// Callback receiving every enabled record.
pub struct LogCallback(pub Box<dyn Fn(LogMessage) + Send + Sync>);

impl LogCallback {
    pub fn new(f: impl Fn(LogMessage) + Send + Sync + 'static) -> Self {
        Self(Box::new(f))
    }

    /// Colored single-line output on stderr.
    pub fn stderr() -> Self {
        Self::new(|msg| {
            let mut stderr = StandardStream::stderr(ColorChoice::Auto);
            let mut spec = ColorSpec::new();
            spec.set_fg(Some(msg.level.color())).set_bold(true);
            let _ = stderr.set_color(&spec);
            let _ = write!(stderr, "{:<5}", msg.level);
            let _ = stderr.reset();
            let _ = writeln!(stderr, " {}: {}", msg.module, msg.message);
        })
    }
}

/// Creation information for [`HyLogger`].
pub struct LogCreateInfo {
    pub level: LogLevel,
    pub callback: LogCallback,
}

pub struct HyLogger {
    level: LogLevel,
    callback: LogCallback,
}

impl HyLogger {
    pub fn new(info: LogCreateInfo) -> Self {
        Self {
            level: info.level,
            callback: info.callback,
        }
    }
}

impl log::Log for HyLogger {
    fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
        LogLevel::from(metadata.level()) >= self.level
    }

    fn log(&self, record: &log::Record<'_>) {
        if self.enabled(record.metadata()) {
            (self.callback.0)(LogMessage::from_record(record));
        }
    }

    fn flush(&self) {}
}

/// Install a [`HyLogger`] as the global `log` sink. Fails if a logger is already set.
pub fn init(info: LogCreateInfo) -> Result<(), log::SetLoggerError> {
    let filter = info.level.to_filter();
    log::set_boxed_logger(Box::new(HyLogger::new(info)))?;
    log::set_max_level(filter);
    Ok(())
}

static CAPTURED: OnceLock<Arc<Mutex<Vec<LogMessage>>>> = OnceLock::new();

/// Records collected by [`capture`].
#[derive(Clone)]
pub struct CapturedLogs {
    buffer: Arc<Mutex<Vec<LogMessage>>>,
}

impl CapturedLogs {
    pub fn messages(&self) -> Vec<LogMessage> {
        self.buffer.lock().clone()
    }

    /// Is there a record at `level` whose message contains `needle`?
    pub fn contains(&self, level: LogLevel, needle: &str) -> bool {
        self.buffer
            .lock()
            .iter()
            .any(|m| m.level == level && m.message.contains(needle))
    }

    pub fn clear(&self) {
        self.buffer.lock().clear();
    }
}

/// Install (once per process) a trace-level logger that collects every record in memory.
///
/// All callers share one buffer, so concurrent tests should look for their own messages
/// with [`CapturedLogs::contains`] rather than count records. If another logger was
/// installed first, nothing is collected.
pub fn capture() -> CapturedLogs {
    let buffer = CAPTURED.get_or_init(|| {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let sink = buffer.clone();
        let _ = init(LogCreateInfo {
            level: LogLevel::Trace,
            callback: LogCallback::new(move |msg| sink.lock().push(msg)),
        });
        buffer
    });
    CapturedLogs {
        buffer: buffer.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_are_ordered_by_severity() {
        assert!(LogLevel::Trace < LogLevel::Error);
        assert_eq!(LogLevel::from_repr(3), Some(LogLevel::Warn));
        assert_eq!(LogLevel::from(log::Level::Debug), LogLevel::Debug);
    }

    #[test]
    fn captured_records_carry_location() {
        let logs = capture();
        log::warn!(target: "hylog-test", "bound is not sound for cell {}", 7);
        let messages = logs.messages();
        let msg = messages
            .iter()
            .find(|m| m.message == "bound is not sound for cell 7")
            .expect("record was not captured");
        assert_eq!(msg.level, LogLevel::Warn);
        assert!(msg.file.as_deref().is_some_and(|f| f.ends_with("lib.rs")));
        assert!(msg.line.is_some());
        assert!(logs.contains(LogLevel::Warn, "not sound"));
    }

    #[test]
    fn filter_respects_level() {
        let logger = HyLogger::new(LogCreateInfo {
            level: LogLevel::Info,
            callback: LogCallback::new(|_| {}),
        });
        let debug = log::Metadata::builder().level(log::Level::Debug).build();
        let error = log::Metadata::builder().level(log::Level::Error).build();
        use log::Log;
        assert!(!logger.enabled(&debug));
        assert!(logger.enabled(&error));
    }
}
