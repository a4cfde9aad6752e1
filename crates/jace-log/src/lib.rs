//! Leveled logging for the Jace workspace.
//!
//! Records carry a level, the module path of the call site and the formatted
//! message. They are filtered against a process-wide minimum level and then
//! handed to the installed [`Sink`]. The default sink writes colored lines to
//! stderr; tests install a [`MemorySink`] to assert on what was logged.
//!
//! # Example
//!
//! ```
//! use jace_log::{debug, info, warn, Level};
//!
//! jace_log::set_level(Level::Debug);
//!
//! let class = "java/lang/String";
//! info!("resolved {}", class);
//! debug!("local refs in use: {}", 3);
//! warn!("runtime already shut down");
//! ```

use parking_lot::RwLock;
use std::fmt::{self, Arguments};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

/// Environment variable consulted by [`init_from_env`].
pub const LOG_ENV: &str = "JACE_LOG";

/// Severity of a log record.
///
/// Lower numeric values are more severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    /// Failures the caller is not told about any other way
    Error = 0,
    /// Suppressed failures and fallbacks
    Warn = 1,
    /// Lifecycle transitions
    Info = 2,
    /// Per-thread and per-call diagnostics
    Debug = 3,
    /// Resolution and reference traffic
    Trace = 4,
}

impl Level {
    const fn color_code(self) -> &'static str {
        match self {
            Level::Error => "\x1b[31m",
            Level::Warn => "\x1b[33m",
            Level::Info => "\x1b[32m",
            Level::Debug => "\x1b[36m",
            Level::Trace => "\x1b[35m",
        }
    }

    /// Returns the upper-case name of this level.
    pub const fn as_str(self) -> &'static str {
        match self {
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        }
    }

    const fn from_u8(raw: u8) -> Level {
        match raw {
            0 => Level::Error,
            1 => Level::Warn,
            2 => Level::Info,
            3 => Level::Debug,
            _ => Level::Trace,
        }
    }
}

impl std::str::FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ERROR" => Ok(Level::Error),
            "WARN" | "WARNING" => Ok(Level::Warn),
            "INFO" => Ok(Level::Info),
            "DEBUG" => Ok(Level::Debug),
            "TRACE" => Ok(Level::Trace),
            _ => Err(format!("Invalid log level: {s}")),
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single formatted log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Severity
    pub level: Level,
    /// Module path of the call site
    pub target: String,
    /// Formatted message
    pub message: String,
}

/// Destination for log records that passed the level filter.
pub trait Sink: Send + Sync {
    /// Consumes one record.
    fn write(&self, record: &Record);
}

/// Writes colored `[LEVEL] target: message` lines to stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrSink;

impl Sink for StderrSink {
    fn write(&self, record: &Record) {
        const RESET: &str = "\x1b[0m";
        eprintln!(
            "{}[{}]{RESET} {}: {}",
            record.level.color_code(),
            record.level,
            record.target,
            record.message
        );
    }
}

/// Keeps every record in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: parking_lot::Mutex<Vec<Record>>,
}

impl MemorySink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of everything recorded so far.
    pub fn records(&self) -> Vec<Record> {
        self.records.lock().clone()
    }

    /// Returns true if any record at `level` contains `needle`.
    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.records
            .lock()
            .iter()
            .any(|r| r.level == level && r.message.contains(needle))
    }

    /// Drops all recorded entries.
    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl Sink for MemorySink {
    fn write(&self, record: &Record) {
        self.records.lock().push(record.clone());
    }
}

/// The process-wide logger.
///
/// Level checks are a single relaxed atomic load, so disabled macros cost
/// almost nothing on hot paths.
pub struct Logger {
    level: AtomicU8,
    sink: RwLock<Arc<dyn Sink>>,
}

impl Logger {
    fn new(level: Level) -> Self {
        Logger {
            level: AtomicU8::new(level as u8),
            sink: RwLock::new(Arc::new(StderrSink)),
        }
    }

    /// Sets the minimum level that will be emitted.
    pub fn set_level(&self, level: Level) {
        self.level.store(level as u8, Ordering::SeqCst);
    }

    /// Returns the current minimum level.
    pub fn level(&self) -> Level {
        Level::from_u8(self.level.load(Ordering::Relaxed))
    }

    /// Checks whether a record at `level` would be emitted.
    pub fn enabled(&self, level: Level) -> bool {
        level as u8 <= self.level.load(Ordering::Relaxed)
    }

    /// Replaces the sink, returning the previous one.
    pub fn set_sink(&self, sink: Arc<dyn Sink>) -> Arc<dyn Sink> {
        std::mem::replace(&mut *self.sink.write(), sink)
    }
}

static LOGGER: OnceLock<Logger> = OnceLock::new();

/// Returns the global logger, creating it at `Level::Info` on first use.
pub fn get_logger() -> &'static Logger {
    LOGGER.get_or_init(|| Logger::new(Level::Info))
}

/// Sets the minimum level of the global logger.
pub fn set_level(level: Level) {
    get_logger().set_level(level);
}

/// Sets the minimum level from a string such as `"debug"`.
///
/// # Errors
///
/// Returns a message naming the input if it is not a known level.
pub fn set_level_from_str(s: &str) -> Result<(), String> {
    set_level(s.parse()?);
    Ok(())
}

/// Applies `JACE_LOG` if it is set and valid.
///
/// Returns the level that was applied, if any. An invalid value is ignored
/// so a typo in the environment never prevents start-up.
pub fn init_from_env() -> Option<Level> {
    let raw = std::env::var(LOG_ENV).ok()?;
    let level: Level = raw.parse().ok()?;
    set_level(level);
    Some(level)
}

/// Installs `sink` on the global logger, returning the previous sink.
pub fn set_sink(sink: Arc<dyn Sink>) -> Arc<dyn Sink> {
    get_logger().set_sink(sink)
}

#[doc(hidden)]
pub fn __log_with_target(level: Level, target: &str, args: Arguments) {
    let logger = get_logger();
    if !logger.enabled(level) {
        return;
    }

    let record = Record {
        level,
        target: target.to_owned(),
        message: args.to_string(),
    };
    let sink = Arc::clone(&*logger.sink.read());
    sink.write(&record);
}

/// Logs at an explicit level.
///
/// ```
/// use jace_log::{log, Level};
///
/// log!(level: Level::Info, "attached thread {}", 7);
/// ```
#[macro_export]
macro_rules! log {
    (level: $level:expr, $($arg:tt)*) => {
        {
            if $crate::get_logger().enabled($level) {
                $crate::__log_with_target(
                    $level,
                    module_path!(),
                    format_args!($($arg)*)
                );
            }
        }
    };
}

/// Logs at [`Level::Error`].
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Error, $($arg)*)
    };
}

/// Logs at [`Level::Warn`].
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Warn, $($arg)*)
    };
}

/// Logs at [`Level::Info`].
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Info, $($arg)*)
    };
}

/// Logs at [`Level::Debug`].
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Debug, $($arg)*)
    };
}

/// Logs at [`Level::Trace`].
#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => {
        $crate::log!(level: $crate::Level::Trace, $($arg)*)
    };
}
