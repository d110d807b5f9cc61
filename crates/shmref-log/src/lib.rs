//! Leveled logging shared by the `shmref` crates.
//!
//! Allocators and pointer handles report region creation, exhaustion,
//! registration and descriptor resolution through the macros exported here.
//! Records go to stderr so that processes attached to the same region can
//! interleave their diagnostics without touching stdout.
//!
//! The level starts at [`Level::Warn`]. It can be changed at runtime with
//! [`set_level`] or read from the `SHMREF_LOG` environment variable with
//! [`init_from_env`].
//!
//! # Example
//!
//! ```
//! use shmref_log::{debug, warn, Level};
//!
//! shmref_log::set_level(Level::Debug);
//!
//! let offset = 0x40u64;
//! debug!("allocated block at offset {:#x}", offset);
//! warn!("region 3.0 is {}% full", 93);
//! ```

use std::fmt::{self, Arguments};
use std::io::Write;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};

/// Environment variable consulted by [`init_from_env`].
pub const LOG_ENV: &str = "SHMREF_LOG";

/// Severity of a log record, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    /// Failures that abort the requested operation.
    Error = 0,
    /// Contract violations the layer tolerates, and near-exhaustion.
    Warn = 1,
    /// Allocator and registry lifecycle events.
    Info = 2,
    /// Per-handle lifecycle events.
    Debug = 3,
    /// Per-allocation events.
    Trace = 4,
}

impl Level {
    const ALL: [Level; 5] = [
        Level::Error,
        Level::Warn,
        Level::Info,
        Level::Debug,
        Level::Trace,
    ];

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

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string does not name a [`Level`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseLevelError {
    input: String,
}

impl fmt::Display for ParseLevelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid log level '{}': expected error, warn, info, debug or trace",
            self.input
        )
    }
}

impl std::error::Error for ParseLevelError {}

impl FromStr for Level {
    type Err = ParseLevelError;

    /// Parses a level name, ignoring case and surrounding whitespace.
    ///
    /// ```
    /// use shmref_log::Level;
    ///
    /// assert_eq!("debug".parse::<Level>(), Ok(Level::Debug));
    /// assert_eq!(" WARN ".parse::<Level>(), Ok(Level::Warn));
    /// assert!("verbose".parse::<Level>().is_err());
    /// ```
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Level::ALL
            .into_iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| ParseLevelError {
                input: trimmed.to_owned(),
            })
    }
}

/// Process-wide level filter.
pub struct Logger {
    level: AtomicU8,
}

impl Logger {
    const fn new(level: Level) -> Self {
        Logger {
            level: AtomicU8::new(level as u8),
        }
    }

    /// Sets the most verbose level that is still emitted.
    pub fn set_level(&self, level: Level) {
        self.level.store(level as u8, Ordering::Relaxed);
    }

    /// Returns the current level.
    pub fn level(&self) -> Level {
        Level::from_u8(self.level.load(Ordering::Relaxed))
    }

    /// Returns `true` if records at `level` are emitted.
    #[inline]
    pub fn enabled(&self, level: Level) -> bool {
        level as u8 <= self.level.load(Ordering::Relaxed)
    }
}

static LOGGER: Logger = Logger::new(Level::Warn);

/// Returns the process-wide logger.
pub fn get_logger() -> &'static Logger {
    &LOGGER
}

/// Sets the process-wide level.
pub fn set_level(level: Level) {
    LOGGER.set_level(level);
}

/// Sets the process-wide level from a level name.
pub fn set_level_from_str(s: &str) -> Result<(), ParseLevelError> {
    set_level(s.parse()?);
    Ok(())
}

/// Applies the level named by `SHMREF_LOG`, if set.
///
/// Returns the level now in effect. An unparsable value leaves the current
/// level untouched and is reported at warn level.
pub fn init_from_env() -> Level {
    if let Ok(value) = std::env::var(LOG_ENV) {
        match value.parse::<Level>() {
            Ok(level) => set_level(level),
            Err(err) => crate::warn!("ignoring {LOG_ENV}: {err}"),
        }
    }
    LOGGER.level()
}

#[doc(hidden)]
pub fn __log_with_target(level: Level, target: &str, args: Arguments) {
    if !LOGGER.enabled(level) {
        return;
    }

    let stderr = std::io::stderr();
    let mut out = stderr.lock();
    // A closed stderr is not worth failing an allocation over.
    let _ = writeln!(out, "[{:<5}] {target}: {args}", level.as_str());
}

/// Logs at an explicit level, tagging the record with the calling module.
///
/// ```
/// use shmref_log::{log, Level};
///
/// log!(level: Level::Info, "attached region {}", "7.0");
/// ```
#[macro_export]
macro_rules! log {
    (level: $level:expr, $($arg:tt)*) => {{
        let level = $level;
        if $crate::get_logger().enabled(level) {
            $crate::__log_with_target(level, module_path!(), format_args!($($arg)*));
        }
    }};
}

/// Logs at [`Level::Error`].
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => { $crate::log!(level: $crate::Level::Error, $($arg)*) };
}

/// Logs at [`Level::Warn`].
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => { $crate::log!(level: $crate::Level::Warn, $($arg)*) };
}

/// Logs at [`Level::Info`].
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => { $crate::log!(level: $crate::Level::Info, $($arg)*) };
}

/// Logs at [`Level::Debug`].
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => { $crate::log!(level: $crate::Level::Debug, $($arg)*) };
}

/// Logs at [`Level::Trace`].
#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => { $crate::log!(level: $crate::Level::Trace, $($arg)*) };
}
