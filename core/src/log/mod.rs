//! Level-filtered, tagged, timestamped log emission to one or more sinks.
//!
//! Every stateful component (`Cpu`, `Gpu`, `Cdrom`) can be given its own
//! `Logger`; when none is installed, `global_logf` falls back to a single
//! process-wide sink, matching the "host-provided callback" shape of the
//! system being emulated: `(level, tag, message, user) -> ()`.

use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Instant;

/// Severity of a log record, most to least urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Level {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl Level {
    pub fn parse(s: &str) -> Option<Level> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Some(Level::Error),
            "warn" => Some(Level::Warn),
            "info" => Some(Level::Info),
            "debug" => Some(Level::Debug),
            "trace" => Some(Level::Trace),
            _ => None,
        }
    }
}

/// Bitmask selecting which subsystems a record belongs to, so a sink can
/// filter by component independently of severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Category(pub u32);

impl Category {
    pub const NONE: Category = Category(0);
    pub const FETCH: Category = Category(1 << 0);
    pub const DECODE: Category = Category(1 << 1);
    pub const EXEC: Category = Category(1 << 2);
    pub const MEM: Category = Category(1 << 3);
    pub const EXC: Category = Category(1 << 4);
    pub const CDROM: Category = Category(1 << 5);
    pub const GPU: Category = Category(1 << 6);
    pub const SPU: Category = Category(1 << 7);
    pub const DMA: Category = Category(1 << 8);
    pub const ALL: Category = Category(0xFFFF_FFFF);

    pub const fn or(self, other: Category) -> Category {
        Category(self.0 | other.0)
    }

    pub const fn intersects(self, mask: Category) -> bool {
        self.0 & mask.0 != 0
    }
}

/// A single log record, borrowed for the duration of the sink call so that
/// the hot path never allocates a `String` unless a sink actually wants one.
pub struct LogRecord<'a> {
    pub level: Level,
    pub category: Category,
    pub tag: &'a str,
    pub message: fmt::Arguments<'a>,
    pub elapsed: std::time::Duration,
}

pub trait LogSink: Send + Sync {
    fn log(&self, record: &LogRecord<'_>);
}

/// Writes `[+12.345s] LEVEL tag: message` lines to stderr.
pub struct StderrSink {
    start: Instant,
}

impl StderrSink {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }
}

impl Default for StderrSink {
    fn default() -> Self {
        Self::new()
    }
}

impl LogSink for StderrSink {
    fn log(&self, record: &LogRecord<'_>) {
        eprintln!(
            "[+{:>9.3}s] {:5} {}: {}",
            self.start.elapsed().as_secs_f64(),
            level_str(record.level),
            record.tag,
            record.message
        );
    }
}

/// Appends the same lines `StderrSink` prints to a file, for headless runs.
pub struct FileSink {
    file: Mutex<std::fs::File>,
    start: Instant,
}

impl FileSink {
    pub fn create(path: impl AsRef<std::path::Path>) -> std::io::Result<Self> {
        let file = std::fs::File::create(path)?;
        Ok(Self { file: Mutex::new(file), start: Instant::now() })
    }
}

impl LogSink for FileSink {
    fn log(&self, record: &LogRecord<'_>) {
        use std::io::Write;
        if let Ok(mut f) = self.file.lock() {
            let _ = writeln!(
                f,
                "[+{:>9.3}s] {:5} {}: {}",
                self.start.elapsed().as_secs_f64(),
                level_str(record.level),
                record.tag,
                record.message
            );
        }
    }
}

fn level_str(level: Level) -> &'static str {
    match level {
        Level::Error => "ERROR",
        Level::Warn => "WARN",
        Level::Info => "INFO",
        Level::Debug => "DEBUG",
        Level::Trace => "TRACE",
    }
}

/// Fan-out logger: filters by level/category then forwards to every sink.
#[derive(Clone)]
pub struct Logger {
    sinks: Vec<Arc<dyn LogSink>>,
    max_level: Level,
    cats_mask: Category,
    start: Instant,
}

impl Logger {
    pub fn new() -> Self {
        Self { sinks: Vec::new(), max_level: Level::Info, cats_mask: Category::ALL, start: Instant::now() }
    }

    pub fn add_sink(&mut self, sink: Arc<dyn LogSink>) {
        self.sinks.push(sink);
    }

    pub fn set_level(&mut self, level: Level) {
        self.max_level = level;
    }

    pub fn set_categories(&mut self, mask: Category) {
        self.cats_mask = mask;
    }

    pub fn enabled(&self, level: Level, category: Category) -> bool {
        level <= self.max_level && category.intersects(self.cats_mask)
    }

    pub fn log(&self, level: Level, category: Category, tag: &str, args: fmt::Arguments<'_>) {
        if !self.enabled(level, category) {
            return;
        }
        let record = LogRecord { level, category, tag, message: args, elapsed: self.start.elapsed() };
        for sink in &self.sinks {
            sink.log(&record);
        }
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new()
    }
}

/// `logger.logf!(Level::Info, Category::CDROM, "CD", "seek to lba {}", lba)`
#[macro_export]
macro_rules! logf {
    ($logger:expr, $level:expr, $cat:expr, $tag:expr, $($arg:tt)*) => {
        if let Some(l) = $logger.as_ref() {
            l.log($level, $cat, $tag, format_args!($($arg)*));
        }
    };
}

static GLOBAL_SINK: OnceLock<Mutex<Option<Arc<dyn LogSink>>>> = OnceLock::new();
static GLOBAL_LEVEL: OnceLock<Mutex<Level>> = OnceLock::new();

/// Installs the process-wide fallback sink. Call once at startup, before any
/// `global_logf`. Components that were given their own `Logger` never touch
/// this path; it exists only for bring-up convenience, per spec §6.
pub fn install_global_sink(sink: Arc<dyn LogSink>) {
    let cell = GLOBAL_SINK.get_or_init(|| Mutex::new(None));
    *cell.lock().unwrap() = Some(sink);
}

pub fn set_global_level(level: Level) {
    let cell = GLOBAL_LEVEL.get_or_init(|| Mutex::new(Level::Info));
    *cell.lock().unwrap() = level;
}

pub fn global_logf(level: Level, tag: &str, args: fmt::Arguments<'_>) {
    let max_level = GLOBAL_LEVEL.get().map(|m| *m.lock().unwrap()).unwrap_or(Level::Info);
    if level > max_level {
        return;
    }
    let Some(cell) = GLOBAL_SINK.get() else {
        eprintln!("{:5} {}: {}", level_str(level), tag, args);
        return;
    };
    match cell.lock().unwrap().as_ref() {
        Some(sink) => {
            let record = LogRecord { level, category: Category::ALL, tag, message: args, elapsed: std::time::Duration::ZERO };
            sink.log(&record);
        }
        None => eprintln!("{:5} {}: {}", level_str(level), tag, args),
    }
}
