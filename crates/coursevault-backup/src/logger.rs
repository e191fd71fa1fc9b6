//! Job logger chain.
//!
//! Every job owns a singly linked chain of log sinks. A message logged on
//! the chain enters at the head and travels to the tail; each sink decides
//! on its own, from its configured level, whether to emit it.

use crate::error::Result;
use crate::template;
use camino::Utf8PathBuf;
use chrono::Utc;
use coursevault_core::LogLevel;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::{Arc, Mutex};

/// Per-message options forwarded down the chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogOptions {
    /// Nesting depth, used for indentation
    pub depth: usize,
    /// Whether the message is meant for interactive display
    pub display: bool,
}

/// A destination for job log messages.
pub trait LogSink: Send {
    /// The most verbose level this sink emits
    fn level(&self) -> LogLevel;

    /// Emit one message. Only called for admitted levels.
    fn action(&mut self, message: &str, level: LogLevel, options: &LogOptions) -> Result<()>;

    /// Short name for diagnostics
    fn name(&self) -> &str {
        "sink"
    }
}

/// One link of the chain
pub struct ChainLink {
    sink: Box<dyn LogSink>,
    next: Option<Box<ChainLink>>,
}

impl ChainLink {
    fn new(sink: Box<dyn LogSink>) -> Self {
        Self { sink, next: None }
    }

    pub fn get_next(&self) -> Option<&ChainLink> {
        self.next.as_deref()
    }

    pub fn sink(&self) -> &dyn LogSink {
        self.sink.as_ref()
    }
}

/// Singly linked chain of log sinks
#[derive(Default)]
pub struct LoggerChain {
    head: Option<Box<ChainLink>>,
}

impl LoggerChain {
    pub fn new() -> Self {
        Self { head: None }
    }

    /// Build a chain from sinks, first sink at the head
    pub fn with_sinks(sinks: Vec<Box<dyn LogSink>>) -> Self {
        let mut chain = Self::new();
        for sink in sinks {
            chain.add_logger(sink);
        }
        chain
    }

    pub fn head(&self) -> Option<&ChainLink> {
        self.head.as_deref()
    }

    /// Append a sink at the tail of the chain
    pub fn add_logger(&mut self, sink: Box<dyn LogSink>) {
        let mut slot = &mut self.head;
        while let Some(link) = slot {
            slot = &mut link.next;
        }
        *slot = Some(Box::new(ChainLink::new(sink)));
    }

    pub fn len(&self) -> usize {
        let mut count = 0;
        let mut link = self.head();
        while let Some(l) = link {
            count += 1;
            link = l.get_next();
        }
        count
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Send a message down the chain.
    ///
    /// `args` fill `{key}` placeholders in `message`. The first sink that
    /// fails stops propagation and its error is returned.
    pub fn log(
        &mut self,
        message: &str,
        level: LogLevel,
        args: &[(&str, &str)],
        depth: usize,
        display: bool,
    ) -> Result<()> {
        let message = if args.is_empty() {
            message.to_string()
        } else {
            template::fill(message, |key| {
                args.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
            })
        };
        let options = LogOptions { depth, display };

        let mut link = self.head.as_deref_mut();
        while let Some(current) = link {
            if current.sink.level().admits(level) {
                current.sink.action(&message, level, &options)?;
            }
            link = current.next.as_deref_mut();
        }
        Ok(())
    }
}

impl std::fmt::Debug for LoggerChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names = Vec::new();
        let mut link = self.head();
        while let Some(l) = link {
            names.push(format!("{}({})", l.sink().name(), l.sink().level()));
            link = l.get_next();
        }
        f.debug_struct("LoggerChain").field("sinks", &names).finish()
    }
}

/// Forwards job messages to `tracing`
#[derive(Debug, Clone)]
pub struct TracingLogger {
    level: LogLevel,
}

impl TracingLogger {
    pub fn new(level: LogLevel) -> Self {
        Self { level }
    }
}

impl LogSink for TracingLogger {
    fn level(&self) -> LogLevel {
        self.level
    }

    fn action(&mut self, message: &str, level: LogLevel, options: &LogOptions) -> Result<()> {
        let depth = options.depth;
        match level {
            LogLevel::Error => tracing::error!(depth, "{}", message),
            LogLevel::Warning => tracing::warn!(depth, "{}", message),
            LogLevel::Info => tracing::info!(depth, "{}", message),
            LogLevel::Debug | LogLevel::None => tracing::debug!(depth, "{}", message),
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "tracing"
    }
}

/// Writes display messages to an output stream, indented by depth
pub struct OutputIndentedLogger<W: Write + Send> {
    level: LogLevel,
    out: W,
}

impl<W: Write + Send> OutputIndentedLogger<W> {
    pub fn new(level: LogLevel, out: W) -> Self {
        Self { level, out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl OutputIndentedLogger<std::io::Stdout> {
    pub fn stdout(level: LogLevel) -> Self {
        Self::new(level, std::io::stdout())
    }
}

impl<W: Write + Send> LogSink for OutputIndentedLogger<W> {
    fn level(&self) -> LogLevel {
        self.level
    }

    fn action(&mut self, message: &str, _level: LogLevel, options: &LogOptions) -> Result<()> {
        if !options.display {
            return Ok(());
        }
        writeln!(self.out, "{}{}", "  ".repeat(options.depth), message)?;
        Ok(())
    }

    fn name(&self) -> &str {
        "output"
    }
}

/// Appends timestamped lines to a log file
pub struct FileLogger {
    level: LogLevel,
    path: Utf8PathBuf,
    file: File,
}

impl FileLogger {
    pub fn open(level: LogLevel, path: impl Into<Utf8PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { level, path, file })
    }

    pub fn path(&self) -> &Utf8PathBuf {
        &self.path
    }
}

impl LogSink for FileLogger {
    fn level(&self) -> LogLevel {
        self.level
    }

    fn action(&mut self, message: &str, level: LogLevel, options: &LogOptions) -> Result<()> {
        writeln!(
            self.file,
            "[{}] {:<7} {}{}",
            Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
            level.as_str().to_uppercase(),
            "  ".repeat(options.depth),
            message
        )?;
        Ok(())
    }

    fn name(&self) -> &str {
        "file"
    }
}

/// A logged line kept in memory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub level: LogLevel,
    pub depth: usize,
    pub message: String,
}

/// Keeps messages in a shared buffer
#[derive(Debug, Clone)]
pub struct MemoryLogger {
    level: LogLevel,
    lines: Arc<Mutex<Vec<LogLine>>>,
}

impl MemoryLogger {
    pub fn new(level: LogLevel) -> Self {
        Self {
            level,
            lines: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Handle to the buffer; stays valid after the logger moves into a chain
    pub fn buffer(&self) -> Arc<Mutex<Vec<LogLine>>> {
        Arc::clone(&self.lines)
    }

    pub fn lines(&self) -> Vec<LogLine> {
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl LogSink for MemoryLogger {
    fn level(&self) -> LogLevel {
        self.level
    }

    fn action(&mut self, message: &str, level: LogLevel, options: &LogOptions) -> Result<()> {
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(LogLine {
                level,
                depth: options.depth,
                message: message.to_string(),
            });
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
