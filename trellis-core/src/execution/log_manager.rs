//! Per-run log capture.
//!
//! A [`LogManager`] owns the log of one run. Its [`layer`](LogManager::layer)
//! is installed as the worker thread's default subscriber; the layer keeps
//! only events emitted by the thread whose name matches the run, writes them
//! to a [`LogSink`], republishes them through `message_logged`, and buffers
//! WARN-and-above records for the end-of-run summary.

use std::fmt::{self, Write as _};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write as _};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tracing::field::{Field, Visit};
use tracing::subscriber::Interest;
use tracing::{Event, Level, Metadata, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

use crate::error::{FormError, Result};
use crate::reactive::Communicator;

/// One captured log event.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: u128,
    pub level: Level,
    pub target: String,
    pub thread: String,
    pub message: String,
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:>5} [{}] {}: {}",
            self.timestamp_ms, self.level, self.thread, self.target, self.message
        )
    }
}

/// Destination for a run's log records.
pub trait LogSink: Send + Sync {
    fn write(&self, record: &LogRecord) -> std::io::Result<()>;

    fn flush(&self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<LogRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }
}

impl LogSink for MemorySink {
    fn write(&self, record: &LogRecord) -> std::io::Result<()> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

/// Appends one formatted line per record to a file.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl FileSink {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| FormError::Io {
                path: path.clone(),
                source,
            })?;
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogSink for FileSink {
    fn write(&self, record: &LogRecord) -> std::io::Result<()> {
        writeln!(self.writer.lock(), "{record}")
    }

    fn flush(&self) -> std::io::Result<()> {
        self.writer.lock().flush()
    }
}

struct LogInner {
    thread_name: String,
    min_level: Level,
    sink: Arc<dyn LogSink>,
    warnings: Mutex<Vec<LogRecord>>,
    write_failures: AtomicUsize,
    message_logged: Communicator<LogRecord>,
}

/// The log of one run.
#[derive(Clone)]
pub struct LogManager {
    inner: Arc<LogInner>,
}

impl LogManager {
    /// Capture events at `min_level` or more severe from `thread_name`.
    pub fn new(thread_name: impl Into<String>, sink: Arc<dyn LogSink>, min_level: Level) -> Self {
        Self {
            inner: Arc::new(LogInner {
                thread_name: thread_name.into(),
                min_level,
                sink,
                warnings: Mutex::new(Vec::new()),
                write_failures: AtomicUsize::new(0),
                message_logged: Communicator::new(),
            }),
        }
    }

    pub fn thread_name(&self) -> &str {
        &self.inner.thread_name
    }

    /// Emitted for every captured record, on the worker thread.
    pub fn message_logged(&self) -> &Communicator<LogRecord> {
        &self.inner.message_logged
    }

    /// A layer feeding this manager.
    pub fn layer(&self) -> RunLogLayer {
        RunLogLayer {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn warnings(&self) -> Vec<LogRecord> {
        self.inner.warnings.lock().clone()
    }

    /// Records the sink failed to store.
    pub fn write_failures(&self) -> usize {
        self.inner.write_failures.load(Ordering::Relaxed)
    }

    /// Consolidated WARN-and-above summary, or `None` for a clean run.
    pub fn summary(&self) -> Option<String> {
        let warnings = self.inner.warnings.lock();
        if warnings.is_empty() {
            return None;
        }
        let mut text = format!("{} warning(s) during run:", warnings.len());
        for record in warnings.iter() {
            let _ = write!(text, "\n  {} {}: {}", record.level, record.target, record.message);
        }
        Some(text)
    }

    /// Flush the sink and return the buffered warnings as lines.
    pub fn finish(&self) -> Vec<String> {
        if let Err(err) = self.inner.sink.flush() {
            tracing::warn!(run = %self.inner.thread_name, error = %err, "could not flush run log");
        }
        self.warnings()
            .iter()
            .map(|record| format!("{} {}: {}", record.level, record.target, record.message))
            .collect()
    }
}

impl fmt::Debug for LogManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogManager")
            .field("thread_name", &self.inner.thread_name)
            .field("min_level", &self.inner.min_level)
            .field("warnings", &self.inner.warnings.lock().len())
            .finish()
    }
}

/// [`Layer`] half of a [`LogManager`].
pub struct RunLogLayer {
    inner: Arc<LogInner>,
}

impl<S: Subscriber> Layer<S> for RunLogLayer {
    // Several runs may share callsites under different levels, so interest
    // is decided per event.
    fn register_callsite(&self, _metadata: &'static Metadata<'static>) -> Interest {
        Interest::sometimes()
    }

    fn enabled(&self, metadata: &Metadata<'_>, _ctx: Context<'_, S>) -> bool {
        *metadata.level() <= self.inner.min_level
    }

    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let current = std::thread::current();
        if current.name() != Some(self.inner.thread_name.as_str()) {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let metadata = event.metadata();
        let record = LogRecord {
            timestamp_ms: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|elapsed| elapsed.as_millis())
                .unwrap_or_default(),
            level: *metadata.level(),
            target: metadata.target().to_string(),
            thread: self.inner.thread_name.clone(),
            message: visitor.finish(),
        };

        if self.inner.sink.write(&record).is_err() {
            self.inner.write_failures.fetch_add(1, Ordering::Relaxed);
        }
        if record.level <= Level::WARN {
            self.inner.warnings.lock().push(record.clone());
        }
        self.inner.message_logged.emit(&record);
    }
}

/// Collects the `message` field and renders other fields as `key=value`.
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else if self.message.is_empty() {
            self.fields.trim_start().to_string()
        } else {
            format!("{}{}", self.message, self.fields)
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}
