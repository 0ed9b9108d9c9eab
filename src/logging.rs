//! Logging
//!
//! Explicit logging handle passed into the listener and every connection.
//!
//! ## Responsibilities
//! - Install the process-wide `tracing` subscriber once, at startup
//! - Leveled emit calls with attached key/value fields and errors
//! - Per-connection loggers bound to a connection id
//! - Line-oriented `io::Write` sinks at warn/error level for code that
//!   only knows how to write text

use std::fmt;
use std::io;
use std::thread::{self, JoinHandle};

use crossbeam::channel::Receiver;
use tracing::{Level, Span};
use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "info,ticknet=debug";

/// Subscriber settings
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Multi-line human readable output instead of compact lines
    pub pretty: bool,

    /// Filter directives used when `RUST_LOG` is unset
    pub default_filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            pretty: false,
            default_filter: DEFAULT_FILTER.to_string(),
        }
    }
}

/// Install the global subscriber
///
/// Returns false if a subscriber was already installed; the existing one is
/// left untouched.
pub fn init(config: &LogConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);

    let installed = if config.pretty {
        builder.pretty().try_init()
    } else {
        builder.compact().try_init()
    };

    installed.is_ok()
}

// =============================================================================
// Logger
// =============================================================================

/// Emit one event inside the logger's span, attaching its fields if any.
/// `$level` must be a `Level` constant.
macro_rules! emit {
    ($logger:expr, $level:expr, $msg:expr) => {{
        let _entered = $logger.span.enter();
        if $logger.fields.is_empty() {
            tracing::event!($level, "{}", $msg);
        } else {
            let fields = Fields(&$logger.fields);
            tracing::event!($level, fields = %fields, "{}", $msg);
        }
    }};
}

/// Cloneable logging handle
///
/// Carries a span (service or connection context) and a list of structured
/// fields added with [`Logger::with_field`] / [`Logger::with_error`].
/// Adding a field returns a new handle; the original is unchanged.
#[derive(Debug, Clone)]
pub struct Logger {
    span: Span,
    fields: Vec<(String, String)>,
}

impl Default for Logger {
    fn default() -> Self {
        Self {
            span: Span::none(),
            fields: Vec::new(),
        }
    }
}

impl Logger {
    /// Root logger carrying the standard service fields
    pub fn service(name: &str, version: &str) -> Self {
        let logger = Self {
            span: tracing::info_span!("service", service = %name, version = %version),
            fields: Vec::new(),
        };
        logger.info("Starting");
        logger
    }

    /// Child logger bound to one connection
    pub fn for_connection(&self, id: &str) -> Self {
        Self {
            span: tracing::info_span!(parent: &self.span, "connection", connection_id = %id),
            fields: self.fields.clone(),
        }
    }

    /// New handle with an extra field
    ///
    /// Keys are chosen at runtime, which `tracing` fields cannot be, so all
    /// attached pairs are rendered into one `fields` value as
    /// `key=value key=value`. Text output reads naturally; a JSON subscriber
    /// sees a single string rather than separate keys.
    pub fn with_field(&self, key: &str, value: impl fmt::Display) -> Self {
        let mut fields = self.fields.clone();
        fields.push((key.to_string(), value.to_string()));
        Self {
            span: self.span.clone(),
            fields,
        }
    }

    /// New handle with the error attached as the `error` field
    pub fn with_error(&self, err: impl fmt::Display) -> Self {
        self.with_field("error", err)
    }

    pub fn debug(&self, msg: &str) {
        emit!(self, Level::DEBUG, msg);
    }

    pub fn info(&self, msg: &str) {
        emit!(self, Level::INFO, msg);
    }

    pub fn warn(&self, msg: &str) {
        emit!(self, Level::WARN, msg);
    }

    pub fn error(&self, msg: &str) {
        emit!(self, Level::ERROR, msg);
    }

    /// Log at error level, then terminate the process
    pub fn fatal(&self, msg: &str) -> ! {
        emit!(self, Level::ERROR, msg);
        std::process::exit(1);
    }

    /// Line sink that logs each written line at warn level
    pub fn warn_writer(&self) -> LevelWriter {
        LevelWriter::new(self.clone(), SinkLevel::Warn)
    }

    /// Line sink that logs each written line at error level
    pub fn error_writer(&self) -> LevelWriter {
        LevelWriter::new(self.clone(), SinkLevel::Error)
    }

    /// Log every error received on `errors` until all senders are dropped
    pub fn subscribe_errors<E>(&self, errors: Receiver<E>) -> JoinHandle<()>
    where
        E: fmt::Display + Send + 'static,
    {
        let logger = self.clone();
        thread::spawn(move || {
            for err in errors.iter() {
                logger.error(&err.to_string());
            }
        })
    }

    /// Fields attached to this handle, in insertion order
    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }
}

/// `key=value` pairs separated by spaces
struct Fields<'a>(&'a [(String, String)]);

impl fmt::Display for Fields<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}={}", key, value)?;
        }
        Ok(())
    }
}

// =============================================================================
// Line sinks
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SinkLevel {
    Warn,
    Error,
}

/// `io::Write` adapter emitting one log event per line
///
/// A trailing partial line is emitted on `flush` or drop.
pub struct LevelWriter {
    logger: Logger,
    level: SinkLevel,
    pending: Vec<u8>,
}

impl LevelWriter {
    fn new(logger: Logger, level: SinkLevel) -> Self {
        Self {
            logger,
            level,
            pending: Vec::new(),
        }
    }

    fn emit_line(&self, line: &[u8]) {
        let text = String::from_utf8_lossy(line);
        let text = text.trim_end_matches('\r');
        if text.is_empty() {
            return;
        }
        match self.level {
            SinkLevel::Warn => self.logger.warn(text),
            SinkLevel::Error => self.logger.error(text),
        }
    }
}

impl io::Write for LevelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.emit_line(&line[..line.len() - 1]);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            self.emit_line(&line);
        }
        Ok(())
    }
}

impl Drop for LevelWriter {
    fn drop(&mut self) {
        let _ = io::Write::flush(self);
    }
}
