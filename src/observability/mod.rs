//! Logging initialization.
//!
//! Library code only emits `tracing` events and `metrics` counters; nothing is
//! recorded until the host installs a subscriber or recorder. [`init_logging`]
//! installs a `tracing-subscriber` stack for hosts that have none.
//!
//! # Counters
//!
//! | Name | Labels | Incremented |
//! |------|--------|-------------|
//! | `classification_get_total` | `backend` | Every read |
//! | `classification_miss_total` | `backend` | Reads with nothing stored |
//! | `classification_set_total` | `backend` | Every successful write |
//! | `classification_upsert_retry_total` | | Insert races retried as updates |

mod logging;

pub use logging::{LogFormat, LoggingConfig};

use crate::{Error, Result};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Layer, Registry};

static LOGGING_INIT: OnceLock<()> = OnceLock::new();

type OutputLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Installs the global `tracing` subscriber.
///
/// # Errors
///
/// Returns an error if logging was already initialized, the level directive is
/// invalid, or the log file cannot be opened.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    if LOGGING_INIT.get().is_some() {
        return Err(logging_init_failed("logging already initialized"));
    }

    let filter = config.filter()?;
    let output = match &config.file {
        Some(path) => {
            let file = Arc::new(append_only(path)?);
            output_layer(config.format, BoxMakeWriter::new(file), false)
        },
        None => output_layer(config.format, BoxMakeWriter::new(io::stderr), true),
    };

    tracing_subscriber::registry()
        .with(output)
        .with(filter)
        .try_init()
        .map_err(logging_init_failed)?;

    LOGGING_INIT
        .set(())
        .map_err(|()| logging_init_failed("logging already initialized"))
}

/// Formats events for `writer`. Pretty output is multi-line only on a terminal.
fn output_layer(format: LogFormat, writer: BoxMakeWriter, terminal: bool) -> OutputLayer {
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(terminal)
        .with_target(true)
        .with_thread_ids(true);

    match format {
        LogFormat::Json => layer.json().with_current_span(true).boxed(),
        LogFormat::Pretty if terminal => layer.pretty().boxed(),
        LogFormat::Pretty => layer.boxed(),
    }
}

/// Opens `path` in append mode, creating missing parent directories.
fn append_only(path: &Path) -> Result<File> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
    if let Some(dir) = dir {
        std::fs::create_dir_all(dir).map_err(|e| Error::OperationFailed {
            operation: "create_log_dir".to_string(),
            cause: format!("{}: {e}", dir.display()),
        })?;
    }

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| Error::OperationFailed {
            operation: "open_log_file".to_string(),
            cause: format!("{}: {e}", path.display()),
        })
}

#[allow(clippy::needless_pass_by_value)]
fn logging_init_failed(cause: impl fmt::Display) -> Error {
    Error::OperationFailed {
        operation: "logging_init".to_string(),
        cause: cause.to_string(),
    }
}
