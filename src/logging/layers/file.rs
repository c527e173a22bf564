use crate::logging::config::{LogFormat, LoggingConfig};
use crate::logging::layers::{noop_layer, BoxLayer};
use crate::Result;
use anyhow::{anyhow, Context};
use std::env;
use std::fs::{create_dir_all, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::{self as tracing_fmt, writer::BoxMakeWriter};
use tracing_subscriber::layer::Layer;
use tracing_subscriber::registry::LookupSpan;

const LOG_FILE_NAME: &str = "pr2-pipeline.log";

/// Location of the log file: `log_dir` (relative to the working directory)
/// or the platform's local data directory.
pub fn log_file_path(config: &LoggingConfig) -> Result<PathBuf> {
    let directory = match &config.log_dir {
        Some(dir) if dir.is_absolute() => dir.clone(),
        Some(dir) => env::current_dir()
            .context("failed to resolve working directory")?
            .join(dir),
        None => dirs_next::data_local_dir()
            .ok_or_else(|| anyhow!("no local data directory available for log files"))?
            .join("pr2-pipeline")
            .join("logs"),
    };
    Ok(directory.join(LOG_FILE_NAME))
}

/// Build a tracing layer that appends to `log_file` through a non-blocking writer.
pub fn file_layer<S>(
    log_file: Option<&Path>,
    format: LogFormat,
) -> Result<(BoxLayer<S>, Option<WorkerGuard>)>
where
    S: Subscriber + for<'a> LookupSpan<'a> + Send + Sync + 'static,
{
    let Some(log_file) = log_file else {
        return Ok((noop_layer(), None));
    };

    ensure_log_dir(log_file)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .with_context(|| format!("failed to open log file {}", log_file.display()))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file);
    let writer = BoxMakeWriter::new(move || non_blocking.clone());
    let layer = tracing_fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(false);
    let layer = match format {
        LogFormat::Text => layer.boxed(),
        LogFormat::Json => layer.json().with_current_span(true).boxed(),
    };
    Ok((layer, Some(guard)))
}

fn ensure_log_dir(log_file: &Path) -> Result<()> {
    let directory = log_file.parent().ok_or_else(|| {
        anyhow!(
            "log file path {} has no parent directory",
            log_file.display()
        )
    })?;
    create_dir_all(directory)
        .with_context(|| format!("failed to create log directory {}", directory.display()))?;
    Ok(())
}
