use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;

const LOG_ENV: &str = "KALI_LOG";

/// Install the global tracing subscriber.
///
/// Logs go to stderr, filtered by `KALI_LOG` (default `info`). With
/// `log.file` enabled they are also appended to a daily rolling file; keep
/// the returned guard alive so buffered lines are flushed on exit.
pub fn init(config: &LogConfig) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
  let builder = tracing_subscriber::fmt().with_env_filter(filter);

  if !config.file {
    builder
      .with_writer(std::io::stderr)
      .try_init()
      .map_err(|e| eyre!("Failed to install logger: {}", e))?;
    return Ok(None);
  }

  let directory = match &config.directory {
    Some(dir) => dir.clone(),
    None => default_log_dir()?,
  };
  std::fs::create_dir_all(&directory)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", directory.display(), e))?;

  let appender = tracing_appender::rolling::daily(&directory, "kali-sync.log");
  let (file_writer, guard) = tracing_appender::non_blocking(appender);

  builder
    .with_writer(std::io::stderr.and(file_writer))
    .with_ansi(false)
    .try_init()
    .map_err(|e| eyre!("Failed to install logger: {}", e))?;

  Ok(Some(guard))
}

fn default_log_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(data_dir.join("kali-sync").join("logs"))
}
