//! Tracing setup: a daily log file under the data directory, plus stderr
//! when running verbose.

use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{filter::EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable holding the filter directives.
pub const LOG_ENV: &str = "WORKBENCH_LOG";
const DEFAULT_FILTER: &str = "workbench=info";

pub fn log_dir() -> Option<PathBuf> {
  dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .map(|d| d.join("workbench").join("logs"))
}

fn env_filter(verbose: bool) -> Result<EnvFilter> {
  match std::env::var(LOG_ENV) {
    Ok(directives) if !directives.is_empty() => EnvFilter::try_new(directives),
    _ if verbose => EnvFilter::try_new("workbench=debug"),
    _ => EnvFilter::try_new(DEFAULT_FILTER),
  }
  .map_err(|e| eyre!("Failed to create tracing filter: {e}"))
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop, so keep it alive for
/// the life of the process.
pub fn init(verbose: bool) -> Result<Option<WorkerGuard>> {
  let filter = env_filter(verbose)?;

  let (file_layer, guard) = match log_dir() {
    Some(dir) => {
      std::fs::create_dir_all(&dir)?;
      let appender = tracing_appender::rolling::daily(dir, "workbench.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);
      let layer = fmt::layer().with_writer(writer).with_ansi(false).with_target(true);
      (Some(layer), Some(guard))
    }
    None => (None, None),
  };

  let stderr_layer = verbose.then(|| fmt::layer().with_writer(std::io::stderr).compact());

  tracing_subscriber::registry()
    .with(filter)
    .with(file_layer)
    .with(stderr_layer)
    .try_init()
    .map_err(|e| eyre!("Failed to install tracing subscriber: {e}"))?;

  Ok(guard)
}
