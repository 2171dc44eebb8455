use anyhow::{Context, Result};
use etcetera::{choose_app_strategy, AppStrategy};
use std::fs;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use toolhub::config::APP_STRATEGY;

const DEFAULT_FILTER: &str = "toolhub=info,toolhub_cli=info";
const LOG_FILE_PREFIX: &str = "toolhub.log";

/// Directory for rotated log files, under the platform state directory when it has one
pub fn log_dir() -> Result<PathBuf> {
    let strategy = choose_app_strategy(APP_STRATEGY.clone())
        .context("HOME environment variable is not set")?;
    let base = strategy.state_dir().unwrap_or_else(|| strategy.data_dir());
    Ok(base.join("logs"))
}

/// Install the global subscriber: everything passing `RUST_LOG` (or the default
/// filter) goes to a daily file, and warnings are mirrored to stderr.
///
/// Keep the returned guard alive for the life of the process or buffered lines are lost.
pub fn setup_logging() -> Result<WorkerGuard> {
    let dir = log_dir()?;
    fs::create_dir_all(&dir).context("Failed to create log directory")?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &dir, LOG_FILE_PREFIX);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_target(true)
        .with_ansi(false)
        .with_file(true)
        .with_line_number(true);

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .with_filter(LevelFilter::WARN);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    #[serial]
    #[cfg(target_os = "linux")]
    fn test_log_dir_follows_xdg_state_home() {
        let temp_dir = TempDir::new().unwrap();
        temp_env::with_var("XDG_STATE_HOME", Some(temp_dir.path()), || {
            let dir = log_dir().unwrap();
            assert!(dir.starts_with(temp_dir.path()));
            assert!(dir.ends_with("logs"));
        });
    }
}
