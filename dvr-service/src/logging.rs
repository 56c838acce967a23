use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::OnceLock;
use std::time::{Duration, SystemTime};

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::workload::Logger;

const LOG_FILE_SUFFIX: &str = "log";

static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Which side of the host is writing. The service account and an interactive
/// administrator each get their own files, so neither trips over the other's
/// file permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
  /// File only.
  Service,
  /// File plus stderr.
  Console,
}

impl LogTarget {
  pub fn file_prefix(self) -> &'static str {
    match self {
      LogTarget::Service => "dvr-service",
      LogTarget::Console => "dvr-console",
    }
  }
}

pub fn init_file_only(log_dir: &Path, level: &str, retention_days: u64) -> anyhow::Result<()> {
  init(LogTarget::Service, log_dir, level, retention_days)
}

pub fn init_file_and_stderr(
  log_dir: &Path,
  level: &str,
  retention_days: u64,
) -> anyhow::Result<()> {
  init(LogTarget::Console, log_dir, level, retention_days)
}

fn init(target: LogTarget, log_dir: &Path, level: &str, retention_days: u64) -> anyhow::Result<()> {
  fs::create_dir_all(log_dir)
    .with_context(|| format!("create log directory {}", log_dir.display()))?;
  cleanup_old_logs(target, log_dir, retention_days);

  let (file_writer, guard) = tracing_appender::non_blocking(file_appender(target, log_dir)?);
  let _ = FILE_GUARD.set(guard);

  let filter = tracing_subscriber::EnvFilter::try_new(level)
    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

  let file_layer = tracing_subscriber::fmt::layer()
    .with_ansi(false)
    .with_writer(file_writer)
    .with_target(true);

  let registry = tracing_subscriber::registry().with(filter).with(file_layer);
  match target {
    LogTarget::Console => {
      let stderr_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .with_target(false);
      registry.with(stderr_layer).try_init()?;
    }
    LogTarget::Service => registry.try_init()?,
  }

  Ok(())
}

/// Daily `<prefix>.<date>.log` files under `log_dir`.
fn file_appender(target: LogTarget, log_dir: &Path) -> anyhow::Result<RollingFileAppender> {
  RollingFileAppender::builder()
    .rotation(Rotation::DAILY)
    .filename_prefix(target.file_prefix())
    .filename_suffix(LOG_FILE_SUFFIX)
    .build(log_dir)
    .with_context(|| {
      format!(
        "open {} log file in {}",
        target.file_prefix(),
        log_dir.display()
      )
    })
}

/// Best effort; a file that cannot be inspected or removed is skipped.
fn cleanup_old_logs(target: LogTarget, log_dir: &Path, retention_days: u64) {
  if retention_days == 0 {
    return;
  }

  let cutoff = SystemTime::now()
    .checked_sub(Duration::from_secs(retention_days.saturating_mul(24 * 60 * 60)))
    .unwrap_or(SystemTime::UNIX_EPOCH);

  let Ok(entries) = fs::read_dir(log_dir) else {
    return;
  };

  for entry in entries.flatten() {
    let path = entry.path();
    if !is_log_file_of(target, &path) {
      continue;
    }
    let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
      continue;
    };
    if modified < cutoff {
      let _ = fs::remove_file(&path);
    }
  }
}

fn is_log_file_of(target: LogTarget, path: &Path) -> bool {
  let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
    return false;
  };
  name
    .strip_prefix(target.file_prefix())
    .and_then(|rest| rest.strip_prefix('.'))
    .is_some_and(|rest| rest.ends_with(".log"))
}

/// Lifecycle messages from a workload running under the service manager.
#[derive(Debug, Clone, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
  fn write(&self, message: &str) {
    tracing::info!(target: "workload", "{message}");
  }
}

/// Lifecycle messages from the console-hosted instance, echoed to the operator.
#[derive(Debug, Clone, Default)]
pub struct ConsoleLogger;

impl Logger for ConsoleLogger {
  fn write(&self, message: &str) {
    tracing::debug!(target: "workload", "{message}");
    let mut out = std::io::stdout().lock();
    let _ = writeln!(out, "{message}");
  }
}
