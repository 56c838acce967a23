pub mod ancestry;
pub mod capture;
pub mod config;
pub mod console;
pub mod context;
pub mod descriptor;
pub mod elevation;
pub mod error;
pub mod host;
pub mod installer;
pub mod logging;
pub mod manager;
pub mod paths;
pub mod registry;
pub mod scm;
pub mod service;
pub mod workload;

#[cfg(test)]
mod testing;

use crate::ancestry::SystemProcesses;
use crate::context::{ExecutionContextDetector, RunMode};
use crate::descriptor::ServiceDescriptor;
use crate::host::{HostCommand, ServiceHostRuntime};
use crate::manager::ServiceManager;
use anyhow::Context;

/// Process entry point shared by the binary; `args` includes the program name.
pub fn run_host(args: &[String]) -> anyhow::Result<i32> {
  let flags = args.get(1..).unwrap_or(&[]);
  let command = HostCommand::parse(flags);
  let detection = ExecutionContextDetector::new(SystemProcesses).current_detection();
  let mode = detection.mode;
  let service_mode = mode == RunMode::ServiceManaged || command == HostCommand::Service;

  let base = paths::base_dir()?;
  let config_path = paths::config_path(&base);
  let cfg = if service_mode {
    config::load_or_default_readonly(&config_path)
  } else {
    config::load_or_create_default(&config_path)
  }
  .with_context(|| format!("load config {}", config_path.display()))?;

  let logs = paths::logs_dir(&base);
  if service_mode {
    logging::init_file_only(&logs, &cfg.logging.level, cfg.logging.retention_days)
  } else {
    logging::init_file_and_stderr(&logs, &cfg.logging.level, cfg.logging.retention_days)
  }
  .context("initialise logging")?;
  detection.log();

  tracing::info!(
    version = env!("CARGO_PKG_VERSION"),
    ?mode,
    ?command,
    "dvr-service starting"
  );

  let manager = ServiceManager::system(&cfg.service).context("locate service manager")?;
  let descriptor =
    ServiceDescriptor::from_config(&cfg.service, manager.install_root(), manager.current_exe())?;
  let factory = capture::stream_factory(
    cfg.capture.clone(),
    capture::resolve_output_dir(&cfg.capture, &base),
  );

  let runtime = ServiceHostRuntime::new(&manager, mode, cfg.console.clone());
  Ok(runtime.run(&descriptor, factory, flags))
}
