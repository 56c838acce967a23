use crate::config::ConsoleConfig;
use crate::console::{self, ServiceConsole};
use crate::context::RunMode;
use crate::descriptor::ServiceDescriptor;
use crate::error::{HostError, HostResult};
use crate::installer::Outcome;
use crate::logging::ConsoleLogger;
use crate::manager::ServiceManager;
use crate::service;
use crate::workload::WorkloadFactory;
use std::sync::Arc;

pub const EXIT_OK: i32 = 0;
pub const EXIT_FAILED: i32 = 1;
/// Elevation was declined, so the requested change never happened.
pub const EXIT_NOT_COMPLETED: i32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostCommand {
  Service,
  Install,
  Uninstall,
  Console,
}

impl HostCommand {
  /// Exactly one flag, case-insensitive, with an optional leading `/` or `-`.
  /// Anything else enters the console.
  pub fn parse(args: &[String]) -> Self {
    let [flag] = args else {
      return HostCommand::Console;
    };
    let flag = flag.trim();
    let flag = flag
      .strip_prefix('/')
      .or_else(|| flag.strip_prefix('-'))
      .unwrap_or(flag);

    if flag.eq_ignore_ascii_case("service") {
      HostCommand::Service
    } else if flag.eq_ignore_ascii_case("install") {
      HostCommand::Install
    } else if flag.eq_ignore_ascii_case("uninstall") {
      HostCommand::Uninstall
    } else {
      HostCommand::Console
    }
  }
}

pub fn exit_code(result: &HostResult<Outcome>) -> i32 {
  match result {
    Ok(_) => EXIT_OK,
    Err(e) if e.is_not_completed() => EXIT_NOT_COMPLETED,
    Err(_) => EXIT_FAILED,
  }
}

/// Decides between the service dispatcher, a one-shot install/uninstall and the
/// interactive console.
pub struct ServiceHostRuntime<'a> {
  manager: &'a ServiceManager,
  mode: RunMode,
  console: ConsoleConfig,
}

impl<'a> ServiceHostRuntime<'a> {
  pub fn new(manager: &'a ServiceManager, mode: RunMode, console: ConsoleConfig) -> Self {
    Self {
      manager,
      mode,
      console,
    }
  }

  pub fn run(
    &self,
    descriptor: &ServiceDescriptor,
    factory: WorkloadFactory,
    args: &[String],
  ) -> i32 {
    let command = HostCommand::parse(args);

    if self.mode == RunMode::ServiceManaged || command == HostCommand::Service {
      let service_args: Vec<String> = if command == HostCommand::Service {
        Vec::new()
      } else {
        args.to_vec()
      };
      tracing::info!(service = %descriptor.name, "handing control to the service dispatcher");
      return match service::run_dispatcher(&descriptor.name, factory, service_args) {
        Ok(()) => EXIT_OK,
        Err(e) => {
          tracing::error!(error = %e, "service dispatcher failed");
          EXIT_FAILED
        }
      };
    }

    match command {
      HostCommand::Install => self.run_flag("install", self.manager.installer().install(descriptor)),
      HostCommand::Uninstall => {
        self.run_flag("uninstall", self.manager.installer().uninstall(descriptor))
      }
      _ => match self.run_console(descriptor, factory, args) {
        Ok(()) => EXIT_OK,
        Err(e) => {
          tracing::error!(error = ?e, "console failed");
          eprintln!("{e:#}");
          EXIT_FAILED
        }
      },
    }
  }

  fn run_flag(&self, operation: &str, result: HostResult<Outcome>) -> i32 {
    match &result {
      Ok(outcome) => tracing::info!(operation, ?outcome, "completed"),
      Err(HostError::ElevationDenied) => {
        tracing::warn!(operation, "elevation declined; nothing was changed")
      }
      Err(e) => tracing::error!(operation, error = %e, "failed"),
    }
    exit_code(&result)
  }

  fn run_console(
    &self,
    descriptor: &ServiceDescriptor,
    factory: WorkloadFactory,
    args: &[String],
  ) -> anyhow::Result<()> {
    let input = console::stdio_channel()?;
    let mut console = ServiceConsole::new(
      self.manager,
      descriptor,
      factory,
      Arc::new(ConsoleLogger),
      args.to_vec(),
      std::io::stdout(),
    );
    console.run(&input, self.console.autostart)
  }
}
