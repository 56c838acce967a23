//! Runs a workload under the Windows Service Control Manager.

use crate::error::{HostError, HostResult};
use crate::logging::TracingLogger;
use crate::workload::{ManagedWorkload, WorkloadFactory};
use std::sync::{mpsc, Arc, OnceLock};

/// Status transitions reported to the service manager while driving a workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
  StartPending,
  Running,
  StopPending,
  Stopped,
  /// The workload refused to start; the service stops with an error code.
  Failed,
}

#[cfg_attr(not(windows), allow(dead_code))]
struct ServiceContext {
  name: String,
  factory: WorkloadFactory,
  args: Vec<String>,
}

static CONTEXT: OnceLock<ServiceContext> = OnceLock::new();

/// Hands control to the service dispatcher; returns once the service has stopped.
pub fn run_dispatcher(name: &str, factory: WorkloadFactory, args: Vec<String>) -> HostResult<()> {
  let ctx = ServiceContext {
    name: name.to_string(),
    factory,
    args,
  };
  if CONTEXT.set(ctx).is_err() {
    return Err(HostError::ServiceControl {
      name: name.to_string(),
      reason: "service dispatcher already started in this process".to_string(),
    });
  }
  dispatch(name)
}

#[cfg(windows)]
fn dispatch(name: &str) -> HostResult<()> {
  windows_dispatch::start(name)
}

#[cfg(not(windows))]
fn dispatch(_name: &str) -> HostResult<()> {
  Err(HostError::Unsupported("the service dispatcher"))
}

/// Starts one workload, reports it running, blocks until a stop request arrives
/// (or the sender is dropped) and stops it again.
pub fn drive(
  factory: &WorkloadFactory,
  args: &[String],
  stop_rx: &mpsc::Receiver<()>,
  mut report: impl FnMut(Phase) -> anyhow::Result<()>,
) -> anyhow::Result<()> {
  report(Phase::StartPending)?;
  let mut workload = ManagedWorkload::new(factory(Arc::new(TracingLogger)));

  if let Err(e) = workload.start(args) {
    tracing::error!(error = ?e, "workload failed to start");
    report(Phase::Failed)?;
    return Err(e);
  }
  report(Phase::Running)?;
  tracing::info!("service running");

  let _ = stop_rx.recv();

  report(Phase::StopPending)?;
  workload.stop();
  report(Phase::Stopped)?;
  tracing::info!("service stopped");
  Ok(())
}

#[cfg(windows)]
mod windows_dispatch {
  use super::{drive, Phase, CONTEXT};
  use crate::error::{HostError, HostResult};
  use std::ffi::OsString;
  use std::sync::mpsc;
  use std::time::Duration;
  use windows_service::define_windows_service;
  use windows_service::service::{
    ServiceControl, ServiceControlAccept, ServiceExitCode, ServiceState, ServiceStatus,
    ServiceType,
  };
  use windows_service::service_control_handler::{
    self, ServiceControlHandlerResult, ServiceStatusHandle,
  };
  use windows_service::service_dispatcher;

  const PENDING_WAIT_HINT: Duration = Duration::from_secs(10);

  define_windows_service!(ffi_service_main, service_main);

  pub fn start(name: &str) -> HostResult<()> {
    service_dispatcher::start(name, ffi_service_main).map_err(|e| HostError::ServiceControl {
      name: name.to_string(),
      reason: e.to_string(),
    })
  }

  fn service_main(arguments: Vec<OsString>) {
    if let Err(e) = run_service_inner(arguments) {
      tracing::error!(error = ?e, "service terminated with error");
    }
  }

  fn run_service_inner(arguments: Vec<OsString>) -> anyhow::Result<()> {
    let ctx = CONTEXT
      .get()
      .ok_or_else(|| anyhow::anyhow!("service context not initialised"))?;

    let (stop_tx, stop_rx) = mpsc::channel::<()>();
    let status_handle = service_control_handler::register(&ctx.name, move |control_event| {
      match control_event {
        ServiceControl::Stop | ServiceControl::Shutdown => {
          let _ = stop_tx.send(());
          ServiceControlHandlerResult::NoError
        }
        ServiceControl::Interrogate => ServiceControlHandlerResult::NoError,
        _ => ServiceControlHandlerResult::NotImplemented,
      }
    })?;

    // The first entry is the service name itself.
    let mut args = ctx.args.clone();
    args.extend(
      arguments
        .iter()
        .skip(1)
        .map(|a| a.to_string_lossy().into_owned()),
    );

    drive(&ctx.factory, &args, &stop_rx, |phase| {
      set_service_status(&status_handle, phase)
    })
  }

  fn set_service_status(status_handle: &ServiceStatusHandle, phase: Phase) -> anyhow::Result<()> {
    let (state, checkpoint, wait_hint, exit_code) = match phase {
      Phase::StartPending => (ServiceState::StartPending, 1, PENDING_WAIT_HINT, 0),
      Phase::Running => (ServiceState::Running, 0, Duration::default(), 0),
      Phase::StopPending => (ServiceState::StopPending, 1, PENDING_WAIT_HINT, 0),
      Phase::Stopped => (ServiceState::Stopped, 0, Duration::default(), 0),
      Phase::Failed => (ServiceState::Stopped, 0, Duration::default(), 1),
    };

    let status = ServiceStatus {
      service_type: ServiceType::OWN_PROCESS,
      current_state: state,
      controls_accepted: match state {
        ServiceState::Running => ServiceControlAccept::STOP | ServiceControlAccept::SHUTDOWN,
        _ => ServiceControlAccept::empty(),
      },
      exit_code: if exit_code == 0 {
        ServiceExitCode::Win32(0)
      } else {
        ServiceExitCode::ServiceSpecific(exit_code)
      },
      checkpoint,
      wait_hint,
      process_id: None,
    };
    status_handle.set_service_status(status)?;
    Ok(())
  }
}
