use crate::descriptor::ServiceDescriptor;
use crate::error::{HostError, HostResult};
use crate::registry::{ServiceDatabase, ServiceStatus};
use std::time::Duration;

/// Least-privilege account every registered service runs as.
pub const LOCAL_SERVICE_ACCOUNT: &str = "NT AUTHORITY\\LocalService";

pub fn system_database(control_timeout: Duration) -> Box<dyn ServiceDatabase> {
  #[cfg(windows)]
  {
    Box::new(windows_scm::WindowsServiceDatabase::new(control_timeout))
  }
  #[cfg(not(windows))]
  {
    let _ = control_timeout;
    Box::new(UnsupportedServiceDatabase)
  }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedServiceDatabase;

impl ServiceDatabase for UnsupportedServiceDatabase {
  fn query(&self, _name: &str) -> HostResult<Option<ServiceStatus>> {
    Err(HostError::Unsupported("the service database"))
  }

  fn register(&self, _descriptor: &ServiceDescriptor) -> HostResult<()> {
    Err(HostError::Unsupported("service registration"))
  }

  fn deregister(&self, _name: &str) -> HostResult<()> {
    Err(HostError::Unsupported("service registration"))
  }

  fn start(&self, _name: &str) -> HostResult<()> {
    Err(HostError::Unsupported("service control"))
  }

  fn stop(&self, _name: &str) -> HostResult<()> {
    Err(HostError::Unsupported("service control"))
  }
}

#[cfg(windows)]
mod windows_scm {
  use super::LOCAL_SERVICE_ACCOUNT;
  use crate::descriptor::ServiceDescriptor;
  use crate::error::{HostError, HostResult};
  use crate::registry::{ServiceDatabase, ServiceStatus};
  use std::ffi::{OsStr, OsString};
  use std::time::{Duration, Instant};
  use windows::Win32::Foundation::{
    ERROR_SERVICE_ALREADY_RUNNING, ERROR_SERVICE_DOES_NOT_EXIST, ERROR_SERVICE_NOT_ACTIVE,
  };
  use windows_service::service::{
    Service, ServiceAccess, ServiceErrorControl, ServiceInfo, ServiceStartType, ServiceState,
    ServiceType,
  };
  use windows_service::service_manager::{ServiceManager, ServiceManagerAccess};

  const POLL_INTERVAL: Duration = Duration::from_millis(250);

  pub struct WindowsServiceDatabase {
    control_timeout: Duration,
  }

  impl WindowsServiceDatabase {
    pub fn new(control_timeout: Duration) -> Self {
      Self { control_timeout }
    }

    fn wait_for(&self, name: &str, service: &Service, target: ServiceState) -> HostResult<()> {
      let deadline = Instant::now() + self.control_timeout;
      loop {
        let status = service.query_status()?;
        if status.current_state == target {
          return Ok(());
        }
        let pending = matches!(
          status.current_state,
          ServiceState::StartPending | ServiceState::StopPending
        );
        if !pending {
          return Err(HostError::ServiceControl {
            name: name.to_string(),
            reason: format!("service settled in {:?}, expected {target:?}", status.current_state),
          });
        }
        if Instant::now() >= deadline {
          return Err(HostError::ServiceControl {
            name: name.to_string(),
            reason: format!("timed out waiting for {target:?}"),
          });
        }
        std::thread::sleep(POLL_INTERVAL);
      }
    }
  }

  fn manager(access: ServiceManagerAccess) -> HostResult<ServiceManager> {
    Ok(ServiceManager::local_computer(None::<&str>, access)?)
  }

  fn has_code(e: &windows_service::Error, code: u32) -> bool {
    matches!(e, windows_service::Error::Winapi(io) if io.raw_os_error() == Some(code as i32))
  }

  fn map_state(state: ServiceState) -> ServiceStatus {
    match state {
      ServiceState::Running => ServiceStatus::Running,
      ServiceState::StartPending | ServiceState::ContinuePending => ServiceStatus::StartPending,
      ServiceState::StopPending | ServiceState::PausePending => ServiceStatus::StopPending,
      // The host never accepts pause; a paused service is not doing work.
      ServiceState::Stopped | ServiceState::Paused => ServiceStatus::Stopped,
    }
  }

  impl ServiceDatabase for WindowsServiceDatabase {
    fn query(&self, name: &str) -> HostResult<Option<ServiceStatus>> {
      let m = manager(ServiceManagerAccess::CONNECT)?;
      match m.open_service(name, ServiceAccess::QUERY_STATUS) {
        Ok(service) => Ok(Some(map_state(service.query_status()?.current_state))),
        Err(e) if has_code(&e, ERROR_SERVICE_DOES_NOT_EXIST.0) => Ok(None),
        Err(e) => Err(e.into()),
      }
    }

    fn register(&self, descriptor: &ServiceDescriptor) -> HostResult<()> {
      let install_failed = |e: windows_service::Error| HostError::InstallFailed {
        reason: e.to_string(),
      };
      let m = manager(ServiceManagerAccess::CONNECT | ServiceManagerAccess::CREATE_SERVICE)?;

      let info = ServiceInfo {
        name: OsString::from(&descriptor.name),
        display_name: OsString::from(&descriptor.display_name),
        service_type: ServiceType::OWN_PROCESS,
        start_type: ServiceStartType::AutoStart,
        error_control: ServiceErrorControl::Normal,
        executable_path: descriptor.binary_path.clone(),
        launch_arguments: descriptor.arguments.iter().map(OsString::from).collect(),
        dependencies: vec![],
        account_name: Some(OsString::from(LOCAL_SERVICE_ACCOUNT)),
        account_password: None,
      };

      let service = m
        .create_service(&info, ServiceAccess::CHANGE_CONFIG | ServiceAccess::DELETE)
        .map_err(install_failed)?;

      if let Err(e) = service.set_description(&descriptor.description) {
        tracing::warn!(service = %descriptor.name, error = %e, "rolling back partial registration");
        if let Err(rollback) = service.delete() {
          tracing::error!(service = %descriptor.name, error = %rollback, "rollback failed");
        }
        return Err(install_failed(e));
      }

      tracing::info!(
        service = %descriptor.name,
        command_line = %descriptor.command_line(),
        account = LOCAL_SERVICE_ACCOUNT,
        "service registered"
      );
      Ok(())
    }

    fn deregister(&self, name: &str) -> HostResult<()> {
      let uninstall_failed = |e: windows_service::Error| HostError::UninstallFailed {
        reason: e.to_string(),
      };
      let m = manager(ServiceManagerAccess::CONNECT)?;
      let service = m
        .open_service(name, ServiceAccess::DELETE | ServiceAccess::QUERY_STATUS)
        .map_err(uninstall_failed)?;
      service.delete().map_err(uninstall_failed)?;
      tracing::info!(service = %name, "service deregistered");
      Ok(())
    }

    fn start(&self, name: &str) -> HostResult<()> {
      let m = manager(ServiceManagerAccess::CONNECT)?;
      let service = m.open_service(name, ServiceAccess::START | ServiceAccess::QUERY_STATUS)?;
      match service.start(&[] as &[&OsStr]) {
        Ok(()) => {}
        Err(e) if has_code(&e, ERROR_SERVICE_ALREADY_RUNNING.0) => return Ok(()),
        Err(e) => {
          return Err(HostError::ServiceControl {
            name: name.to_string(),
            reason: e.to_string(),
          })
        }
      }
      self.wait_for(name, &service, ServiceState::Running)
    }

    fn stop(&self, name: &str) -> HostResult<()> {
      let m = manager(ServiceManagerAccess::CONNECT)?;
      let service = m.open_service(name, ServiceAccess::STOP | ServiceAccess::QUERY_STATUS)?;
      match service.stop() {
        Ok(_) => {}
        Err(e) if has_code(&e, ERROR_SERVICE_NOT_ACTIVE.0) => return Ok(()),
        Err(e) => {
          return Err(HostError::ServiceControl {
            name: name.to_string(),
            reason: e.to_string(),
          })
        }
      }
      self.wait_for(name, &service, ServiceState::Stopped)
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn unsupported_database_reports_unsupported() {
    let db = UnsupportedServiceDatabase;
    assert!(matches!(db.query("x"), Err(HostError::Unsupported(_))));
    assert!(matches!(db.stop("x"), Err(HostError::Unsupported(_))));
  }
}
