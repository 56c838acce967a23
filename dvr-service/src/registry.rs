use crate::descriptor::ServiceDescriptor;
use crate::error::HostResult;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
  Running,
  Stopped,
  StartPending,
  StopPending,
  Absent,
}

impl fmt::Display for ServiceStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      ServiceStatus::Running => "Running",
      ServiceStatus::Stopped => "Stopped",
      ServiceStatus::StartPending => "Start Pending",
      ServiceStatus::StopPending => "Stop Pending",
      ServiceStatus::Absent => "Not Installed",
    })
  }
}

/// The operating system's service database. Mutating calls require elevation.
pub trait ServiceDatabase: Send + Sync {
  /// `None` when no service with this name is registered.
  fn query(&self, name: &str) -> HostResult<Option<ServiceStatus>>;

  /// Creates the entry and its configuration as one unit; on failure nothing
  /// remains registered.
  fn register(&self, descriptor: &ServiceDescriptor) -> HostResult<()>;

  fn deregister(&self, name: &str) -> HostResult<()>;

  /// Blocks until the service reports running.
  fn start(&self, name: &str) -> HostResult<()>;

  /// Blocks until the service reports stopped.
  fn stop(&self, name: &str) -> HostResult<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceHandle {
  pub name: String,
  pub status: ServiceStatus,
}

/// Read-only view over a [`ServiceDatabase`].
pub struct ServiceRegistry<'a> {
  db: &'a dyn ServiceDatabase,
}

impl<'a> ServiceRegistry<'a> {
  pub fn new(db: &'a dyn ServiceDatabase) -> Self {
    Self { db }
  }

  pub fn find(&self, name: &str) -> HostResult<Option<ServiceHandle>> {
    Ok(self.db.query(name)?.map(|status| ServiceHandle {
      name: name.to_string(),
      status,
    }))
  }

  pub fn is_installed(&self, name: &str) -> HostResult<bool> {
    Ok(self.find(name)?.is_some())
  }

  pub fn status(&self, name: &str) -> HostResult<ServiceStatus> {
    Ok(self.find(name)?.map(|h| h.status).unwrap_or(ServiceStatus::Absent))
  }
}
