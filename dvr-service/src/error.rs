use thiserror::Error;

#[derive(Error, Debug)]
pub enum HostError {
  /// Recovered by re-running the operation elevated.
  #[error("administrator privileges are required")]
  NotElevated,

  #[error("elevation was declined or refused by the operating system")]
  ElevationDenied,

  #[error("install failed: {reason}")]
  InstallFailed { reason: String },

  #[error("uninstall failed: {reason}")]
  UninstallFailed { reason: String },

  #[error("process {pid} or its parent could not be resolved")]
  NotFound { pid: u32 },

  #[error("service control failed for `{name}`: {reason}")]
  ServiceControl { name: String, reason: String },

  #[error("service database error: {0}")]
  Database(String),

  #[error("{0} is only supported on Windows")]
  Unsupported(&'static str),

  #[error(transparent)]
  Io(#[from] std::io::Error),
}

impl HostError {
  /// True for faults that mean "the operation did not happen" rather than "it broke".
  pub fn is_not_completed(&self) -> bool {
    matches!(self, HostError::ElevationDenied | HostError::NotElevated)
  }
}

#[cfg(windows)]
impl From<windows_service::Error> for HostError {
  fn from(e: windows_service::Error) -> Self {
    HostError::Database(e.to_string())
  }
}

pub type HostResult<T> = Result<T, HostError>;
