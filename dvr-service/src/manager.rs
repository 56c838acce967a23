use crate::config::ServiceConfig;
use crate::elevation::{PrivilegeElevator, SystemElevator};
use crate::error::HostResult;
use crate::installer::ServiceInstaller;
use crate::paths;
use crate::registry::{ServiceDatabase, ServiceRegistry};
use crate::scm;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Everything the host needs to inspect and change its own service
/// registration, built once per process and passed down explicitly.
pub struct ServiceManager {
  db: Box<dyn ServiceDatabase>,
  elevator: Box<dyn PrivilegeElevator>,
  current_exe: PathBuf,
  install_root: PathBuf,
}

impl ServiceManager {
  pub fn new(
    db: Box<dyn ServiceDatabase>,
    elevator: Box<dyn PrivilegeElevator>,
    current_exe: PathBuf,
    install_root: PathBuf,
  ) -> Self {
    Self {
      db,
      elevator,
      current_exe,
      install_root,
    }
  }

  pub fn system(cfg: &ServiceConfig) -> anyhow::Result<Self> {
    Ok(Self::new(
      scm::system_database(Duration::from_secs(cfg.control_timeout_seconds)),
      Box::new(SystemElevator),
      std::env::current_exe()?,
      paths::program_files_dir(),
    ))
  }

  pub fn registry(&self) -> ServiceRegistry<'_> {
    ServiceRegistry::new(self.db.as_ref())
  }

  pub fn installer(&self) -> ServiceInstaller<'_> {
    ServiceInstaller::new(
      self.db.as_ref(),
      self.elevator.as_ref(),
      &self.current_exe,
      &self.install_root,
    )
  }

  pub fn start_service(&self, name: &str) -> HostResult<()> {
    self.db.start(name)
  }

  pub fn stop_service(&self, name: &str) -> HostResult<()> {
    self.db.stop(name)
  }

  pub fn current_exe(&self) -> &Path {
    &self.current_exe
  }

  pub fn install_root(&self) -> &Path {
    &self.install_root
  }
}
