use crate::descriptor::ServiceDescriptor;
use crate::elevation::PrivilegeElevator;
use crate::error::{HostError, HostResult};
use crate::registry::{ServiceDatabase, ServiceRegistry, ServiceStatus};
use std::fs;
use std::io;
use std::path::Path;

/// Flags the elevated relaunch is invoked with.
pub const INSTALL_FLAG: &str = "-install";
pub const UNINSTALL_FLAG: &str = "-uninstall";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
  /// The change was made by this process.
  Applied,
  /// An elevated copy of this process made the change and exited cleanly.
  Delegated,
  /// Registered and staged, but the first start failed. The entry stays.
  InstalledNotStarted,
  AlreadyInstalled,
  NotInstalled,
}

pub struct ServiceInstaller<'a> {
  db: &'a dyn ServiceDatabase,
  elevator: &'a dyn PrivilegeElevator,
  current_exe: &'a Path,
  install_root: &'a Path,
}

impl<'a> ServiceInstaller<'a> {
  pub fn new(
    db: &'a dyn ServiceDatabase,
    elevator: &'a dyn PrivilegeElevator,
    current_exe: &'a Path,
    install_root: &'a Path,
  ) -> Self {
    Self {
      db,
      elevator,
      current_exe,
      install_root,
    }
  }

  pub fn install(&self, descriptor: &ServiceDescriptor) -> HostResult<Outcome> {
    descriptor.validate()?;
    let registry = ServiceRegistry::new(self.db);
    if registry.is_installed(&descriptor.name)? {
      tracing::info!(service = %descriptor.name, "already installed; nothing to do");
      return Ok(Outcome::AlreadyInstalled);
    }

    if let Err(not_elevated) = self.ensure_elevated() {
      return self.delegate(INSTALL_FLAG, not_elevated, |reason| HostError::InstallFailed {
        reason,
      });
    }

    let staged = self.stage(descriptor).map_err(|e| {
      self.prune_empty_dirs(descriptor.binary_path.parent());
      HostError::InstallFailed {
        reason: format!("staging {}: {e}", descriptor.binary_path.display()),
      }
    })?;

    if let Err(e) = self.db.register(descriptor) {
      if staged {
        self.remove_staged(&descriptor.binary_path);
      }
      return Err(match e {
        HostError::InstallFailed { .. } => e,
        other => HostError::InstallFailed {
          reason: other.to_string(),
        },
      });
    }

    if let Err(e) = self.db.start(&descriptor.name) {
      tracing::warn!(
        service = %descriptor.name,
        error = %e,
        "service installed but could not be started"
      );
      return Ok(Outcome::InstalledNotStarted);
    }
    tracing::info!(
      service = %descriptor.name,
      binary = %descriptor.binary_path.display(),
      "service installed and started"
    );
    Ok(Outcome::Applied)
  }

  pub fn uninstall(&self, descriptor: &ServiceDescriptor) -> HostResult<Outcome> {
    descriptor.validate()?;
    let registry = ServiceRegistry::new(self.db);
    let status = registry.status(&descriptor.name)?;
    if status == ServiceStatus::Absent {
      tracing::info!(service = %descriptor.name, "not installed; nothing to do");
      return Ok(Outcome::NotInstalled);
    }

    if let Err(not_elevated) = self.ensure_elevated() {
      return self.delegate(UNINSTALL_FLAG, not_elevated, |reason| {
        HostError::UninstallFailed { reason }
      });
    }

    if status != ServiceStatus::Stopped {
      if let Err(e) = self.db.stop(&descriptor.name) {
        tracing::warn!(
          service = %descriptor.name,
          error = %e,
          "stop before uninstall failed; the entry is removed once the service stops"
        );
      }
    }

    self.db.deregister(&descriptor.name).map_err(|e| match e {
      HostError::UninstallFailed { .. } => e,
      other => HostError::UninstallFailed {
        reason: other.to_string(),
      },
    })?;

    if same_file(self.current_exe, &descriptor.binary_path) {
      tracing::warn!(
        binary = %descriptor.binary_path.display(),
        "running from the staged binary; leaving it in place"
      );
    } else {
      self.remove_staged(&descriptor.binary_path);
    }

    tracing::info!(service = %descriptor.name, "service uninstalled");
    Ok(Outcome::Applied)
  }

  fn ensure_elevated(&self) -> HostResult<()> {
    if self.elevator.is_elevated() {
      Ok(())
    } else {
      Err(HostError::NotElevated)
    }
  }

  /// Recovers from `NotElevated` by re-running this binary elevated with `flag`.
  fn delegate(
    &self,
    flag: &str,
    cause: HostError,
    failed: fn(String) -> HostError,
  ) -> HostResult<Outcome> {
    tracing::info!(flag, reason = %cause, "handing the operation to an elevated process");
    let code = self.elevator.run_elevated(self.current_exe, flag)?;
    if code == 0 {
      Ok(Outcome::Delegated)
    } else {
      Err(failed(format!("elevated `{flag}` exited with code {code}")))
    }
  }

  /// Returns whether a copy was made.
  fn stage(&self, descriptor: &ServiceDescriptor) -> io::Result<bool> {
    if same_file(self.current_exe, &descriptor.binary_path) {
      return Ok(false);
    }
    if let Some(parent) = descriptor.binary_path.parent() {
      fs::create_dir_all(parent)?;
    }
    fs::copy(self.current_exe, &descriptor.binary_path)?;
    tracing::debug!(
      from = %self.current_exe.display(),
      to = %descriptor.binary_path.display(),
      "binary staged"
    );
    Ok(true)
  }

  fn remove_staged(&self, binary: &Path) {
    match fs::remove_file(binary) {
      Ok(()) => tracing::debug!(binary = %binary.display(), "staged binary removed"),
      Err(e) if e.kind() == io::ErrorKind::NotFound => {}
      Err(e) => {
        tracing::warn!(binary = %binary.display(), error = %e, "unable to remove staged binary");
        return;
      }
    }
    self.prune_empty_dirs(binary.parent());
  }

  /// Removes empty directories upwards, stopping at the install root or the
  /// first directory that still has entries.
  fn prune_empty_dirs(&self, start: Option<&Path>) {
    let mut dir = start;
    while let Some(d) = dir {
      if d == self.install_root || !d.starts_with(self.install_root) {
        break;
      }
      let empty = match fs::read_dir(d) {
        Ok(mut entries) => entries.next().is_none(),
        Err(_) => false,
      };
      if !empty || fs::remove_dir(d).is_err() {
        break;
      }
      tracing::debug!(dir = %d.display(), "removed empty install directory");
      dir = d.parent();
    }
  }
}

fn same_file(a: &Path, b: &Path) -> bool {
  match (fs::canonicalize(a), fs::canonicalize(b)) {
    (Ok(a), Ok(b)) => a == b,
    _ => a == b,
  }
}
