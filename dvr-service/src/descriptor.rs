use crate::config::ServiceConfig;
use crate::error::{HostError, HostResult};
use crate::paths;
use std::path::{Path, PathBuf};

/// Launch argument the service manager passes back to the staged binary.
pub const SERVICE_ARGUMENT: &str = "-service";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
  pub name: String,
  pub display_name: String,
  pub description: String,
  pub binary_path: PathBuf,
  pub arguments: Vec<String>,
}

impl ServiceDescriptor {
  /// Derives the descriptor for `current_exe` staged below `install_root`.
  pub fn from_config(
    cfg: &ServiceConfig,
    install_root: &Path,
    current_exe: &Path,
  ) -> HostResult<Self> {
    let file_name = current_exe
      .file_name()
      .and_then(|n| n.to_str())
      .ok_or_else(|| HostError::InstallFailed {
        reason: format!("executable path has no file name: {}", current_exe.display()),
      })?;

    let display_name = if cfg.display_name.trim().is_empty() {
      cfg.name.clone()
    } else {
      cfg.display_name.clone()
    };

    let descriptor = Self {
      name: cfg.name.clone(),
      display_name,
      description: cfg.description.clone(),
      binary_path: paths::install_path(install_root, &cfg.vendor, &cfg.product, file_name),
      arguments: vec![SERVICE_ARGUMENT.to_string()],
    };
    descriptor.validate()?;
    Ok(descriptor)
  }

  pub fn validate(&self) -> HostResult<()> {
    if self.name.trim().is_empty() || self.name.contains(['/', '\\']) {
      return Err(HostError::InstallFailed {
        reason: format!("invalid service name: {:?}", self.name),
      });
    }
    if !self.binary_path.is_absolute() {
      return Err(HostError::InstallFailed {
        reason: format!("binary path must be absolute: {}", self.binary_path.display()),
      });
    }
    Ok(())
  }

  /// The command line as the service manager will see it.
  pub fn command_line(&self) -> String {
    let mut line = format!("\"{}\"", self.binary_path.display());
    for arg in &self.arguments {
      line.push(' ');
      line.push_str(arg);
    }
    line
  }
}
