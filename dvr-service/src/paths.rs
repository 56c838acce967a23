use std::path::{Path, PathBuf};

pub const PRODUCT_DATA_DIR: &str = "Experimental DVR";

pub fn base_dir() -> anyhow::Result<PathBuf> {
  let program_data = std::env::var("ProgramData").unwrap_or_else(|_| "C:\\ProgramData".into());
  Ok(PathBuf::from(program_data).join(PRODUCT_DATA_DIR))
}

pub fn config_path(base: &Path) -> PathBuf {
  base.join("config.toml")
}

pub fn logs_dir(base: &Path) -> PathBuf {
  base.join("logs")
}

pub fn captures_dir(base: &Path) -> PathBuf {
  base.join("captures")
}

/// Root of the standard program installation directory; staged binaries live below it.
pub fn program_files_dir() -> PathBuf {
  let program_files = std::env::var("ProgramFiles").unwrap_or_else(|_| "C:\\Program Files".into());
  PathBuf::from(program_files)
}

pub fn install_path(root: &Path, vendor: &str, product: &str, file_name: &str) -> PathBuf {
  let mut path = root.to_path_buf();
  if !vendor.trim().is_empty() {
    path.push(vendor.trim());
  }
  path.push(product.trim());
  path.push(file_name);
  path
}
