use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct Config {
  pub service: ServiceConfig,
  pub console: ConsoleConfig,
  pub capture: CaptureConfig,
  pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
  #[serde(default = "default_service_name")]
  pub name: String,

  #[serde(default)]
  pub display_name: String,

  #[serde(default = "default_description")]
  pub description: String,

  #[serde(default = "default_vendor")]
  pub vendor: String,

  #[serde(default = "default_product")]
  pub product: String,

  #[serde(default = "default_control_timeout_seconds")]
  pub control_timeout_seconds: u64,
}

impl Default for ServiceConfig {
  fn default() -> Self {
    Self {
      name: default_service_name(),
      display_name: default_display_name(),
      description: default_description(),
      vendor: default_vendor(),
      product: default_product(),
      control_timeout_seconds: default_control_timeout_seconds(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleConfig {
  #[serde(default = "default_true")]
  pub autostart: bool,
}

impl Default for ConsoleConfig {
  fn default() -> Self {
    Self { autostart: true }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
  #[serde(default = "default_source_url")]
  pub source_url: String,

  /// Empty means `<ProgramData>\Experimental DVR\captures`.
  #[serde(default)]
  pub output_dir: String,

  #[serde(default = "default_file_prefix")]
  pub file_prefix: String,

  #[serde(default = "default_segment_seconds")]
  pub segment_seconds: u64,

  #[serde(default = "default_interval_seconds")]
  pub interval_seconds: u64,

  #[serde(default = "default_read_timeout_seconds")]
  pub read_timeout_seconds: u64,
}

impl Default for CaptureConfig {
  fn default() -> Self {
    Self {
      source_url: default_source_url(),
      output_dir: String::new(),
      file_prefix: default_file_prefix(),
      segment_seconds: default_segment_seconds(),
      interval_seconds: default_interval_seconds(),
      read_timeout_seconds: default_read_timeout_seconds(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
  #[serde(default = "default_log_level")]
  pub level: String,

  #[serde(default = "default_retention_days")]
  pub retention_days: u64,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: default_log_level(),
      retention_days: default_retention_days(),
    }
  }
}

fn default_true() -> bool {
  true
}

fn default_service_name() -> String {
  "ExperimentalDVRService".to_string()
}

fn default_display_name() -> String {
  "Experimental DVR Service".to_string()
}

fn default_description() -> String {
  "Records a network video stream to disk on a fixed interval.".to_string()
}

fn default_vendor() -> String {
  "Experimental DVR".to_string()
}

fn default_product() -> String {
  "DVR Service".to_string()
}

fn default_control_timeout_seconds() -> u64 {
  30
}

fn default_source_url() -> String {
  "http://hdhomerun.local:5004/auto/v48.1".to_string()
}

fn default_file_prefix() -> String {
  "capture".to_string()
}

fn default_segment_seconds() -> u64 {
  10
}

fn default_interval_seconds() -> u64 {
  60
}

fn default_read_timeout_seconds() -> u64 {
  10
}

fn default_log_level() -> String {
  "info".to_string()
}

fn default_retention_days() -> u64 {
  14
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigFile {
  #[serde(default)]
  pub service: Option<ServiceConfig>,

  #[serde(default)]
  pub console: Option<ConsoleConfig>,

  #[serde(default)]
  pub capture: Option<CaptureConfig>,

  #[serde(default)]
  pub logging: Option<LoggingConfig>,
}

impl ConfigFile {
  fn normalize(self) -> Config {
    let mut cfg = Config::default();
    if let Some(s) = self.service {
      cfg.service = s;
    }
    if cfg.service.display_name.trim().is_empty() {
      cfg.service.display_name = cfg.service.name.clone();
    }
    if let Some(c) = self.console {
      cfg.console = c;
    }
    if let Some(c) = self.capture {
      cfg.capture = c;
    }
    if let Some(l) = self.logging {
      cfg.logging = l;
    }

    if let Some(reason) = validate_service_config(&cfg.service) {
      tracing::warn!(reason = %reason, "service config invalid; using default service identity");
      cfg.service = ServiceConfig::default();
    }

    if let Some(reason) = validate_capture_config(&cfg.capture) {
      tracing::warn!(reason = %reason, "capture config invalid; using capture defaults");
      cfg.capture = CaptureConfig::default();
    }

    cfg
  }

  fn needs_upgrade(&self) -> bool {
    self.service.is_none() || self.console.is_none() || self.capture.is_none() || self.logging.is_none()
  }
}

pub fn load_or_create_default(path: &Path) -> anyhow::Result<Config> {
  load_impl(path, true)
}

/// Service mode runs as LocalService, which usually cannot write under ProgramData.
pub fn load_or_default_readonly(path: &Path) -> anyhow::Result<Config> {
  load_impl(path, false)
}

fn load_impl(path: &Path, allow_writes: bool) -> anyhow::Result<Config> {
  let parent = path
    .parent()
    .ok_or_else(|| anyhow::anyhow!("config path has no parent: {}", path.display()))?;
  if allow_writes {
    fs::create_dir_all(parent)?;
  }

  if !path.exists() {
    let cfg = Config::default();
    if allow_writes {
      write_atomic(path, &toml::to_string_pretty(&to_config_file(&cfg))?)?;
    } else {
      tracing::warn!(path = %path.display(), "config missing; using defaults");
    }
    return Ok(cfg);
  }

  let raw = fs::read_to_string(path)?;
  match toml::from_str::<ConfigFile>(&raw) {
    Ok(file) => {
      let upgrade = file.needs_upgrade();
      let cfg = file.normalize();
      if allow_writes && upgrade {
        let backup = parent.join(format!("config.toml.bak-{}", unix_seconds()));
        let _ = fs::copy(path, &backup);
        let _ = write_atomic(path, &toml::to_string_pretty(&to_config_file(&cfg))?);
        eprintln!(
          "Experimental DVR: upgraded config defaults written to {} (backup: {})",
          path.display(),
          backup.display()
        );
      }
      Ok(cfg)
    }
    Err(e) => {
      let cfg = Config::default();
      if allow_writes {
        let backup = parent.join(format!("config.toml.bad-{}", unix_seconds()));
        let _ = fs::rename(path, &backup);
        write_atomic(path, &toml::to_string_pretty(&to_config_file(&cfg))?)?;
        eprintln!(
          "Experimental DVR: invalid config at {} (backed up to {}): {e}",
          path.display(),
          backup.display()
        );
      } else {
        tracing::warn!(path = %path.display(), error = %e, "invalid config; using defaults");
      }
      Ok(cfg)
    }
  }
}

fn to_config_file(cfg: &Config) -> ConfigFile {
  ConfigFile {
    service: Some(cfg.service.clone()),
    console: Some(cfg.console.clone()),
    capture: Some(cfg.capture.clone()),
    logging: Some(cfg.logging.clone()),
  }
}

fn write_atomic(path: &Path, contents: &str) -> anyhow::Result<()> {
  let parent = path
    .parent()
    .ok_or_else(|| anyhow::anyhow!("file path has no parent: {}", path.display()))?;
  let tmp = parent.join(format!(
    ".{}.tmp",
    path.file_name().unwrap_or_default().to_string_lossy()
  ));

  fs::write(&tmp, contents)?;
  fs::rename(&tmp, path)?;
  Ok(())
}

fn unix_seconds() -> u64 {
  std::time::SystemTime::now()
    .duration_since(std::time::UNIX_EPOCH)
    .unwrap_or_default()
    .as_secs()
}

fn validate_service_config(cfg: &ServiceConfig) -> Option<String> {
  if cfg.name.trim().is_empty() {
    return Some("name must not be empty".to_string());
  }
  if cfg.name.contains(['/', '\\']) {
    return Some(format!("name must not contain path separators: {}", cfg.name));
  }
  if cfg.product.trim().is_empty() {
    return Some("product must not be empty".to_string());
  }
  if cfg.control_timeout_seconds == 0 {
    return Some("control_timeout_seconds must be > 0".to_string());
  }
  None
}

fn validate_capture_config(cfg: &CaptureConfig) -> Option<String> {
  if cfg.segment_seconds == 0 {
    return Some("segment_seconds must be > 0".to_string());
  }
  if cfg.interval_seconds == 0 {
    return Some("interval_seconds must be > 0".to_string());
  }
  if cfg.read_timeout_seconds == 0 {
    return Some("read_timeout_seconds must be > 0".to_string());
  }
  if cfg.file_prefix.trim().is_empty() || cfg.file_prefix.contains(['/', '\\']) {
    return Some(format!("invalid file_prefix: {:?}", cfg.file_prefix));
  }

  let Ok(url) = reqwest::Url::parse(&cfg.source_url) else {
    return Some(format!("invalid source URL: {}", cfg.source_url));
  };
  if url.scheme() != "http" && url.scheme() != "https" {
    return Some(format!("source URL must use HTTP or HTTPS: {}", cfg.source_url));
  }
  if url.host_str().is_none() {
    return Some(format!("source URL has no host: {}", cfg.source_url));
  }

  None
}
