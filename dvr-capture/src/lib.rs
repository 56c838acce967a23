//! One-shot capture of a single segment, without any service machinery.

use anyhow::Context;
use dvr_service::capture::{self, CaptureReport};
use dvr_service::config::{self, CaptureConfig};
use dvr_service::paths;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureArgs {
  pub source: Option<String>,
  pub output: Option<PathBuf>,
  pub seconds: Option<u64>,
}

impl CaptureArgs {
  /// `[--source URL] [--output PATH] [--seconds N]`; `args` includes the program name.
  pub fn from_args(args: &[String]) -> anyhow::Result<Self> {
    let mut out = Self::default();
    let mut i = 1;
    while i < args.len() {
      let flag = args[i].as_str();
      let value = || {
        args
          .get(i + 1)
          .cloned()
          .ok_or_else(|| anyhow::anyhow!("`{flag}` expects a value"))
      };
      match flag {
        "--source" => out.source = Some(value()?),
        "--output" => out.output = Some(PathBuf::from(value()?)),
        "--seconds" => {
          let raw = value()?;
          let seconds: u64 = raw
            .parse()
            .with_context(|| format!("`--seconds` expects a number, got {raw:?}"))?;
          if seconds == 0 {
            anyhow::bail!("`--seconds` must be > 0");
          }
          out.seconds = Some(seconds);
        }
        other => anyhow::bail!("unknown argument: {other}"),
      }
      i += 2;
    }
    Ok(out)
  }

  /// Overrides the shared capture settings with whatever was given on the command line.
  pub fn apply(&self, mut cfg: CaptureConfig) -> CaptureConfig {
    if let Some(source) = &self.source {
      cfg.source_url = source.clone();
    }
    if let Some(seconds) = self.seconds {
      cfg.segment_seconds = seconds;
    }
    cfg
  }

  pub fn output_path(&self, cfg: &CaptureConfig, base: &Path) -> PathBuf {
    match &self.output {
      Some(path) => path.clone(),
      None => capture::resolve_output_dir(cfg, base).join(capture::capture_file_name(&cfg.file_prefix)),
    }
  }
}

pub fn run(args: &CaptureArgs) -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_ansi(false)
    .with_target(false)
    .with_writer(std::io::stderr)
    .init();

  let base = paths::base_dir()?;
  let shared = config::load_or_default_readonly(&paths::config_path(&base))?;
  let cfg = args.apply(shared.capture);
  let out_path = args.output_path(&cfg, &base);

  let stop = Arc::new(AtomicBool::new(false));
  let handler_stop = Arc::clone(&stop);
  ctrlc::set_handler(move || {
    handler_stop.store(true, Ordering::SeqCst);
  })
  .context("install Ctrl+C handler")?;

  println!(
    "Capturing {} for up to {}s into {}",
    cfg.source_url,
    cfg.segment_seconds,
    out_path.display()
  );

  let report = capture::capture_once(&cfg, &out_path, &stop)?;
  tracing::debug!(bytes = report.bytes, path = %report.path.display(), "capture finished");
  if stop.load(Ordering::SeqCst) {
    println!("Capture interrupted.");
  }
  print_report(&report)
}

fn print_report(report: &CaptureReport) -> anyhow::Result<()> {
  if report.bytes == 0 {
    println!("Capture complete: no data received.");
    return Ok(());
  }
  let digest = sha256_hex(&report.path)?;
  println!(
    "Capture complete: bytes={} elapsed={:.1}s sha256={digest} path={}",
    report.bytes,
    report.elapsed.as_secs_f64(),
    report.path.display()
  );
  Ok(())
}

pub fn sha256_hex(path: &Path) -> anyhow::Result<String> {
  let mut file = fs::File::open(path).with_context(|| format!("open {}", path.display()))?;
  let mut hasher = Sha256::new();
  let mut buf = [0u8; 64 * 1024];
  loop {
    let n = file.read(&mut buf)?;
    if n == 0 {
      break;
    }
    hasher.update(&buf[..n]);
  }
  Ok(format!("{:x}", hasher.finalize()))
}
