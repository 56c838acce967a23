use crate::config::CaptureConfig;
use crate::paths;
use crate::workload::{Logger, Workload, WorkloadFactory};
use anyhow::Context;
use reqwest::blocking::Client;
use reqwest::header::USER_AGENT;
use reqwest::Url;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const CHUNK_BYTES: usize = 64 * 1024;
const CAPTURE_EXTENSION: &str = "mpeg";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureReport {
  pub path: PathBuf,
  pub bytes: u64,
  pub elapsed: Duration,
}

/// `<prefix>-<capture id>.mpeg`
pub fn capture_file_name(prefix: &str) -> String {
  format!("{prefix}-{}.{CAPTURE_EXTENSION}", uuid::Uuid::new_v4())
}

/// The configured output directory, or the shared captures directory when unset.
pub fn resolve_output_dir(cfg: &CaptureConfig, base: &Path) -> PathBuf {
  if cfg.output_dir.trim().is_empty() {
    paths::captures_dir(base)
  } else {
    PathBuf::from(&cfg.output_dir)
  }
}

pub fn validate_source(raw: &str) -> anyhow::Result<Url> {
  let url = Url::parse(raw).with_context(|| format!("invalid source URL: {raw}"))?;
  if !matches!(url.scheme(), "http" | "https") {
    anyhow::bail!("source URL must use HTTP or HTTPS: {raw}");
  }
  if url.host_str().is_none() {
    anyhow::bail!("source URL has no host: {raw}");
  }
  Ok(url)
}

/// Records one segment of `cfg.source_url` into `out_path`.
///
/// Returns when `segment_seconds` have elapsed, the stream ends, or `stop` is
/// raised. A partial file is kept; an empty one is removed.
pub fn capture_once(
  cfg: &CaptureConfig,
  out_path: &Path,
  stop: &AtomicBool,
) -> anyhow::Result<CaptureReport> {
  let url = validate_source(&cfg.source_url)?;
  let read_timeout = Duration::from_secs(cfg.read_timeout_seconds.max(1));
  let segment = Duration::from_secs(cfg.segment_seconds);

  let client = Client::builder()
    .connect_timeout(read_timeout)
    .timeout(segment + read_timeout)
    .build()
    .context("build HTTP client")?;

  let started = Instant::now();
  let response = client
    .get(url)
    .header(USER_AGENT, format!("dvr-service/{}", env!("CARGO_PKG_VERSION")))
    .send()
    .with_context(|| format!("GET {}", cfg.source_url))?;

  if !response.status().is_success() {
    anyhow::bail!(
      "unexpected HTTP status {} from {}",
      response.status().as_u16(),
      cfg.source_url
    );
  }

  if let Some(parent) = out_path.parent() {
    fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
  }
  let file = File::create(out_path).with_context(|| format!("create {}", out_path.display()))?;
  let mut writer = BufWriter::new(file);

  let copied = copy_segment(response, &mut writer, segment, stop)
    .and_then(|n| writer.flush().map(|()| n));
  drop(writer);

  let bytes = match copied {
    Ok(n) => n,
    Err(e) => {
      let _ = fs::remove_file(out_path);
      return Err(e).with_context(|| format!("write {}", out_path.display()));
    }
  };
  if bytes == 0 {
    let _ = fs::remove_file(out_path);
  }

  Ok(CaptureReport {
    path: out_path.to_path_buf(),
    bytes,
    elapsed: started.elapsed(),
  })
}

/// Copies until EOF, `limit` elapses, or `stop` is raised; the flag is checked
/// between chunks.
pub fn copy_segment<R: Read, W: Write>(
  mut reader: R,
  writer: &mut W,
  limit: Duration,
  stop: &AtomicBool,
) -> io::Result<u64> {
  let deadline = Instant::now() + limit;
  let mut buf = vec![0u8; CHUNK_BYTES];
  let mut total = 0u64;

  while !stop.load(Ordering::SeqCst) && Instant::now() < deadline {
    let n = match reader.read(&mut buf) {
      Ok(0) => break,
      Ok(n) => n,
      Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
      Err(e) => return Err(e),
    };
    writer.write_all(&buf[..n])?;
    total += n as u64;
  }

  Ok(total)
}

struct Worker {
  stop: Arc<AtomicBool>,
  wake: mpsc::Sender<()>,
  handle: JoinHandle<()>,
}

/// Periodically records a segment of a network stream to disk.
pub struct StreamCapture {
  cfg: CaptureConfig,
  output_dir: PathBuf,
  logger: Arc<dyn Logger>,
  worker: Option<Worker>,
}

impl StreamCapture {
  pub fn new(cfg: CaptureConfig, output_dir: PathBuf, logger: Arc<dyn Logger>) -> Self {
    Self {
      cfg,
      output_dir,
      logger,
      worker: None,
    }
  }
}

impl Workload for StreamCapture {
  fn start(&mut self, args: &[String]) -> anyhow::Result<()> {
    if self.worker.is_some() {
      return Ok(());
    }
    validate_source(&self.cfg.source_url)?;
    fs::create_dir_all(&self.output_dir)
      .with_context(|| format!("create {}", self.output_dir.display()))?;

    self.logger.write("Starting.");
    tracing::info!(
      source = %self.cfg.source_url,
      output_dir = %self.output_dir.display(),
      args = args.len(),
      "capture loop starting"
    );

    let stop = Arc::new(AtomicBool::new(false));
    let (wake, wake_rx) = mpsc::channel::<()>();
    let cfg = self.cfg.clone();
    let output_dir = self.output_dir.clone();
    let logger = Arc::clone(&self.logger);
    let worker_stop = Arc::clone(&stop);

    let handle = std::thread::Builder::new()
      .name("capture".to_string())
      .spawn(move || capture_loop(&cfg, &output_dir, logger.as_ref(), &worker_stop, &wake_rx))
      .context("spawn capture thread")?;

    self.worker = Some(Worker { stop, wake, handle });
    Ok(())
  }

  fn stop(&mut self) {
    let Some(worker) = self.worker.take() else {
      return;
    };
    self.logger.write("Stopping.");
    worker.stop.store(true, Ordering::SeqCst);
    let _ = worker.wake.send(());
    if worker.handle.join().is_err() {
      tracing::error!("capture thread panicked");
    }
    tracing::info!("capture loop stopped");
  }
}

impl Drop for StreamCapture {
  fn drop(&mut self) {
    self.stop();
  }
}

fn capture_loop(
  cfg: &CaptureConfig,
  output_dir: &Path,
  logger: &dyn Logger,
  stop: &AtomicBool,
  wake_rx: &mpsc::Receiver<()>,
) {
  let interval = Duration::from_secs(cfg.interval_seconds.max(1));

  while !stop.load(Ordering::SeqCst) {
    let path = output_dir.join(capture_file_name(&cfg.file_prefix));
    match capture_once(cfg, &path, stop) {
      Ok(report) => tracing::info!(
        path = %report.path.display(),
        bytes = report.bytes,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "segment recorded"
      ),
      Err(e) => {
        tracing::warn!(error = ?e, "segment capture failed");
        logger.write(&format!("Capture failed: {e:#}"));
      }
    }

    match wake_rx.recv_timeout(interval) {
      Err(mpsc::RecvTimeoutError::Timeout) => {}
      Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
    }
  }
}

/// Factory handed to the service dispatcher and the console.
pub fn stream_factory(cfg: CaptureConfig, output_dir: PathBuf) -> WorkloadFactory {
  Arc::new(move |logger: Arc<dyn Logger>| -> Box<dyn Workload> {
    Box::new(StreamCapture::new(cfg.clone(), output_dir.clone(), logger))
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::MemoryLogger;
  use std::io::Cursor;
  use std::net::TcpListener;

  fn local_config(url: String) -> CaptureConfig {
    CaptureConfig {
      source_url: url,
      segment_seconds: 5,
      interval_seconds: 60,
      read_timeout_seconds: 2,
      ..CaptureConfig::default()
    }
  }

  /// Serves one canned HTTP response and returns the URL to fetch it from.
  fn serve_once(status: &'static str, body: &'static [u8]) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    std::thread::spawn(move || {
      let (mut stream, _) = listener.accept().unwrap();
      let mut request = [0u8; 1024];
      let _ = stream.read(&mut request);
      let head = format!(
        "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
      );
      stream.write_all(head.as_bytes()).unwrap();
      stream.write_all(body).unwrap();
    });
    format!("http://{addr}/auto/v1")
  }

  #[test]
  fn copy_segment_reads_until_eof() {
    let mut out = Vec::new();
    let stop = AtomicBool::new(false);
    let n = copy_segment(Cursor::new(b"mpeg-ts".to_vec()), &mut out, Duration::from_secs(5), &stop)
      .unwrap();
    assert_eq!(n, 7);
    assert_eq!(out, b"mpeg-ts");
  }

  #[test]
  fn copy_segment_honours_stop_flag() {
    let mut out = Vec::new();
    let stop = AtomicBool::new(true);
    let n = copy_segment(Cursor::new(vec![1u8; 1024]), &mut out, Duration::from_secs(5), &stop)
      .unwrap();
    assert_eq!(n, 0);
    assert!(out.is_empty());
  }

  #[test]
  fn capture_file_names_are_unique() {
    let a = capture_file_name("capture");
    let b = capture_file_name("capture");
    assert!(a.starts_with("capture-"));
    assert!(a.ends_with(".mpeg"));
    assert_ne!(a, b);
  }

  #[test]
  fn empty_output_dir_uses_shared_captures_dir() {
    let base = Path::new("/data");
    let mut cfg = CaptureConfig::default();
    assert_eq!(resolve_output_dir(&cfg, base), paths::captures_dir(base));
    cfg.output_dir = "/elsewhere".to_string();
    assert_eq!(resolve_output_dir(&cfg, base), PathBuf::from("/elsewhere"));
  }

  #[test]
  fn rejects_non_http_sources() {
    assert!(validate_source("ftp://tuner/stream").is_err());
    assert!(validate_source("not a url").is_err());
    assert!(validate_source("http://hdhomerun.local:5004/auto/v48.1").is_ok());
  }

  #[test]
  fn capture_once_writes_response_body() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = local_config(serve_once("200 OK", b"0123456789"));
    let out = dir.path().join("nested").join("segment.mpeg");

    let report = capture_once(&cfg, &out, &AtomicBool::new(false)).unwrap();
    assert_eq!(report.bytes, 10);
    assert_eq!(fs::read(&out).unwrap(), b"0123456789");
  }

  #[test]
  fn capture_once_fails_on_error_status() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = local_config(serve_once("404 Not Found", b""));
    let out = dir.path().join("segment.mpeg");

    assert!(capture_once(&cfg, &out, &AtomicBool::new(false)).is_err());
    assert!(!out.exists());
  }

  #[test]
  fn stop_without_start_writes_nothing() {
    let logger = MemoryLogger::default();
    let mut capture = StreamCapture::new(
      CaptureConfig::default(),
      std::env::temp_dir(),
      Arc::new(logger.clone()),
    );
    capture.stop();
    assert!(logger.messages().is_empty());
  }

  #[test]
  fn start_then_stop_reports_lifecycle_and_records_segment() {
    let dir = tempfile::tempdir().unwrap();
    let logger = MemoryLogger::default();
    let cfg = local_config(serve_once("200 OK", b"segment"));
    let factory = stream_factory(cfg, dir.path().to_path_buf());
    let mut capture = factory(Arc::new(logger.clone()));

    let recorded = || {
      fs::read_dir(dir.path())
        .unwrap()
        .flatten()
        .any(|e| e.metadata().map(|m| m.len() == 7).unwrap_or(false))
    };

    capture.start(&[]).unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while !recorded() && Instant::now() < deadline {
      std::thread::sleep(Duration::from_millis(20));
    }
    capture.stop();

    let messages = logger.messages();
    assert_eq!(messages.first().map(String::as_str), Some("Starting."));
    assert!(messages.iter().any(|m| m == "Stopping."));
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
  }
}
