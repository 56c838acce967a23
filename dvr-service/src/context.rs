use crate::ancestry::{ProcessAncestryResolver, ProcessEntry, ProcessSource};
use std::sync::OnceLock;

/// Image name of the Windows Service Control Manager.
pub const SERVICE_CONTROL_MANAGER: &str = "services.exe";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
  ServiceManaged,
  Interactive,
}

/// Outcome of run-mode detection. Detection happens before logging is set up,
/// so what it found is kept here and written out later by [`Detection::log`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
  pub mode: RunMode,
  pub parent: Option<ProcessEntry>,
  /// Set when the parent could not be resolved and `Interactive` was assumed.
  pub fallback_reason: Option<String>,
}

impl Detection {
  pub fn log(&self) {
    if let Some(reason) = &self.fallback_reason {
      tracing::warn!(error = %reason, "unable to resolve parent process; assuming interactive");
      return;
    }
    if let Some(parent) = &self.parent {
      tracing::debug!(
        parent_pid = parent.pid,
        parent = %parent.name,
        mode = ?self.mode,
        "run mode detected"
      );
    }
  }
}

static DETECTION: OnceLock<Detection> = OnceLock::new();

pub struct ExecutionContextDetector<S> {
  resolver: ProcessAncestryResolver<S>,
  manager_process: String,
}

impl<S: ProcessSource> ExecutionContextDetector<S> {
  pub fn new(source: S) -> Self {
    Self::with_manager_process(source, SERVICE_CONTROL_MANAGER)
  }

  pub fn with_manager_process(source: S, manager_process: &str) -> Self {
    Self {
      resolver: ProcessAncestryResolver::new(source),
      manager_process: manager_process.to_string(),
    }
  }

  /// Run mode of this process, detected on first call and fixed afterwards.
  pub fn current_mode(&self) -> RunMode {
    self.current_detection().mode
  }

  pub fn current_detection(&self) -> &'static Detection {
    DETECTION.get_or_init(|| self.detect(std::process::id()))
  }

  pub fn detect(&self, pid: u32) -> Detection {
    match self.resolver.parent_of(pid) {
      Ok(parent) => {
        let mode = if parent.name.eq_ignore_ascii_case(&self.manager_process) {
          RunMode::ServiceManaged
        } else {
          RunMode::Interactive
        };
        Detection {
          mode,
          parent: Some(parent),
          fallback_reason: None,
        }
      }
      Err(e) => Detection {
        mode: RunMode::Interactive,
        parent: None,
        fallback_reason: Some(e.to_string()),
      },
    }
  }
}
