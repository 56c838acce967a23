//! The payload contract shared by the service dispatcher and the console.
//!
//! A [`Workload`] is started and stopped explicitly by whichever runtime owns
//! it. [`ManagedWorkload`] layers the `Created → Started → Stopped` lifecycle
//! on top so that a redundant `stop()` or a second `start()` is always a no-op,
//! whatever the implementation does.

use std::sync::Arc;

pub trait Logger: Send + Sync {
  fn write(&self, message: &str);
}

pub trait Workload: Send {
  fn start(&mut self, args: &[String]) -> anyhow::Result<()>;

  /// Must return in bounded time and tolerate being called when not started.
  fn stop(&mut self);
}

/// Builds a fresh workload wired to the given logger.
pub type WorkloadFactory = Arc<dyn Fn(Arc<dyn Logger>) -> Box<dyn Workload> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadState {
  Created,
  Started,
  Stopped,
}

pub struct ManagedWorkload {
  inner: Box<dyn Workload>,
  state: WorkloadState,
}

impl ManagedWorkload {
  pub fn new(inner: Box<dyn Workload>) -> Self {
    Self {
      inner,
      state: WorkloadState::Created,
    }
  }

  pub fn state(&self) -> WorkloadState {
    self.state
  }

  pub fn is_running(&self) -> bool {
    self.state == WorkloadState::Started
  }

  pub fn start(&mut self, args: &[String]) -> anyhow::Result<()> {
    if self.is_running() {
      return Ok(());
    }
    self.inner.start(args)?;
    self.state = WorkloadState::Started;
    Ok(())
  }

  pub fn stop(&mut self) {
    if !self.is_running() {
      return;
    }
    self.inner.stop();
    self.state = WorkloadState::Stopped;
  }
}

impl Drop for ManagedWorkload {
  fn drop(&mut self) {
    self.stop();
  }
}
