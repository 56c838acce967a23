//! In-memory collaborators for unit tests.

use crate::ancestry::{ProcessEntry, ProcessSource};
use crate::descriptor::ServiceDescriptor;
use crate::elevation::PrivilegeElevator;
use crate::error::{HostError, HostResult};
use crate::registry::{ServiceDatabase, ServiceStatus};
use crate::workload::{Logger, Workload};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use walkdir::WalkDir;

/// Ordered record of side effects shared by several fakes.
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
  pub fn push(&self, entry: impl Into<String>) {
    self.0.lock().unwrap().push(entry.into());
  }

  pub fn entries(&self) -> Vec<String> {
    self.0.lock().unwrap().clone()
  }

  pub fn count(&self, entry: &str) -> usize {
    self.0.lock().unwrap().iter().filter(|e| *e == entry).count()
  }
}

pub struct MemoryServiceDatabase {
  journal: Journal,
  services: Mutex<BTreeMap<String, ServiceStatus>>,
  register_failure: Mutex<Option<String>>,
  query_failure: Mutex<Option<String>>,
  start_failure: Mutex<Option<String>>,
  stop_failure: Mutex<Option<String>>,
}

impl MemoryServiceDatabase {
  pub fn new(journal: &Journal) -> Self {
    Self {
      journal: journal.clone(),
      services: Mutex::new(BTreeMap::new()),
      register_failure: Mutex::new(None),
      query_failure: Mutex::new(None),
      start_failure: Mutex::new(None),
      stop_failure: Mutex::new(None),
    }
  }

  pub fn insert(&self, name: &str, status: ServiceStatus) {
    self.services.lock().unwrap().insert(name.to_string(), status);
  }

  pub fn status_of(&self, name: &str) -> Option<ServiceStatus> {
    self.services.lock().unwrap().get(name).copied()
  }

  pub fn names(&self) -> Vec<String> {
    self.services.lock().unwrap().keys().cloned().collect()
  }

  pub fn fail_register(&self, reason: &str) {
    *self.register_failure.lock().unwrap() = Some(reason.to_string());
  }

  pub fn fail_query(&self, reason: &str) {
    *self.query_failure.lock().unwrap() = Some(reason.to_string());
  }

  pub fn fail_start(&self, reason: &str) {
    *self.start_failure.lock().unwrap() = Some(reason.to_string());
  }

  pub fn fail_stop(&self, reason: &str) {
    *self.stop_failure.lock().unwrap() = Some(reason.to_string());
  }
}

impl ServiceDatabase for MemoryServiceDatabase {
  fn query(&self, name: &str) -> HostResult<Option<ServiceStatus>> {
    if let Some(reason) = self.query_failure.lock().unwrap().clone() {
      return Err(HostError::Database(reason));
    }
    Ok(self.status_of(name))
  }

  fn register(&self, descriptor: &ServiceDescriptor) -> HostResult<()> {
    if let Some(reason) = self.register_failure.lock().unwrap().clone() {
      return Err(HostError::InstallFailed { reason });
    }
    let mut services = self.services.lock().unwrap();
    if services.contains_key(&descriptor.name) {
      return Err(HostError::InstallFailed {
        reason: "the specified service already exists".to_string(),
      });
    }
    services.insert(descriptor.name.clone(), ServiceStatus::Stopped);
    self.journal.push(format!("db:register:{}", descriptor.name));
    Ok(())
  }

  fn deregister(&self, name: &str) -> HostResult<()> {
    if self.services.lock().unwrap().remove(name).is_none() {
      return Err(HostError::UninstallFailed {
        reason: "the specified service does not exist".to_string(),
      });
    }
    self.journal.push(format!("db:deregister:{name}"));
    Ok(())
  }

  fn start(&self, name: &str) -> HostResult<()> {
    if let Some(reason) = self.start_failure.lock().unwrap().clone() {
      return Err(HostError::ServiceControl {
        name: name.to_string(),
        reason,
      });
    }
    let mut services = self.services.lock().unwrap();
    let Some(status) = services.get_mut(name) else {
      return Err(HostError::ServiceControl {
        name: name.to_string(),
        reason: "not installed".to_string(),
      });
    };
    *status = ServiceStatus::Running;
    self.journal.push(format!("db:start:{name}"));
    Ok(())
  }

  fn stop(&self, name: &str) -> HostResult<()> {
    if let Some(reason) = self.stop_failure.lock().unwrap().clone() {
      return Err(HostError::ServiceControl {
        name: name.to_string(),
        reason,
      });
    }
    let mut services = self.services.lock().unwrap();
    let Some(status) = services.get_mut(name) else {
      return Err(HostError::ServiceControl {
        name: name.to_string(),
        reason: "not installed".to_string(),
      });
    };
    *status = ServiceStatus::Stopped;
    self.journal.push(format!("db:stop:{name}"));
    Ok(())
  }
}

pub struct FakeElevator {
  journal: Journal,
  elevated: bool,
  result: Result<i32, ()>,
}

impl FakeElevator {
  pub fn elevated(journal: &Journal) -> Self {
    Self {
      journal: journal.clone(),
      elevated: true,
      result: Ok(0),
    }
  }

  /// `Err(())` simulates a declined prompt.
  pub fn unelevated(journal: &Journal, result: Result<i32, ()>) -> Self {
    Self {
      journal: journal.clone(),
      elevated: false,
      result,
    }
  }
}

impl PrivilegeElevator for FakeElevator {
  fn is_elevated(&self) -> bool {
    self.elevated
  }

  fn run_elevated(&self, _binary: &Path, arguments: &str) -> HostResult<i32> {
    self.journal.push(format!("elevate:{arguments}"));
    self.result.map_err(|()| HostError::ElevationDenied)
  }
}

pub struct StaticProcesses(pub Vec<ProcessEntry>);

impl ProcessSource for StaticProcesses {
  fn snapshot(&self) -> HostResult<Vec<ProcessEntry>> {
    Ok(self.0.clone())
  }
}

pub struct RecordingWorkload {
  journal: Journal,
  pub fail_start: bool,
}

impl RecordingWorkload {
  pub fn new(journal: &Journal) -> Self {
    Self {
      journal: journal.clone(),
      fail_start: false,
    }
  }
}

impl Workload for RecordingWorkload {
  fn start(&mut self, _args: &[String]) -> anyhow::Result<()> {
    if self.fail_start {
      anyhow::bail!("source unavailable");
    }
    self.journal.push("workload:start");
    Ok(())
  }

  fn stop(&mut self) {
    self.journal.push("workload:stop");
  }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryLogger(Arc<Mutex<Vec<String>>>);

impl MemoryLogger {
  pub fn messages(&self) -> Vec<String> {
    self.0.lock().unwrap().clone()
  }
}

impl Logger for MemoryLogger {
  fn write(&self, message: &str) {
    self.0.lock().unwrap().push(message.to_string());
  }
}

/// Every path below `root`, relative, in walk order with siblings sorted.
pub fn tree(root: &Path) -> Vec<PathBuf> {
  WalkDir::new(root)
    .min_depth(1)
    .sort_by_file_name()
    .into_iter()
    .filter_map(Result::ok)
    .filter_map(|entry| entry.path().strip_prefix(root).ok().map(Path::to_path_buf))
    .collect()
}
