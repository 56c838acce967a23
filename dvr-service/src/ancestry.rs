use crate::error::{HostError, HostResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
  pub pid: u32,
  pub parent_pid: u32,
  pub name: String,
  /// Creation time in platform ticks; only compared within one snapshot.
  /// `None` when the process could not be queried.
  pub start_time: Option<u64>,
}

impl ProcessEntry {
  /// A recorded parent pid can be reused once the real parent exits. A process
  /// created after the child cannot be its parent.
  fn can_be_parent_of(&self, child: &ProcessEntry) -> bool {
    match (self.start_time, child.start_time) {
      (Some(parent), Some(child)) => parent <= child,
      _ => true,
    }
  }
}

pub trait ProcessSource: Send + Sync {
  fn snapshot(&self) -> HostResult<Vec<ProcessEntry>>;
}

/// Processes of the running system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcesses;

impl ProcessSource for SystemProcesses {
  fn snapshot(&self) -> HostResult<Vec<ProcessEntry>> {
    #[cfg(windows)]
    {
      toolhelp::snapshot()
    }
    #[cfg(target_os = "linux")]
    {
      procfs::snapshot()
    }
    #[cfg(not(any(windows, target_os = "linux")))]
    {
      Err(HostError::Unsupported("process enumeration"))
    }
  }
}

pub struct ProcessAncestryResolver<S> {
  source: S,
}

impl<S: ProcessSource> ProcessAncestryResolver<S> {
  pub fn new(source: S) -> Self {
    Self { source }
  }

  pub fn parent_of(&self, pid: u32) -> HostResult<ProcessEntry> {
    let snapshot = self.source.snapshot()?;
    let not_found = || HostError::NotFound { pid };

    let name = snapshot
      .iter()
      .find(|p| p.pid == pid)
      .map(|p| p.name.clone())
      .ok_or_else(not_found)?;

    // Several processes can share a name; the instance index is the position
    // in pid order among them.
    let mut same_name: Vec<&ProcessEntry> = snapshot
      .iter()
      .filter(|p| p.name.eq_ignore_ascii_case(&name))
      .collect();
    same_name.sort_by_key(|p| p.pid);

    let index = same_name
      .iter()
      .position(|p| p.pid == pid)
      .ok_or_else(not_found)?;
    let me = same_name[index];

    tracing::trace!(
      pid,
      instance = %instance_name(&name, index),
      parent_pid = me.parent_pid,
      "resolved process instance"
    );

    if me.parent_pid == 0 || me.parent_pid == pid {
      return Err(not_found());
    }

    let parent = snapshot
      .iter()
      .find(|p| p.pid == me.parent_pid)
      .ok_or_else(not_found)?;
    if !parent.can_be_parent_of(me) {
      tracing::debug!(
        pid,
        parent_pid = me.parent_pid,
        "parent pid was reused by a newer process"
      );
      return Err(not_found());
    }
    Ok(parent.clone())
  }
}

fn instance_name(name: &str, index: usize) -> String {
  if index == 0 {
    name.to_string()
  } else {
    format!("{name}#{index}")
  }
}

#[cfg(windows)]
mod toolhelp {
  use super::ProcessEntry;
  use crate::error::{HostError, HostResult};
  use windows::Win32::Foundation::{CloseHandle, FILETIME};
  use windows::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, Process32FirstW, Process32NextW, PROCESSENTRY32W,
    TH32CS_SNAPPROCESS,
  };
  use windows::Win32::System::Threading::{
    GetProcessTimes, OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION,
  };

  pub fn snapshot() -> HostResult<Vec<ProcessEntry>> {
    let mut out = Vec::new();
    unsafe {
      let snap = CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0)
        .map_err(|e| HostError::Io(std::io::Error::other(e.to_string())))?;

      let mut entry = PROCESSENTRY32W {
        dwSize: std::mem::size_of::<PROCESSENTRY32W>() as u32,
        ..Default::default()
      };

      let mut ok = Process32FirstW(snap, &mut entry).is_ok();
      while ok {
        let len = entry
          .szExeFile
          .iter()
          .position(|c| *c == 0)
          .unwrap_or(entry.szExeFile.len());
        out.push(ProcessEntry {
          pid: entry.th32ProcessID,
          parent_pid: entry.th32ParentProcessID,
          name: String::from_utf16_lossy(&entry.szExeFile[..len]),
          start_time: creation_time(entry.th32ProcessID),
        });
        ok = Process32NextW(snap, &mut entry).is_ok();
      }

      let _ = CloseHandle(snap);
    }
    Ok(out)
  }

  /// 100ns intervals since 1601. Protected and exited processes yield `None`.
  fn creation_time(pid: u32) -> Option<u64> {
    if pid == 0 {
      return None;
    }
    unsafe {
      let process = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, pid).ok()?;
      let mut created = FILETIME::default();
      let mut exited = FILETIME::default();
      let mut kernel = FILETIME::default();
      let mut user = FILETIME::default();
      let times = GetProcessTimes(process, &mut created, &mut exited, &mut kernel, &mut user);
      let _ = CloseHandle(process);
      times.ok()?;
      Some((u64::from(created.dwHighDateTime) << 32) | u64::from(created.dwLowDateTime))
    }
  }
}

#[cfg(target_os = "linux")]
mod procfs {
  use super::ProcessEntry;
  use crate::error::HostResult;
  use std::fs;

  pub fn snapshot() -> HostResult<Vec<ProcessEntry>> {
    let mut out = Vec::new();
    for entry in fs::read_dir("/proc")?.flatten() {
      let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
        continue;
      };
      // Processes can exit between listing and reading.
      let Ok(stat) = fs::read_to_string(entry.path().join("stat")) else {
        continue;
      };
      if let Some(p) = parse_stat(pid, &stat) {
        out.push(p);
      }
    }
    Ok(out)
  }

  /// Field after `comm` that holds `starttime` (field 22 overall).
  const START_TIME_FIELD: usize = 19;

  /// `pid (comm) state ppid ... starttime ...`; `comm` may itself contain
  /// spaces and parentheses.
  pub(super) fn parse_stat(pid: u32, stat: &str) -> Option<ProcessEntry> {
    let open = stat.find('(')?;
    let close = stat.rfind(')')?;
    let name = stat.get(open + 1..close)?.to_string();
    let rest: Vec<&str> = stat.get(close + 1..)?.split_whitespace().collect();
    let parent_pid = rest.get(1)?.parse().ok()?;
    let start_time = rest.get(START_TIME_FIELD).and_then(|t| t.parse().ok());
    Some(ProcessEntry {
      pid,
      parent_pid,
      name,
      start_time,
    })
  }
}
