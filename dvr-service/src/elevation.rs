use crate::error::HostResult;
use std::path::{Path, PathBuf};

pub const ELEVATION_VERB: &str = "runas";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElevationRequest {
  pub target_binary: PathBuf,
  pub arguments: String,
  pub verb: &'static str,
}

impl ElevationRequest {
  pub fn new(target_binary: &Path, arguments: &str) -> Self {
    Self {
      target_binary: target_binary.to_path_buf(),
      arguments: arguments.to_string(),
      verb: ELEVATION_VERB,
    }
  }
}

pub trait PrivilegeElevator: Send + Sync {
  fn is_elevated(&self) -> bool;

  /// Relaunches `binary` with administrative rights and blocks until it exits.
  /// Fails with `ElevationDenied` when the prompt is declined.
  fn run_elevated(&self, binary: &Path, arguments: &str) -> HostResult<i32>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemElevator;

impl PrivilegeElevator for SystemElevator {
  fn is_elevated(&self) -> bool {
    platform::is_elevated()
  }

  fn run_elevated(&self, binary: &Path, arguments: &str) -> HostResult<i32> {
    let request = ElevationRequest::new(binary, arguments);
    tracing::info!(
      binary = %request.target_binary.display(),
      arguments = %request.arguments,
      "requesting elevation"
    );
    let code = platform::run(&request)?;
    tracing::info!(exit_code = code, "elevated process exited");
    Ok(code)
  }
}

/// Copies `binary` into a private temp directory so the elevated process never
/// runs from (and locks) the staged install location.
#[cfg(any(windows, test))]
fn stage_to_temp(binary: &Path, temp_root: &Path) -> HostResult<PathBuf> {
  let dir = temp_root.join("dvr-service-elevated");
  if binary.starts_with(&dir) {
    return Ok(binary.to_path_buf());
  }
  let file_name = binary.file_name().ok_or_else(|| {
    std::io::Error::new(
      std::io::ErrorKind::InvalidInput,
      format!("no file name in {}", binary.display()),
    )
  })?;
  std::fs::create_dir_all(&dir)?;
  let target = dir.join(file_name);
  std::fs::copy(binary, &target)?;
  Ok(target)
}

#[cfg(windows)]
mod platform {
  use super::{stage_to_temp, ElevationRequest};
  use crate::error::{HostError, HostResult};
  use std::path::Path;
  use windows::core::{HSTRING, PCWSTR};
  use windows::Win32::Foundation::{CloseHandle, ERROR_CANCELLED, HANDLE};
  use windows::Win32::Security::{GetTokenInformation, TokenElevation, TOKEN_ELEVATION, TOKEN_QUERY};
  use windows::Win32::System::Threading::{
    GetCurrentProcess, GetExitCodeProcess, OpenProcessToken, WaitForSingleObject, INFINITE,
  };
  use windows::Win32::UI::Shell::{ShellExecuteExW, SEE_MASK_NOCLOSEPROCESS, SHELLEXECUTEINFOW};
  use windows::Win32::UI::WindowsAndMessaging::SW_SHOWNORMAL;

  pub fn is_elevated() -> bool {
    unsafe {
      let mut token = HANDLE::default();
      if OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token).is_err() {
        return false;
      }

      let mut elevation = TOKEN_ELEVATION::default();
      let mut return_length = 0u32;
      let result = GetTokenInformation(
        token,
        TokenElevation,
        Some(&mut elevation as *mut _ as *mut _),
        std::mem::size_of::<TOKEN_ELEVATION>() as u32,
        &mut return_length,
      );

      let _ = CloseHandle(token);
      result.is_ok() && elevation.TokenIsElevated != 0
    }
  }

  pub fn run(request: &ElevationRequest) -> HostResult<i32> {
    let staged = stage_to_temp(&request.target_binary, &std::env::temp_dir())?;
    let result = shell_execute(&staged, &request.arguments, request.verb);
    if staged != request.target_binary {
      let _ = std::fs::remove_file(&staged);
    }
    result
  }

  fn shell_execute(file: &Path, arguments: &str, verb: &str) -> HostResult<i32> {
    let verb = HSTRING::from(verb);
    let file = HSTRING::from(file);
    let params = HSTRING::from(arguments);

    let mut info = SHELLEXECUTEINFOW {
      cbSize: std::mem::size_of::<SHELLEXECUTEINFOW>() as u32,
      fMask: SEE_MASK_NOCLOSEPROCESS,
      lpVerb: PCWSTR(verb.as_ptr()),
      lpFile: PCWSTR(file.as_ptr()),
      lpParameters: PCWSTR(params.as_ptr()),
      nShow: SW_SHOWNORMAL.0,
      ..Default::default()
    };

    unsafe {
      if let Err(e) = ShellExecuteExW(&mut info) {
        if e.code() == ERROR_CANCELLED.to_hresult() {
          tracing::warn!("elevation prompt declined by user");
        } else {
          tracing::warn!(error = %e, "elevated launch refused");
        }
        return Err(HostError::ElevationDenied);
      }
      if info.hProcess.is_invalid() {
        return Err(HostError::ElevationDenied);
      }

      let _ = WaitForSingleObject(info.hProcess, INFINITE);
      let mut code = 0u32;
      let exit = GetExitCodeProcess(info.hProcess, &mut code);
      let _ = CloseHandle(info.hProcess);
      exit.map_err(|e| HostError::Io(std::io::Error::other(e.to_string())))?;
      Ok(code as i32)
    }
  }
}

#[cfg(not(windows))]
mod platform {
  use super::ElevationRequest;
  use crate::error::{HostError, HostResult};

  pub fn is_elevated() -> bool {
    // Effective uid is the second field of the `Uid:` line.
    std::fs::read_to_string("/proc/self/status")
      .ok()
      .and_then(|s| {
        s.lines()
          .find(|l| l.starts_with("Uid:"))
          .and_then(|l| l.split_whitespace().nth(2).map(|uid| uid == "0"))
      })
      .unwrap_or(false)
  }

  pub fn run(_request: &ElevationRequest) -> HostResult<i32> {
    Err(HostError::Unsupported("elevated relaunch"))
  }
}
