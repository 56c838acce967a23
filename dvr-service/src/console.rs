//! Interactive controller for the OS service and a console-hosted instance of
//! the same workload.
//!
//! Starting either instance always stops the other one first, so at most one
//! of them runs at any time for a given service name.

use crate::descriptor::ServiceDescriptor;
use crate::error::HostResult;
use crate::installer::Outcome;
use crate::manager::ServiceManager;
use crate::registry::ServiceStatus;
use crate::workload::{Logger, ManagedWorkload, WorkloadFactory};
use anyhow::Context;
use std::fmt::Display;
use std::io::{self, BufRead, Write};
use std::sync::{mpsc, Arc};

const HELP: &str = "\
help|?           Show this help
status           Show service status
install          Install the Windows service
uninstall        Uninstall the Windows service
update           Reinstall the Windows service
start            Start the active instance
stop             Stop all instances
startservice     Start the Windows service
stopservice      Stop the Windows service
startconsole     Start the console instance
stopconsole      Stop the console instance
exit             Shut down and exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleInput {
  Line(String),
  Interrupted,
  Eof,
}

/// Feeds stdin lines and Ctrl+C into one channel.
pub fn stdio_channel() -> anyhow::Result<mpsc::Receiver<ConsoleInput>> {
  let (tx, rx) = mpsc::channel();

  let interrupt_tx = tx.clone();
  ctrlc::set_handler(move || {
    let _ = interrupt_tx.send(ConsoleInput::Interrupted);
  })
  .context("install Ctrl+C handler")?;

  std::thread::Builder::new()
    .name("console-input".to_string())
    .spawn(move || read_lines(io::stdin().lock(), &tx))
    .context("spawn console input thread")?;

  Ok(rx)
}

/// Lines that are not valid UTF-8 are passed on lossily so the session keeps
/// going; only end of input or a read error ends it.
pub fn read_lines<R: BufRead>(mut reader: R, tx: &mpsc::Sender<ConsoleInput>) {
  let mut buf = Vec::new();
  loop {
    buf.clear();
    match reader.read_until(b'\n', &mut buf) {
      Ok(0) => break,
      Ok(_) => {}
      Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
      Err(e) => {
        tracing::debug!(error = %e, "console input closed");
        break;
      }
    }
    let line = String::from_utf8_lossy(&buf);
    let line = line.trim_end_matches(['\r', '\n']).to_string();
    if tx.send(ConsoleInput::Line(line)).is_err() {
      return;
    }
  }
  let _ = tx.send(ConsoleInput::Eof);
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
  Help,
  Status,
  Install,
  Uninstall,
  Update,
  Start,
  Stop,
  StartService,
  StopService,
  StartConsole,
  StopConsole,
  Exit,
  Empty,
  Unknown,
}

impl Command {
  fn parse(line: &str) -> Self {
    match line.trim().to_ascii_lowercase().as_str() {
      "" => Command::Empty,
      "help" | "?" => Command::Help,
      "status" => Command::Status,
      "install" => Command::Install,
      "uninstall" => Command::Uninstall,
      "update" => Command::Update,
      "start" => Command::Start,
      "stop" => Command::Stop,
      "startservice" => Command::StartService,
      "stopservice" => Command::StopService,
      "startconsole" => Command::StartConsole,
      "stopconsole" => Command::StopConsole,
      "exit" => Command::Exit,
      _ => Command::Unknown,
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsoleSessionState {
  /// As of the last registry query.
  pub os_service_running: bool,
  pub console_hosted_running: bool,
  pub is_loop_active: bool,
}

pub struct ServiceConsole<'a, W: Write> {
  manager: &'a ServiceManager,
  descriptor: &'a ServiceDescriptor,
  factory: WorkloadFactory,
  logger: Arc<dyn Logger>,
  args: Vec<String>,
  workload: Option<ManagedWorkload>,
  state: ConsoleSessionState,
  out: W,
}

impl<'a, W: Write> ServiceConsole<'a, W> {
  pub fn new(
    manager: &'a ServiceManager,
    descriptor: &'a ServiceDescriptor,
    factory: WorkloadFactory,
    logger: Arc<dyn Logger>,
    args: Vec<String>,
    out: W,
  ) -> Self {
    Self {
      manager,
      descriptor,
      factory,
      logger,
      args,
      workload: None,
      state: ConsoleSessionState::default(),
      out,
    }
  }

  pub fn state(&self) -> ConsoleSessionState {
    self.state
  }

  pub fn into_output(self) -> W {
    self.out
  }

  /// Runs until `exit`, end of input or Ctrl+C. The console-hosted instance
  /// is always stopped on the way out.
  pub fn run(
    &mut self,
    input: &mpsc::Receiver<ConsoleInput>,
    autostart: bool,
  ) -> anyhow::Result<()> {
    self.enter(autostart);

    while self.state.is_loop_active {
      match input.recv() {
        Ok(ConsoleInput::Line(line)) => self.execute(&line),
        Ok(ConsoleInput::Interrupted) => {
          tracing::info!("interrupted; leaving console");
          self.state.is_loop_active = false;
        }
        Ok(ConsoleInput::Eof) | Err(_) => self.state.is_loop_active = false,
      }
    }

    self.stop_console();
    self.out.flush().context("flush console output")?;
    Ok(())
  }

  fn enter(&mut self, autostart: bool) {
    self.state.is_loop_active = true;
    self.say(format!("{} ({})", self.descriptor.display_name, self.descriptor.name));
    self.say("Type 'help' for commands.");

    if !autostart {
      return;
    }
    let status = self.query_status();
    if let Some(ServiceStatus::Absent) = self.report("query the service", status) {
      tracing::info!(service = %self.descriptor.name, "service not installed; starting console instance");
      self.start_console();
    }
  }

  pub fn execute(&mut self, line: &str) {
    match Command::parse(line) {
      Command::Empty => {}
      Command::Help => self.say(HELP),
      Command::Status => self.show_status(),
      Command::Install => self.install(),
      Command::Uninstall => {
        self.uninstall();
      }
      Command::Update => {
        if self.uninstall() {
          self.install();
        }
      }
      Command::Start => {
        let status = self.query_status();
        match self.report("query the service", status) {
          Some(ServiceStatus::Absent) => self.start_console(),
          Some(_) => self.start_service(),
          None => {}
        }
      }
      Command::Stop => {
        self.stop_service();
        self.stop_console();
      }
      Command::StartService => self.start_service(),
      Command::StopService => {
        self.stop_service();
      }
      Command::StartConsole => self.start_console(),
      Command::StopConsole => self.stop_console(),
      Command::Exit => self.state.is_loop_active = false,
      Command::Unknown => self.say("Unknown command."),
    }
  }

  fn say(&mut self, message: impl Display) {
    let _ = writeln!(self.out, "{message}");
  }

  fn report<T>(&mut self, what: &str, result: HostResult<T>) -> Option<T> {
    match result {
      Ok(v) => Some(v),
      Err(e) => {
        tracing::warn!(error = %e, "{what} failed");
        self.say(format!("Unable to {what}: {e}"));
        None
      }
    }
  }

  fn query_status(&mut self) -> HostResult<ServiceStatus> {
    let status = self.manager.registry().status(&self.descriptor.name);
    self.state.os_service_running = matches!(status, Ok(ServiceStatus::Running));
    status
  }

  /// Re-reads the service state after a change; failures only leave the
  /// cached flag stale.
  fn refresh_status(&mut self) {
    if let Err(e) = self.query_status() {
      tracing::debug!(error = %e, "service status unavailable");
    }
  }

  fn show_status(&mut self) {
    let service = match self.query_status() {
      Ok(status) => status.to_string(),
      Err(e) => format!("Unavailable ({e})"),
    };
    let console = if self.state.console_hosted_running {
      "Running"
    } else {
      "Stopped"
    };
    self.say(format!("Service Name: {}", self.descriptor.name));
    self.say(format!("Windows Service: {service}"));
    self.say(format!("Console Service: {console}"));
  }

  fn install(&mut self) {
    self.stop_console();
    let result = self.manager.installer().install(self.descriptor);
    match self.report("install the service", result) {
      Some(Outcome::AlreadyInstalled) => self.say("Service is already installed."),
      Some(Outcome::InstalledNotStarted) => {
        self.say("Service installed, but it could not be started.")
      }
      Some(_) => self.say("Service installed."),
      None => {}
    }
    self.refresh_status();
  }

  /// False when the service may still be registered.
  fn uninstall(&mut self) -> bool {
    let result = self.manager.installer().uninstall(self.descriptor);
    let done = match self.report("uninstall the service", result) {
      Some(Outcome::NotInstalled) => {
        self.say("Service is not installed.");
        true
      }
      Some(_) => {
        self.say("Service uninstalled.");
        true
      }
      None => false,
    };
    self.refresh_status();
    done
  }

  fn start_service(&mut self) {
    let status = self.query_status();
    match self.report("query the service", status) {
      None | Some(ServiceStatus::Running) => {}
      Some(ServiceStatus::Absent) => self.say("Service is not installed."),
      Some(_) => {
        self.stop_console();
        let result = self.manager.start_service(&self.descriptor.name);
        if self.report("start the service", result).is_some() {
          self.state.os_service_running = true;
        }
      }
    }
  }

  /// False when the service may still be running: either the stop failed or
  /// its state could not be read.
  fn stop_service(&mut self) -> bool {
    let status = self.query_status();
    match self.report("query the service", status) {
      None => false,
      Some(ServiceStatus::Absent | ServiceStatus::Stopped) => true,
      Some(_) => {
        let result = self.manager.stop_service(&self.descriptor.name);
        let stopped = self.report("stop the service", result).is_some();
        if stopped {
          self.state.os_service_running = false;
        }
        stopped
      }
    }
  }

  fn start_console(&mut self) {
    if self.state.console_hosted_running {
      return;
    }
    if !self.stop_service() {
      self.say("Console instance not started.");
      return;
    }

    let mut workload = ManagedWorkload::new((self.factory)(Arc::clone(&self.logger)));
    match workload.start(&self.args) {
      Ok(()) => {
        self.workload = Some(workload);
        self.state.console_hosted_running = true;
      }
      Err(e) => {
        tracing::error!(error = ?e, "console instance failed to start");
        self.say(format!("Unable to start the console instance: {e:#}"));
      }
    }
  }

  fn stop_console(&mut self) {
    if let Some(mut workload) = self.workload.take() {
      workload.stop();
    }
    self.state.console_hosted_running = false;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::ServiceConfig;
  use crate::testing::{FakeElevator, Journal, MemoryLogger, MemoryServiceDatabase, RecordingWorkload};
  use crate::workload::Workload;
  use std::io::Cursor;

  struct Fixture {
    _dir: tempfile::TempDir,
    journal: Journal,
    manager: ServiceManager,
    descriptor: ServiceDescriptor,
  }

  fn fixture(preinstalled: Option<ServiceStatus>) -> Fixture {
    fixture_with(preinstalled, |_| {})
  }

  fn fixture_with(
    preinstalled: Option<ServiceStatus>,
    tweak: impl FnOnce(&MemoryServiceDatabase),
  ) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let journal = Journal::default();
    let exe = dir.path().join("dvr-service.exe");
    std::fs::write(&exe, b"binary").unwrap();
    let root = dir.path().join("Program Files");
    std::fs::create_dir_all(&root).unwrap();
    let descriptor = ServiceDescriptor::from_config(&ServiceConfig::default(), &root, &exe).unwrap();

    let db = MemoryServiceDatabase::new(&journal);
    if let Some(status) = preinstalled {
      db.insert(&descriptor.name, status);
    }
    tweak(&db);

    let manager = ServiceManager::new(
      Box::new(db),
      Box::new(FakeElevator::elevated(&journal)),
      exe,
      root,
    );
    Fixture {
      _dir: dir,
      journal,
      manager,
      descriptor,
    }
  }

  fn factory(journal: &Journal) -> WorkloadFactory {
    let journal = journal.clone();
    Arc::new(move |_logger: Arc<dyn Logger>| -> Box<dyn Workload> {
      Box::new(RecordingWorkload::new(&journal))
    })
  }

  fn console<'a>(f: &'a Fixture) -> ServiceConsole<'a, Vec<u8>> {
    ServiceConsole::new(
      &f.manager,
      &f.descriptor,
      factory(&f.journal),
      Arc::new(MemoryLogger::default()),
      Vec::new(),
      Vec::new(),
    )
  }

  /// Runs a scripted session and returns everything printed.
  fn session(f: &Fixture, autostart: bool, lines: &[&str], end: ConsoleInput) -> String {
    let (tx, rx) = mpsc::channel();
    for line in lines {
      tx.send(ConsoleInput::Line(line.to_string())).unwrap();
    }
    tx.send(end).unwrap();

    let mut c = console(f);
    c.run(&rx, autostart).unwrap();
    assert!(!c.state().is_loop_active);
    assert!(!c.state().console_hosted_running);
    String::from_utf8(c.into_output()).unwrap()
  }

  fn service_lines(output: &str) -> Vec<&str> {
    output
      .lines()
      .filter(|l| l.starts_with("Windows Service: "))
      .collect()
  }

  #[test]
  fn install_status_uninstall_status() {
    let f = fixture(None);
    let out = session(
      &f,
      false,
      &["install", "status", "uninstall", "status"],
      ConsoleInput::Eof,
    );

    assert_eq!(
      service_lines(&out),
      vec!["Windows Service: Running", "Windows Service: Not Installed"]
    );
    assert!(out.contains("Service installed."));
    assert!(out.contains("Service uninstalled."));
    assert!(!f.descriptor.binary_path.exists());
  }

  #[test]
  fn start_is_a_no_op_while_service_runs() {
    let f = fixture(Some(ServiceStatus::Running));
    let mut c = console(&f);
    c.enter(true);
    c.execute("start");

    assert!(!c.state().console_hosted_running);
    assert!(c.state().os_service_running);
    assert!(f.journal.entries().is_empty());
  }

  #[test]
  fn start_without_service_runs_console_instance() {
    let f = fixture(None);
    let mut c = console(&f);
    c.enter(false);
    c.execute("  START ");

    assert!(c.state().console_hosted_running);
    assert_eq!(f.journal.entries(), vec!["workload:start"]);
  }

  #[test]
  fn startconsole_stops_service_first() {
    let f = fixture(Some(ServiceStatus::Running));
    let mut c = console(&f);
    c.enter(true);
    c.execute("startconsole");

    let state = c.state();
    assert!(state.console_hosted_running);
    assert!(!state.os_service_running);
    assert_eq!(
      f.journal.entries(),
      vec!["db:stop:ExperimentalDVRService", "workload:start"]
    );
  }

  #[test]
  fn startservice_stops_console_instance_first() {
    let f = fixture(Some(ServiceStatus::Stopped));
    let mut c = console(&f);
    c.enter(false);
    c.execute("startconsole");
    c.execute("startservice");

    let state = c.state();
    assert!(state.os_service_running);
    assert!(!state.console_hosted_running);
    assert_eq!(
      f.journal.entries(),
      vec![
        "workload:start",
        "workload:stop",
        "db:start:ExperimentalDVRService"
      ]
    );
  }

  #[test]
  fn failed_service_stop_abandons_console_start() {
    let f = fixture_with(Some(ServiceStatus::Running), |db| db.fail_stop("access denied"));
    let mut c = console(&f);
    c.enter(false);
    c.execute("startconsole");

    assert!(!c.state().console_hosted_running);
    assert_eq!(f.journal.count("workload:start"), 0);
    let out = String::from_utf8(c.into_output()).unwrap();
    assert!(out.contains("Unable to stop the service"));
  }

  #[test]
  fn exit_stops_console_instance_exactly_once() {
    let f = fixture(None);
    let out = session(&f, true, &["exit", "status"], ConsoleInput::Eof);

    assert_eq!(f.journal.count("workload:start"), 1);
    assert_eq!(f.journal.count("workload:stop"), 1);
    assert!(service_lines(&out).is_empty());
  }

  #[test]
  fn interrupt_behaves_like_exit() {
    let f = fixture(None);
    session(&f, true, &[], ConsoleInput::Interrupted);
    assert_eq!(
      f.journal.entries(),
      vec!["workload:start", "workload:stop"]
    );
  }

  #[test]
  fn autostart_skipped_when_service_registered() {
    let f = fixture(Some(ServiceStatus::Stopped));
    session(&f, true, &[], ConsoleInput::Eof);
    assert!(f.journal.entries().is_empty());
  }

  #[test]
  fn unknown_and_empty_input_leave_state_unchanged() {
    let f = fixture(None);
    let mut c = console(&f);
    c.enter(false);
    let before = c.state();
    c.execute("");
    c.execute("frobnicate");
    assert_eq!(c.state(), before);

    let out = String::from_utf8(c.into_output()).unwrap();
    assert_eq!(out.matches("Unknown command.").count(), 1);
    assert!(out.contains("Type 'help' for commands."));
  }

  #[test]
  fn update_reinstalls_service() {
    let f = fixture(None);
    let mut c = console(&f);
    c.enter(false);
    c.execute("install");
    c.execute("update");

    assert_eq!(
      f.journal.count("db:register:ExperimentalDVRService"),
      2
    );
    assert_eq!(f.journal.count("db:deregister:ExperimentalDVRService"), 1);
    assert!(f.manager.registry().is_installed(&f.descriptor.name).unwrap());
  }

  #[test]
  fn stop_stops_both_instances() {
    let f = fixture(Some(ServiceStatus::Running));
    let mut c = console(&f);
    c.enter(false);
    c.execute("stop");

    assert_eq!(f.journal.entries(), vec!["db:stop:ExperimentalDVRService"]);
    assert_eq!(
      f.manager.registry().status(&f.descriptor.name).unwrap(),
      ServiceStatus::Stopped
    );
  }

  #[test]
  fn unreadable_service_state_blocks_console_start() {
    let f = fixture_with(Some(ServiceStatus::Running), |db| db.fail_query("rpc server unavailable"));
    let mut c = console(&f);
    c.enter(true);
    c.execute("startconsole");
    c.execute("start");

    assert!(!c.state().console_hosted_running);
    assert!(f.journal.entries().is_empty());
    let out = String::from_utf8(c.into_output()).unwrap();
    assert!(out.contains("Unable to query the service: service database error: rpc server unavailable"));
    assert!(out.contains("Console instance not started."));
  }

  #[test]
  fn stop_stops_running_console_instance() {
    let f = fixture(None);
    let mut c = console(&f);
    c.enter(false);
    c.execute("startconsole");
    c.execute("stop");

    let state = c.state();
    assert!(!state.console_hosted_running);
    assert!(!state.os_service_running);
    assert!(state.is_loop_active);
    assert_eq!(f.journal.entries(), vec!["workload:start", "workload:stop"]);
  }

  #[test]
  fn stopservice_leaves_console_instance_alone() {
    let f = fixture(Some(ServiceStatus::Running));
    let mut c = console(&f);
    c.enter(false);
    c.execute("stopservice");
    assert!(!c.state().os_service_running);

    c.execute("startconsole");
    c.execute("stopservice");

    let state = c.state();
    assert!(state.console_hosted_running);
    assert!(!state.os_service_running);
    assert_eq!(
      f.journal.entries(),
      vec!["db:stop:ExperimentalDVRService", "workload:start"]
    );
  }

  #[test]
  fn stopconsole_leaves_service_alone() {
    let f = fixture(Some(ServiceStatus::Stopped));
    let mut c = console(&f);
    c.enter(false);
    c.execute("startconsole");
    c.execute("stopconsole");
    c.execute("stopconsole");

    assert!(!c.state().console_hosted_running);
    assert_eq!(f.journal.entries(), vec!["workload:start", "workload:stop"]);
    assert_eq!(
      f.manager.registry().status(&f.descriptor.name).unwrap(),
      ServiceStatus::Stopped
    );
  }

  #[test]
  fn install_reports_a_failed_first_start() {
    let f = fixture_with(None, |db| db.fail_start("the service did not respond"));
    let mut c = console(&f);
    c.enter(false);
    c.execute("install");

    assert!(f.manager.registry().is_installed(&f.descriptor.name).unwrap());
    let out = String::from_utf8(c.into_output()).unwrap();
    assert!(out.contains("Service installed, but it could not be started."));
    assert!(!out.contains("Unable to install"));
  }

  #[test]
  fn invalid_utf8_line_does_not_end_input() {
    let (tx, rx) = mpsc::channel();
    read_lines(Cursor::new(b"\xffoo\r\nstatus\nexit".to_vec()), &tx);
    let got: Vec<ConsoleInput> = rx.try_iter().collect();
    assert_eq!(
      got,
      vec![
        ConsoleInput::Line("\u{fffd}oo".to_string()),
        ConsoleInput::Line("status".to_string()),
        ConsoleInput::Line("exit".to_string()),
        ConsoleInput::Eof
      ]
    );
  }

  #[test]
  fn read_lines_ends_with_eof() {
    let (tx, rx) = mpsc::channel();
    read_lines(Cursor::new("status\nexit\n"), &tx);
    let got: Vec<ConsoleInput> = rx.try_iter().collect();
    assert_eq!(
      got,
      vec![
        ConsoleInput::Line("status".to_string()),
        ConsoleInput::Line("exit".to_string()),
        ConsoleInput::Eof
      ]
    );
  }

  #[test]
  fn help_lists_every_command() {
    for cmd in ["status", "install", "startservice", "stopconsole", "exit"] {
      assert!(HELP.contains(cmd), "{cmd}");
    }
    assert_eq!(Command::parse("?"), Command::Help);
    assert_eq!(Command::parse("StopService"), Command::StopService);
  }
}
