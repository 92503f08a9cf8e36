use crate::error::{Result, SupervisorError};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use pid_record::PidRecord;
#[cfg(target_os = "linux")]
use procfs::process::Process;
use serde::Serialize;
use std::fmt;
use std::process::{Child, Command};
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, error, info, warn};

pub mod pid_record;
pub mod results;
pub mod supervisor_loop;

const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// The service program and its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceCommand {
    program: String,
    args: Vec<String>,
}

impl ServiceCommand {
    pub fn from_argv(argv: Vec<String>) -> Result<Self> {
        let mut argv = argv.into_iter();
        let program = argv.next().ok_or(SupervisorError::EmptyCommand)?;
        Ok(Self {
            program,
            args: argv.collect(),
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl fmt::Display for ServiceCommand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProcessState {
    Starting,
    Running,
    Dead,
}

/// How eagerly a dead process is restarted. The default restarts on every
/// tick with no limit.
#[derive(Debug, Clone, Default)]
pub struct RestartPolicy {
    /// Minimum time between two starts; a restart due earlier waits for a later tick.
    pub min_interval: Duration,
    /// Restarts allowed before the supervisor gives up.
    pub max_restarts: Option<u32>,
}

/// Owns the managed service process: start, liveness, restart.
#[derive(Debug)]
pub struct ProcessSupervisor {
    command: ServiceCommand,
    pid_record: PidRecord,
    policy: RestartPolicy,
    child: Option<Child>,
    current_pid: Option<u32>,
    state: ProcessState,
    restarts: u32,
    last_start: Option<Instant>,
}

impl ProcessSupervisor {
    pub fn new(command: ServiceCommand, pid_record: PidRecord) -> Self {
        Self {
            command,
            pid_record,
            policy: RestartPolicy::default(),
            child: None,
            current_pid: None,
            state: ProcessState::Starting,
            restarts: 0,
            last_start: None,
        }
    }

    pub fn with_restart_policy(mut self, policy: RestartPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn current_pid(&self) -> Option<u32> {
        self.current_pid
    }

    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    pub fn pid_record(&self) -> &PidRecord {
        &self.pid_record
    }

    /// Launches the service and records its pid as the current one.
    pub fn start(&mut self) -> Result<u32> {
        self.state = ProcessState::Starting;

        let child = Command::new(&self.command.program)
            .args(&self.command.args)
            .spawn()
            .map_err(|source| SupervisorError::Spawn {
                command: self.command.to_string(),
                source,
            })?;
        let pid = child.id();

        self.child = Some(child);
        self.current_pid = Some(pid);
        self.last_start = Some(Instant::now());
        self.pid_record.write(pid)?;
        self.state = ProcessState::Running;

        info!(pid, command = %self.command, "managed process started");
        Ok(pid)
    }

    /// Whether the current process is still in the process table. Reaps our
    /// own child first so an exited process does not linger as a zombie.
    pub fn is_running(&mut self) -> bool {
        let Some(pid) = self.current_pid else {
            return false;
        };

        if let Some(child) = self.child.as_mut() {
            match child.try_wait() {
                Ok(Some(status)) => {
                    debug!(pid, exit_code = ?status.code(), "managed process exited");
                    self.child = None;
                }
                Ok(None) => {}
                Err(e) => warn!(pid, error = %e, "unable to poll managed process"),
            }
        }

        is_alive(pid)
    }

    /// Restarts the service if the current process is gone.
    ///
    /// Returns the new pid when a restart happened.
    pub fn ensure_running(&mut self) -> Result<Option<u32>> {
        let Some(old_pid) = self.current_pid else {
            return self.start().map(Some);
        };
        if self.is_running() {
            return Ok(None);
        }

        if self.state != ProcessState::Dead {
            warn!(pid = old_pid, "managed process is no longer running");
            self.state = ProcessState::Dead;
        }

        if let Some(max) = self.policy.max_restarts {
            if self.restarts >= max {
                error!(restarts = self.restarts, "restart limit reached");
                return Err(SupervisorError::RestartLimit {
                    restarts: self.restarts,
                });
            }
        }

        if let Some(last_start) = self.last_start {
            let since = last_start.elapsed();
            if since < self.policy.min_interval {
                debug!(
                    wait = ?(self.policy.min_interval - since),
                    "restart deferred by restart policy"
                );
                return Ok(None);
            }
        }

        let pid = self.start()?;
        self.restarts += 1;
        info!(old_pid, pid, restarts = self.restarts, "managed process restarted");
        Ok(Some(pid))
    }

    /// Sends SIGTERM to the current process and SIGKILL once `grace` runs out.
    pub async fn shutdown(&mut self, grace: Duration) {
        let Some(pid) = self.current_pid else {
            return;
        };
        if !self.is_running() {
            return;
        }

        info!(pid, "stopping managed process");
        if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            warn!(pid, error = %e, "unable to send SIGTERM");
        }

        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            if !self.is_running() {
                self.state = ProcessState::Dead;
                return;
            }
            sleep(SHUTDOWN_POLL).await;
        }

        if let Some(child) = self.child.as_mut() {
            warn!(pid, "managed process ignored SIGTERM, killing");
            if let Err(e) = child.kill().and_then(|_| child.wait().map(|_| ())) {
                error!(pid, error = %e, "unable to kill managed process");
            }
            self.child = None;
        }
        self.state = ProcessState::Dead;
    }
}

/// Whether `pid` is present in the OS process table. Zombies count as gone.
#[cfg(target_os = "linux")]
pub fn is_alive(pid: u32) -> bool {
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    match Process::new(pid).and_then(|process| process.stat()) {
        Ok(stat) => stat.state != 'Z',
        Err(_) => false,
    }
}

#[cfg(not(target_os = "linux"))]
pub fn is_alive(pid: u32) -> bool {
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    !matches!(
        signal::kill(Pid::from_raw(pid), None),
        Err(nix::errno::Errno::ESRCH)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sleeper(dir: &TempDir) -> ProcessSupervisor {
        let command = ServiceCommand::from_argv(vec!["sleep".into(), "30".into()]).unwrap();
        ProcessSupervisor::new(command, PidRecord::new(dir.path().join("service.pid")))
    }

    async fn kill_and_wait(supervisor: &mut ProcessSupervisor) {
        let pid = supervisor.current_pid().unwrap();
        signal::kill(Pid::from_raw(pid as i32), Signal::SIGKILL).unwrap();
        for _ in 0..100 {
            if !supervisor.is_running() {
                return;
            }
            sleep(Duration::from_millis(20)).await;
        }
        panic!("process {} did not die", pid);
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(matches!(
            ServiceCommand::from_argv(vec![]),
            Err(SupervisorError::EmptyCommand)
        ));
    }

    #[test]
    fn unknown_pid_is_not_alive() {
        assert!(!is_alive(u32::MAX));
        assert!(is_alive(std::process::id()));
    }

    #[tokio::test]
    async fn start_records_pid() {
        let dir = TempDir::new().unwrap();
        let mut supervisor = sleeper(&dir);
        assert_eq!(supervisor.state(), ProcessState::Starting);

        let pid = supervisor.start().unwrap();
        assert_eq!(supervisor.state(), ProcessState::Running);
        assert_eq!(supervisor.pid_record().read(), Some(pid));
        assert!(supervisor.is_running());
        assert_eq!(supervisor.ensure_running().unwrap(), None);

        supervisor.shutdown(Duration::from_secs(5)).await;
        assert_eq!(supervisor.state(), ProcessState::Dead);
    }

    #[tokio::test]
    async fn spawn_failure_is_an_error() {
        let dir = TempDir::new().unwrap();
        let command = ServiceCommand::from_argv(vec!["/nonexistent/pgadmin4".into()]).unwrap();
        let mut supervisor =
            ProcessSupervisor::new(command, PidRecord::new(dir.path().join("service.pid")));
        assert!(matches!(
            supervisor.start(),
            Err(SupervisorError::Spawn { .. })
        ));
        assert_eq!(supervisor.pid_record().read(), None);
    }

    #[tokio::test]
    async fn dead_process_is_replaced() {
        let dir = TempDir::new().unwrap();
        let mut supervisor = sleeper(&dir);
        let old_pid = supervisor.start().unwrap();

        kill_and_wait(&mut supervisor).await;
        let new_pid = supervisor.ensure_running().unwrap().unwrap();

        assert_ne!(new_pid, old_pid);
        assert_eq!(supervisor.current_pid(), Some(new_pid));
        assert_eq!(supervisor.pid_record().read(), Some(new_pid));
        assert_eq!(supervisor.restarts(), 1);
        assert_eq!(supervisor.state(), ProcessState::Running);

        supervisor.shutdown(Duration::from_secs(5)).await;
    }

    #[tokio::test]
    async fn restart_limit_is_fatal() {
        let dir = TempDir::new().unwrap();
        let mut supervisor = sleeper(&dir).with_restart_policy(RestartPolicy {
            min_interval: Duration::ZERO,
            max_restarts: Some(1),
        });
        supervisor.start().unwrap();

        kill_and_wait(&mut supervisor).await;
        assert!(supervisor.ensure_running().unwrap().is_some());

        kill_and_wait(&mut supervisor).await;
        assert!(matches!(
            supervisor.ensure_running(),
            Err(SupervisorError::RestartLimit { restarts: 1 })
        ));
    }

    #[tokio::test]
    async fn restart_inside_min_interval_is_deferred() {
        let dir = TempDir::new().unwrap();
        let mut supervisor = sleeper(&dir).with_restart_policy(RestartPolicy {
            min_interval: Duration::from_secs(3600),
            max_restarts: None,
        });
        let pid = supervisor.start().unwrap();

        kill_and_wait(&mut supervisor).await;
        assert_eq!(supervisor.ensure_running().unwrap(), None);
        assert_eq!(supervisor.state(), ProcessState::Dead);
        assert_eq!(supervisor.pid_record().read(), Some(pid));
    }
}
