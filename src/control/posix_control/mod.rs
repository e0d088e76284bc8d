//! POSIX daemon backend: double fork, PID file liveness, SysV control script.
//!
//! # Module Structure
//!
//! - `detach` - double-fork sequence and stdio redirection
//! - `file_ops` - atomic file writes
//! - `pidfile` - PID file read/write/remove
//! - `privileges` - effective-uid check
//! - `recovery` - exit-time crash detection and relaunch
//! - `script` - control script rendering, installation, boot registration

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;

use super::{ControlBackend, StartOutcome};
use crate::config::ServiceConfig;
use crate::descriptor::ServiceDescriptor;
use crate::error::{Result, ServiceError};
use crate::shutdown;

mod detach;
mod file_ops;
mod pidfile;
mod privileges;
mod recovery;
mod script;

pub use pidfile::PidFile;
pub use privileges::PrivilegeCheck;
pub use recovery::{CrashRecovery, RecoveryAction};

use detach::Detached;
use script::ScriptConfig;

/// Termination signal attempts before `stop` gives up.
const STOP_ATTEMPTS: u32 = 5;
/// Pause between termination attempts.
const STOP_INTERVAL: Duration = Duration::from_millis(200);

pub struct PosixBackend {
    descriptor: Arc<ServiceDescriptor>,
    pid_file: PidFile,
    control_script: PathBuf,
    register_boot: bool,
    restart_delay: Duration,
    forwarded_args: Vec<String>,
    is_elevated: PrivilegeCheck,
    boot_tool: Option<PathBuf>,
}

impl PosixBackend {
    /// Fails with `UnsupportedPlatform` when the control-script directory is
    /// missing; creates the PID directory if needed.
    pub fn new(descriptor: Arc<ServiceDescriptor>, config: &ServiceConfig) -> Result<Self> {
        let script_dir = config.resolve_script_dir();
        if !script_dir.is_dir() {
            return Err(ServiceError::UnsupportedPlatform(format!(
                "`{}` does not exist, this system does not use SysV init scripts",
                script_dir.display()
            )));
        }

        let pid_dir = config.resolve_pid_dir(descriptor.name(), privileges::is_elevated());
        fs::create_dir_all(&pid_dir)
            .map_err(|e| ServiceError::io(format!("creating {}", pid_dir.display()), e))?;
        // The daemon chdirs to `/`; keep every path absolute.
        let pid_dir = pid_dir.canonicalize().unwrap_or(pid_dir);

        log::debug!(
            "posix backend for '{}': pid dir {}, script dir {}",
            descriptor.name(),
            pid_dir.display(),
            script_dir.display()
        );

        Ok(Self {
            pid_file: PidFile::new(&pid_dir, descriptor.name()),
            control_script: script_dir.join(descriptor.name()),
            register_boot: config.register_boot,
            restart_delay: config.restart_delay(),
            forwarded_args: config.forwarded_args(),
            is_elevated: privileges::is_elevated,
            boot_tool: script::find_boot_tool(),
            descriptor,
        })
    }

    /// Replace the root check (tests run unprivileged).
    pub fn with_privilege_check(mut self, check: PrivilegeCheck) -> Self {
        self.is_elevated = check;
        self
    }

    /// Use `tool` instead of the `update-rc.d` found on `PATH`.
    pub fn with_boot_tool(mut self, tool: impl Into<PathBuf>) -> Self {
        self.boot_tool = Some(tool.into());
        self
    }

    pub fn pid_file(&self) -> &PidFile {
        &self.pid_file
    }

    pub fn control_script(&self) -> &Path {
        &self.control_script
    }

    fn require_elevated(&self) -> Result<()> {
        if (self.is_elevated)() {
            Ok(())
        } else {
            Err(ServiceError::NoElevatedRights(
                "we need power (run as root or via sudo)".to_string(),
            ))
        }
    }

    fn current_executable() -> Result<PathBuf> {
        std::env::current_exe().map_err(|e| ServiceError::io("resolving current executable", e))
    }

    /// Daemon side of `start`: signal handlers, PID file, readiness, stdio.
    /// Handlers go in first so a `stop` issued right after the launcher
    /// returns still reaches the exit guard.
    fn enter_daemon(&self, readiness: detach::Readiness) -> Result<()> {
        shutdown::install_signal_handlers()?;
        let pid = std::process::id();
        self.pid_file.write(pid)?;
        log::info!(
            "{} daemon running (pid {pid}), PID file {}",
            self.descriptor.name(),
            self.pid_file.path().display()
        );
        readiness.signal();
        detach::redirect_stdio_to_null()
    }
}

/// Whether `pid` still names a live process (signal 0 check). A zombie
/// nobody reaps has already exited and counts as gone.
fn process_exists(pid: Pid) -> bool {
    if matches!(kill(pid, None), Err(Errno::ESRCH)) {
        return false;
    }
    !is_zombie(pid)
}

/// Reads `/proc/<pid>/stat` where procfs exists; false elsewhere.
fn is_zombie(pid: Pid) -> bool {
    fs::read_to_string(format!("/proc/{pid}/stat"))
        .is_ok_and(|stat| process_state(&stat) == Some('Z'))
}

/// State letter of a `/proc/<pid>/stat` line. The command name may contain
/// spaces and parentheses, so the state is the field after the last `)`.
fn process_state(stat: &str) -> Option<char> {
    let (_, rest) = stat.rsplit_once(')')?;
    rest.trim_start().chars().next()
}

impl ControlBackend for PosixBackend {
    type Cleanup = CrashRecovery;

    fn start(&mut self) -> Result<StartOutcome> {
        match detach::detach()? {
            Detached::Launcher => Ok(StartOutcome::Launched),
            Detached::Daemon(readiness) => {
                self.enter_daemon(readiness)?;
                Ok(StartOutcome::Detached)
            }
        }
    }

    fn stop(&mut self) -> Result<()> {
        let raw_pid = self.pid_file.read()?;
        let pid = Pid::from_raw(raw_pid);

        // Removing the PID file first is what marks this exit as deliberate.
        self.pid_file.remove()?;

        for attempt in 1..=STOP_ATTEMPTS {
            match kill(pid, Signal::SIGTERM) {
                Err(Errno::ESRCH) => return Ok(()),
                Err(e) => {
                    return Err(ServiceError::OperationFailed(format!(
                        "failed to signal pid {raw_pid}: {e}"
                    )));
                }
                Ok(()) => log::debug!("sent SIGTERM to {raw_pid} (attempt {attempt})"),
            }
            thread::sleep(STOP_INTERVAL);
            if !process_exists(pid) {
                log::info!("pid {raw_pid} exited after {attempt} attempt(s)");
                return Ok(());
            }
        }

        Err(ServiceError::OperationFailed(format!(
            "pid {raw_pid} still alive after {STOP_ATTEMPTS} termination attempts"
        )))
    }

    fn install(&mut self) -> Result<()> {
        self.require_elevated()?;

        let executable = Self::current_executable()?;
        let config = ScriptConfig {
            service_name: self.descriptor.name(),
            description: self.descriptor.description(),
            executable: &executable,
            extra_args: &self.forwarded_args,
            pid_file: self.pid_file.path(),
            auto_start: self.descriptor.auto_start(),
        };
        script::install_script(&config, &self.control_script)?;
        log::info!("installed control script {}", self.control_script.display());

        if self.descriptor.auto_start()
            && self.register_boot
            && let Err(e) = script::enable_boot_start(self.boot_tool.as_deref(), self.descriptor.name())
        {
            // The script is in place; boot registration can be redone by hand.
            log::warn!("boot-time start not registered: {e}");
        }
        Ok(())
    }

    fn uninstall(&mut self) -> Result<()> {
        self.require_elevated()?;

        if self.descriptor.auto_start() && self.register_boot {
            // Best effort: the script removal below is what uninstall means.
            if let Err(e) = script::disable_boot_start(self.boot_tool.as_deref(), self.descriptor.name())
            {
                log::warn!("{e}");
            }
        }
        script::remove_script(&self.control_script)?;
        log::info!("removed control script {}", self.control_script.display());
        Ok(())
    }

    fn is_installed(&self) -> bool {
        self.control_script.exists()
    }

    fn is_running(&self) -> bool {
        self.pid_file.exists()
    }

    fn exit_cleanup(&self) -> CrashRecovery {
        let program = Self::current_executable().unwrap_or_else(|e| {
            log::warn!("{e}, relaunch falls back to argv[0]");
            PathBuf::from(std::env::args_os().next().unwrap_or_default())
        });
        let mut args = vec!["start".to_string()];
        args.extend(self.forwarded_args.iter().cloned());

        CrashRecovery::new(
            self.pid_file.clone(),
            self.descriptor.auto_start(),
            program,
            args,
        )
        .with_delay(self.restart_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_follows_the_last_parenthesis() {
        assert_eq!(process_state("4242 (sleep) S 1 4242 4242 0 -1"), Some('S'));
        assert_eq!(process_state("77 (my (odd) proc) Z 1 77 77"), Some('Z'));
        assert_eq!(process_state("garbage"), None);
    }

    #[test]
    fn own_process_is_alive() {
        assert!(process_exists(Pid::this()));
    }
}
