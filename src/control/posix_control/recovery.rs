//! Exit-time crash detection for the detached daemon.
//!
//! `stop` removes the PID file *before* signalling, so a PID file still on
//! disk when the daemon exits means nobody asked it to stop.

use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;

use super::pidfile::PidFile;
use crate::control::ExitCleanup;

/// What the exit routine decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// PID file already gone: deliberate stop.
    CleanStop,
    /// Crash without auto-start: stale PID file removed, nothing relaunched.
    Cleared,
    /// Crash with auto-start: stale PID file removed, new instance launched.
    Relaunched,
    /// Crash with auto-start, but the relaunch could not be spawned.
    RelaunchFailed,
}

/// Crash-vs-stop routine armed by the detached daemon.
#[derive(Debug, Clone)]
pub struct CrashRecovery {
    pid_file: PidFile,
    auto_start: bool,
    delay: Duration,
    program: PathBuf,
    args: Vec<String>,
}

impl CrashRecovery {
    pub fn new(pid_file: PidFile, auto_start: bool, program: PathBuf, args: Vec<String>) -> Self {
        Self {
            pid_file,
            auto_start,
            delay: Duration::from_secs(1),
            program,
            args,
        }
    }

    /// Pause before relaunching, to avoid tight crash loops.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn relaunch_command(&self) -> (&PathBuf, &[String]) {
        (&self.program, &self.args)
    }

    /// Inspect the PID file and act on it.
    pub fn recover(&self) -> RecoveryAction {
        if !self.pid_file.exists() {
            log::debug!("PID file already removed, clean stop");
            return RecoveryAction::CleanStop;
        }

        log::warn!(
            "PID file {} still present at exit, treating as crash",
            self.pid_file.path().display()
        );
        if let Err(e) = self.pid_file.remove() {
            log::error!("failed to remove stale PID file: {e}");
        }

        if !self.auto_start {
            return RecoveryAction::Cleared;
        }

        std::thread::sleep(self.delay);
        match Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(child) => {
                log::info!(
                    "relaunched {} {} (pid {})",
                    self.program.display(),
                    self.args.join(" "),
                    child.id()
                );
                RecoveryAction::Relaunched
            }
            Err(e) => {
                log::error!("failed to relaunch {}: {e}", self.program.display());
                RecoveryAction::RelaunchFailed
            }
        }
    }
}

impl ExitCleanup for CrashRecovery {
    fn run(self) {
        self.recover();
    }
}
