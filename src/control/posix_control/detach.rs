//! Double-fork daemonisation.
//!
//! launcher ──fork──▶ intermediate ──setsid, umask(0), fork──▶ daemon
//!    │                    └─ _exit(0)                            │
//!    └─ waitpid(intermediate), read readiness byte ◀── pipe ─────┘
//!
//! The daemon is re-parented to init and can never reacquire a controlling
//! terminal. It reports back through the pipe once its PID file is written,
//! so the launcher can tell success from a failed fork or PID file write.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::fd::{AsRawFd, OwnedFd};

use nix::sys::stat::{Mode, umask};
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{ForkResult, fork, pipe, setsid};

use crate::error::{Result, ServiceError};

const READY: u8 = b'1';

/// Which side of the detach sequence the caller ended up on.
pub(super) enum Detached {
    /// Original process; the daemon is up.
    Launcher,
    /// Fully detached daemon. `Readiness` must be completed once the PID file
    /// is in place.
    Daemon(Readiness),
}

/// Write end of the readiness pipe, held by the daemon.
pub(super) struct Readiness(File);

impl Readiness {
    /// Tell the launcher the daemon is up; closes the pipe.
    pub(super) fn signal(mut self) {
        if let Err(e) = self.0.write_all(&[READY]) {
            log::warn!("failed to signal readiness to launcher: {e}");
        }
    }
}

/// Run the double-fork sequence.
pub(super) fn detach() -> Result<Detached> {
    flush_stdio();
    let (read_end, write_end) =
        pipe().map_err(|e| ServiceError::OperationFailed(format!("pipe failed: {e}")))?;

    // SAFETY: the process is single-threaded at this point of the lifecycle;
    // the children only call async-signal-safe functions before continuing.
    match unsafe { fork() } {
        Err(e) => Err(ServiceError::OperationFailed(format!("first fork failed: {e}"))),
        Ok(ForkResult::Parent { child }) => {
            drop(write_end);
            let status = waitpid(child, None)
                .map_err(|e| ServiceError::OperationFailed(format!("waitpid failed: {e}")))?;
            if status != WaitStatus::Exited(child, 0) {
                return Err(ServiceError::OperationFailed(format!(
                    "second fork failed ({status:?})"
                )));
            }
            await_readiness(read_end)?;
            Ok(Detached::Launcher)
        }
        Ok(ForkResult::Child) => {
            drop(read_end);
            become_session_leader();
            // SAFETY: as above.
            match unsafe { fork() } {
                Err(_) => exit_now(1),
                Ok(ForkResult::Parent { .. }) => exit_now(0),
                Ok(ForkResult::Child) => Ok(Detached::Daemon(Readiness(File::from(write_end)))),
            }
        }
    }
}

fn become_session_leader() {
    if setsid().is_err() {
        exit_now(1);
    }
    let _ = umask(Mode::empty());
}

fn await_readiness(read_end: OwnedFd) -> Result<()> {
    let mut byte = [0u8; 1];
    let mut pipe = File::from(read_end);
    match pipe.read(&mut byte) {
        Ok(1) if byte[0] == READY => Ok(()),
        Ok(_) => Err(ServiceError::OperationFailed(
            "daemon exited before writing its PID file".to_string(),
        )),
        Err(e) => Err(ServiceError::io("reading daemon readiness", e)),
    }
}

/// Leave the intermediate process without running exit handlers or flushing
/// buffers it shares with the launcher.
fn exit_now(code: i32) -> ! {
    // SAFETY: _exit is async-signal-safe and never returns.
    unsafe { libc::_exit(code) }
}

fn flush_stdio() {
    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();
}

/// Move to `/` and point stdin/stdout/stderr at the null device.
pub(super) fn redirect_stdio_to_null() -> Result<()> {
    if let Err(e) = std::env::set_current_dir("/") {
        log::warn!("failed to chdir to /: {e}");
    }

    flush_stdio();
    let null = OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/null")
        .map_err(|e| ServiceError::io("opening /dev/null", e))?;

    for target in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
        // SAFETY: both descriptors are valid for the duration of the call.
        if unsafe { libc::dup2(null.as_raw_fd(), target) } == -1 {
            return Err(ServiceError::io(
                "redirecting stdio to /dev/null",
                std::io::Error::last_os_error(),
            ));
        }
    }
    Ok(())
}
