//! Platform control backends: the OS mechanics behind the lifecycle.
//!
//! Provides one backend per host family behind a fixed capability set:
//! - Unix: double-fork daemon tracked by a PID file, SysV control script
//! - Windows: Service Control Manager (Windows API)
//!
//! The concrete backend is picked at compile time for the host OS; on any
//! other target `select_backend` reports `UnsupportedPlatform`.

use std::sync::Arc;

use crate::config::ServiceConfig;
use crate::descriptor::ServiceDescriptor;
use crate::error::Result;
use crate::shutdown::ShutdownSignal;

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod posix_control;
        pub use posix_control::{CrashRecovery, PidFile, PosixBackend, RecoveryAction};
        /// Backend compiled for this host.
        pub type PlatformBackend = PosixBackend;
    } else if #[cfg(windows)] {
        mod windows_control;
        pub use windows_control::WindowsBackend;
        /// Backend compiled for this host.
        pub type PlatformBackend = WindowsBackend;
    } else {
        mod unsupported;
        pub use unsupported::UnsupportedBackend;
        /// Backend compiled for this host.
        pub type PlatformBackend = UnsupportedBackend;
    }
}

/// What `start` produced in the current process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// Another process now runs the service; this one only reports.
    Launched,
    /// This process *is* the detached service and must run `started()`.
    Detached,
}

/// How `run` was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Not under a native service host: run the callbacks in the foreground.
    Interactive,
    /// The native service host drove the service body to completion.
    Hosted,
}

/// Service body driven by a native host. Receives the host's stop token.
pub type HostedBody<'a> = dyn FnMut(&ShutdownSignal) + 'a;

/// Exit-time routine armed when a process enters the detached state.
pub trait ExitCleanup {
    fn run(self);
}

impl ExitCleanup for () {
    fn run(self) {}
}

/// Capability set every platform backend provides.
pub trait ControlBackend {
    type Cleanup: ExitCleanup;

    /// Detach (or ask the OS service manager) to start the service.
    fn start(&mut self) -> Result<StartOutcome>;

    /// Terminate the running instance.
    fn stop(&mut self) -> Result<()>;

    /// Register with the OS service facility.
    fn install(&mut self) -> Result<()>;

    /// Deregister from the OS service facility.
    fn uninstall(&mut self) -> Result<()>;

    fn is_installed(&self) -> bool;

    fn is_running(&self) -> bool;

    /// Crash-vs-deliberate-stop check for the detached instance.
    fn exit_cleanup(&self) -> Self::Cleanup;

    /// Give a native service host the chance to drive `body`.
    fn host(&mut self, _body: &mut HostedBody<'_>) -> Result<RunMode> {
        Ok(RunMode::Interactive)
    }
}

/// Instantiate the backend matching the host OS.
pub fn select_backend(
    descriptor: Arc<ServiceDescriptor>,
    config: &ServiceConfig,
) -> Result<PlatformBackend> {
    PlatformBackend::new(descriptor, config)
}
