//! Lifecycle orchestrator: command dispatch, precondition checks, callbacks.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::process::ExitCode;
use std::sync::Arc;

use log::{error, info, warn};

use crate::config::ServiceConfig;
use crate::control::{self, ControlBackend, ExitCleanup, PlatformBackend, RunMode, StartOutcome};
use crate::descriptor::ServiceDescriptor;
use crate::error::{Result, ServiceError};
use crate::hooks::ServiceHooks;
use crate::shutdown::{self, ShutdownSignal};

/// Exit status for any failed command.
pub const EXIT_FAILURE: u8 = 1;

/// The single lifecycle token a process is invoked with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Command {
    Install,
    Uninstall,
    Start,
    Stop,
    #[default]
    Run,
}

impl Command {
    /// Map a token to a command. A leading `--` is accepted; anything
    /// unrecognised means `Run`.
    pub fn from_token(token: &str) -> Self {
        match token.strip_prefix("--").unwrap_or(token) {
            "install" => Self::Install,
            "uninstall" => Self::Uninstall,
            "start" => Self::Start,
            "stop" => Self::Stop,
            "run" => Self::Run,
            other => {
                if !other.is_empty() {
                    warn!("unknown command '{token}', defaulting to run");
                }
                Self::Run
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Uninstall => "uninstall",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Run => "run",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Successful result of a dispatched command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Installed,
    Uninstalled,
    /// `start` in the launching process: the service runs elsewhere.
    Launched,
    /// The service body ran in this process and returned.
    Served,
    /// The running instance was terminated.
    Stopped,
}

/// Scoped exit action for a detached/hosted instance: on every exit path,
/// including a panic unwinding out of `started()`, runs the backend's
/// crash-vs-stop check and then `stopped()`.
struct ExitGuard<'a, H: ServiceHooks, C: ExitCleanup> {
    cleanup: Option<C>,
    hooks: &'a mut H,
    finished: bool,
}

impl<'a, H: ServiceHooks, C: ExitCleanup> ExitGuard<'a, H, C> {
    fn arm(cleanup: Option<C>, hooks: &'a mut H) -> Self {
        Self {
            cleanup,
            hooks,
            finished: false,
        }
    }

    fn hooks(&mut self) -> &mut H {
        &mut *self.hooks
    }

    fn fire(&mut self) -> Result<()> {
        self.finished = true;
        if let Some(cleanup) = self.cleanup.take() {
            cleanup.run();
        }
        self.hooks.stopped().map_err(ServiceError::hook("stopped"))
    }

    /// Run the exit action now and report `stopped()`'s result.
    fn finish(mut self) -> Result<()> {
        self.fire()
    }
}

impl<H: ServiceHooks, C: ExitCleanup> Drop for ExitGuard<'_, H, C> {
    fn drop(&mut self) {
        if !self.finished
            && let Err(e) = self.fire()
        {
            error!("{e}");
        }
    }
}

/// Orchestrates one service: owns its descriptor, backend and callbacks.
pub struct Service<H, B = PlatformBackend> {
    descriptor: Arc<ServiceDescriptor>,
    backend: Result<B, ServiceError>,
    hooks: H,
    shutdown: ShutdownSignal,
}

impl<H: ServiceHooks> Service<H> {
    /// Build an orchestrator on the backend for the host OS.
    ///
    /// When no backend is available the orchestrator still serves `run`;
    /// every other command then fails with the error that prevented it.
    pub fn new(descriptor: ServiceDescriptor, config: &ServiceConfig, hooks: H) -> Self {
        let descriptor = Arc::new(descriptor);
        let backend = control::select_backend(Arc::clone(&descriptor), config).inspect_err(|e| {
            warn!("{e}");
        });
        Self {
            descriptor,
            backend,
            hooks,
            shutdown: ShutdownSignal::new(),
        }
    }
}

impl<H: ServiceHooks, B: ControlBackend> Service<H, B> {
    pub fn with_backend(descriptor: Arc<ServiceDescriptor>, backend: B, hooks: H) -> Self {
        Self {
            descriptor,
            backend: Ok(backend),
            hooks,
            shutdown: ShutdownSignal::new(),
        }
    }

    /// Orchestrator whose backend could not be created.
    pub fn without_backend(descriptor: Arc<ServiceDescriptor>, error: ServiceError, hooks: H) -> Self {
        Self {
            descriptor,
            backend: Err(error),
            hooks,
            shutdown: ShutdownSignal::new(),
        }
    }

    pub fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    pub fn backend(&self) -> Option<&B> {
        self.backend.as_ref().ok()
    }

    /// Stop token handed to `started()`.
    pub fn shutdown_signal(&self) -> &ShutdownSignal {
        &self.shutdown
    }

    pub fn is_installed(&self) -> bool {
        self.backend.as_ref().is_ok_and(|b| b.is_installed())
    }

    pub fn is_running(&self) -> bool {
        self.backend.as_ref().is_ok_and(|b| b.is_running())
    }

    fn backend_mut(&mut self) -> Result<&mut B> {
        self.backend
            .as_mut()
            .map_err(|e| e.duplicate())
    }

    /// Check the command's precondition, call the backend, fire the callback.
    pub fn dispatch(&mut self, command: Command) -> Result<Outcome> {
        info!("{}: {command}", self.descriptor.name());
        match command {
            Command::Install => self.install(),
            Command::Uninstall => self.uninstall(),
            Command::Start => self.start(),
            Command::Stop => self.stop(),
            Command::Run => self.run(),
        }
    }

    fn install(&mut self) -> Result<Outcome> {
        let name = self.descriptor.name().to_string();
        let backend = self.backend_mut()?;
        if backend.is_installed() {
            return Err(ServiceError::AlreadyInstalled(name));
        }
        backend.install()?;
        self.hooks
            .installed()
            .map_err(ServiceError::hook("installed"))?;
        Ok(Outcome::Installed)
    }

    fn uninstall(&mut self) -> Result<Outcome> {
        let name = self.descriptor.name().to_string();
        let backend = self.backend_mut()?;
        if !backend.is_installed() {
            return Err(ServiceError::NotInstalled(name));
        }
        backend.uninstall()?;
        self.hooks
            .uninstalled()
            .map_err(ServiceError::hook("uninstalled"))?;
        Ok(Outcome::Uninstalled)
    }

    fn start(&mut self) -> Result<Outcome> {
        let name = self.descriptor.name().to_string();
        let backend = self.backend_mut()?;
        if backend.is_running() {
            return Err(ServiceError::AlreadyRunning(name));
        }
        match backend.start()? {
            StartOutcome::Launched => Ok(Outcome::Launched),
            StartOutcome::Detached => {
                let cleanup = backend.exit_cleanup();
                shutdown::install_signal_handlers()?;
                self.serve_guarded(cleanup)
            }
        }
    }

    /// `stopped()` is not called here: it fires in the detached process as
    /// that process exits.
    fn stop(&mut self) -> Result<Outcome> {
        let name = self.descriptor.name().to_string();
        let backend = self.backend_mut()?;
        if !backend.is_running() {
            return Err(ServiceError::NotRunning(name));
        }
        backend.stop()?;
        Ok(Outcome::Stopped)
    }

    fn run(&mut self) -> Result<Outcome> {
        shutdown::install_signal_handlers()?;

        let Self { backend, hooks, .. } = &mut *self;
        if let Ok(backend) = backend {
            let mut cleanup = Some(backend.exit_cleanup());
            let mut served: Option<Result<()>> = None;
            let mut body = |signal: &ShutdownSignal| {
                let mut guard = ExitGuard::arm(cleanup.take(), &mut *hooks);
                let result = guard
                    .hooks()
                    .started(signal)
                    .map_err(ServiceError::hook("started"));
                let stopped = guard.finish();
                served = Some(result.and(stopped));
            };
            let mode = backend.host(&mut body)?;
            if mode == RunMode::Hosted {
                return served.unwrap_or(Ok(())).map(|()| Outcome::Served);
            }
        }

        self.hooks
            .started(&self.shutdown)
            .map_err(ServiceError::hook("started"))?;
        Ok(Outcome::Served)
    }

    fn serve_guarded(&mut self, cleanup: B::Cleanup) -> Result<Outcome> {
        let mut guard = ExitGuard::arm(Some(cleanup), &mut self.hooks);
        let result = guard
            .hooks()
            .started(&self.shutdown)
            .map_err(ServiceError::hook("started"));
        let stopped = guard.finish();
        result?;
        stopped?;
        Ok(Outcome::Served)
    }

    /// Dispatch and turn the result into an exit status: 0 on success, 1 on
    /// any error or panic. Prints one status line either way.
    pub fn run_command(&mut self, command: Command) -> u8 {
        let name = self.descriptor.name().to_string();
        match panic::catch_unwind(AssertUnwindSafe(|| self.dispatch(command))) {
            Ok(Ok(outcome)) => {
                match outcome {
                    Outcome::Installed => println!("{name} installed"),
                    Outcome::Uninstalled => println!("{name} uninstalled"),
                    Outcome::Launched => println!("{name} started"),
                    Outcome::Stopped => println!("{name} stopped"),
                    Outcome::Served => info!("{name} exiting"),
                }
                0
            }
            Ok(Err(e)) => {
                if e.is_precondition() {
                    warn!("{command} refused: {e}");
                } else {
                    error!("{command} failed: {e}");
                }
                eprintln!("Failed to {command} {name}: {e}");
                EXIT_FAILURE
            }
            Err(payload) => {
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!("{command} panicked: {reason}");
                eprintln!("Failed to {command} {name}: {reason}");
                EXIT_FAILURE
            }
        }
    }

    pub fn execute(&mut self, command: Command) -> ExitCode {
        ExitCode::from(self.run_command(command))
    }
}
