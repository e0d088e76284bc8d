//! Cross-platform service lifecycle: install, uninstall, start, stop and run
//! an application as a POSIX daemon or a Windows service.
//!
//! The embedding application supplies a [`ServiceDescriptor`] and a
//! [`ServiceHooks`] implementation; [`Service`] checks each command's
//! precondition, drives the platform backend and fires the callbacks.

pub mod cli;
pub mod config;
pub mod control;
pub mod descriptor;
pub mod error;
pub mod hooks;
pub mod lifecycle;
pub mod shutdown;

use std::process::ExitCode;

pub use config::ServiceConfig;
pub use control::{ControlBackend, ExitCleanup, PlatformBackend, RunMode, StartOutcome};
pub use descriptor::ServiceDescriptor;
pub use error::{Result, ServiceError};
pub use hooks::ServiceHooks;
pub use lifecycle::{Command, EXIT_FAILURE, Outcome, Service};
pub use shutdown::ShutdownSignal;

/// Parse the process arguments, load configuration and execute the command.
pub fn run_from_env<H: ServiceHooks>(descriptor: ServiceDescriptor, hooks: H) -> ExitCode {
    let args = cli::Args::parse_lenient();

    let config = match &args.config {
        Some(path) => ServiceConfig::load(path),
        None => ServiceConfig::discover(descriptor.name()),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            log::error!("{e}");
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    Service::new(descriptor, &config, hooks).execute(args.command())
}
