//! Windows backend on the Service Control Manager (SCM) API.
//!
//! # Module Structure
//!
//! - `handles` - RAII wrappers for SCM handles
//! - `host` - service dispatcher, control handler, console events
//! - `privileges` - token elevation check
//! - `utils` - wide strings and command lines

use std::ffi::c_void;
use std::mem;
use std::sync::Arc;
use std::time::Duration;

use windows::Win32::System::Services::{
    ChangeServiceConfig2W, ControlService, CreateServiceW, DeleteService, OpenServiceW,
    QueryServiceStatus, SC_ACTION, SC_ACTION_RESTART, SC_MANAGER_ALL_ACCESS, SC_MANAGER_CONNECT,
    SERVICE_ALL_ACCESS, SERVICE_AUTO_START, SERVICE_CONFIG_DESCRIPTION,
    SERVICE_CONFIG_FAILURE_ACTIONS, SERVICE_CONTROL_STOP, SERVICE_DEMAND_START,
    SERVICE_DESCRIPTIONW, SERVICE_ERROR_NORMAL, SERVICE_FAILURE_ACTIONSW, SERVICE_PAUSE_PENDING,
    SERVICE_PAUSED, SERVICE_QUERY_CONFIG, SERVICE_QUERY_STATUS, SERVICE_RUNNING, SERVICE_START,
    SERVICE_START_PENDING, SERVICE_STATUS, SERVICE_STATUS_CURRENT_STATE, SERVICE_STOP,
    SERVICE_WIN32_OWN_PROCESS, StartServiceW,
};
use windows::core::{PCWSTR, PWSTR};

use super::{ControlBackend, HostedBody, RunMode, StartOutcome};
use crate::config::ServiceConfig;
use crate::descriptor::ServiceDescriptor;
use crate::error::{Result, ServiceError};

mod handles;
mod host;
mod privileges;
mod utils;

use handles::{ScManagerHandle, ServiceHandle};

/// Failure count resets after a day without crashes.
const FAILURE_RESET_SECS: u32 = 86_400;

pub struct WindowsBackend {
    descriptor: Arc<ServiceDescriptor>,
    restart_delay: Duration,
    forwarded_args: Vec<String>,
}

impl WindowsBackend {
    pub fn new(descriptor: Arc<ServiceDescriptor>, config: &ServiceConfig) -> Result<Self> {
        Ok(Self {
            descriptor,
            restart_delay: config.restart_delay(),
            forwarded_args: config.forwarded_args(),
        })
    }

    fn open_service(&self, manager: &ScManagerHandle, access: u32) -> Result<ServiceHandle> {
        let name = utils::to_wide(self.descriptor.name());
        // SAFETY: `name` is NUL-terminated and outlives the call.
        let handle = unsafe { OpenServiceW(manager.handle(), PCWSTR(name.as_ptr()), access) }
            .map_err(|e| {
                ServiceError::OperationFailed(format!(
                    "failed to open service '{}': {e}",
                    self.descriptor.name()
                ))
            })?;
        Ok(ServiceHandle(handle))
    }

    fn connect(&self, access: u32) -> Result<ServiceHandle> {
        let manager = ScManagerHandle::open(SC_MANAGER_CONNECT)?;
        self.open_service(&manager, access)
    }

    fn binary_path(&self) -> Result<String> {
        let exe = std::env::current_exe()
            .map_err(|e| ServiceError::io("resolving current executable", e))?;
        let mut args = vec!["run".to_string()];
        args.extend(self.forwarded_args.iter().cloned());
        Ok(utils::command_line(&exe, &args))
    }

    fn configure_description(&self, service: &ServiceHandle) -> Result<()> {
        let mut description = utils::to_wide(self.descriptor.description());
        let info = SERVICE_DESCRIPTIONW {
            lpDescription: PWSTR(description.as_mut_ptr()),
        };
        // SAFETY: `info` and its buffer live across the call.
        unsafe {
            ChangeServiceConfig2W(
                service.handle(),
                SERVICE_CONFIG_DESCRIPTION,
                Some(&info as *const _ as *const c_void),
            )
        }
        .map_err(|e| ServiceError::OperationFailed(format!("failed to set service description: {e}")))
    }

    /// Ask the SCM to restart the service whenever it dies unexpectedly.
    fn configure_failure_actions(&self, service: &ServiceHandle) -> Result<()> {
        let delay = u32::try_from(self.restart_delay.as_millis()).unwrap_or(u32::MAX);
        let actions = [SC_ACTION {
            Type: SC_ACTION_RESTART,
            Delay: delay,
        }; 3];

        let failure_actions = SERVICE_FAILURE_ACTIONSW {
            dwResetPeriod: FAILURE_RESET_SECS,
            lpRebootMsg: PWSTR::null(),
            lpCommand: PWSTR::null(),
            cActions: actions.len() as u32,
            lpsaActions: actions.as_ptr() as *mut SC_ACTION,
        };

        // SAFETY: `failure_actions` and `actions` live across the call.
        unsafe {
            ChangeServiceConfig2W(
                service.handle(),
                SERVICE_CONFIG_FAILURE_ACTIONS,
                Some(&failure_actions as *const _ as *const c_void),
            )
        }
        .map_err(|e| ServiceError::OperationFailed(format!("failed to set failure actions: {e}")))
    }
}

/// RUNNING, START_PENDING, PAUSED and PAUSE_PENDING; anything else is idle.
fn counts_as_running(state: SERVICE_STATUS_CURRENT_STATE) -> bool {
    [
        SERVICE_RUNNING,
        SERVICE_START_PENDING,
        SERVICE_PAUSE_PENDING,
        SERVICE_PAUSED,
    ]
    .contains(&state)
}

impl ControlBackend for WindowsBackend {
    type Cleanup = ();

    fn start(&mut self) -> Result<StartOutcome> {
        let service = self.connect(SERVICE_START)?;
        // SAFETY: valid service handle, no arguments.
        unsafe { StartServiceW(service.handle(), None) }
            .map_err(|e| ServiceError::OperationFailed(format!("failed to start service: {e}")))?;
        Ok(StartOutcome::Launched)
    }

    fn stop(&mut self) -> Result<()> {
        let service = self.connect(SERVICE_STOP)?;
        let mut status: SERVICE_STATUS = unsafe { mem::zeroed() };
        // SAFETY: valid service handle and status out-pointer.
        unsafe { ControlService(service.handle(), SERVICE_CONTROL_STOP, &mut status) }
            .map_err(|e| ServiceError::OperationFailed(format!("failed to stop service: {e}")))
    }

    fn install(&mut self) -> Result<()> {
        privileges::check_privileges()?;

        let manager = ScManagerHandle::open(SC_MANAGER_ALL_ACCESS)?;
        let name = utils::to_wide(self.descriptor.name());
        let binary_path = utils::to_wide(self.binary_path()?);
        let start_type = if self.descriptor.auto_start() {
            SERVICE_AUTO_START
        } else {
            SERVICE_DEMAND_START
        };

        // SAFETY: every string is NUL-terminated and outlives the call.
        let handle = unsafe {
            CreateServiceW(
                manager.handle(),
                PCWSTR(name.as_ptr()),
                PCWSTR(name.as_ptr()),
                SERVICE_ALL_ACCESS,
                SERVICE_WIN32_OWN_PROCESS,
                start_type,
                SERVICE_ERROR_NORMAL,
                PCWSTR(binary_path.as_ptr()),
                PCWSTR::null(),
                None,
                PCWSTR::null(),
                PCWSTR::null(),
                PCWSTR::null(),
            )
        }
        .map_err(|e| ServiceError::OperationFailed(format!("failed to create service: {e}")))?;
        let service = ServiceHandle(handle);

        self.configure_description(&service)?;
        if self.descriptor.auto_start() {
            self.configure_failure_actions(&service)?;
            host::install_console_handler();
        }
        log::info!("registered '{}' with the Service Control Manager", self.descriptor.name());
        Ok(())
    }

    fn uninstall(&mut self) -> Result<()> {
        privileges::check_privileges()?;

        let manager = ScManagerHandle::open(SC_MANAGER_ALL_ACCESS)?;
        let service = self.open_service(&manager, SERVICE_ALL_ACCESS)?;
        // SAFETY: valid service handle opened with delete access.
        unsafe { DeleteService(service.handle()) }
            .map_err(|e| ServiceError::OperationFailed(format!("failed to delete service: {e}")))?;
        log::info!("removed '{}' from the Service Control Manager", self.descriptor.name());
        Ok(())
    }

    /// Any failure to open the service counts as "not installed".
    fn is_installed(&self) -> bool {
        self.connect(SERVICE_QUERY_CONFIG).is_ok()
    }

    fn is_running(&self) -> bool {
        let Ok(service) = self.connect(SERVICE_QUERY_STATUS) else {
            return false;
        };
        let mut status: SERVICE_STATUS = unsafe { mem::zeroed() };
        // SAFETY: valid service handle and status out-pointer.
        if unsafe { QueryServiceStatus(service.handle(), &mut status) }.is_err() {
            return false;
        }
        counts_as_running(status.dwCurrentState)
    }

    /// Restarts after crashes are the SCM's job (failure actions).
    fn exit_cleanup(&self) {}

    fn host(&mut self, body: &mut HostedBody<'_>) -> Result<RunMode> {
        let mode = host::run_dispatcher(self.descriptor.name(), body)?;
        if mode == RunMode::Interactive {
            host::install_console_handler();
        }
        Ok(mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use windows::Win32::System::Services::{
        SERVICE_CONTINUE_PENDING, SERVICE_STOP_PENDING, SERVICE_STOPPED,
    };

    #[test]
    fn running_states() {
        for state in [SERVICE_RUNNING, SERVICE_START_PENDING, SERVICE_PAUSED, SERVICE_PAUSE_PENDING] {
            assert!(counts_as_running(state), "{state:?}");
        }
        for state in [SERVICE_STOPPED, SERVICE_STOP_PENDING, SERVICE_CONTINUE_PENDING] {
            assert!(!counts_as_running(state), "{state:?}");
        }
    }
}
