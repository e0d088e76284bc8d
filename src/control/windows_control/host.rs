//! Service-host side of `run`: the SCM dispatcher and console control events.
//!
//! `StartServiceCtrlDispatcherW` blocks the calling thread and invokes
//! `service_main` on a thread of its own. The service body is borrowed from
//! the caller's stack and reached through `SLOT` for exactly that window.

use std::ffi::c_void;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

use windows::Win32::Foundation::{
    ERROR_CALL_NOT_IMPLEMENTED, ERROR_FAILED_SERVICE_CONTROLLER_CONNECT, ERROR_SERVICE_SPECIFIC_ERROR,
    NO_ERROR,
};
use windows::Win32::System::Console::SetConsoleCtrlHandler;
use windows::Win32::System::Services::{
    RegisterServiceCtrlHandlerExW, SERVICE_ACCEPT_SHUTDOWN, SERVICE_ACCEPT_STOP,
    SERVICE_CONTROL_INTERROGATE, SERVICE_CONTROL_SHUTDOWN, SERVICE_CONTROL_STOP, SERVICE_RUNNING,
    SERVICE_START_PENDING, SERVICE_STATUS, SERVICE_STATUS_CURRENT_STATE, SERVICE_STATUS_HANDLE,
    SERVICE_STOP_PENDING,
    SERVICE_STOPPED, SERVICE_TABLE_ENTRYW, SERVICE_WIN32_OWN_PROCESS, SetServiceStatus,
    StartServiceCtrlDispatcherW,
};
use windows::core::{BOOL, PCWSTR, PWSTR};

use super::utils::to_wide;
use crate::control::{HostedBody, RunMode};
use crate::error::{Result, ServiceError};
use crate::shutdown::{self, ShutdownSignal};

const STOP_WAIT_HINT_MS: u32 = 5_000;

struct HostSlot {
    name: Vec<u16>,
    /// Points at a `&mut HostedBody` living on `run_dispatcher`'s stack.
    body: *mut c_void,
    shutdown: ShutdownSignal,
    status: AtomicPtr<c_void>,
    panicked: AtomicBool,
}

static SLOT: AtomicPtr<HostSlot> = AtomicPtr::new(ptr::null_mut());

/// Hand `body` to the SCM. Returns `Interactive` when the process was not
/// launched by the SCM.
pub(super) fn run_dispatcher(name: &str, body: &mut HostedBody<'_>) -> Result<RunMode> {
    let mut body_ref: &mut HostedBody<'_> = body;
    let slot = HostSlot {
        name: to_wide(name),
        body: &mut body_ref as *mut &mut HostedBody<'_> as *mut c_void,
        shutdown: ShutdownSignal::new(),
        status: AtomicPtr::new(ptr::null_mut()),
        panicked: AtomicBool::new(false),
    };
    SLOT.store(&slot as *const HostSlot as *mut HostSlot, Ordering::SeqCst);

    let mut table_name = slot.name.clone();
    let table = [
        SERVICE_TABLE_ENTRYW {
            lpServiceName: PWSTR(table_name.as_mut_ptr()),
            lpServiceProc: Some(service_main),
        },
        SERVICE_TABLE_ENTRYW {
            lpServiceName: PWSTR::null(),
            lpServiceProc: None,
        },
    ];

    // SAFETY: `table` is null-terminated and, with `slot`, outlives the call;
    // the dispatcher returns only after `service_main` has finished.
    let dispatched = unsafe { StartServiceCtrlDispatcherW(table.as_ptr()) };
    SLOT.store(ptr::null_mut(), Ordering::SeqCst);

    match dispatched {
        Ok(()) if slot.panicked.load(Ordering::SeqCst) => Err(ServiceError::OperationFailed(
            "service body panicked under the Service Control Manager".to_string(),
        )),
        Ok(()) => Ok(RunMode::Hosted),
        Err(e) if e.code() == ERROR_FAILED_SERVICE_CONTROLLER_CONNECT.to_hresult() => {
            log::debug!("not started by the Service Control Manager, running interactively");
            Ok(RunMode::Interactive)
        }
        Err(e) => Err(ServiceError::OperationFailed(format!(
            "service dispatcher failed: {e}"
        ))),
    }
}

unsafe extern "system" fn service_main(_argc: u32, _argv: *mut PWSTR) {
    let slot = SLOT.load(Ordering::SeqCst);
    if slot.is_null() {
        return;
    }
    // SAFETY: non-null only while `run_dispatcher` keeps the slot alive.
    let slot = unsafe { &*slot };

    let handle = match unsafe {
        RegisterServiceCtrlHandlerExW(
            PCWSTR(slot.name.as_ptr()),
            Some(control_handler),
            Some(slot as *const HostSlot as *const c_void),
        )
    } {
        Ok(handle) => handle,
        Err(e) => {
            log::error!("failed to register service control handler: {e}");
            return;
        }
    };
    slot.status.store(handle.0, Ordering::SeqCst);
    report(handle, SERVICE_START_PENDING, NO_ERROR.0);
    report(handle, SERVICE_RUNNING, NO_ERROR.0);

    // SAFETY: the dispatcher thread is blocked, so this is the only access.
    let body = unsafe { &mut *(slot.body as *mut &mut HostedBody<'static>) };
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| body(&slot.shutdown)));

    let exit_code = match outcome {
        Ok(()) => NO_ERROR.0,
        Err(_) => {
            slot.panicked.store(true, Ordering::SeqCst);
            ERROR_SERVICE_SPECIFIC_ERROR.0
        }
    };
    report(handle, SERVICE_STOPPED, exit_code);
}

unsafe extern "system" fn control_handler(
    control: u32,
    _event_type: u32,
    _event_data: *mut c_void,
    context: *mut c_void,
) -> u32 {
    match control {
        SERVICE_CONTROL_STOP | SERVICE_CONTROL_SHUTDOWN => {
            if context.is_null() {
                return NO_ERROR.0;
            }
            // SAFETY: context is the slot registered in `service_main`.
            let slot = unsafe { &*(context as *const HostSlot) };
            let handle = SERVICE_STATUS_HANDLE(slot.status.load(Ordering::SeqCst));
            report(handle, SERVICE_STOP_PENDING, NO_ERROR.0);
            slot.shutdown.request();
            NO_ERROR.0
        }
        SERVICE_CONTROL_INTERROGATE => NO_ERROR.0,
        _ => ERROR_CALL_NOT_IMPLEMENTED.0,
    }
}

fn report(handle: SERVICE_STATUS_HANDLE, state: SERVICE_STATUS_CURRENT_STATE, exit_code: u32) {
    let status = SERVICE_STATUS {
        dwServiceType: SERVICE_WIN32_OWN_PROCESS,
        dwCurrentState: state,
        dwControlsAccepted: if state == SERVICE_RUNNING {
            SERVICE_ACCEPT_STOP | SERVICE_ACCEPT_SHUTDOWN
        } else {
            0
        },
        dwWin32ExitCode: exit_code,
        dwServiceSpecificExitCode: 0,
        dwCheckPoint: 0,
        dwWaitHint: if state == SERVICE_STOP_PENDING {
            STOP_WAIT_HINT_MS
        } else {
            0
        },
    };
    // SAFETY: `status` is a fully initialised SERVICE_STATUS.
    if let Err(e) = unsafe { SetServiceStatus(handle, &status) } {
        log::warn!("SetServiceStatus failed: {e}");
    }
}

unsafe extern "system" fn console_handler(ctrl_type: u32) -> BOOL {
    // Ctrl+C, Ctrl+Break, close, logoff, shutdown.
    shutdown::notify_external(ctrl_type as usize + 1);
    BOOL::from(true)
}

/// Route console control events to the process-wide stop flag.
pub(super) fn install_console_handler() {
    // SAFETY: the handler only stores into an atomic.
    if let Err(e) = unsafe { SetConsoleCtrlHandler(Some(console_handler), true) } {
        log::warn!("failed to install console control handler: {e}");
    }
}
