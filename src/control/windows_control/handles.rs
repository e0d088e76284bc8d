//! RAII wrappers for Service Control Manager handles.

use windows::Win32::System::Services::{CloseServiceHandle, OpenSCManagerW, SC_HANDLE};
use windows::core::PCWSTR;

use crate::error::{Result, ServiceError};

/// RAII wrapper for the Service Control Manager handle
pub(super) struct ScManagerHandle(SC_HANDLE);

impl ScManagerHandle {
    pub(super) fn open(access: u32) -> Result<Self> {
        // SAFETY: null machine/database names select the local active database.
        let handle = unsafe { OpenSCManagerW(PCWSTR::null(), PCWSTR::null(), access) }.map_err(
            |e| ServiceError::OperationFailed(format!("failed to open Service Control Manager: {e}")),
        )?;
        Ok(Self(handle))
    }

    #[inline]
    pub(super) fn handle(&self) -> SC_HANDLE {
        self.0
    }
}

impl Drop for ScManagerHandle {
    #[inline]
    fn drop(&mut self) {
        if !self.0.is_invalid() {
            unsafe {
                let _ = CloseServiceHandle(self.0);
            }
        }
    }
}

/// RAII wrapper for a service handle
pub(super) struct ServiceHandle(pub(super) SC_HANDLE);

impl ServiceHandle {
    #[inline]
    pub(super) fn handle(&self) -> SC_HANDLE {
        self.0
    }
}

impl Drop for ServiceHandle {
    #[inline]
    fn drop(&mut self) {
        if !self.0.is_invalid() {
            unsafe {
                let _ = CloseServiceHandle(self.0);
            }
        }
    }
}
