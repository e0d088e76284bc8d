//! Elevation check for SCM registration.

use std::mem;

use windows::Win32::Foundation::{CloseHandle, HANDLE};
use windows::Win32::Security::{GetTokenInformation, TOKEN_ELEVATION, TOKEN_QUERY, TokenElevation};
use windows::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};

use crate::error::{Result, ServiceError};

/// Require an elevated (Administrator) token.
pub(super) fn check_privileges() -> Result<()> {
    let denied = || ServiceError::NoElevatedRights("run from an elevated (Administrator) prompt".to_string());
    let mut token_handle = HANDLE::default();

    unsafe {
        OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token_handle)
            .map_err(|_| denied())?;

        let mut elevation: TOKEN_ELEVATION = mem::zeroed();
        let mut return_length: u32 = 0;

        let queried = GetTokenInformation(
            token_handle,
            TokenElevation,
            Some(&mut elevation as *mut _ as *mut std::ffi::c_void),
            mem::size_of::<TOKEN_ELEVATION>() as u32,
            &mut return_length,
        );
        let _ = CloseHandle(token_handle);
        queried.map_err(|_| denied())?;

        if elevation.TokenIsElevated == 0 {
            return Err(denied());
        }
    }

    Ok(())
}
