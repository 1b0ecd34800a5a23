//! # Windows Process Launch
//!
//! Creates the debuggee with `CreateProcessW(DEBUG_PROCESS)`. The new process
//! is suspended by the OS until its creation event has been continued, so
//! nothing runs before the event loop sees it.
//!
//! ## References
//!
//! - [CreateProcessW](https://learn.microsoft.com/en-us/windows/win32/api/processthreadsapi/nf-processthreadsapi-createprocessw)

use std::ptr;

use tracing::debug;
use windows_sys::Win32::Foundation::{CloseHandle, GetLastError};
use windows_sys::Win32::System::Threading::{
    CreateProcessW, DEBUG_PROCESS, PROCESS_INFORMATION, STARTF_USESHOWWINDOW, STARTUPINFOW,
};

use crate::api::LaunchOptions;
use crate::error::{DebuggerError, Result};
use crate::types::ProcessId;

/// `HRESULT_FROM_WIN32`: the status handed back for a failed creation.
pub(crate) fn launch_status(win32_error: u32) -> u32
{
    if win32_error == 0 {
        0
    } else {
        0x8007_0000 | (win32_error & 0xFFFF)
    }
}

fn wide(text: &str) -> Vec<u16>
{
    text.encode_utf16().chain(std::iter::once(0)).collect()
}

/// Create `options.command_line` under debug control.
pub(crate) fn create_debuggee(options: &LaunchOptions) -> Result<ProcessId>
{
    // CreateProcessW may write into the command line buffer.
    let mut command_line = wide(&options.command_line);

    // SAFETY: zeroed STARTUPINFOW / PROCESS_INFORMATION are valid initial values.
    let mut startup: STARTUPINFOW = unsafe { std::mem::zeroed() };
    startup.cb = std::mem::size_of::<STARTUPINFOW>() as u32;
    startup.dwFlags = STARTF_USESHOWWINDOW;
    startup.wShowWindow = options.show;
    let mut created: PROCESS_INFORMATION = unsafe { std::mem::zeroed() };

    // SAFETY: every pointer is either null or points at a live local.
    let ok = unsafe {
        CreateProcessW(
            ptr::null(),
            command_line.as_mut_ptr(),
            ptr::null(),
            ptr::null(),
            0,
            DEBUG_PROCESS,
            ptr::null(),
            ptr::null(),
            &startup,
            &mut created,
        )
    };

    if ok == 0 {
        // SAFETY: reads the calling thread's last-error value.
        let error = unsafe { GetLastError() };
        return Err(DebuggerError::LaunchFailed {
            command_line: options.command_line.clone(),
            status: launch_status(error),
            reason: std::io::Error::from_raw_os_error(error as i32).to_string(),
        });
    }

    // The creation event delivers its own handles.
    // SAFETY: both handles were just returned by CreateProcessW.
    unsafe {
        CloseHandle(created.hThread);
        CloseHandle(created.hProcess);
    }

    debug!(pid = created.dwProcessId, "CreateProcessW succeeded");
    Ok(ProcessId(created.dwProcessId))
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_launch_status_wraps_win32_error()
    {
        // ERROR_FILE_NOT_FOUND
        assert_eq!(launch_status(2), 0x8007_0002);
        assert_eq!(launch_status(0), 0);
    }
}
