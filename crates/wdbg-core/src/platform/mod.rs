//! # Platform-Specific Implementations
//!
//! Debug backends implementing [`DebugApi`](crate::api::DebugApi) on top of
//! a platform's native debugging facility.
//!
//! - **Windows**: the Win32 debug API (`WaitForDebugEvent`,
//!   `ContinueDebugEvent`, `Get/SetThreadContext`, ...)
//!   - See: [Debugging Functions](https://learn.microsoft.com/en-us/windows/win32/debug/debugging-functions)
//!
//! Everything above this module is platform independent and is exercised on
//! every host through scripted backends.

#[cfg(windows)]
pub mod windows;

/// Create the native backend for the running platform.
///
/// ## Errors
///
/// `Unsupported` on platforms without a backend.
#[cfg(windows)]
pub fn create_api() -> crate::error::Result<windows::WindowsApi>
{
    Ok(windows::WindowsApi::new())
}

/// Create the native backend for the running platform.
///
/// ## Errors
///
/// `Unsupported` on platforms without a backend.
#[cfg(not(windows))]
pub fn create_api() -> crate::error::Result<std::convert::Infallible>
{
    Err(crate::error::DebuggerError::Unsupported(format!(
        "no debug backend for platform: {}",
        std::env::consts::OS
    )))
}
