//! # Windows Debug Backend
//!
//! [`DebugApi`] on top of the Win32 debug API.
//!
//! ## Win32 APIs Used
//!
//! - **WaitForDebugEvent / ContinueDebugEvent**: the event pump
//! - **DebugActiveProcess / DebugActiveProcessStop**: attach and detach
//! - **CreateProcessW(DEBUG_PROCESS)**: launch
//! - **Read/WriteProcessMemory**: debuggee memory (with `FlushInstructionCache`
//!   after writes, since writes are mostly trap instructions)
//! - **Get/SetThreadContext**: register snapshots
//! - **SuspendThread / ResumeThread**
//!
//! All calls must come from the thread that attached or created the
//! debuggee; the monitor takes care of that.
//!
//! ## References
//!
//! - [Debugging Functions](https://learn.microsoft.com/en-us/windows/win32/debug/debugging-functions)

mod context;
mod launch;
mod translate;

use std::ffi::c_void;

pub use context::WindowsContext;
use tracing::{debug, trace};
use windows_sys::Win32::Foundation::HANDLE;
use windows_sys::Win32::System::Diagnostics::Debug::{
    ContinueDebugEvent, DebugActiveProcess, DebugActiveProcessStop, DebugSetProcessKillOnExit, FlushInstructionCache,
    GetThreadContext, ReadProcessMemory, SetThreadContext, WaitForDebugEvent, WriteProcessMemory, DEBUG_EVENT,
};
use windows_sys::Win32::System::Threading::{ResumeThread, SuspendThread, INFINITE};

use crate::api::{ContinueStatus, DebugApi, LaunchOptions};
use crate::error::{DebuggerError, Result};
use crate::events::RawDebugEvent;
use crate::types::{Address, Architecture, OsHandle, ProcessId, ThreadId};

fn last_error() -> String
{
    std::io::Error::last_os_error().to_string()
}

fn raw(handle: &OsHandle) -> HANDLE
{
    handle.raw() as HANDLE
}

/// Win32 debug backend for native-architecture debuggees
#[derive(Debug)]
pub struct WindowsApi
{
    architecture: Architecture,
}

impl WindowsApi
{
    /// Backend for debuggees of the debugger's own architecture.
    pub fn new() -> Self
    {
        Self {
            architecture: Architecture::current(),
        }
    }
}

impl Default for WindowsApi
{
    fn default() -> Self
    {
        Self::new()
    }
}

impl DebugApi for WindowsApi
{
    type Context = WindowsContext;

    fn architecture(&self) -> Architecture
    {
        self.architecture
    }

    fn attach(&mut self, pid: ProcessId) -> Result<()>
    {
        // SAFETY: plain FFI calls with value arguments.
        unsafe {
            if DebugActiveProcess(pid.0) == 0 {
                return Err(DebuggerError::AttachFailed {
                    pid,
                    details: last_error(),
                });
            }
            // Detaching must leave the debuggee running.
            DebugSetProcessKillOnExit(0);
        }
        debug!(pid = %pid, "attached");
        Ok(())
    }

    fn create_process(&mut self, options: &LaunchOptions) -> Result<ProcessId>
    {
        launch::create_debuggee(options)
    }

    fn detach(&mut self, pid: ProcessId) -> Result<()>
    {
        // SAFETY: plain FFI call with a value argument.
        if unsafe { DebugActiveProcessStop(pid.0) } == 0 {
            return Err(DebuggerError::DetachFailed {
                pid,
                details: last_error(),
            });
        }
        Ok(())
    }

    fn wait_for_event(&mut self) -> Option<RawDebugEvent>
    {
        // SAFETY: a zeroed DEBUG_EVENT is a valid out-parameter.
        let mut event: DEBUG_EVENT = unsafe { std::mem::zeroed() };
        // SAFETY: `event` outlives the call.
        if unsafe { WaitForDebugEvent(&mut event, INFINITE) } == 0 {
            debug!("WaitForDebugEvent failed: {}", last_error());
            return None;
        }
        let raw = translate::translate(&event);
        trace!(pid = %raw.pid, tid = %raw.tid, code = raw.code(), "debug event");
        Some(raw)
    }

    fn continue_event(&mut self, pid: ProcessId, tid: ThreadId, status: ContinueStatus) -> Result<()>
    {
        // SAFETY: plain FFI call with value arguments.
        if unsafe { ContinueDebugEvent(pid.0, tid.0, status.code() as i32) } == 0 {
            return Err(DebuggerError::ContinueFailed {
                pid,
                tid,
                details: last_error(),
            });
        }
        Ok(())
    }

    fn get_context(&self, thread: &OsHandle, tid: ThreadId) -> Result<WindowsContext>
    {
        let mut context = WindowsContext::full();
        // SAFETY: the boxed CONTEXT is properly aligned and outlives the call.
        if unsafe { GetThreadContext(raw(thread), &mut *context.0) } == 0 {
            return Err(DebuggerError::ContextFailed {
                operation: "get",
                tid,
                details: last_error(),
            });
        }
        Ok(context)
    }

    fn set_context(&mut self, thread: &OsHandle, tid: ThreadId, context: &WindowsContext) -> Result<()>
    {
        // SAFETY: the CONTEXT came from GetThreadContext and is only read.
        if unsafe { SetThreadContext(raw(thread), context.raw()) } == 0 {
            return Err(DebuggerError::ContextFailed {
                operation: "set",
                tid,
                details: last_error(),
            });
        }
        Ok(())
    }

    fn read_memory(&self, process: &OsHandle, address: Address, buffer: &mut [u8]) -> Result<usize>
    {
        let mut read = 0usize;
        // SAFETY: `buffer` is valid for `buffer.len()` bytes.
        let ok = unsafe {
            ReadProcessMemory(
                raw(process),
                address.value() as usize as *const c_void,
                buffer.as_mut_ptr().cast(),
                buffer.len(),
                &mut read,
            )
        };
        if ok == 0 && read == 0 {
            return Err(DebuggerError::MemoryFailed {
                address,
                details: last_error(),
            });
        }
        Ok(read)
    }

    fn write_memory(&mut self, process: &OsHandle, address: Address, data: &[u8]) -> Result<usize>
    {
        let target = address.value() as usize as *const c_void;
        let mut written = 0usize;
        // SAFETY: `data` is valid for `data.len()` bytes.
        let ok = unsafe { WriteProcessMemory(raw(process), target, data.as_ptr().cast(), data.len(), &mut written) };
        if ok == 0 {
            return Err(DebuggerError::MemoryFailed {
                address,
                details: last_error(),
            });
        }
        // SAFETY: flushing a range we just wrote.
        unsafe { FlushInstructionCache(raw(process), target, written) };
        Ok(written)
    }

    fn suspend_thread(&mut self, thread: &OsHandle) -> Result<()>
    {
        // SAFETY: plain FFI call on a handle owned by the registry.
        if unsafe { SuspendThread(raw(thread)) } == u32::MAX {
            return Err(DebuggerError::SuspendFailed(last_error()));
        }
        Ok(())
    }

    fn resume_thread(&mut self, thread: &OsHandle) -> Result<()>
    {
        // SAFETY: plain FFI call on a handle owned by the registry.
        if unsafe { ResumeThread(raw(thread)) } == u32::MAX {
            return Err(DebuggerError::ResumeFailed(last_error()));
        }
        Ok(())
    }
}
