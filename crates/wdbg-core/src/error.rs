//! # Error Types
//!
//! Errors raised by OS debug-API calls and the front doors.
//!
//! We use `thiserror` to generate the `Error` implementations. Inside the
//! event loop none of these are fatal: a failed call abandons the one event
//! that triggered it and the loop keeps running. Only the front doors surface
//! errors to their caller.

use thiserror::Error;

use crate::types::{Address, ProcessId, ThreadId};

/// Main error type for debugger operations
///
/// ## Error Categories
///
/// 1. **Lookup errors**: ProcessNotFound, ThreadNotFound
/// 2. **OS call failures**: ContextFailed, MemoryFailed, ContinueFailed,
///    SuspendFailed, ResumeFailed, AttachFailed, DetachFailed
/// 3. **Launch failures**: LaunchFailed (carries the OS status)
/// 4. **Request errors**: InvalidArgument
/// 5. **Platform errors**: Unsupported, Io
#[derive(Error, Debug)]
pub enum DebuggerError
{
    /// No tracked process with this id
    ///
    /// Debug events for already-reaped processes do arrive; the event loop
    /// treats this as a transient miss.
    #[error("Process not found: PID {0}")]
    ProcessNotFound(ProcessId),

    /// No tracked thread with this id in the given process
    #[error("Thread not found: TID {tid} in PID {pid}")]
    ThreadNotFound
    {
        /// Owning process
        pid: ProcessId,
        /// Missing thread
        tid: ThreadId,
    },

    /// Reading or writing a thread context failed
    #[error("Failed to {operation} thread context for TID {tid}: {details}")]
    ContextFailed
    {
        /// `get` or `set`
        operation: &'static str,
        /// Thread whose context was requested
        tid: ThreadId,
        /// OS error details
        details: String,
    },

    /// Reading or writing debuggee memory failed
    #[error("Memory access failed at {address}: {details}")]
    MemoryFailed
    {
        /// Address of the access
        address: Address,
        /// OS error details
        details: String,
    },

    /// Handing an event back to the OS failed
    #[error("Failed to continue debug event for PID {pid} TID {tid}: {details}")]
    ContinueFailed
    {
        /// Process of the event
        pid: ProcessId,
        /// Thread of the event
        tid: ThreadId,
        /// OS error details
        details: String,
    },

    /// Failed to suspend a thread
    #[error("Failed to suspend thread: {0}")]
    SuspendFailed(String),

    /// Failed to resume a thread
    #[error("Failed to resume thread: {0}")]
    ResumeFailed(String),

    /// Failed to attach to a running process
    ///
    /// The target may have exited between discovery and attach, or the
    /// caller lacks the rights to debug it.
    #[error("Failed to attach to process {pid}: {details}")]
    AttachFailed
    {
        /// Target process
        pid: ProcessId,
        /// OS error details
        details: String,
    },

    /// Failed to stop debugging a process
    #[error("Failed to detach from process {pid}: {details}")]
    DetachFailed
    {
        /// Target process
        pid: ProcessId,
        /// OS error details
        details: String,
    },

    /// Creating the debuggee failed
    ///
    /// `status` is the OS-style status code handed back to the caller of
    /// the launch front door; it never collides with a session outcome.
    #[error("Failed to launch '{command_line}' (status {status:#010x}): {reason}")]
    LaunchFailed
    {
        /// Command line that was attempted
        command_line: String,
        /// OS-style status code
        status: u32,
        /// Human readable reason
        reason: String,
    },

    /// Invalid request (duplicate breakpoint, unknown id, bad launch options)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The monitor thread died before reporting its outcome
    #[error("Monitor thread failed: {0}")]
    MonitorFailed(String),

    /// The running platform has no debug backend
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// I/O error (spawning the monitor thread, log files, ...)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for `Result<T, DebuggerError>`
pub type Result<T> = std::result::Result<T, DebuggerError>;

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_launch_failed_display_includes_status()
    {
        let error = DebuggerError::LaunchFailed {
            command_line: "notepad.exe".to_string(),
            status: 0xC000_0135,
            reason: "dll not found".to_string(),
        };
        let message = error.to_string();
        assert!(message.contains("notepad.exe"));
        assert!(message.contains("0xc0000135"));
    }

    #[test]
    fn test_thread_not_found_display()
    {
        let error = DebuggerError::ThreadNotFound {
            pid: ProcessId(0x20),
            tid: ThreadId(7),
        };
        assert!(error.to_string().contains("00000007"));
    }
}
