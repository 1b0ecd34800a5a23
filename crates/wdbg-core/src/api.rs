//! # OS Debug Facility
//!
//! The interface the core consumes from the operating system.
//!
//! This trait defines what a debug backend must provide, regardless of how it
//! gets it: the Win32 debug API (`platform::windows`), a remote stub, or a
//! scripted event source in tests. The event loop, the startup synchronizer
//! and the front doors are written against this trait only.
//!
//! ## Lifecycle
//!
//! 1. `attach(pid)` or `create_process(..)` on the monitor thread
//! 2. `wait_for_event()` / `continue_event(..)` in lock step
//! 3. `detach(pid)` if the session ends before the debuggee does
//!
//! ## Thread Affinity
//!
//! On Windows only the thread that attached (or created the process) may wait
//! for its debug events. The front doors therefore move the backend onto the
//! monitor thread before calling `attach`/`create_process`, which is why
//! implementations must be `Send`.

use crate::error::Result;
use crate::events::RawDebugEvent;
use crate::types::{Address, Architecture, OsHandle, ProcessId, ThreadId};

/// Register snapshot of one thread
///
/// Backends keep their native layout; the core only needs the instruction
/// pointer (trap rewinds) and the single-step flag (stepping). Everything else
/// is written back untouched.
pub trait ExecutionContext: Clone + Send + 'static
{
    /// Current instruction pointer.
    fn instruction_pointer(&self) -> Address;

    /// Move the instruction pointer.
    fn set_instruction_pointer(&mut self, address: Address);

    /// Current stack pointer, for display.
    fn stack_pointer(&self) -> Address;

    /// Whether the single-step (trace) flag is set.
    fn single_step(&self) -> bool;

    /// Set or clear the single-step (trace) flag.
    fn set_single_step(&mut self, enabled: bool);
}

/// Status handed back to the OS with `continue_event`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContinueStatus
{
    /// `DBG_CONTINUE`
    Handled,
    /// `DBG_EXCEPTION_NOT_HANDLED`
    NotHandled,
}

impl ContinueStatus
{
    /// Numeric OS value.
    #[must_use]
    pub const fn code(self) -> u32
    {
        match self {
            ContinueStatus::Handled => crate::constants::DBG_CONTINUE,
            ContinueStatus::NotHandled => crate::constants::DBG_EXCEPTION_NOT_HANDLED,
        }
    }
}

/// Parameters of the launch front door
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOptions
{
    /// Full command line, program first
    pub command_line: String,
    /// `SW_*` show-window value for the new process's first window
    pub show: u16,
}

impl LaunchOptions
{
    /// Launch with the default show state (`SW_SHOWNORMAL`).
    pub fn new(command_line: impl Into<String>) -> Self
    {
        Self {
            command_line: command_line.into(),
            show: 1,
        }
    }
}

/// Operations the core consumes from the OS debug facility
pub trait DebugApi: Send + 'static
{
    /// Backend register snapshot.
    type Context: ExecutionContext;

    /// Architecture of the debuggee.
    fn architecture(&self) -> Architecture;

    /// Start debugging a running process.
    ///
    /// ## Errors
    ///
    /// `AttachFailed` when the OS refuses (process gone, access denied).
    fn attach(&mut self, pid: ProcessId) -> Result<()>;

    /// Create a new process under debug control.
    ///
    /// The process does not run until its first debug event is continued.
    ///
    /// ## Errors
    ///
    /// `LaunchFailed` carrying the OS status.
    fn create_process(&mut self, options: &LaunchOptions) -> Result<ProcessId>;

    /// Stop debugging a process without terminating it.
    ///
    /// ## Errors
    ///
    /// `DetachFailed` when the OS refuses.
    fn detach(&mut self, pid: ProcessId) -> Result<()>;

    /// Block until the next debug event.
    ///
    /// Returns `None` once the OS reports that no debuggee is left to produce
    /// events; the event loop ends there.
    fn wait_for_event(&mut self) -> Option<RawDebugEvent>;

    /// Resume the debuggee after the event identified by (`pid`, `tid`).
    ///
    /// ## Errors
    ///
    /// `ContinueFailed` when the OS rejects the pair.
    fn continue_event(&mut self, pid: ProcessId, tid: ThreadId, status: ContinueStatus) -> Result<()>;

    /// Read the register snapshot of a thread.
    ///
    /// ## Errors
    ///
    /// `ContextFailed` when the thread is gone or the handle lacks rights.
    fn get_context(&self, thread: &OsHandle, tid: ThreadId) -> Result<Self::Context>;

    /// Write a register snapshot back to a thread.
    ///
    /// ## Errors
    ///
    /// `ContextFailed` when the thread is gone or the handle lacks rights.
    fn set_context(&mut self, thread: &OsHandle, tid: ThreadId, context: &Self::Context) -> Result<()>;

    /// Read debuggee memory into `buffer`, returning the number of bytes read.
    ///
    /// ## Errors
    ///
    /// `MemoryFailed` when nothing could be read.
    fn read_memory(&self, process: &OsHandle, address: Address, buffer: &mut [u8]) -> Result<usize>;

    /// Write debuggee memory, returning the number of bytes written.
    ///
    /// ## Errors
    ///
    /// `MemoryFailed` when the range is not writable.
    fn write_memory(&mut self, process: &OsHandle, address: Address, data: &[u8]) -> Result<usize>;

    /// Suspend a thread.
    ///
    /// ## Errors
    ///
    /// `SuspendFailed`.
    fn suspend_thread(&mut self, thread: &OsHandle) -> Result<()>;

    /// Resume a thread previously suspended with `suspend_thread`.
    ///
    /// ## Errors
    ///
    /// `ResumeFailed`.
    fn resume_thread(&mut self, thread: &OsHandle) -> Result<()>;
}
