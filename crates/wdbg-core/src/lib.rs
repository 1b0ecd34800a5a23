//! # wdbg-core
//!
//! Process and thread lifecycle tracking and debug-event dispatch for wdbg.
//!
//! This crate provides the core of a debugger sitting on the Windows debug
//! event stream:
//! - A registry of debugged processes, their threads and loaded modules
//! - Decoding of raw debug events against that registry
//! - Exception classification and the first-chance/last-chance policy
//! - Startup synchronization, so a new thread stops before its own code runs
//! - Breakpoints and single stepping through the interactive hooks
//! - The attach and launch front doors, each running on a monitor thread
//!
//! ## Platform Support
//!
//! - **Windows**: Win32 debug API (`platform::windows`)
//! - Everything else is written against [`DebugApi`] and runs on any host;
//!   the test suite drives it with scripted event sources.
//!
//! ## Why unsafe code is needed
//!
//! The Windows backend calls the Win32 debug API directly. Those calls touch
//! other processes' memory and registers and are `unsafe` by nature; they are
//! wrapped in the safe [`DebugApi`] surface and nothing above the platform
//! module uses `unsafe`.

#![allow(unsafe_code)] // Required for the Win32 debug API

pub mod api;
pub mod breakpoints;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod exception;
pub mod monitor;
pub mod platform;
pub mod registry;
pub mod session;
pub mod startup;
pub mod types;

pub use api::{ContinueStatus, DebugApi, ExecutionContext, LaunchOptions};
pub use breakpoints::{BreakpointId, BreakpointInfo, BreakpointStore};
pub use config::SessionConfig;
// Re-export commonly used types
pub use error::{DebuggerError, Result};
pub use exception::{ExceptionRecord, ResumeCode};
pub use monitor::{attach, launch, DetachHandle, LaunchError, Monitor};
#[cfg(windows)]
pub use platform::windows::WindowsApi;
pub use registry::{ExecMode, Registry};
pub use session::{EventLoop, ResumeDecision, SessionEnd, SessionHooks, SessionSummary, StopContext, StopReason};
pub use types::{Address, Architecture, OsHandle, ProcessId, ThreadId};
