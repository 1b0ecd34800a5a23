//! # Debug API Constants
//!
//! Centralized numeric values from the Windows debug API.
//!
//! Backends translate their native records into the core's types using these
//! values, and the classifier matches on them. They are plain numbers so the
//! core compiles (and is testable) on every host, not only on Windows.
//!
//! ## Organization
//!
//! - Debug event codes
//! - Exception codes
//! - Continue (resume) codes
//! - Access-violation parameters
//! - Thread naming
//! - String limits

// ============================================================================
// Debug Event Codes
// ============================================================================

/// `EXCEPTION_DEBUG_EVENT`
pub const EXCEPTION_DEBUG_EVENT: u32 = 1;
/// `CREATE_THREAD_DEBUG_EVENT`
pub const CREATE_THREAD_DEBUG_EVENT: u32 = 2;
/// `CREATE_PROCESS_DEBUG_EVENT`
pub const CREATE_PROCESS_DEBUG_EVENT: u32 = 3;
/// `EXIT_THREAD_DEBUG_EVENT`
pub const EXIT_THREAD_DEBUG_EVENT: u32 = 4;
/// `EXIT_PROCESS_DEBUG_EVENT`
pub const EXIT_PROCESS_DEBUG_EVENT: u32 = 5;
/// `LOAD_DLL_DEBUG_EVENT`
pub const LOAD_DLL_DEBUG_EVENT: u32 = 6;
/// `UNLOAD_DLL_DEBUG_EVENT`
pub const UNLOAD_DLL_DEBUG_EVENT: u32 = 7;
/// `OUTPUT_DEBUG_STRING_EVENT`
pub const OUTPUT_DEBUG_STRING_EVENT: u32 = 8;
/// `RIP_EVENT`
pub const RIP_EVENT: u32 = 9;

// ============================================================================
// Exception Codes
// ============================================================================

/// Guard page touched
pub const EXCEPTION_GUARD_PAGE: u32 = 0x8000_0001;
/// Misaligned data access
pub const EXCEPTION_DATATYPE_MISALIGNMENT: u32 = 0x8000_0002;
/// Trap instruction executed
pub const EXCEPTION_BREAKPOINT: u32 = 0x8000_0003;
/// Single-step trap
pub const EXCEPTION_SINGLE_STEP: u32 = 0x8000_0004;
/// Invalid memory access
pub const EXCEPTION_ACCESS_VIOLATION: u32 = 0xC000_0005;
/// Undefined opcode
pub const EXCEPTION_ILLEGAL_INSTRUCTION: u32 = 0xC000_001D;
/// Bounds check failed
pub const EXCEPTION_ARRAY_BOUNDS_EXCEEDED: u32 = 0xC000_008C;
/// Floating point: denormal operand
pub const EXCEPTION_FLT_DENORMAL_OPERAND: u32 = 0xC000_008D;
/// Floating point: divide by zero
pub const EXCEPTION_FLT_DIVIDE_BY_ZERO: u32 = 0xC000_008E;
/// Floating point: inexact result
pub const EXCEPTION_FLT_INEXACT_RESULT: u32 = 0xC000_008F;
/// Floating point: invalid operation
pub const EXCEPTION_FLT_INVALID_OPERATION: u32 = 0xC000_0090;
/// Floating point: overflow
pub const EXCEPTION_FLT_OVERFLOW: u32 = 0xC000_0091;
/// Floating point: stack check
pub const EXCEPTION_FLT_STACK_CHECK: u32 = 0xC000_0092;
/// Floating point: underflow
pub const EXCEPTION_FLT_UNDERFLOW: u32 = 0xC000_0093;
/// Integer divide by zero
pub const EXCEPTION_INT_DIVIDE_BY_ZERO: u32 = 0xC000_0094;
/// Integer overflow
pub const EXCEPTION_INT_OVERFLOW: u32 = 0xC000_0095;
/// Privileged instruction in user mode
pub const EXCEPTION_PRIV_INSTRUCTION: u32 = 0xC000_0096;
/// Stack exhausted
pub const EXCEPTION_STACK_OVERFLOW: u32 = 0xC000_00FD;
/// Ctrl-C delivered to a console process
pub const DBG_CONTROL_C: u32 = 0x4001_0005;
/// Process terminated by Ctrl-C
pub const CONTROL_C_EXIT: u32 = 0xC000_013A;
/// Critical section wait timed out (`STATUS_POSSIBLE_DEADLOCK`)
pub const STATUS_POSSIBLE_DEADLOCK: u32 = 0xC000_0194;
/// MSVC thread naming convention (`RaiseException(0x406D1388, ...)`)
pub const EXCEPTION_NAME_THREAD: u32 = 0x406D_1388;

// ============================================================================
// Continue Codes
// ============================================================================

/// `DBG_CONTINUE`: the debugger handled the event
pub const DBG_CONTINUE: u32 = 0x0001_0002;
/// `DBG_EXCEPTION_NOT_HANDLED`: let the debuggee's own handlers run
pub const DBG_EXCEPTION_NOT_HANDLED: u32 = 0x8001_0001;

// ============================================================================
// Access Violation Parameters
// ============================================================================

/// `ExceptionInformation[0]` value for a read fault
pub const ACCESS_VIOLATION_READ: u64 = 0;
/// `ExceptionInformation[0]` value for a write fault
pub const ACCESS_VIOLATION_WRITE: u64 = 1;
/// `ExceptionInformation[0]` value for a DEP (execute) fault
pub const ACCESS_VIOLATION_EXECUTE: u64 = 8;

// ============================================================================
// Thread Naming
// ============================================================================

/// `THREADNAME_INFO::dwType`
pub const THREAD_NAME_INFO_TYPE: u64 = 0x1000;
/// `THREADNAME_INFO::dwThreadID` meaning "the calling thread"
pub const THREAD_NAME_CURRENT: u64 = 0xFFFF_FFFF;

// ============================================================================
// String Limits
// ============================================================================

/// Longest image name read from debuggee memory (`MAX_PATH`)
pub const MAX_PATH: usize = 260;

/// Longest debug string read from debuggee memory
pub const MAX_DEBUG_STRING: usize = 4096;

// ============================================================================
// Launch Status
// ============================================================================

/// Status returned when the launch front door fails before the OS produced
/// its own code (the monitor thread could not start or died early).
pub const STATUS_LAUNCH_ABANDONED: u32 = 0xC000_0001;
