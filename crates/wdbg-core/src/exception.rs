//! # Exception Classification
//!
//! Decides what an exception means to the debugger and how it is reported.
//!
//! ## Classes
//!
//! - **Silent**: breakpoint and single-step traps. They are the debugger's own
//!   signals and are never described to the user as faults.
//! - **Reportable**: everything else, recognized or not.
//!
//! ## Pass-through
//!
//! A reportable exception seen on first chance is handed back to the debuggee
//! (its own handlers get the first refusal) unless the session breaks on first
//! chance exceptions or the event is forced. An exception that comes back as
//! unhandled always stops.

use std::fmt;

use smallvec::SmallVec;

use crate::api::ContinueStatus;
use crate::constants::*;
use crate::types::{Address, ThreadId};

/// OS exception record, as delivered with an exception debug event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionRecord
{
    /// NTSTATUS exception code
    pub code: u32,
    /// `EXCEPTION_NONCONTINUABLE` and friends
    pub flags: u32,
    /// Where the exception was raised
    pub address: Address,
    /// `ExceptionInformation[..NumberParameters]`
    pub parameters: SmallVec<[u64; 4]>,
}

impl ExceptionRecord
{
    /// A record without parameters.
    pub fn new(code: u32, address: Address) -> Self
    {
        Self {
            code,
            flags: 0,
            address,
            parameters: SmallVec::new(),
        }
    }

    /// Attach exception parameters.
    #[must_use]
    pub fn with_parameters(mut self, parameters: &[u64]) -> Self
    {
        self.parameters = SmallVec::from_slice(parameters);
        self
    }

    /// Parameter `index`, if the OS supplied it.
    pub fn parameter(&self, index: usize) -> Option<u64>
    {
        self.parameters.get(index).copied()
    }

    /// Classify this record's code.
    pub fn class(&self) -> ExceptionClass
    {
        classify(self.code)
    }
}

/// Whether an exception is the debugger's own signal or a fault to report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionClass
{
    /// Breakpoint or single-step trap
    Silent,
    /// Any other exception
    Reportable,
}

/// Classify an exception code.
pub fn classify(code: u32) -> ExceptionClass
{
    match code {
        EXCEPTION_BREAKPOINT | EXCEPTION_SINGLE_STEP => ExceptionClass::Silent,
        _ => ExceptionClass::Reportable,
    }
}

/// Whether a reportable exception goes straight back to the debuggee.
///
/// `break_on_first_chance` is the session's active-debug mode, `forced` is
/// set when the exception is a thread's deferred startup signal. Either one
/// makes the debugger stop.
pub fn passes_through(class: ExceptionClass, first_chance: bool, break_on_first_chance: bool, forced: bool) -> bool
{
    class == ExceptionClass::Reportable && first_chance && !(break_on_first_chance || forced)
}

/// Human readable description of an exception, without the chance prefix.
pub fn description(record: &ExceptionRecord) -> String
{
    match record.code {
        EXCEPTION_BREAKPOINT => "breakpoint".to_string(),
        EXCEPTION_SINGLE_STEP => "single step".to_string(),
        EXCEPTION_ACCESS_VIOLATION => describe_access_violation(record),
        EXCEPTION_DATATYPE_MISALIGNMENT => "alignment fault".to_string(),
        EXCEPTION_ARRAY_BOUNDS_EXCEEDED => "array bounds".to_string(),
        EXCEPTION_FLT_DENORMAL_OPERAND => "floating point denormal operand".to_string(),
        EXCEPTION_FLT_DIVIDE_BY_ZERO => "floating point divide by zero".to_string(),
        EXCEPTION_FLT_INEXACT_RESULT => "floating point inexact result".to_string(),
        EXCEPTION_FLT_INVALID_OPERATION => "floating point invalid operation".to_string(),
        EXCEPTION_FLT_OVERFLOW => "floating point overflow".to_string(),
        EXCEPTION_FLT_STACK_CHECK => "floating point stack check".to_string(),
        EXCEPTION_FLT_UNDERFLOW => "floating point underflow".to_string(),
        EXCEPTION_INT_DIVIDE_BY_ZERO => "divide by zero".to_string(),
        EXCEPTION_INT_OVERFLOW => "overflow".to_string(),
        EXCEPTION_ILLEGAL_INSTRUCTION => "illegal instruction".to_string(),
        EXCEPTION_STACK_OVERFLOW => "stack overflow".to_string(),
        EXCEPTION_PRIV_INSTRUCTION => "privileged instruction".to_string(),
        EXCEPTION_GUARD_PAGE => "guard page".to_string(),
        DBG_CONTROL_C | CONTROL_C_EXIT => "^C".to_string(),
        STATUS_POSSIBLE_DEADLOCK => match record.parameter(0) {
            Some(section) => format!("wait failed on critical section {}", Address::from(section)),
            None => "wait failed on critical section".to_string(),
        },
        EXCEPTION_NAME_THREAD => "thread naming".to_string(),
        code => format!("exception code {code:#010x}"),
    }
}

fn describe_access_violation(record: &ExceptionRecord) -> String
{
    let (Some(kind), Some(address)) = (record.parameter(0), record.parameter(1)) else {
        return "page fault".to_string();
    };
    let access = match kind {
        ACCESS_VIOLATION_WRITE => "write",
        ACCESS_VIOLATION_EXECUTE => "execute",
        _ => "read",
    };
    format!("page fault on {access} access to {}", Address::from(address))
}

/// Full description as shown when the interactive session is entered.
pub fn describe(record: &ExceptionRecord, first_chance: bool) -> String
{
    let prefix = if first_chance { "First chance exception: " } else { "Unhandled exception: " };
    format!("{prefix}{}", description(record))
}

/// A `SetThreadName`-style request carried by exception `0x406D1388`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadNameRequest
{
    /// Address of the ANSI name in debuggee memory
    pub name: Address,
    /// Thread to name; `None` means the raising thread
    pub target: Option<ThreadId>,
}

impl ThreadNameRequest
{
    /// Parse a thread naming record. Returns `None` for any other record,
    /// including naming records with an unknown info type.
    pub fn parse(record: &ExceptionRecord) -> Option<Self>
    {
        if record.code != EXCEPTION_NAME_THREAD || record.parameter(0)? != THREAD_NAME_INFO_TYPE {
            return None;
        }
        let name = Address::from(record.parameter(1)?);
        let target = match record.parameter(2)? {
            THREAD_NAME_CURRENT => None,
            tid => Some(ThreadId(u32::try_from(tid).ok()?)),
        };
        Some(Self { name, target })
    }
}

/// How the debuggee is resumed after an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResumeCode
{
    /// `DBG_CONTINUE`
    #[default]
    Continue,
    /// `DBG_EXCEPTION_NOT_HANDLED`
    NotHandled,
    /// Continue the event, then detach from every debuggee. Ends the session.
    Detach,
}

impl ResumeCode
{
    /// Status handed to the OS when continuing the current event.
    pub const fn status(self) -> ContinueStatus
    {
        match self {
            ResumeCode::Continue | ResumeCode::Detach => ContinueStatus::Handled,
            ResumeCode::NotHandled => ContinueStatus::NotHandled,
        }
    }

    /// Whether this code ends the session.
    pub const fn is_terminal(self) -> bool
    {
        matches!(self, ResumeCode::Detach)
    }
}

impl fmt::Display for ResumeCode
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            ResumeCode::Continue => write!(f, "continue"),
            ResumeCode::NotHandled => write!(f, "not handled"),
            ResumeCode::Detach => write!(f, "detach"),
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    const REPORTABLE: &[u32] = &[
        EXCEPTION_ACCESS_VIOLATION,
        EXCEPTION_DATATYPE_MISALIGNMENT,
        EXCEPTION_ARRAY_BOUNDS_EXCEEDED,
        EXCEPTION_FLT_DIVIDE_BY_ZERO,
        EXCEPTION_INT_DIVIDE_BY_ZERO,
        EXCEPTION_INT_OVERFLOW,
        EXCEPTION_ILLEGAL_INSTRUCTION,
        EXCEPTION_STACK_OVERFLOW,
        EXCEPTION_PRIV_INSTRUCTION,
        DBG_CONTROL_C,
        STATUS_POSSIBLE_DEADLOCK,
        EXCEPTION_NAME_THREAD,
        0xE06D_7363,
        0,
    ];

    #[test]
    fn test_traps_are_silent()
    {
        assert_eq!(classify(EXCEPTION_BREAKPOINT), ExceptionClass::Silent);
        assert_eq!(classify(EXCEPTION_SINGLE_STEP), ExceptionClass::Silent);
    }

    #[test]
    fn test_everything_else_is_reportable()
    {
        for &code in REPORTABLE {
            assert_eq!(classify(code), ExceptionClass::Reportable, "code {code:#x}");
        }
    }

    #[test]
    fn test_pass_through_matrix()
    {
        let reportable = ExceptionClass::Reportable;
        assert!(passes_through(reportable, true, false, false));
        assert!(!passes_through(reportable, true, true, false));
        assert!(!passes_through(reportable, true, false, true));
        assert!(!passes_through(reportable, true, true, true));
        assert!(!passes_through(reportable, false, false, false));
        assert!(!passes_through(ExceptionClass::Silent, true, false, false));
    }

    #[test]
    fn test_access_violation_description()
    {
        let record = ExceptionRecord::new(EXCEPTION_ACCESS_VIOLATION, Address::from(0x40_1000))
            .with_parameters(&[ACCESS_VIOLATION_WRITE, 0]);
        assert_eq!(describe(&record, true), "First chance exception: page fault on write access to 0x0");

        let read = ExceptionRecord::new(EXCEPTION_ACCESS_VIOLATION, Address::ZERO)
            .with_parameters(&[ACCESS_VIOLATION_READ, 0xdead_beef]);
        assert_eq!(describe(&read, false), "Unhandled exception: page fault on read access to 0xdeadbeef");

        let bare = ExceptionRecord::new(EXCEPTION_ACCESS_VIOLATION, Address::ZERO);
        assert_eq!(description(&bare), "page fault");
    }

    #[test]
    fn test_unknown_code_description()
    {
        let record = ExceptionRecord::new(0xE06D_7363, Address::ZERO);
        assert_eq!(description(&record), "exception code 0xe06d7363");
    }

    #[test]
    fn test_critical_section_description()
    {
        let record = ExceptionRecord::new(STATUS_POSSIBLE_DEADLOCK, Address::ZERO).with_parameters(&[0x7ff0_1000]);
        assert_eq!(description(&record), "wait failed on critical section 0x7ff01000");
    }

    #[test]
    fn test_thread_name_request()
    {
        let record = ExceptionRecord::new(EXCEPTION_NAME_THREAD, Address::ZERO).with_parameters(&[
            THREAD_NAME_INFO_TYPE,
            0x5000,
            THREAD_NAME_CURRENT,
        ]);
        let request = ThreadNameRequest::parse(&record).expect("naming request");
        assert_eq!(request.name, Address::from(0x5000));
        assert_eq!(request.target, None);

        let other = ExceptionRecord::new(EXCEPTION_NAME_THREAD, Address::ZERO).with_parameters(&[
            THREAD_NAME_INFO_TYPE,
            0x5000,
            12,
        ]);
        assert_eq!(ThreadNameRequest::parse(&other).and_then(|r| r.target), Some(ThreadId(12)));

        let wrong_type = ExceptionRecord::new(EXCEPTION_NAME_THREAD, Address::ZERO).with_parameters(&[0x2000, 0, 0]);
        assert!(ThreadNameRequest::parse(&wrong_type).is_none());
    }

    #[test]
    fn test_resume_code_status()
    {
        assert_eq!(ResumeCode::Continue.status().code(), DBG_CONTINUE);
        assert_eq!(ResumeCode::NotHandled.status().code(), DBG_EXCEPTION_NOT_HANDLED);
        assert_eq!(ResumeCode::Detach.status(), ContinueStatus::Handled);
        assert!(ResumeCode::Detach.is_terminal());
        assert!(!ResumeCode::default().is_terminal());
    }
}
