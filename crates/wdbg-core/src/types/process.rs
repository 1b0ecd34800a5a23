//! Process, thread and handle identifiers.

use std::fmt;

/// Process identifier (PID)
///
/// Debug events name their process by OS id; the registry is keyed by it.
/// The newtype keeps PIDs from being confused with thread ids, which share
/// the same numeric space on Windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(pub u32);

impl From<u32> for ProcessId
{
    fn from(pid: u32) -> Self
    {
        ProcessId(pid)
    }
}

impl From<ProcessId> for u32
{
    fn from(pid: ProcessId) -> Self
    {
        pid.0
    }
}

impl fmt::Display for ProcessId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{:08x}", self.0)
    }
}

/// Thread identifier, unique within its process
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub u32);

impl ThreadId
{
    /// Raw OS value.
    pub fn raw(&self) -> u32
    {
        self.0
    }
}

impl From<u32> for ThreadId
{
    fn from(value: u32) -> Self
    {
        Self(value)
    }
}

impl fmt::Display for ThreadId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{:08x}", self.0)
    }
}

/// OS handle to a process or thread
///
/// Handles arrive inside debug events and are owned by exactly one registry
/// entry. The type is deliberately neither `Copy` nor `Clone`: other
/// components borrow it for the duration of one OS call. Closing the
/// underlying handle is governed by the debug-API contract, so dropping an
/// `OsHandle` does nothing.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct OsHandle(usize);

impl OsHandle
{
    /// A handle that does not refer to anything yet (explicit attach before
    /// the CREATE_PROCESS event delivered the real one).
    pub const NULL: Self = OsHandle(0);

    /// Wrap a raw OS handle value.
    pub const fn from_raw(raw: usize) -> Self
    {
        OsHandle(raw)
    }

    /// Raw value for OS calls.
    pub const fn raw(&self) -> usize
    {
        self.0
    }

    /// Whether this is the null handle.
    pub const fn is_null(&self) -> bool
    {
        self.0 == 0
    }
}

/// CPU architecture of the debuggee
///
/// Determines the trap instruction the startup synchronizer writes, how far
/// the instruction pointer is rewound after a trap, and how wide the pointer
/// slots are when reading indirect image names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Architecture
{
    /// 32-bit x86
    X86,
    /// 64-bit x86 (Intel/AMD)
    X86_64,
    /// 64-bit ARM
    Arm64,
    /// Anything else; carries the architecture name for diagnostics.
    Unknown(&'static str),
}

impl Architecture
{
    /// Architecture of the running debugger binary, used as the default for
    /// backends that debug native processes only.
    pub const fn current() -> Self
    {
        #[cfg(target_arch = "aarch64")]
        {
            Architecture::Arm64
        }

        #[cfg(target_arch = "x86_64")]
        {
            Architecture::X86_64
        }

        #[cfg(target_arch = "x86")]
        {
            Architecture::X86
        }

        #[cfg(not(any(target_arch = "aarch64", target_arch = "x86_64", target_arch = "x86")))]
        {
            Architecture::Unknown(std::env::consts::ARCH)
        }
    }

    /// Size of a pointer in bytes.
    #[must_use]
    pub const fn pointer_width(self) -> usize
    {
        match self {
            Architecture::X86 => 4,
            Architecture::X86_64 | Architecture::Arm64 | Architecture::Unknown(_) => 8,
        }
    }

    /// Bytes of the breakpoint (trap) instruction.
    ///
    /// - x86 / x86-64: `int3` (`0xCC`)
    /// - ARM64: `brk #0xf000`, the encoding Windows uses for `__debugbreak`
    #[must_use]
    pub const fn trap_instruction(self) -> &'static [u8]
    {
        match self {
            Architecture::X86 | Architecture::X86_64 | Architecture::Unknown(_) => &[0xCC],
            Architecture::Arm64 => &[0x00, 0x00, 0x3E, 0xD4],
        }
    }

    /// Trap-instruction width: how far the instruction pointer is rewound
    /// after a synchronization breakpoint fires.
    #[must_use]
    pub const fn trap_width(self) -> u64
    {
        self.trap_instruction().len() as u64
    }
}

impl fmt::Display for Architecture
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Architecture::X86 => write!(f, "x86"),
            Architecture::X86_64 => write!(f, "x86_64"),
            Architecture::Arm64 => write!(f, "arm64"),
            Architecture::Unknown(name) => write!(f, "{name}"),
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_trap_width_matches_instruction()
    {
        assert_eq!(Architecture::X86.trap_width(), 1);
        assert_eq!(Architecture::X86_64.trap_width(), 1);
        assert_eq!(Architecture::Arm64.trap_width(), 4);
    }

    #[test]
    fn test_pointer_width()
    {
        assert_eq!(Architecture::X86.pointer_width(), 4);
        assert_eq!(Architecture::X86_64.pointer_width(), 8);
    }

    #[test]
    fn test_ids_display_as_fixed_width_hex()
    {
        assert_eq!(ProcessId(0x1092).to_string(), "00001092");
        assert_eq!(ThreadId(7).to_string(), "00000007");
    }

    #[test]
    fn test_null_handle()
    {
        assert!(OsHandle::NULL.is_null());
        assert!(!OsHandle::from_raw(0x44).is_null());
    }
}
