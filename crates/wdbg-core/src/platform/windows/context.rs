//! Thread context snapshot.
//!
//! `CONTEXT` is large and (on x86-64) needs 16-byte alignment; it is kept
//! boxed so the event loop can move it around cheaply.

use windows_sys::Win32::System::Diagnostics::Debug::CONTEXT;

use crate::api::ExecutionContext;
use crate::types::Address;

/// `CONTEXT_FULL` for the running architecture
#[cfg(target_arch = "x86_64")]
pub(crate) const CONTEXT_FULL: u32 = 0x0010_000B;
#[cfg(target_arch = "aarch64")]
pub(crate) const CONTEXT_FULL: u32 = 0x0040_0007;
#[cfg(target_arch = "x86")]
pub(crate) const CONTEXT_FULL: u32 = 0x0001_0007;

/// Trap flag (`EFLAGS.TF`)
#[cfg(any(target_arch = "x86_64", target_arch = "x86"))]
const TRACE_FLAG: u32 = 0x100;
/// Software step bit (`CPSR.SS`)
#[cfg(target_arch = "aarch64")]
const TRACE_FLAG: u32 = 0x0020_0000;

/// Register snapshot of one Windows thread
#[derive(Clone)]
pub struct WindowsContext(pub(crate) Box<CONTEXT>);

impl WindowsContext
{
    /// A zeroed context asking for the full register set.
    pub(crate) fn full() -> Self
    {
        // SAFETY: CONTEXT is plain old data; all-zero is a valid value.
        let mut context: Box<CONTEXT> = Box::new(unsafe { std::mem::zeroed() });
        context.ContextFlags = CONTEXT_FULL;
        Self(context)
    }

    /// Native record.
    pub fn raw(&self) -> &CONTEXT
    {
        &self.0
    }
}

impl std::fmt::Debug for WindowsContext
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        f.debug_struct("WindowsContext")
            .field("ip", &self.instruction_pointer())
            .field("sp", &self.stack_pointer())
            .field("single_step", &self.single_step())
            .finish()
    }
}

#[cfg(target_arch = "x86_64")]
impl ExecutionContext for WindowsContext
{
    fn instruction_pointer(&self) -> Address
    {
        Address::from(self.0.Rip)
    }

    fn set_instruction_pointer(&mut self, address: Address)
    {
        self.0.Rip = address.value();
    }

    fn stack_pointer(&self) -> Address
    {
        Address::from(self.0.Rsp)
    }

    fn single_step(&self) -> bool
    {
        self.0.EFlags & TRACE_FLAG != 0
    }

    fn set_single_step(&mut self, enabled: bool)
    {
        if enabled {
            self.0.EFlags |= TRACE_FLAG;
        } else {
            self.0.EFlags &= !TRACE_FLAG;
        }
    }
}

#[cfg(target_arch = "x86")]
impl ExecutionContext for WindowsContext
{
    fn instruction_pointer(&self) -> Address
    {
        Address::from(u64::from(self.0.Eip))
    }

    fn set_instruction_pointer(&mut self, address: Address)
    {
        self.0.Eip = address.value() as u32;
    }

    fn stack_pointer(&self) -> Address
    {
        Address::from(u64::from(self.0.Esp))
    }

    fn single_step(&self) -> bool
    {
        self.0.EFlags & TRACE_FLAG != 0
    }

    fn set_single_step(&mut self, enabled: bool)
    {
        if enabled {
            self.0.EFlags |= TRACE_FLAG;
        } else {
            self.0.EFlags &= !TRACE_FLAG;
        }
    }
}

#[cfg(target_arch = "aarch64")]
impl ExecutionContext for WindowsContext
{
    fn instruction_pointer(&self) -> Address
    {
        Address::from(self.0.Pc)
    }

    fn set_instruction_pointer(&mut self, address: Address)
    {
        self.0.Pc = address.value();
    }

    fn stack_pointer(&self) -> Address
    {
        Address::from(self.0.Sp)
    }

    fn single_step(&self) -> bool
    {
        self.0.Cpsr & TRACE_FLAG != 0
    }

    fn set_single_step(&mut self, enabled: bool)
    {
        if enabled {
            self.0.Cpsr |= TRACE_FLAG;
        } else {
            self.0.Cpsr &= !TRACE_FLAG;
        }
    }
}
