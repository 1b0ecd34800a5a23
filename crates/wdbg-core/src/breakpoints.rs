//! Software breakpoint bookkeeping.
//!
//! The store tracks ids, original instruction bytes, hit counts and the
//! temporary flag of every trap written into a debuggee. Installing and
//! restoring go through [`DebugApi`] memory calls, so the same code serves
//! the startup synchronizer (temporary thread-start traps) and the breakpoint
//! engine that drives user breakpoints from the interactive session.
//!
//! Entries are keyed by (process, address): one session may debug a whole
//! process tree and the same address is unrelated across processes.

use std::collections::HashMap;
use std::time::SystemTime;

use tracing::{debug, trace};

use crate::api::DebugApi;
use crate::error::{DebuggerError, Result};
use crate::types::{Address, OsHandle, ProcessId};

/// Unique identifier for a breakpoint managed by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BreakpointId(u64);

impl BreakpointId
{
    /// Create a new identifier from a raw value.
    #[must_use]
    pub const fn from_raw(value: u64) -> Self
    {
        Self(value)
    }

    /// Get the raw numeric representation (useful for logging / errors).
    #[must_use]
    pub const fn raw(self) -> u64
    {
        self.0
    }
}

/// Lifecycle states for a breakpoint entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakpointState
{
    /// Trap written; will trigger when executed.
    Armed,
    /// Original bytes restored; entry kept.
    Disabled,
}

/// Public information about a breakpoint.
#[derive(Debug, Clone)]
pub struct BreakpointInfo
{
    /// Unique identifier for this breakpoint.
    pub id: BreakpointId,
    /// Process the trap lives in.
    pub pid: ProcessId,
    /// Address of the trap instruction.
    pub address: Address,
    /// Current lifecycle state.
    pub state: BreakpointState,
    /// Removed automatically after its first hit.
    pub temporary: bool,
    /// Number of times this breakpoint has been hit.
    pub hit_count: u64,
    /// When the trap was first written.
    pub armed_at: SystemTime,
}

#[derive(Debug, Clone)]
struct BreakpointEntry
{
    info: BreakpointInfo,
    original_bytes: Vec<u8>,
}

/// Breakpoint table of one session.
#[derive(Debug, Default)]
pub struct BreakpointStore
{
    next_id: u64,
    by_id: HashMap<BreakpointId, BreakpointEntry>,
    by_address: HashMap<(ProcessId, Address), BreakpointId>,
}

impl BreakpointStore
{
    /// Create a new empty breakpoint store.
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    fn allocate_id(&mut self) -> BreakpointId
    {
        self.next_id = self.next_id.wrapping_add(1);
        BreakpointId::from_raw(self.next_id)
    }

    /// Write a trap instruction at `address` and start tracking it.
    ///
    /// The original bytes are read first; a short read or write leaves the
    /// debuggee untouched and returns an error.
    ///
    /// ## Errors
    ///
    /// - `InvalidArgument`: a breakpoint already exists at this address
    /// - `MemoryFailed`: the address cannot be read or written
    pub fn install<A: DebugApi>(
        &mut self,
        api: &mut A,
        process: &OsHandle,
        pid: ProcessId,
        address: Address,
        temporary: bool,
    ) -> Result<BreakpointId>
    {
        if self.by_address.contains_key(&(pid, address)) {
            return Err(DebuggerError::InvalidArgument(format!(
                "Breakpoint already exists at {address} in process {pid}"
            )));
        }

        let trap = api.architecture().trap_instruction();
        let mut original = vec![0u8; trap.len()];
        let read = api.read_memory(process, address, &mut original)?;
        if read != trap.len() {
            return Err(DebuggerError::MemoryFailed {
                address,
                details: format!("read {read} of {} bytes while installing breakpoint", trap.len()),
            });
        }

        let written = api.write_memory(process, address, trap)?;
        if written != trap.len() {
            return Err(DebuggerError::MemoryFailed {
                address,
                details: format!("wrote {written} of {} trap bytes", trap.len()),
            });
        }

        let id = self.allocate_id();
        let info = BreakpointInfo {
            id,
            pid,
            address,
            state: BreakpointState::Armed,
            temporary,
            hit_count: 0,
            armed_at: SystemTime::now(),
        };
        self.by_address.insert((pid, address), id);
        self.by_id.insert(
            id,
            BreakpointEntry {
                info,
                original_bytes: original,
            },
        );
        debug!(pid = %pid, address = %address, id = id.raw(), temporary, "breakpoint armed");
        Ok(id)
    }

    /// Restore the original bytes and stop tracking the breakpoint.
    ///
    /// ## Errors
    ///
    /// - `InvalidArgument`: unknown id
    /// - `MemoryFailed`: the original bytes could not be written back; the
    ///   entry is kept so the caller can retry
    pub fn uninstall<A: DebugApi>(&mut self, api: &mut A, process: &OsHandle, id: BreakpointId) -> Result<BreakpointInfo>
    {
        let entry = self
            .by_id
            .get(&id)
            .ok_or_else(|| DebuggerError::InvalidArgument(format!("Unknown breakpoint id {}", id.raw())))?;
        if entry.info.state == BreakpointState::Armed {
            restore(api, process, entry)?;
        }
        let entry = self
            .remove(id)
            .ok_or_else(|| DebuggerError::InvalidArgument(format!("Unknown breakpoint id {}", id.raw())))?;
        debug!(pid = %entry.info.pid, address = %entry.info.address, id = id.raw(), "breakpoint removed");
        Ok(entry.info)
    }

    /// Restore the original bytes but keep the entry.
    ///
    /// ## Errors
    ///
    /// - `InvalidArgument`: unknown id
    /// - `MemoryFailed`: the original bytes could not be written back
    pub fn disable<A: DebugApi>(&mut self, api: &mut A, process: &OsHandle, id: BreakpointId) -> Result<()>
    {
        let entry = self
            .by_id
            .get_mut(&id)
            .ok_or_else(|| DebuggerError::InvalidArgument(format!("Unknown breakpoint id {}", id.raw())))?;
        if entry.info.state == BreakpointState::Armed {
            restore(api, process, entry)?;
            entry.info.state = BreakpointState::Disabled;
            trace!(id = id.raw(), "breakpoint disabled");
        }
        Ok(())
    }

    /// Write the trap back for a disabled breakpoint.
    ///
    /// ## Errors
    ///
    /// - `InvalidArgument`: unknown id
    /// - `MemoryFailed`: the trap could not be written
    pub fn enable<A: DebugApi>(&mut self, api: &mut A, process: &OsHandle, id: BreakpointId) -> Result<()>
    {
        let entry = self
            .by_id
            .get_mut(&id)
            .ok_or_else(|| DebuggerError::InvalidArgument(format!("Unknown breakpoint id {}", id.raw())))?;
        if entry.info.state == BreakpointState::Disabled {
            let trap = api.architecture().trap_instruction();
            let written = api.write_memory(process, entry.info.address, trap)?;
            if written != trap.len() {
                return Err(DebuggerError::MemoryFailed {
                    address: entry.info.address,
                    details: format!("wrote {written} of {} trap bytes", trap.len()),
                });
            }
            entry.info.state = BreakpointState::Armed;
            trace!(id = id.raw(), "breakpoint enabled");
        }
        Ok(())
    }

    /// Identifier of the breakpoint at `address` in `pid`, if any.
    pub fn id_at(&self, pid: ProcessId, address: Address) -> Option<BreakpointId>
    {
        self.by_address.get(&(pid, address)).copied()
    }

    /// Fetch the public info for a specific breakpoint id.
    pub fn info(&self, id: BreakpointId) -> Option<BreakpointInfo>
    {
        self.by_id.get(&id).map(|entry| entry.info.clone())
    }

    /// All breakpoints ordered by id.
    pub fn list(&self) -> Vec<BreakpointInfo>
    {
        let mut infos: Vec<BreakpointInfo> = self.by_id.values().map(|entry| entry.info.clone()).collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    /// Number of tracked breakpoints.
    pub fn len(&self) -> usize
    {
        self.by_id.len()
    }

    /// Whether no breakpoint is tracked.
    pub fn is_empty(&self) -> bool
    {
        self.by_id.is_empty()
    }

    /// Record that an armed breakpoint at the provided address was hit.
    pub fn record_hit(&mut self, pid: ProcessId, address: Address) -> Option<BreakpointInfo>
    {
        let id = self.id_at(pid, address)?;
        let entry = self.by_id.get_mut(&id)?;
        if entry.info.state != BreakpointState::Armed {
            return None;
        }
        entry.info.hit_count = entry.info.hit_count.saturating_add(1);
        Some(entry.info.clone())
    }

    /// Drop every entry of an exited process without touching its memory.
    pub fn forget_process(&mut self, pid: ProcessId) -> usize
    {
        let ids: Vec<BreakpointId> = self
            .by_id
            .values()
            .filter(|entry| entry.info.pid == pid)
            .map(|entry| entry.info.id)
            .collect();
        for id in &ids {
            self.remove(*id);
        }
        ids.len()
    }

    fn remove(&mut self, id: BreakpointId) -> Option<BreakpointEntry>
    {
        let entry = self.by_id.remove(&id)?;
        self.by_address.remove(&(entry.info.pid, entry.info.address));
        Some(entry)
    }
}

fn restore<A: DebugApi>(api: &mut A, process: &OsHandle, entry: &BreakpointEntry) -> Result<()>
{
    let written = api.write_memory(process, entry.info.address, &entry.original_bytes)?;
    if written != entry.original_bytes.len() {
        return Err(DebuggerError::MemoryFailed {
            address: entry.info.address,
            details: format!("restored {written} of {} original bytes", entry.original_bytes.len()),
        });
    }
    Ok(())
}
