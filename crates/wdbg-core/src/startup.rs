//! Startup synchronization of new threads.
//!
//! A thread created under the debugger must not run code the debugger never
//! got a chance to see. Two ways to get there:
//!
//! - **Start breakpoint**: the start routine is known, so a temporary trap is
//!   written there before the creating event is continued.
//! - **First exception**: the start routine is unknown (attach, or an initial
//!   thread set up by the loader), so the thread is flagged and its first
//!   exception, whatever it is, is taken as the sync signal.
//!
//! Several threads may share a start routine. One trap serves all of them;
//! it is removed once the last waiting thread has reached it (or exited).

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::api::DebugApi;
use crate::breakpoints::{BreakpointId, BreakpointStore};
use crate::error::Result;
use crate::registry::Registry;
use crate::types::{Address, OsHandle, ProcessId, ThreadId};

/// How a new thread was synchronized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPath
{
    /// A trap is armed at the thread's start routine
    Breakpoint(BreakpointId),
    /// The thread's first exception is the sync signal
    FirstException,
}

#[derive(Debug)]
struct StartTrap
{
    pid: ProcessId,
    address: Address,
    waiting: Vec<ThreadId>,
}

/// Start traps of one session and the threads waiting on them
#[derive(Debug, Default)]
pub struct StartupSync
{
    traps: HashMap<BreakpointId, StartTrap>,
}

impl StartupSync
{
    /// No traps armed.
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Synchronize a freshly registered thread.
    ///
    /// `start` is the start routine to trap, or `None` when it is unknown or
    /// must not be trusted. A trap that cannot be armed falls back to the
    /// first-exception path. Returns `None` if the thread is not tracked.
    pub fn synchronize<A: DebugApi>(
        &mut self,
        api: &mut A,
        registry: &mut Registry,
        breakpoints: &mut BreakpointStore,
        pid: ProcessId,
        tid: ThreadId,
        start: Option<Address>,
    ) -> Option<SyncPath>
    {
        let process = registry.find_process_mut(pid)?;
        process.find_thread(tid)?;

        if let Some(start) = start {
            match self.arm(api, process.handle(), breakpoints, pid, tid, start) {
                Ok(id) => {
                    debug!(pid = %pid, tid = %tid, start = %start, "thread start breakpoint armed");
                    return Some(SyncPath::Breakpoint(id));
                }
                Err(err) => {
                    warn!(
                        pid = %pid,
                        tid = %tid,
                        start = %start,
                        "cannot arm thread start breakpoint, waiting for first exception instead: {err}"
                    );
                }
            }
        }

        let thread = process.find_thread_mut(tid)?;
        thread.await_first_exception();
        debug!(pid = %pid, tid = %tid, "thread waits for its first exception");
        Some(SyncPath::FirstException)
    }

    fn arm<A: DebugApi>(
        &mut self,
        api: &mut A,
        process: &OsHandle,
        breakpoints: &mut BreakpointStore,
        pid: ProcessId,
        tid: ThreadId,
        start: Address,
    ) -> Result<BreakpointId>
    {
        if let Some(id) = breakpoints.id_at(pid, start) {
            // A trap is already there, ours or the user's; either one stops the thread.
            if let Some(trap) = self.traps.get_mut(&id) {
                trap.waiting.push(tid);
            }
            return Ok(id);
        }

        let id = breakpoints.install(api, process, pid, start, true)?;
        self.traps.insert(
            id,
            StartTrap {
                pid,
                address: start,
                waiting: vec![tid],
            },
        );
        Ok(id)
    }

    /// Whether `id` is a start trap.
    pub fn is_start_trap(&self, id: BreakpointId) -> bool
    {
        self.traps.contains_key(&id)
    }

    /// Threads still waiting on start trap `id`.
    pub fn waiting(&self, id: BreakpointId) -> &[ThreadId]
    {
        self.traps.get(&id).map_or(&[], |trap| trap.waiting.as_slice())
    }

    /// Thread `tid` reached start trap `id`.
    ///
    /// Returns `true` when the thread was waiting there, i.e. this is its
    /// sync stop. The trap is removed once nobody waits on it any more.
    pub fn reached<A: DebugApi>(
        &mut self,
        api: &mut A,
        process: &OsHandle,
        breakpoints: &mut BreakpointStore,
        id: BreakpointId,
        tid: ThreadId,
    ) -> bool
    {
        let Some(trap) = self.traps.get_mut(&id) else {
            return false;
        };
        let Some(index) = trap.waiting.iter().position(|&waiting| waiting == tid) else {
            return false;
        };
        trap.waiting.swap_remove(index);
        if trap.waiting.is_empty() {
            self.retire(api, process, breakpoints, id);
        }
        true
    }

    /// Drop `tid` from whatever trap it waits on; remove traps left unused.
    pub fn thread_exited<A: DebugApi>(
        &mut self,
        api: &mut A,
        process: &OsHandle,
        breakpoints: &mut BreakpointStore,
        pid: ProcessId,
        tid: ThreadId,
    )
    {
        let mut unused = Vec::new();
        for (id, trap) in self.traps.iter_mut().filter(|(_, trap)| trap.pid == pid) {
            let before = trap.waiting.len();
            trap.waiting.retain(|&waiting| waiting != tid);
            if before != trap.waiting.len() && trap.waiting.is_empty() {
                unused.push(*id);
            }
        }
        for id in unused {
            self.retire(api, process, breakpoints, id);
        }
    }

    /// Forget every trap of an exited process. Its memory is gone, nothing is
    /// restored.
    pub fn forget_process(&mut self, pid: ProcessId)
    {
        self.traps.retain(|_, trap| trap.pid != pid);
    }

    fn retire<A: DebugApi>(&mut self, api: &mut A, process: &OsHandle, breakpoints: &mut BreakpointStore, id: BreakpointId)
    {
        let Some(trap) = self.traps.remove(&id) else {
            return;
        };
        if let Err(err) = breakpoints.uninstall(api, process, id) {
            warn!(pid = %trap.pid, address = %trap.address, "failed to remove thread start breakpoint: {err}");
        }
    }
}
