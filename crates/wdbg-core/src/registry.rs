//! Process and thread bookkeeping.
//!
//! The [`Registry`] is the single owner of every [`Process`] and [`Thread`]
//! under observation in one session. Other components look entities up by id
//! for the duration of one event and never keep references across events.
//!
//! Lookups that find nothing are not errors: the OS keeps delivering events
//! for entities that were already reaped, and callers simply drop them.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::types::{Address, OsHandle, ProcessId, ThreadId};

/// How a thread should run once its current event is continued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ExecMode
{
    /// Run freely until the next event.
    #[default]
    Continuous,
    /// Trap after every instruction.
    StepInto,
    /// Trap after every instruction, stepping over calls. Call skipping needs
    /// a disassembler, which lives with the breakpoint engine; the core
    /// single-steps and reports the mode back.
    StepOver,
}

/// Startup synchronization state of a thread.
///
/// Encodes the "consumed exactly once" rule: the only transitions are
/// `NotAwaited -> Awaiting` (flagged at creation) and `Awaiting -> Consumed`
/// (first exception seen).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
enum FirstException
{
    #[default]
    NotAwaited,
    Awaiting,
    Consumed,
}

/// A module (executable or DLL) mapped into a process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module
{
    /// Image name as reported by the loader (may be empty).
    pub name: String,
    /// Load address.
    pub base: Address,
}

/// A thread of a debugged process.
#[derive(Debug)]
pub struct Thread
{
    tid: ThreadId,
    process: ProcessId,
    handle: OsHandle,
    start: Option<Address>,
    tls: Address,
    name: Option<String>,
    first_exception: FirstException,
    exec_mode: ExecMode,
    step_count: u32,
}

impl Thread
{
    fn new(process: ProcessId, tid: ThreadId, handle: OsHandle, start: Option<Address>, tls: Address) -> Self
    {
        Self {
            tid,
            process,
            handle,
            start,
            tls,
            name: None,
            first_exception: FirstException::NotAwaited,
            exec_mode: ExecMode::Continuous,
            step_count: 0,
        }
    }

    /// OS thread id.
    pub fn tid(&self) -> ThreadId
    {
        self.tid
    }

    /// Owning process (non-owning back reference).
    pub fn process(&self) -> ProcessId
    {
        self.process
    }

    /// Handle for context I/O and suspend/resume.
    pub fn handle(&self) -> &OsHandle
    {
        &self.handle
    }

    /// Start routine, when the OS reported one.
    pub fn start(&self) -> Option<Address>
    {
        self.start
    }

    /// Thread-local storage base.
    pub fn tls(&self) -> Address
    {
        self.tls
    }

    /// Name set by the debuggee through the thread-naming exception.
    pub fn name(&self) -> Option<&str>
    {
        self.name.as_deref()
    }

    /// Record a thread name.
    pub fn set_name(&mut self, name: impl Into<String>)
    {
        self.name = Some(name.into());
    }

    /// Whether the next exception on this thread is the startup sync signal.
    pub fn is_waiting_for_first_exception(&self) -> bool
    {
        self.first_exception == FirstException::Awaiting
    }

    /// Flag the thread so its first exception is consumed as the sync signal.
    ///
    /// Returns `false` (and changes nothing) if the flag was already consumed
    /// once; a thread never waits twice.
    pub fn await_first_exception(&mut self) -> bool
    {
        match self.first_exception {
            FirstException::NotAwaited | FirstException::Awaiting => {
                self.first_exception = FirstException::Awaiting;
                true
            }
            FirstException::Consumed => false,
        }
    }

    /// Consume the sync flag. Returns `true` exactly once per flagged thread.
    pub fn take_first_exception(&mut self) -> bool
    {
        if self.first_exception == FirstException::Awaiting {
            self.first_exception = FirstException::Consumed;
            true
        } else {
            false
        }
    }

    /// Current execution mode.
    pub fn exec_mode(&self) -> ExecMode
    {
        self.exec_mode
    }

    /// Remaining repeat count for the current mode.
    pub fn step_count(&self) -> u32
    {
        self.step_count
    }

    /// Set execution mode and repeat counter.
    ///
    /// `Continuous` always clears the counter.
    pub fn set_exec_mode(&mut self, mode: ExecMode, count: u32)
    {
        self.exec_mode = mode;
        self.step_count = if mode == ExecMode::Continuous { 0 } else { count };
    }

    /// Count one completed step. Returns the steps still pending; when it
    /// reaches zero the thread is back in continuous mode.
    pub fn complete_step(&mut self) -> u32
    {
        self.step_count = self.step_count.saturating_sub(1);
        if self.step_count == 0 {
            self.exec_mode = ExecMode::Continuous;
        }
        self.step_count
    }
}

/// A debugged process and its threads.
#[derive(Debug)]
pub struct Process
{
    pid: ProcessId,
    handle: OsHandle,
    image_name: String,
    image_base: Address,
    threads: Vec<Thread>,
    modules: BTreeMap<Address, Module>,
}

impl Process
{
    fn new(pid: ProcessId, handle: OsHandle) -> Self
    {
        Self {
            pid,
            handle,
            image_name: String::new(),
            image_base: Address::ZERO,
            threads: Vec::new(),
            modules: BTreeMap::new(),
        }
    }

    /// OS process id.
    pub fn pid(&self) -> ProcessId
    {
        self.pid
    }

    /// Handle for memory I/O.
    pub fn handle(&self) -> &OsHandle
    {
        &self.handle
    }

    /// Main image name (empty until CREATE_PROCESS delivered it).
    pub fn image_name(&self) -> &str
    {
        &self.image_name
    }

    /// Main image load address.
    pub fn image_base(&self) -> Address
    {
        self.image_base
    }

    /// Record the main image reported by CREATE_PROCESS.
    pub fn set_image(&mut self, name: impl Into<String>, base: Address)
    {
        self.image_name = name.into();
        self.image_base = base;
    }

    /// Look a thread up by id.
    pub fn find_thread(&self, tid: ThreadId) -> Option<&Thread>
    {
        self.threads.iter().find(|thread| thread.tid == tid)
    }

    /// Look a thread up by id, mutably.
    pub fn find_thread_mut(&mut self, tid: ThreadId) -> Option<&mut Thread>
    {
        self.threads.iter_mut().find(|thread| thread.tid == tid)
    }

    /// Append a thread in continuous mode, not awaiting its first exception.
    ///
    /// Returns `None` without touching the existing entry when the id is
    /// already present: replayed creation events are idempotent.
    pub fn add_thread(
        &mut self,
        tid: ThreadId,
        handle: OsHandle,
        start: Option<Address>,
        tls: Address,
    ) -> Option<&mut Thread>
    {
        if self.find_thread(tid).is_some() {
            debug!(pid = %self.pid, tid = %tid, "thread already tracked, ignoring duplicate creation");
            return None;
        }
        self.threads.push(Thread::new(self.pid, tid, handle, start, tls));
        self.threads.last_mut()
    }

    /// Unlink a thread. The handle is released by the OS debug-API contract,
    /// not here.
    pub fn remove_thread(&mut self, tid: ThreadId) -> Option<Thread>
    {
        let index = self.threads.iter().position(|thread| thread.tid == tid)?;
        Some(self.threads.remove(index))
    }

    /// Threads in creation order.
    pub fn threads(&self) -> impl Iterator<Item = &Thread>
    {
        self.threads.iter()
    }

    /// Number of live threads.
    pub fn thread_count(&self) -> usize
    {
        self.threads.len()
    }

    /// Record a loaded module, replacing whatever was mapped at that base.
    pub fn add_module(&mut self, name: impl Into<String>, base: Address)
    {
        self.modules.insert(
            base,
            Module {
                name: name.into(),
                base,
            },
        );
    }

    /// Forget a module, returning it if it was known.
    pub fn remove_module(&mut self, base: Address) -> Option<Module>
    {
        self.modules.remove(&base)
    }

    /// Module loaded at `base`.
    pub fn module(&self, base: Address) -> Option<&Module>
    {
        self.modules.get(&base)
    }

    /// Loaded modules ordered by base address.
    pub fn modules(&self) -> impl Iterator<Item = &Module>
    {
        self.modules.values()
    }
}

/// A process taken out of the registry, plus any threads that were still
/// attached to it and had to be drained.
#[derive(Debug)]
pub struct RemovedProcess
{
    /// The process, now with an empty thread list.
    pub process: Process,
    /// Threads that remained when the process was removed.
    pub drained: Vec<Thread>,
}

/// Owned summary of one thread, for views that outlive the event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadSnapshot
{
    /// Thread id
    pub tid: ThreadId,
    /// Start routine, if known
    pub start: Option<Address>,
    /// Name, if the debuggee set one
    pub name: Option<String>,
    /// Execution mode
    pub exec_mode: ExecMode,
    /// Still waiting for its startup sync exception
    pub waiting_for_first_exception: bool,
}

/// Owned summary of one process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSnapshot
{
    /// Process id
    pub pid: ProcessId,
    /// Main image name
    pub image_name: String,
    /// Threads in creation order
    pub threads: Vec<ThreadSnapshot>,
    /// Loaded modules
    pub modules: Vec<Module>,
}

/// Registry of every process and thread in one debugging session.
#[derive(Debug, Default)]
pub struct Registry
{
    processes: BTreeMap<ProcessId, Process>,
}

impl Registry
{
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Look a process up by id.
    pub fn find_process(&self, pid: ProcessId) -> Option<&Process>
    {
        self.processes.get(&pid)
    }

    /// Look a process up by id, mutably.
    pub fn find_process_mut(&mut self, pid: ProcessId) -> Option<&mut Process>
    {
        self.processes.get_mut(&pid)
    }

    /// Look a thread up by (pid, tid).
    pub fn find_thread(&self, pid: ProcessId, tid: ThreadId) -> Option<&Thread>
    {
        self.find_process(pid)?.find_thread(tid)
    }

    /// Look a thread up by (pid, tid), mutably.
    pub fn find_thread_mut(&mut self, pid: ProcessId, tid: ThreadId) -> Option<&mut Thread>
    {
        self.find_process_mut(pid)?.find_thread_mut(tid)
    }

    /// Track a process.
    ///
    /// A process registered by an explicit attach carries a null handle until
    /// its CREATE_PROCESS event arrives; in that case the existing entry is
    /// kept and the real handle fills it in.
    pub fn add_process(&mut self, pid: ProcessId, handle: OsHandle) -> &mut Process
    {
        let process = self.processes.entry(pid).or_insert_with(|| Process::new(pid, OsHandle::NULL));
        if process.handle.is_null() {
            process.handle = handle;
        } else if !handle.is_null() && process.handle != handle {
            warn!(pid = %pid, "process already tracked with a different handle, keeping the first one");
        }
        process
    }

    /// Stop tracking a process.
    ///
    /// The process is expected to have no threads left. If some remain this
    /// is a protocol violation: they are drained first, a warning names them,
    /// and they are handed back with the process so nothing leaks.
    pub fn remove_process(&mut self, pid: ProcessId) -> Option<RemovedProcess>
    {
        let mut process = self.processes.remove(&pid)?;
        let drained = std::mem::take(&mut process.threads);
        if !drained.is_empty() {
            let tids: Vec<u32> = drained.iter().map(|thread| thread.tid.raw()).collect();
            warn!(
                pid = %pid,
                remaining = drained.len(),
                tids = ?tids,
                "process removed while threads remain, draining them"
            );
        }
        Some(RemovedProcess { process, drained })
    }

    /// Tracked processes ordered by pid.
    pub fn processes(&self) -> impl Iterator<Item = &Process>
    {
        self.processes.values()
    }

    /// Number of tracked processes.
    pub fn len(&self) -> usize
    {
        self.processes.len()
    }

    /// Whether no process is tracked.
    pub fn is_empty(&self) -> bool
    {
        self.processes.is_empty()
    }

    /// Owned copy of the registry's current state.
    pub fn snapshot(&self) -> Vec<ProcessSnapshot>
    {
        self.processes
            .values()
            .map(|process| ProcessSnapshot {
                pid: process.pid,
                image_name: process.image_name.clone(),
                threads: process
                    .threads
                    .iter()
                    .map(|thread| ThreadSnapshot {
                        tid: thread.tid,
                        start: thread.start,
                        name: thread.name.clone(),
                        exec_mode: thread.exec_mode,
                        waiting_for_first_exception: thread.is_waiting_for_first_exception(),
                    })
                    .collect(),
                modules: process.modules.values().cloned().collect(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn registry_with_process(pid: u32) -> Registry
    {
        let mut registry = Registry::new();
        registry.add_process(ProcessId(pid), OsHandle::from_raw(0x10));
        registry
    }

    #[test]
    fn test_new_process_has_no_threads()
    {
        let registry = registry_with_process(4242);
        let process = registry.find_process(ProcessId(4242)).unwrap();
        assert_eq!(process.thread_count(), 0);
        assert_eq!(process.handle().raw(), 0x10);
    }

    #[test]
    fn test_find_missing_is_none()
    {
        let registry = registry_with_process(1);
        assert!(registry.find_process(ProcessId(2)).is_none());
        assert!(registry.find_thread(ProcessId(1), ThreadId(7)).is_none());
    }

    #[test]
    fn test_add_thread_defaults()
    {
        let mut registry = registry_with_process(1);
        let process = registry.find_process_mut(ProcessId(1)).unwrap();
        let thread = process
            .add_thread(ThreadId(5), OsHandle::from_raw(0x20), Some(Address::from(0x401000)), Address::ZERO)
            .unwrap();

        assert_eq!(thread.exec_mode(), ExecMode::Continuous);
        assert_eq!(thread.step_count(), 0);
        assert!(!thread.is_waiting_for_first_exception());
        assert_eq!(thread.process(), ProcessId(1));
    }

    #[test]
    fn test_duplicate_thread_is_noop()
    {
        let mut registry = registry_with_process(1);
        let process = registry.find_process_mut(ProcessId(1)).unwrap();
        process.add_thread(ThreadId(5), OsHandle::from_raw(0x20), None, Address::ZERO);
        assert!(process
            .add_thread(ThreadId(5), OsHandle::from_raw(0x99), None, Address::ZERO)
            .is_none());

        assert_eq!(process.thread_count(), 1);
        assert_eq!(process.find_thread(ThreadId(5)).unwrap().handle().raw(), 0x20);
    }

    #[test]
    fn test_threads_keep_creation_order()
    {
        let mut registry = registry_with_process(1);
        let process = registry.find_process_mut(ProcessId(1)).unwrap();
        for tid in [9, 3, 6] {
            process.add_thread(ThreadId(tid), OsHandle::from_raw(tid as usize), None, Address::ZERO);
        }
        process.remove_thread(ThreadId(3));

        let order: Vec<u32> = process.threads().map(|thread| thread.tid().raw()).collect();
        assert_eq!(order, vec![9, 6]);
    }

    #[test]
    fn test_remove_process_drains_remaining_threads()
    {
        let mut registry = registry_with_process(1);
        let process = registry.find_process_mut(ProcessId(1)).unwrap();
        process.add_thread(ThreadId(1), OsHandle::from_raw(1), None, Address::ZERO);
        process.add_thread(ThreadId(2), OsHandle::from_raw(2), None, Address::ZERO);

        let removed = registry.remove_process(ProcessId(1)).unwrap();
        assert_eq!(removed.drained.len(), 2);
        assert_eq!(removed.process.thread_count(), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_attach_placeholder_gets_real_handle()
    {
        let mut registry = Registry::new();
        registry.add_process(ProcessId(3), OsHandle::NULL);
        registry.add_process(ProcessId(3), OsHandle::from_raw(0x77));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.find_process(ProcessId(3)).unwrap().handle().raw(), 0x77);
    }

    #[test]
    fn test_first_exception_flag_consumed_once()
    {
        let mut registry = registry_with_process(1);
        let process = registry.find_process_mut(ProcessId(1)).unwrap();
        let thread = process
            .add_thread(ThreadId(1), OsHandle::from_raw(1), None, Address::ZERO)
            .unwrap();

        assert!(thread.await_first_exception());
        assert!(thread.take_first_exception());
        assert!(!thread.take_first_exception());
        assert!(!thread.await_first_exception());
        assert!(!thread.is_waiting_for_first_exception());
    }

    #[test]
    fn test_step_countdown_returns_to_continuous()
    {
        let mut registry = registry_with_process(1);
        let process = registry.find_process_mut(ProcessId(1)).unwrap();
        let thread = process
            .add_thread(ThreadId(1), OsHandle::from_raw(1), None, Address::ZERO)
            .unwrap();

        thread.set_exec_mode(ExecMode::StepInto, 2);
        assert_eq!(thread.complete_step(), 1);
        assert_eq!(thread.exec_mode(), ExecMode::StepInto);
        assert_eq!(thread.complete_step(), 0);
        assert_eq!(thread.exec_mode(), ExecMode::Continuous);
    }

    #[test]
    fn test_modules_tracked_by_base()
    {
        let mut registry = registry_with_process(1);
        let process = registry.find_process_mut(ProcessId(1)).unwrap();
        process.add_module("kernel32.dll", Address::from(0x7b40_0000));

        assert_eq!(process.module(Address::from(0x7b40_0000)).unwrap().name, "kernel32.dll");
        assert!(process.remove_module(Address::from(0x7b40_0000)).is_some());
        assert_eq!(process.modules().count(), 0);
    }

    #[test]
    fn test_snapshot_reflects_state()
    {
        let mut registry = registry_with_process(1);
        let process = registry.find_process_mut(ProcessId(1)).unwrap();
        process.set_image("app.exe", Address::from(0x40_0000));
        process
            .add_thread(ThreadId(1), OsHandle::from_raw(1), None, Address::ZERO)
            .unwrap()
            .await_first_exception();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].image_name, "app.exe");
        assert!(snapshot[0].threads[0].waiting_for_first_exception);
    }
}
