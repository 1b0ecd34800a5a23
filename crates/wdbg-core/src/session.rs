//! # Event Loop
//!
//! One [`EventLoop`] drives one debugging session: it blocks for the next OS
//! debug event, keeps the [`Registry`] in step with it, decides how exceptions
//! are handled and hands the event back to the OS.
//!
//! ## Iteration
//!
//! 1. `wait_for_event` (the only blocking point)
//! 2. decode against the registry; misses are logged and dropped
//! 3. registry mutation, or for exceptions:
//!    capture context, classify, optionally enter the interactive session,
//!    write the context back
//! 4. `continue_event` with the resulting [`ResumeCode`]
//!
//! Events are handled strictly in OS order, each one completely (interactive
//! session included) before the next is requested.
//!
//! ## Collaborators
//!
//! The command interpreter, symbol loader and breakpoint engine plug in
//! through [`SessionHooks`]. Every interactive entry gets a [`StopContext`]
//! borrowing the live session state for that one event.
//!
//! ## Termination
//!
//! The loop ends when the last tracked process has exited, when the backend
//! runs out of events, or with the terminal [`ResumeCode::Detach`] (returned
//! by the interactive session or requested through the detach flag).

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, error, info, trace, warn};

use crate::api::{DebugApi, ExecutionContext};
use crate::breakpoints::{BreakpointId, BreakpointInfo, BreakpointState, BreakpointStore};
use crate::config::SessionConfig;
use crate::constants::{EXCEPTION_BREAKPOINT, EXCEPTION_NAME_THREAD, MAX_PATH, STATUS_POSSIBLE_DEADLOCK};
use crate::error::{DebuggerError, Result};
use crate::events::{self, DebugEvent, RawDebugEvent, RawEventInfo, ThreadKey};
use crate::exception::{self, ExceptionClass, ExceptionRecord, ResumeCode, ThreadNameRequest};
use crate::registry::{ExecMode, Module, Process, Registry, Thread};
use crate::startup::StartupSync;
use crate::types::{Address, Architecture, OsHandle, ProcessId, ThreadId};

/// Why the interactive session was entered
#[derive(Debug, Clone)]
pub enum StopReason
{
    /// A breakpoint from the store was hit; the instruction pointer is back
    /// on the trap address.
    Breakpoint(BreakpointInfo),
    /// A new thread reached its start routine.
    ThreadStart(Address),
    /// A thread with unknown start delivered its first exception.
    FirstException,
    /// A trap instruction the debugger did not place.
    Trap(Address),
    /// A single-step or step-over run finished.
    StepComplete(ExecMode),
    /// A single-step trap nobody asked for.
    SingleStep,
    /// A reportable exception that was not passed to the debuggee.
    Exception(u32),
}

/// What the interactive session wants done with the stopped event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeDecision
{
    /// Resume normally (`DBG_CONTINUE`).
    Continue,
    /// Let the debuggee's own handlers see the exception.
    PassToApplication,
    /// Single-step the thread `count` times, then stop again.
    Step
    {
        /// Stepping flavor
        mode: ExecMode,
        /// Steps before the next stop (at least one)
        count: u32,
    },
    /// Stop debugging; the debuggees keep running.
    Detach,
}

/// Callbacks from the event loop into the debugger's collaborators
///
/// Only [`enter_interactive`](Self::enter_interactive) is mandatory. All
/// callbacks run on the monitor thread while the debuggee is stopped.
pub trait SessionHooks<A: DebugApi>
{
    /// An event needs the user's attention. The session blocks until this
    /// returns.
    fn enter_interactive(&mut self, stop: &mut StopContext<'_, A>) -> ResumeDecision;

    /// A process was registered (its initial thread included).
    fn on_process_created(&mut self, _process: &Process) {}

    /// A module was mapped.
    fn on_module_loaded(&mut self, _pid: ProcessId, _module: &Module) {}

    /// A module was unmapped.
    fn on_module_unloaded(&mut self, _pid: ProcessId, _module: &Module) {}

    /// The debuggee called `OutputDebugString`.
    fn on_debug_string(&mut self, _thread: ThreadKey, _text: &str) {}

    /// A process exited and was removed from the registry.
    fn on_process_exited(&mut self, _pid: ProcessId, _exit_code: u32) {}
}

/// Live session state lent to the interactive session for one stop
pub struct StopContext<'a, A: DebugApi>
{
    api: &'a mut A,
    registry: &'a Registry,
    breakpoints: &'a mut BreakpointStore,
    context: &'a mut A::Context,
    thread: ThreadKey,
    reason: StopReason,
    description: String,
    first_chance: bool,
}

impl<A: DebugApi> StopContext<'_, A>
{
    /// The stopped thread (the "current" thread of the session).
    pub fn current(&self) -> ThreadKey
    {
        self.thread
    }

    /// The stopped thread's process.
    pub fn process(&self) -> Option<&Process>
    {
        self.registry.find_process(self.thread.pid)
    }

    /// The stopped thread.
    pub fn thread(&self) -> Option<&Thread>
    {
        self.registry.find_thread(self.thread.pid, self.thread.tid)
    }

    /// Registers of any thread in the stopped process. The stopped thread's
    /// own entry is the live context, edits included.
    ///
    /// ## Errors
    ///
    /// `ProcessNotFound`, `ThreadNotFound`, or the backend's `ContextFailed`.
    pub fn thread_context(&self, tid: ThreadId) -> Result<A::Context>
    {
        let pid = self.thread.pid;
        let process = self.registry.find_process(pid).ok_or(DebuggerError::ProcessNotFound(pid))?;
        let thread = process.find_thread(tid).ok_or(DebuggerError::ThreadNotFound { pid, tid })?;
        if tid == self.thread.tid {
            return Ok(self.context.clone());
        }
        self.api.get_context(thread.handle(), tid)
    }

    /// Every tracked process.
    pub fn registry(&self) -> &Registry
    {
        self.registry
    }

    /// Why the session stopped.
    pub fn reason(&self) -> &StopReason
    {
        &self.reason
    }

    /// Formatted description of the stop.
    pub fn description(&self) -> &str
    {
        &self.description
    }

    /// Whether the exception is on its first chance.
    pub fn first_chance(&self) -> bool
    {
        self.first_chance
    }

    /// Register snapshot of the stopped thread.
    pub fn context(&self) -> &A::Context
    {
        &*self.context
    }

    /// Register snapshot of the stopped thread; changes are written back
    /// before the event is continued.
    pub fn context_mut(&mut self) -> &mut A::Context
    {
        &mut *self.context
    }

    /// Debuggee architecture.
    pub fn architecture(&self) -> Architecture
    {
        self.api.architecture()
    }

    /// The session's breakpoints.
    pub fn breakpoints(&self) -> &BreakpointStore
    {
        &*self.breakpoints
    }

    /// Read memory of the stopped thread's process.
    ///
    /// ## Errors
    ///
    /// `ProcessNotFound` if the process is gone, or the backend's `MemoryFailed`.
    pub fn read_memory(&self, address: Address, buffer: &mut [u8]) -> Result<usize>
    {
        let process = self
            .process()
            .ok_or(DebuggerError::ProcessNotFound(self.thread.pid))?;
        self.api.read_memory(process.handle(), address, buffer)
    }

    /// Run `edit` with every thread of the stopped process suspended.
    ///
    /// Threads are resumed afterwards whether `edit` succeeded or not. If
    /// suspending fails midway, the threads suspended so far are resumed and
    /// `edit` does not run.
    ///
    /// ## Errors
    ///
    /// `ProcessNotFound`, `SuspendFailed`, or whatever `edit` returns.
    pub fn with_suspended<R>(
        &mut self,
        edit: impl FnOnce(&mut A, &mut BreakpointStore, &OsHandle) -> Result<R>,
    ) -> Result<R>
    {
        let registry = self.registry;
        let pid = self.thread.pid;
        let process = registry.find_process(pid).ok_or(DebuggerError::ProcessNotFound(pid))?;

        let mut suspended: Vec<&OsHandle> = Vec::with_capacity(process.thread_count());
        for thread in process.threads() {
            if let Err(err) = self.api.suspend_thread(thread.handle()) {
                resume_all(&mut *self.api, &suspended);
                return Err(err);
            }
            suspended.push(thread.handle());
        }

        let result = edit(&mut *self.api, &mut *self.breakpoints, process.handle());
        resume_all(&mut *self.api, &suspended);
        result
    }

    /// Arm a breakpoint in the stopped process.
    ///
    /// ## Errors
    ///
    /// See [`BreakpointStore::install`] and [`Self::with_suspended`].
    pub fn set_breakpoint(&mut self, address: Address, temporary: bool) -> Result<BreakpointId>
    {
        let pid = self.thread.pid;
        self.with_suspended(|api, breakpoints, process| breakpoints.install(api, process, pid, address, temporary))
    }

    /// Remove a breakpoint from the stopped process.
    ///
    /// ## Errors
    ///
    /// See [`BreakpointStore::uninstall`] and [`Self::with_suspended`].
    pub fn remove_breakpoint(&mut self, id: BreakpointId) -> Result<BreakpointInfo>
    {
        self.with_suspended(|api, breakpoints, process| breakpoints.uninstall(api, process, id))
    }
}

fn resume_all<A: DebugApi>(api: &mut A, handles: &[&OsHandle])
{
    for handle in handles {
        if let Err(err) = api.resume_thread(handle) {
            warn!("failed to resume thread after edit: {err}");
        }
    }
}

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd
{
    /// Every tracked process exited.
    AllExited,
    /// The session detached; debuggees keep running.
    Detached,
    /// The backend stopped delivering events while processes were tracked.
    EventsExhausted,
    /// The attach front door could not attach; the loop never ran.
    AttachFailed,
    /// The launch front door could not create the process; the loop never ran.
    LaunchFailed,
}

impl fmt::Display for SessionEnd
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            SessionEnd::AllExited => write!(f, "all processes exited"),
            SessionEnd::Detached => write!(f, "detached"),
            SessionEnd::EventsExhausted => write!(f, "no more debug events"),
            SessionEnd::AttachFailed => write!(f, "attach failed"),
            SessionEnd::LaunchFailed => write!(f, "launch failed"),
        }
    }
}

/// Outcome of one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary
{
    /// Debug events received
    pub events: u64,
    /// Events logged and dropped (unknown owner, unreadable context)
    pub dropped: u64,
    /// Exit code of every process that exited during the session
    pub exit_codes: BTreeMap<ProcessId, u32>,
    /// How the session ended
    pub end: SessionEnd,
}

impl SessionSummary
{
    /// Summary of a session whose loop never ran.
    pub fn never_started(end: SessionEnd) -> Self
    {
        Self {
            events: 0,
            dropped: 0,
            exit_codes: BTreeMap::new(),
            end,
        }
    }

    /// Exit code of `pid`, if it exited during the session.
    pub fn exit_code(&self, pid: ProcessId) -> Option<u32>
    {
        self.exit_codes.get(&pid).copied()
    }
}

enum Disposition
{
    Resume(ResumeCode),
    Stop
    {
        reason: StopReason,
        description: String,
    },
}

/// The debug event loop of one session
pub struct EventLoop<A: DebugApi, H: SessionHooks<A>>
{
    api: A,
    hooks: H,
    config: SessionConfig,
    registry: Registry,
    breakpoints: BreakpointStore,
    startup: StartupSync,
    attached: HashSet<ProcessId>,
    step_over: HashMap<ThreadKey, BreakpointId>,
    current: Option<ThreadKey>,
    detach: Arc<AtomicBool>,
    events: u64,
    dropped: u64,
    exit_codes: BTreeMap<ProcessId, u32>,
}

impl<A: DebugApi, H: SessionHooks<A>> EventLoop<A, H>
{
    /// A session with an empty registry.
    pub fn new(api: A, hooks: H, config: SessionConfig) -> Self
    {
        Self {
            api,
            hooks,
            config,
            registry: Registry::new(),
            breakpoints: BreakpointStore::new(),
            startup: StartupSync::new(),
            attached: HashSet::new(),
            step_over: HashMap::new(),
            current: None,
            detach: Arc::new(AtomicBool::new(false)),
            events: 0,
            dropped: 0,
            exit_codes: BTreeMap::new(),
        }
    }

    /// Share an externally owned detach flag.
    #[must_use]
    pub fn with_detach_flag(mut self, flag: Arc<AtomicBool>) -> Self
    {
        self.detach = flag;
        self
    }

    /// Flag that, once set, detaches at the next event.
    pub fn detach_flag(&self) -> Arc<AtomicBool>
    {
        Arc::clone(&self.detach)
    }

    /// Register a process the backend just attached to.
    ///
    /// The entry has no handle until the CREATE_PROCESS event arrives, and the
    /// initial thread reported by that event is synchronized on its first
    /// exception: its start routine already ran.
    pub fn register_attach(&mut self, pid: ProcessId)
    {
        self.registry.add_process(pid, OsHandle::NULL);
        self.attached.insert(pid);
        info!(pid = %pid, "attached to process");
    }

    /// Tracked processes and threads.
    pub fn registry(&self) -> &Registry
    {
        &self.registry
    }

    /// Breakpoints of this session.
    pub fn breakpoints(&self) -> &BreakpointStore
    {
        &self.breakpoints
    }

    /// Thread of the most recent exception, if it is still alive.
    pub fn current(&self) -> Option<ThreadKey>
    {
        self.current
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig
    {
        &self.config
    }

    /// The backend.
    pub fn api(&self) -> &A
    {
        &self.api
    }

    /// The collaborator hooks.
    pub fn hooks(&self) -> &H
    {
        &self.hooks
    }

    /// Take the backend and hooks back.
    pub fn into_parts(self) -> (A, H)
    {
        (self.api, self.hooks)
    }

    /// Run until the session ends.
    pub fn run(&mut self) -> SessionSummary
    {
        debug!("event loop started");
        let end = loop {
            let Some(raw) = self.api.wait_for_event() else {
                break if self.registry.is_empty() { SessionEnd::AllExited } else { SessionEnd::EventsExhausted };
            };
            let process_exit = matches!(raw.info, RawEventInfo::ExitProcess { .. });
            if self.process_event(raw).is_terminal() {
                break SessionEnd::Detached;
            }
            if process_exit && self.registry.is_empty() {
                break SessionEnd::AllExited;
            }
        };

        let summary = self.summary(end);
        info!(
            end = %summary.end,
            events = summary.events,
            dropped = summary.dropped,
            "debug session ended"
        );
        summary
    }

    /// Counters so far, with the given end.
    pub fn summary(&self, end: SessionEnd) -> SessionSummary
    {
        SessionSummary {
            events: self.events,
            dropped: self.dropped,
            exit_codes: self.exit_codes.clone(),
            end,
        }
    }

    /// Handle one event completely and continue it. Returns the resume code
    /// that was issued.
    pub fn process_event(&mut self, raw: RawDebugEvent) -> ResumeCode
    {
        let (pid, tid, kind) = (raw.pid, raw.tid, raw.kind());
        let written_back = matches!(raw.info, RawEventInfo::Exception { .. }).then_some(ThreadKey { pid, tid });
        self.events += 1;
        debug!(pid = %pid, tid = %tid, code = raw.code(), kind, "debug event");

        let mut code = match events::decode(raw, &self.registry, &self.api) {
            Ok(event) => self.dispatch(event),
            Err(miss) => {
                warn!(pid = %pid, tid = %tid, "dropping {kind} event: {miss}");
                self.dropped += 1;
                ResumeCode::Continue
            }
        };

        // A detach request keeps the status already decided for this event:
        // an exception owed to the debuggee's handlers still goes there.
        let status = code.status();
        if self.detach_requested() {
            code = ResumeCode::Detach;
        }
        if code.is_terminal() {
            self.clear_pending_steps(written_back);
            self.remove_all_breakpoints();
        }

        trace!(pid = %pid, tid = %tid, resume = %code, "continuing event");
        if let Err(err) = self.api.continue_event(pid, tid, status) {
            error!(pid = %pid, tid = %tid, "{err}");
        }

        if code.is_terminal() {
            self.detach_all();
        }
        code
    }

    fn dispatch(&mut self, event: DebugEvent) -> ResumeCode
    {
        let arm = self.config.arm_startup_breakpoints;
        match event {
            DebugEvent::Exception {
                thread,
                record,
                first_chance,
            } => return self.handle_exception(thread, &record, first_chance),
            DebugEvent::ProcessCreated {
                pid,
                handle,
                tid,
                thread_handle,
                start,
                tls,
                image_name,
                image_base,
            } => {
                let attached = self.attached.contains(&pid);
                let process = self.registry.add_process(pid, handle);
                if !image_name.is_empty() {
                    process.add_module(image_name.clone(), image_base);
                }
                info!(pid = %pid, image = %image_name, base = %image_base, "process created");
                process.set_image(image_name, image_base);
                let added = process.add_thread(tid, thread_handle, start, tls).is_some();
                self.hooks.on_process_created(process);

                if added {
                    let start = if attached { None } else { start.filter(|_| arm) };
                    self.startup
                        .synchronize(&mut self.api, &mut self.registry, &mut self.breakpoints, pid, tid, start);
                }
            }
            DebugEvent::ThreadCreated {
                pid,
                tid,
                handle,
                start,
                tls,
            } => {
                let Some(process) = self.registry.find_process_mut(pid) else {
                    return ResumeCode::Continue;
                };
                if process.add_thread(tid, handle, start, tls).is_some() {
                    debug!(pid = %pid, tid = %tid, start = ?start, "thread created");
                    self.startup.synchronize(
                        &mut self.api,
                        &mut self.registry,
                        &mut self.breakpoints,
                        pid,
                        tid,
                        start.filter(|_| arm),
                    );
                }
            }
            DebugEvent::ThreadExited { thread, exit_code } => {
                if let Some(process) = self.registry.find_process(thread.pid) {
                    self.startup
                        .thread_exited(&mut self.api, process.handle(), &mut self.breakpoints, thread.pid, thread.tid);
                }
                if let Some(id) = self.step_over.remove(&thread) {
                    self.rearm(thread.pid, id);
                }
                if let Some(process) = self.registry.find_process_mut(thread.pid) {
                    process.remove_thread(thread.tid);
                }
                if self.current == Some(thread) {
                    self.current = None;
                }
                debug!(pid = %thread.pid, tid = %thread.tid, exit_code, "thread exited");
            }
            DebugEvent::ProcessExited { pid, exit_code } => {
                info!(pid = %pid, exit_code, "process exited");
                self.exit_codes.insert(pid, exit_code);
                self.startup.forget_process(pid);
                self.breakpoints.forget_process(pid);
                self.step_over.retain(|key, _| key.pid != pid);
                self.attached.remove(&pid);
                if let Some(removed) = self.registry.remove_process(pid) {
                    trace!(pid = %pid, drained = removed.drained.len(), "process removed");
                }
                if self.current.is_some_and(|current| current.pid == pid) {
                    self.current = None;
                }
                self.hooks.on_process_exited(pid, exit_code);
            }
            DebugEvent::ModuleLoaded { thread, name, base } => {
                info!(pid = %thread.pid, base = %base, "loaded module {name}");
                if let Some(process) = self.registry.find_process_mut(thread.pid) {
                    process.add_module(name, base);
                    if let Some(module) = process.module(base) {
                        self.hooks.on_module_loaded(thread.pid, module);
                    }
                }
            }
            DebugEvent::ModuleUnloaded { thread, name, base } => {
                debug!(pid = %thread.pid, base = %base, "unloaded module {name}");
                let module = self
                    .registry
                    .find_process_mut(thread.pid)
                    .and_then(|process| process.remove_module(base));
                if let Some(module) = module {
                    self.hooks.on_module_unloaded(thread.pid, &module);
                }
            }
            DebugEvent::DebugString { thread, text } => {
                info!(pid = %thread.pid, tid = %thread.tid, "debug string: {text}");
                self.hooks.on_debug_string(thread, &text);
            }
            DebugEvent::Rip { error, kind } => {
                warn!(error, kind = %kind, "RIP event");
            }
            DebugEvent::Unknown(code) => {
                warn!(code, "unknown debug event");
            }
        }
        ResumeCode::Continue
    }

    fn handle_exception(&mut self, key: ThreadKey, record: &ExceptionRecord, first_chance: bool) -> ResumeCode
    {
        let Some(thread) = self.registry.find_thread(key.pid, key.tid) else {
            self.dropped += 1;
            return ResumeCode::Continue;
        };
        let mut context = match self.api.get_context(thread.handle(), key.tid) {
            Ok(context) => context,
            Err(err) => {
                error!(pid = %key.pid, tid = %key.tid, code = record.code, "dropping exception: {err}");
                self.dropped += 1;
                return ResumeCode::Continue;
            }
        };
        self.current = Some(key);

        let forced = self
            .registry
            .find_thread_mut(key.pid, key.tid)
            .is_some_and(Thread::take_first_exception);

        let disposition = if forced {
            self.first_exception(key, record, first_chance, &mut context)
        } else {
            match record.class() {
                ExceptionClass::Silent if record.code == EXCEPTION_BREAKPOINT => self.breakpoint_trap(key, &mut context),
                ExceptionClass::Silent => self.single_step_trap(key, &mut context),
                ExceptionClass::Reportable => self.reportable(key, record, first_chance, false),
            }
        };

        let code = match disposition {
            Disposition::Resume(code) => code,
            Disposition::Stop { reason, description } => {
                self.interact(key, reason, description, first_chance, &mut context)
            }
        };

        // Nobody will field a trace trap once the session is gone.
        if code.is_terminal() || self.detach_requested() {
            context.set_single_step(false);
        }

        if let Some(thread) = self.registry.find_thread(key.pid, key.tid) {
            if let Err(err) = self.api.set_context(thread.handle(), key.tid, &context) {
                error!(pid = %key.pid, tid = %key.tid, "{err}");
            }
        }
        code
    }

    /// The deferred first exception of a thread with unknown start. Consumed
    /// as the sync signal: always stops, never reaches the debuggee.
    fn first_exception(
        &mut self,
        key: ThreadKey,
        record: &ExceptionRecord,
        first_chance: bool,
        context: &mut A::Context,
    ) -> Disposition
    {
        if record.code == EXCEPTION_BREAKPOINT {
            let width = self.api.architecture().trap_width();
            if let Some(trap) = context.instruction_pointer().checked_sub(width) {
                context.set_instruction_pointer(trap);
            }
        }
        debug!(pid = %key.pid, tid = %key.tid, code = record.code, "first exception taken as startup signal");

        match record.class() {
            ExceptionClass::Reportable => self.reportable(key, record, first_chance, true),
            ExceptionClass::Silent => Disposition::Stop {
                reason: StopReason::FirstException,
                description: format!("Thread {} synchronized at {}", key.tid, context.instruction_pointer()),
            },
        }
    }

    fn breakpoint_trap(&mut self, key: ThreadKey, context: &mut A::Context) -> Disposition
    {
        let width = self.api.architecture().trap_width();
        let ip = context.instruction_pointer();
        let Some(address) = ip.checked_sub(width) else {
            return unknown_trap(ip);
        };
        let Some(id) = self.breakpoints.id_at(key.pid, address) else {
            return unknown_trap(address);
        };
        let Some(info) = self.breakpoints.record_hit(key.pid, address) else {
            return unknown_trap(address);
        };
        context.set_instruction_pointer(address);

        let Some(process) = self.registry.find_process(key.pid) else {
            return Disposition::Resume(ResumeCode::Continue);
        };
        if self.startup.is_start_trap(id) {
            if self
                .startup
                .reached(&mut self.api, process.handle(), &mut self.breakpoints, id, key.tid)
            {
                return Disposition::Stop {
                    reason: StopReason::ThreadStart(address),
                    description: format!("Thread {} starting at {address}", key.tid),
                };
            }
            // Another thread running through a start routine someone else waits on.
            self.step_over_breakpoint(key, context);
            return Disposition::Resume(ResumeCode::Continue);
        } else if info.temporary {
            if let Err(err) = self.breakpoints.uninstall(&mut self.api, process.handle(), id) {
                warn!(pid = %key.pid, address = %address, "failed to remove temporary breakpoint: {err}");
            }
        }

        let description = format!("Stopped on breakpoint {} at {address}", info.id.raw());
        Disposition::Stop {
            reason: StopReason::Breakpoint(info),
            description,
        }
    }

    fn single_step_trap(&mut self, key: ThreadKey, context: &mut A::Context) -> Disposition
    {
        let stepped_over = match self.step_over.remove(&key) {
            Some(id) => {
                self.rearm(key.pid, id);
                true
            }
            None => false,
        };

        let Some(thread) = self.registry.find_thread_mut(key.pid, key.tid) else {
            return Disposition::Resume(ResumeCode::Continue);
        };
        match thread.exec_mode() {
            ExecMode::Continuous if stepped_over => {
                context.set_single_step(false);
                Disposition::Resume(ResumeCode::Continue)
            }
            ExecMode::Continuous => Disposition::Stop {
                reason: StopReason::SingleStep,
                description: format!("Single step at {}", context.instruction_pointer()),
            },
            mode => {
                if thread.complete_step() > 0 {
                    context.set_single_step(true);
                    Disposition::Resume(ResumeCode::Continue)
                } else {
                    Disposition::Stop {
                        reason: StopReason::StepComplete(mode),
                        description: format!("Step complete at {}", context.instruction_pointer()),
                    }
                }
            }
        }
    }

    fn reportable(&mut self, key: ThreadKey, record: &ExceptionRecord, first_chance: bool, forced: bool)
        -> Disposition
    {
        if !forced && record.code == EXCEPTION_NAME_THREAD {
            if let Some(request) = ThreadNameRequest::parse(record) {
                self.name_thread(key, request);
                return Disposition::Resume(ResumeCode::NotHandled);
            }
        }

        if exception::passes_through(
            ExceptionClass::Reportable,
            first_chance,
            self.config.break_on_first_chance,
            forced,
        ) {
            debug!(pid = %key.pid, tid = %key.tid, code = record.code, "first chance exception passed to debuggee");
            return Disposition::Resume(ResumeCode::NotHandled);
        }

        let description = exception::describe(record, first_chance);
        if !forced && record.code == STATUS_POSSIBLE_DEADLOCK && !self.config.break_on_critical_section_timeout {
            warn!(pid = %key.pid, tid = %key.tid, "{description}");
            return Disposition::Resume(ResumeCode::NotHandled);
        }

        Disposition::Stop {
            reason: StopReason::Exception(record.code),
            description,
        }
    }

    fn name_thread(&mut self, key: ThreadKey, request: ThreadNameRequest)
    {
        let target = request.target.unwrap_or(key.tid);
        let Some(process) = self.registry.find_process_mut(key.pid) else {
            return;
        };
        let name = events::read_string(&self.api, process.handle(), request.name, MAX_PATH, false);
        match process.find_thread_mut(target) {
            Some(thread) => {
                debug!(pid = %key.pid, tid = %target, name = %name, "thread named");
                thread.set_name(name);
            }
            None => debug!(pid = %key.pid, tid = %target, "ignoring name for unknown thread"),
        }
    }

    fn interact(
        &mut self,
        key: ThreadKey,
        reason: StopReason,
        description: String,
        first_chance: bool,
        context: &mut A::Context,
    ) -> ResumeCode
    {
        info!(pid = %key.pid, tid = %key.tid, "{description}");
        let mut stop = StopContext {
            api: &mut self.api,
            registry: &self.registry,
            breakpoints: &mut self.breakpoints,
            context: &mut *context,
            thread: key,
            reason,
            description,
            first_chance,
        };
        let decision = self.hooks.enter_interactive(&mut stop);
        debug!(pid = %key.pid, tid = %key.tid, ?decision, "interactive session returned");
        self.apply(key, decision, context)
    }

    fn apply(&mut self, key: ThreadKey, decision: ResumeDecision, context: &mut A::Context) -> ResumeCode
    {
        let code = match decision {
            ResumeDecision::Detach => return ResumeCode::Detach,
            ResumeDecision::Step { mode, count } if mode != ExecMode::Continuous => {
                if let Some(thread) = self.registry.find_thread_mut(key.pid, key.tid) {
                    thread.set_exec_mode(mode, count.max(1));
                }
                context.set_single_step(true);
                ResumeCode::Continue
            }
            ResumeDecision::Continue | ResumeDecision::PassToApplication | ResumeDecision::Step { .. } => {
                if let Some(thread) = self.registry.find_thread_mut(key.pid, key.tid) {
                    thread.set_exec_mode(ExecMode::Continuous, 0);
                }
                context.set_single_step(false);
                if decision == ResumeDecision::PassToApplication {
                    ResumeCode::NotHandled
                } else {
                    ResumeCode::Continue
                }
            }
        };
        self.step_over_breakpoint(key, context);
        code
    }

    /// Resuming on top of an armed trap would hit it again: lift it for one
    /// instruction and put it back on the following single-step trap.
    fn step_over_breakpoint(&mut self, key: ThreadKey, context: &mut A::Context)
    {
        let Some(id) = self.breakpoints.id_at(key.pid, context.instruction_pointer()) else {
            return;
        };
        if !self.breakpoints.info(id).is_some_and(|info| info.state == BreakpointState::Armed) {
            return;
        }
        let Some(process) = self.registry.find_process(key.pid) else {
            return;
        };
        match self.breakpoints.disable(&mut self.api, process.handle(), id) {
            Ok(()) => {
                context.set_single_step(true);
                self.step_over.insert(key, id);
                trace!(pid = %key.pid, tid = %key.tid, id = id.raw(), "stepping over breakpoint");
            }
            Err(err) => warn!(pid = %key.pid, tid = %key.tid, "cannot step over breakpoint: {err}"),
        }
    }

    fn rearm(&mut self, pid: ProcessId, id: BreakpointId)
    {
        let Some(process) = self.registry.find_process(pid) else {
            return;
        };
        if self.breakpoints.info(id).is_none() {
            return;
        }
        if let Err(err) = self.breakpoints.enable(&mut self.api, process.handle(), id) {
            warn!(pid = %pid, id = id.raw(), "failed to re-arm breakpoint: {err}");
        }
    }

    fn detach_requested(&self) -> bool
    {
        self.detach.load(Ordering::Acquire)
    }

    /// Clear the trace flag of every thread still stepping. `written_back` is
    /// the thread whose exception context already went out with the flag
    /// cleared.
    fn clear_pending_steps(&mut self, written_back: Option<ThreadKey>)
    {
        let mut pending: Vec<ThreadKey> = self.step_over.keys().copied().collect();
        for process in self.registry.processes() {
            for thread in process.threads() {
                let key = ThreadKey {
                    pid: process.pid(),
                    tid: thread.tid(),
                };
                if thread.exec_mode() != ExecMode::Continuous && !pending.contains(&key) {
                    pending.push(key);
                }
            }
        }

        for key in pending {
            if written_back == Some(key) {
                continue;
            }
            let Some(thread) = self.registry.find_thread_mut(key.pid, key.tid) else {
                continue;
            };
            thread.set_exec_mode(ExecMode::Continuous, 0);
            let handle = thread.handle();
            let cleared = self.api.get_context(handle, key.tid).and_then(|mut context| {
                context.set_single_step(false);
                self.api.set_context(handle, key.tid, &context)
            });
            match cleared {
                Ok(()) => trace!(pid = %key.pid, tid = %key.tid, "trace flag cleared before detach"),
                Err(err) => warn!(pid = %key.pid, tid = %key.tid, "cannot clear trace flag before detach: {err}"),
            }
        }
    }

    fn remove_all_breakpoints(&mut self)
    {
        for info in self.breakpoints.list() {
            let Some(process) = self.registry.find_process(info.pid) else {
                continue;
            };
            if let Err(err) = self.breakpoints.uninstall(&mut self.api, process.handle(), info.id) {
                warn!(pid = %info.pid, address = %info.address, "failed to remove breakpoint before detach: {err}");
            }
        }
        self.startup = StartupSync::new();
        self.step_over.clear();
    }

    fn detach_all(&mut self)
    {
        let pids: Vec<ProcessId> = self.registry.processes().map(Process::pid).collect();
        for pid in pids {
            match self.api.detach(pid) {
                Ok(()) => info!(pid = %pid, "detached from process"),
                Err(err) => error!(pid = %pid, "{err}"),
            }
        }
    }
}

fn unknown_trap(address: Address) -> Disposition
{
    Disposition::Stop {
        reason: StopReason::Trap(address),
        description: format!("Breakpoint instruction at {address}"),
    }
}
