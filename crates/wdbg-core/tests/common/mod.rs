//! Scripted debug backend shared by the integration tests.
//!
//! `ScriptedApi` replays queued raw events and records every OS call it
//! receives, in order. Its state lives behind an `Arc<Mutex<_>>`, so a test
//! keeps a [`Script`] handle to queue events, map memory, set registers and
//! inspect the call log while the backend itself belongs to an event loop or
//! a monitor thread.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use wdbg_core::api::{ContinueStatus, DebugApi, ExecutionContext, LaunchOptions};
use wdbg_core::constants::*;
use wdbg_core::error::{DebuggerError, Result};
use wdbg_core::events::{RawDebugEvent, RawEventInfo, RemoteString};
use wdbg_core::exception::ExceptionRecord;
use wdbg_core::session::{ResumeDecision, SessionHooks, StopContext, StopReason};
use wdbg_core::types::{Address, Architecture, OsHandle, ProcessId, ThreadId};

/// One OS call seen by the scripted backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call
{
    Attach(ProcessId),
    CreateProcess(String),
    Detach(ProcessId),
    Continue
    {
        pid: ProcessId,
        tid: ThreadId,
        status: ContinueStatus,
    },
    SetContext
    {
        tid: ThreadId,
        ip: Address,
        single_step: bool,
    },
    Write
    {
        address: Address,
        data: Vec<u8>,
    },
    Suspend(usize),
    Resume(usize),
}

/// Register snapshot of the scripted backend
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FakeContext
{
    pub ip: Address,
    pub sp: Address,
    pub trace: bool,
}

impl ExecutionContext for FakeContext
{
    fn instruction_pointer(&self) -> Address
    {
        self.ip
    }

    fn set_instruction_pointer(&mut self, address: Address)
    {
        self.ip = address;
    }

    fn stack_pointer(&self) -> Address
    {
        self.sp
    }

    fn single_step(&self) -> bool
    {
        self.trace
    }

    fn set_single_step(&mut self, enabled: bool)
    {
        self.trace = enabled;
    }
}

#[derive(Debug, Default)]
struct State
{
    events: VecDeque<RawDebugEvent>,
    memory: HashMap<u64, u8>,
    contexts: HashMap<ThreadId, FakeContext>,
    broken_contexts: HashSet<ThreadId>,
    calls: Vec<Call>,
    refuse_attach: bool,
    launch_error: Option<u32>,
    launch_pid: u32,
}

/// Test-side handle on the scripted backend's state
#[derive(Debug, Clone)]
pub struct Script(Arc<Mutex<State>>);

impl Script
{
    fn state(&self) -> MutexGuard<'_, State>
    {
        self.0.lock().unwrap()
    }

    pub fn push(&self, event: RawDebugEvent) -> &Self
    {
        self.state().events.push_back(event);
        self
    }

    pub fn map(&self, address: u64, bytes: &[u8]) -> &Self
    {
        let mut state = self.state();
        for (offset, byte) in bytes.iter().enumerate() {
            state.memory.insert(address + offset as u64, *byte);
        }
        self
    }

    pub fn byte(&self, address: u64) -> Option<u8>
    {
        self.state().memory.get(&address).copied()
    }

    pub fn set_ip(&self, tid: u32, ip: u64) -> &Self
    {
        self.state().contexts.entry(ThreadId(tid)).or_default().ip = Address::from(ip);
        self
    }

    pub fn context(&self, tid: u32) -> FakeContext
    {
        self.state().contexts.get(&ThreadId(tid)).cloned().unwrap_or_default()
    }

    pub fn break_context(&self, tid: u32) -> &Self
    {
        self.state().broken_contexts.insert(ThreadId(tid));
        self
    }

    pub fn refuse_attach(&self) -> &Self
    {
        self.state().refuse_attach = true;
        self
    }

    pub fn fail_launch(&self, win32_error: u32) -> &Self
    {
        self.state().launch_error = Some(win32_error);
        self
    }

    pub fn launch_as(&self, pid: u32) -> &Self
    {
        self.state().launch_pid = pid;
        self
    }

    pub fn calls(&self) -> Vec<Call>
    {
        self.state().calls.clone()
    }

    /// Continue calls in order, as (tid, status).
    pub fn continues(&self) -> Vec<(u32, ContinueStatus)>
    {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Continue { tid, status, .. } => Some((tid.0, status)),
                _ => None,
            })
            .collect()
    }

    /// Index in the call log of the first call matching `predicate`.
    pub fn position(&self, predicate: impl Fn(&Call) -> bool) -> Option<usize>
    {
        self.calls().iter().position(predicate)
    }
}

/// Scripted `DebugApi`
#[derive(Debug)]
pub struct ScriptedApi
{
    architecture: Architecture,
    state: Arc<Mutex<State>>,
}

impl ScriptedApi
{
    pub fn new(architecture: Architecture) -> (Self, Script)
    {
        let state = Arc::new(Mutex::new(State::default()));
        let api = Self {
            architecture,
            state: Arc::clone(&state),
        };
        (api, Script(state))
    }

    fn state(&self) -> MutexGuard<'_, State>
    {
        self.state.lock().unwrap()
    }

    fn record(&self, call: Call)
    {
        self.state().calls.push(call);
    }
}

impl DebugApi for ScriptedApi
{
    type Context = FakeContext;

    fn architecture(&self) -> Architecture
    {
        self.architecture
    }

    fn attach(&mut self, pid: ProcessId) -> Result<()>
    {
        self.record(Call::Attach(pid));
        if self.state().refuse_attach {
            return Err(DebuggerError::AttachFailed {
                pid,
                details: "access denied".to_string(),
            });
        }
        Ok(())
    }

    fn create_process(&mut self, options: &LaunchOptions) -> Result<ProcessId>
    {
        self.record(Call::CreateProcess(options.command_line.clone()));
        let state = self.state();
        match state.launch_error {
            Some(error) => Err(DebuggerError::LaunchFailed {
                command_line: options.command_line.clone(),
                status: 0x8007_0000 | (error & 0xFFFF),
                reason: "cannot create process".to_string(),
            }),
            None => Ok(ProcessId(state.launch_pid)),
        }
    }

    fn detach(&mut self, pid: ProcessId) -> Result<()>
    {
        self.record(Call::Detach(pid));
        Ok(())
    }

    fn wait_for_event(&mut self) -> Option<RawDebugEvent>
    {
        self.state().events.pop_front()
    }

    fn continue_event(&mut self, pid: ProcessId, tid: ThreadId, status: ContinueStatus) -> Result<()>
    {
        self.record(Call::Continue { pid, tid, status });
        Ok(())
    }

    fn get_context(&self, _thread: &OsHandle, tid: ThreadId) -> Result<FakeContext>
    {
        let state = self.state();
        if state.broken_contexts.contains(&tid) {
            return Err(DebuggerError::ContextFailed {
                operation: "get",
                tid,
                details: "thread is gone".to_string(),
            });
        }
        Ok(state.contexts.get(&tid).cloned().unwrap_or_default())
    }

    fn set_context(&mut self, _thread: &OsHandle, tid: ThreadId, context: &FakeContext) -> Result<()>
    {
        self.record(Call::SetContext {
            tid,
            ip: context.ip,
            single_step: context.trace,
        });
        self.state().contexts.insert(tid, context.clone());
        Ok(())
    }

    fn read_memory(&self, _process: &OsHandle, address: Address, buffer: &mut [u8]) -> Result<usize>
    {
        let state = self.state();
        let mut read = 0;
        for (offset, slot) in buffer.iter_mut().enumerate() {
            match state.memory.get(&(address.value() + offset as u64)) {
                Some(byte) => *slot = *byte,
                None => break,
            }
            read += 1;
        }
        if read == 0 {
            return Err(DebuggerError::MemoryFailed {
                address,
                details: "unmapped".to_string(),
            });
        }
        Ok(read)
    }

    fn write_memory(&mut self, _process: &OsHandle, address: Address, data: &[u8]) -> Result<usize>
    {
        self.record(Call::Write {
            address,
            data: data.to_vec(),
        });
        let mut state = self.state();
        if !state.memory.contains_key(&address.value()) {
            return Err(DebuggerError::MemoryFailed {
                address,
                details: "unmapped".to_string(),
            });
        }
        for (offset, byte) in data.iter().enumerate() {
            state.memory.insert(address.value() + offset as u64, *byte);
        }
        Ok(data.len())
    }

    fn suspend_thread(&mut self, thread: &OsHandle) -> Result<()>
    {
        self.record(Call::Suspend(thread.raw()));
        Ok(())
    }

    fn resume_thread(&mut self, thread: &OsHandle) -> Result<()>
    {
        self.record(Call::Resume(thread.raw()));
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Raw event builders
// ----------------------------------------------------------------------------

pub fn process_handle(pid: u32) -> usize
{
    0x1_0000 + pid as usize
}

pub fn thread_handle(tid: u32) -> usize
{
    0x2_0000 + tid as usize
}

fn raw(pid: u32, tid: u32, info: RawEventInfo) -> RawDebugEvent
{
    RawDebugEvent {
        pid: ProcessId(pid),
        tid: ThreadId(tid),
        info,
    }
}

pub fn create_process(pid: u32, tid: u32, start: u64) -> RawDebugEvent
{
    raw(
        pid,
        tid,
        RawEventInfo::CreateProcess {
            process: OsHandle::from_raw(process_handle(pid)),
            thread: OsHandle::from_raw(thread_handle(tid)),
            image_base: Address::from(0x40_0000),
            image_name: RemoteString {
                address: Address::ZERO,
                unicode: true,
            },
            start: Address::from(start),
            tls: Address::ZERO,
        },
    )
}

pub fn create_thread(pid: u32, tid: u32, start: u64) -> RawDebugEvent
{
    raw(
        pid,
        tid,
        RawEventInfo::CreateThread {
            handle: OsHandle::from_raw(thread_handle(tid)),
            start: Address::from(start),
            tls: Address::ZERO,
        },
    )
}

pub fn exit_thread(pid: u32, tid: u32, exit_code: u32) -> RawDebugEvent
{
    raw(pid, tid, RawEventInfo::ExitThread { exit_code })
}

pub fn exit_process(pid: u32, tid: u32, exit_code: u32) -> RawDebugEvent
{
    raw(pid, tid, RawEventInfo::ExitProcess { exit_code })
}

pub fn exception(pid: u32, tid: u32, record: ExceptionRecord, first_chance: bool) -> RawDebugEvent
{
    raw(pid, tid, RawEventInfo::Exception { record, first_chance })
}

pub fn breakpoint(pid: u32, tid: u32, at: u64) -> RawDebugEvent
{
    exception(pid, tid, ExceptionRecord::new(EXCEPTION_BREAKPOINT, Address::from(at)), true)
}

pub fn single_step(pid: u32, tid: u32, at: u64) -> RawDebugEvent
{
    exception(pid, tid, ExceptionRecord::new(EXCEPTION_SINGLE_STEP, Address::from(at)), true)
}

pub fn debug_string(pid: u32, tid: u32, address: u64, length: u16) -> RawDebugEvent
{
    raw(
        pid,
        tid,
        RawEventInfo::DebugString {
            data: RemoteString {
                address: Address::from(address),
                unicode: false,
            },
            length,
        },
    )
}

// ----------------------------------------------------------------------------
// Recording hooks
// ----------------------------------------------------------------------------

/// One interactive entry as seen by the hooks
#[derive(Debug, Clone)]
pub struct Stop
{
    pub pid: ProcessId,
    pub tid: ThreadId,
    pub reason: StopReason,
    pub description: String,
    pub first_chance: bool,
    pub ip: Address,
    /// Length of the call log when the session was entered
    pub calls_before: usize,
}

type Handler = Box<dyn FnMut(&mut StopContext<'_, ScriptedApi>) -> ResumeDecision + Send>;

/// Hooks recording every stop and answering from a queue of decisions
pub struct RecordingHooks
{
    script: Script,
    stops: Arc<Mutex<Vec<Stop>>>,
    decisions: VecDeque<ResumeDecision>,
    handler: Option<Handler>,
    pub debug_strings: Arc<Mutex<Vec<String>>>,
    pub exited: Arc<Mutex<Vec<(ProcessId, u32)>>>,
}

impl RecordingHooks
{
    pub fn new(script: &Script) -> Self
    {
        Self {
            script: script.clone(),
            stops: Arc::new(Mutex::new(Vec::new())),
            decisions: VecDeque::new(),
            handler: None,
            debug_strings: Arc::new(Mutex::new(Vec::new())),
            exited: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Answer the next stops with `decisions`, then with `Continue`.
    pub fn answering(mut self, decisions: &[ResumeDecision]) -> Self
    {
        self.decisions.extend(decisions.iter().copied());
        self
    }

    /// Let `handler` decide (it runs after the stop is recorded).
    pub fn handled_by(
        mut self,
        handler: impl FnMut(&mut StopContext<'_, ScriptedApi>) -> ResumeDecision + Send + 'static,
    ) -> Self
    {
        self.handler = Some(Box::new(handler));
        self
    }

    pub fn stops(&self) -> Arc<Mutex<Vec<Stop>>>
    {
        Arc::clone(&self.stops)
    }

    pub fn recorded(&self) -> Vec<Stop>
    {
        self.stops.lock().unwrap().clone()
    }
}

impl SessionHooks<ScriptedApi> for RecordingHooks
{
    fn enter_interactive(&mut self, stop: &mut StopContext<'_, ScriptedApi>) -> ResumeDecision
    {
        let current = stop.current();
        self.stops.lock().unwrap().push(Stop {
            pid: current.pid,
            tid: current.tid,
            reason: stop.reason().clone(),
            description: stop.description().to_string(),
            first_chance: stop.first_chance(),
            ip: stop.context().instruction_pointer(),
            calls_before: self.script.calls().len(),
        });
        if let Some(handler) = self.handler.as_mut() {
            return handler(stop);
        }
        self.decisions.pop_front().unwrap_or(ResumeDecision::Continue)
    }

    fn on_debug_string(&mut self, _thread: wdbg_core::events::ThreadKey, text: &str)
    {
        self.debug_strings.lock().unwrap().push(text.to_string());
    }

    fn on_process_exited(&mut self, pid: ProcessId, exit_code: u32)
    {
        self.exited.lock().unwrap().push((pid, exit_code));
    }
}
