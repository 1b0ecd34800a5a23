//! # Attach and Launch
//!
//! Front doors of a debugging session. Each one moves the backend onto a
//! dedicated monitor thread, which then runs the [`EventLoop`] so the caller
//! is never blocked by the debuggee.
//!
//! On Windows the thread that attached to (or created) a debuggee is the only
//! one allowed to wait for its events, so `attach`/`create_process` happen on
//! the monitor thread too.
//!
//! ## Failure
//!
//! - [`attach`] is best-effort: a refused attach is logged and the monitor
//!   ends with [`SessionEnd::AttachFailed`]; nothing is raised.
//! - [`launch`] blocks until the process exists or creation failed, and a
//!   failure comes back as a [`LaunchError`] with its own OS-style status.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};

use thiserror::Error;
use tracing::{info, info_span, warn};

use crate::api::{DebugApi, LaunchOptions};
use crate::config::SessionConfig;
use crate::constants::STATUS_LAUNCH_ABANDONED;
use crate::error::{DebuggerError, Result};
use crate::session::{EventLoop, SessionEnd, SessionHooks, SessionSummary};
use crate::types::ProcessId;

/// Handle on a running monitor thread
#[derive(Debug)]
pub struct Monitor
{
    pid: ProcessId,
    detach: Arc<AtomicBool>,
    thread: JoinHandle<SessionSummary>,
}

impl Monitor
{
    /// The debuggee the session was started for.
    pub fn pid(&self) -> ProcessId
    {
        self.pid
    }

    /// Ask the session to detach. Takes effect at the next debug event.
    pub fn request_detach(&self)
    {
        self.detach.store(true, Ordering::Release);
    }

    /// Whether a detach was requested.
    pub fn detach_requested(&self) -> bool
    {
        self.detach.load(Ordering::Acquire)
    }

    /// A handle that can request the detach after the monitor was moved
    /// away (e.g. into a task waiting on [`Monitor::join`]).
    pub fn detach_handle(&self) -> DetachHandle
    {
        DetachHandle(Arc::clone(&self.detach))
    }

    /// Whether the monitor thread has ended.
    pub fn is_finished(&self) -> bool
    {
        self.thread.is_finished()
    }

    /// Wait for the session to end.
    ///
    /// ## Errors
    ///
    /// `MonitorFailed` if the monitor thread panicked.
    pub fn join(self) -> Result<SessionSummary>
    {
        self.thread
            .join()
            .map_err(|panic| DebuggerError::MonitorFailed(panic_message(panic.as_ref())))
    }
}

/// Cloneable detach switch of one monitor
#[derive(Debug, Clone)]
pub struct DetachHandle(Arc<AtomicBool>);

impl DetachHandle
{
    /// Ask the session to detach at its next debug event.
    pub fn request(&self)
    {
        self.0.store(true, Ordering::Release);
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String
{
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic".to_string()
    }
}

/// Launch failure, distinct from anything a running session reports
#[derive(Debug, Error)]
#[error("launch failed with status {status:#010x}: {source}")]
pub struct LaunchError
{
    status: u32,
    #[source]
    source: DebuggerError,
}

impl LaunchError
{
    /// OS-style status code of the failure.
    pub fn status(&self) -> u32
    {
        self.status
    }

    /// Underlying error.
    pub fn error(&self) -> &DebuggerError
    {
        &self.source
    }
}

impl From<DebuggerError> for LaunchError
{
    fn from(source: DebuggerError) -> Self
    {
        let status = match &source {
            DebuggerError::LaunchFailed { status, .. } if *status != 0 => *status,
            _ => STATUS_LAUNCH_ABANDONED,
        };
        Self { status, source }
    }
}

/// Attach to a running process and debug it on a monitor thread.
///
/// Returns as soon as the monitor thread runs. Whether the attach itself
/// worked shows up in the summary returned by [`Monitor::join`].
///
/// ## Errors
///
/// `Io` if the monitor thread cannot be spawned.
pub fn attach<A, H>(api: A, hooks: H, config: SessionConfig, pid: ProcessId) -> Result<Monitor>
where
    A: DebugApi,
    H: SessionHooks<A> + Send + 'static,
{
    let detach = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&detach);

    let thread = thread::Builder::new()
        .name(format!("wdbg-monitor-{pid}"))
        .spawn(move || {
            let _span = info_span!("session", pid = %pid).entered();
            let mut api = api;
            if let Err(err) = api.attach(pid) {
                warn!(pid = %pid, "{err}");
                return SessionSummary::never_started(SessionEnd::AttachFailed);
            }
            let mut session = EventLoop::new(api, hooks, config).with_detach_flag(flag);
            session.register_attach(pid);
            session.run()
        })?;

    Ok(Monitor { pid, detach, thread })
}

/// Create a process under debug control and debug it on a monitor thread.
///
/// Blocks until the process was created (or creation failed). The event loop
/// only starts on success.
///
/// ## Errors
///
/// [`LaunchError`] carrying the OS status of the failed creation, or
/// `STATUS_LAUNCH_ABANDONED` when the monitor thread could not be started or
/// died before reporting.
pub fn launch<A, H>(
    api: A,
    hooks: H,
    config: SessionConfig,
    options: LaunchOptions,
) -> std::result::Result<Monitor, LaunchError>
where
    A: DebugApi,
    H: SessionHooks<A> + Send + 'static,
{
    if options.command_line.trim().is_empty() {
        return Err(DebuggerError::InvalidArgument("empty command line".to_string()).into());
    }

    let detach = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&detach);
    let (created_tx, created_rx) = mpsc::sync_channel::<Result<ProcessId>>(1);

    let thread = thread::Builder::new()
        .name("wdbg-monitor-launch".to_string())
        .spawn(move || {
            let mut api = api;
            let pid = match api.create_process(&options) {
                Ok(pid) => pid,
                Err(err) => {
                    let _ = created_tx.send(Err(err));
                    return SessionSummary::never_started(SessionEnd::LaunchFailed);
                }
            };
            let _span = info_span!("session", pid = %pid).entered();
            info!(pid = %pid, command_line = %options.command_line, "process created under debugger");
            if created_tx.send(Ok(pid)).is_err() {
                warn!(pid = %pid, "launcher went away before the process was reported");
            }
            EventLoop::new(api, hooks, config).with_detach_flag(flag).run()
        })
        .map_err(DebuggerError::from)?;

    match created_rx.recv() {
        Ok(Ok(pid)) => Ok(Monitor { pid, detach, thread }),
        Ok(Err(err)) => {
            let _ = thread.join();
            Err(err.into())
        }
        Err(_) => {
            let reason = match thread.join() {
                Ok(_) => "monitor thread ended without reporting".to_string(),
                Err(panic) => panic_message(panic.as_ref()),
            };
            Err(DebuggerError::MonitorFailed(reason).into())
        }
    }
}
