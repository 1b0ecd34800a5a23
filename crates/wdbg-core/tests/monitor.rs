//! Attach and launch front doors

mod common;

use std::sync::mpsc;

use common::*;
use wdbg_core::api::LaunchOptions;
use wdbg_core::constants::STATUS_LAUNCH_ABANDONED;
use wdbg_core::error::DebuggerError;
use wdbg_core::session::{ResumeDecision, SessionEnd, StopReason};
use wdbg_core::types::{Architecture, ProcessId};
use wdbg_core::{attach, launch, SessionConfig};

#[test]
fn test_launch_failure_returns_distinct_status()
{
    let (api, script) = ScriptedApi::new(Architecture::X86_64);
    script.fail_launch(2);
    let hooks = RecordingHooks::new(&script);

    let error = launch(api, hooks, SessionConfig::default(), LaunchOptions::new("missing.exe")).unwrap_err();

    assert_eq!(error.status(), 0x8007_0002);
    assert!(matches!(error.error(), DebuggerError::LaunchFailed { .. }));
    // The event loop never ran: nothing was waited on or continued.
    assert_eq!(script.calls(), vec![Call::CreateProcess("missing.exe".to_string())]);
}

#[test]
fn test_launch_rejects_empty_command_line()
{
    let (api, script) = ScriptedApi::new(Architecture::X86_64);
    let hooks = RecordingHooks::new(&script);

    let error = launch(api, hooks, SessionConfig::default(), LaunchOptions::new("  ")).unwrap_err();

    assert_eq!(error.status(), STATUS_LAUNCH_ABANDONED);
    assert!(matches!(error.error(), DebuggerError::InvalidArgument(_)));
    assert!(script.calls().is_empty());
}

#[test]
fn test_launch_runs_session_to_exit()
{
    let (api, script) = ScriptedApi::new(Architecture::X86_64);
    script.launch_as(77).map(0x40_1000, &[0x55]).set_ip(1, 0x40_1001);
    script
        .push(create_process(77, 1, 0x40_1000))
        .push(breakpoint(77, 1, 0x40_1000))
        .push(exit_process(77, 1, 0));
    let hooks = RecordingHooks::new(&script);
    let stops = hooks.stops();

    let monitor = launch(api, hooks, SessionConfig::default(), LaunchOptions::new("app.exe")).unwrap();
    assert_eq!(monitor.pid(), ProcessId(77));
    let summary = monitor.join().unwrap();

    assert_eq!(summary.end, SessionEnd::AllExited);
    assert_eq!(summary.exit_code(ProcessId(77)), Some(0));
    let stops = stops.lock().unwrap();
    assert_eq!(stops.len(), 1);
    assert!(matches!(stops[0].reason, StopReason::ThreadStart(_)));
}

#[test]
fn test_refused_attach_ends_quietly()
{
    let (api, script) = ScriptedApi::new(Architecture::X86_64);
    script.refuse_attach();
    let hooks = RecordingHooks::new(&script);

    let monitor = attach(api, hooks, SessionConfig::default(), ProcessId(4242)).unwrap();
    let summary = monitor.join().unwrap();

    assert_eq!(summary.end, SessionEnd::AttachFailed);
    assert_eq!(summary.events, 0);
    assert_eq!(script.calls(), vec![Call::Attach(ProcessId(4242))]);
}

#[test]
fn test_detach_request_ends_attached_session()
{
    let (api, script) = ScriptedApi::new(Architecture::X86_64);
    script.set_ip(0x100, 0x7000_0001);
    script
        .push(create_process(4242, 0x100, 0x50_0000))
        .push(breakpoint(4242, 0x100, 0x7000_0000))
        .push(exit_process(4242, 0x100, 0));

    let (stopped_tx, stopped_rx) = mpsc::channel::<()>();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let hooks = RecordingHooks::new(&script).handled_by(move |_| {
        let _ = stopped_tx.send(());
        let _ = release_rx.recv();
        ResumeDecision::Continue
    });

    let monitor = attach(api, hooks, SessionConfig::default(), ProcessId(4242)).unwrap();
    stopped_rx.recv().unwrap();
    monitor.request_detach();
    assert!(monitor.detach_requested());
    release_tx.send(()).unwrap();
    let summary = monitor.join().unwrap();

    assert_eq!(summary.end, SessionEnd::Detached);
    assert_eq!(summary.events, 2);
    let calls = script.calls();
    assert_eq!(calls.first(), Some(&Call::Attach(ProcessId(4242))));
    assert_eq!(calls.last(), Some(&Call::Detach(ProcessId(4242))));
}
