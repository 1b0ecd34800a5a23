//! `DEBUG_EVENT` to [`RawDebugEvent`] translation.
//!
//! Pointers become [`Address`]es and handles become [`OsHandle`]s; nothing is
//! dereferenced here. The image file handles (`hFile`) carried by process
//! creation and DLL load events belong to the debugger and are closed on the
//! spot, since nothing in the core reads image files.

use std::ffi::c_void;

use windows_sys::Win32::Foundation::{CloseHandle, HANDLE};
use windows_sys::Win32::System::Diagnostics::Debug::{DEBUG_EVENT, EXCEPTION_RECORD};

use crate::constants::*;
use crate::events::{RawDebugEvent, RawEventInfo, RemoteString};
use crate::exception::ExceptionRecord;
use crate::types::{Address, OsHandle, ProcessId, ThreadId};

fn address(pointer: *mut c_void) -> Address
{
    Address::from(pointer as usize as u64)
}

fn handle(raw: HANDLE) -> OsHandle
{
    OsHandle::from_raw(raw as usize)
}

fn start_routine(routine: Option<unsafe extern "system" fn(*mut c_void) -> u32>) -> Address
{
    routine.map_or(Address::ZERO, |routine| Address::from(routine as usize as u64))
}

fn close_file(file: HANDLE)
{
    if !file.is_null() {
        // SAFETY: the handle was handed to us by the debug event and is
        // closed exactly once.
        unsafe { CloseHandle(file) };
    }
}

fn exception_record(record: &EXCEPTION_RECORD) -> ExceptionRecord
{
    let count = (record.NumberParameters as usize).min(record.ExceptionInformation.len());
    let parameters: Vec<u64> = record.ExceptionInformation[..count].iter().map(|&p| p as u64).collect();

    let mut translated = ExceptionRecord::new(record.ExceptionCode as u32, address(record.ExceptionAddress))
        .with_parameters(&parameters);
    translated.flags = record.ExceptionFlags;
    translated
}

/// Translate one OS debug event.
pub(crate) fn translate(event: &DEBUG_EVENT) -> RawDebugEvent
{
    let pid = ProcessId(event.dwProcessId);
    let tid = ThreadId(event.dwThreadId);

    // SAFETY: `dwDebugEventCode` selects the active member of the union.
    let info = unsafe {
        match event.dwDebugEventCode {
            EXCEPTION_DEBUG_EVENT => {
                let info = &event.u.Exception;
                RawEventInfo::Exception {
                    record: exception_record(&info.ExceptionRecord),
                    first_chance: info.dwFirstChance != 0,
                }
            }
            CREATE_THREAD_DEBUG_EVENT => {
                let info = &event.u.CreateThread;
                RawEventInfo::CreateThread {
                    handle: handle(info.hThread),
                    start: start_routine(info.lpStartAddress),
                    tls: address(info.lpThreadLocalBase),
                }
            }
            CREATE_PROCESS_DEBUG_EVENT => {
                let info = &event.u.CreateProcessInfo;
                close_file(info.hFile);
                RawEventInfo::CreateProcess {
                    process: handle(info.hProcess),
                    thread: handle(info.hThread),
                    image_base: address(info.lpBaseOfImage),
                    image_name: RemoteString {
                        address: address(info.lpImageName),
                        unicode: info.fUnicode != 0,
                    },
                    start: start_routine(info.lpStartAddress),
                    tls: address(info.lpThreadLocalBase),
                }
            }
            EXIT_THREAD_DEBUG_EVENT => RawEventInfo::ExitThread {
                exit_code: event.u.ExitThread.dwExitCode,
            },
            EXIT_PROCESS_DEBUG_EVENT => RawEventInfo::ExitProcess {
                exit_code: event.u.ExitProcess.dwExitCode,
            },
            LOAD_DLL_DEBUG_EVENT => {
                let info = &event.u.LoadDll;
                close_file(info.hFile);
                RawEventInfo::LoadDll {
                    base: address(info.lpBaseOfDll),
                    image_name: RemoteString {
                        address: address(info.lpImageName),
                        unicode: info.fUnicode != 0,
                    },
                }
            }
            UNLOAD_DLL_DEBUG_EVENT => RawEventInfo::UnloadDll {
                base: address(event.u.UnloadDll.lpBaseOfDll),
            },
            OUTPUT_DEBUG_STRING_EVENT => {
                let info = &event.u.DebugString;
                RawEventInfo::DebugString {
                    data: RemoteString {
                        address: Address::from(info.lpDebugStringData as usize as u64),
                        unicode: info.fUnicode != 0,
                    },
                    length: info.nDebugStringLength,
                }
            }
            RIP_EVENT => RawEventInfo::Rip {
                error: event.u.RipInfo.dwError,
                kind: event.u.RipInfo.dwType,
            },
            other => RawEventInfo::Unknown(other),
        }
    };

    RawDebugEvent { pid, tid, info }
}
