//! Debug event records and their decoding.
//!
//! Backends hand the event loop a [`RawDebugEvent`]: the OS record with ids,
//! handles and remote pointers, nothing resolved. [`decode`] turns it into a
//! [`DebugEvent`] whose owning process and thread are known to be tracked, and
//! whose display strings have been fetched from debuggee memory.
//!
//! Events for entities the registry does not know come back as a [`Miss`].
//! That is an expected outcome (the OS keeps reporting on reaped threads), not
//! an error; the event loop logs it and drops the event.

use std::fmt;

use tracing::debug;

use crate::api::DebugApi;
use crate::constants;
use crate::exception::ExceptionRecord;
use crate::registry::{Process, Registry};
use crate::types::{Address, OsHandle, ProcessId, ThreadId};

/// Pointer to a string in debuggee memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteString
{
    /// Where the string (or, for image names, the pointer to it) lives
    pub address: Address,
    /// UTF-16 when set, ANSI otherwise
    pub unicode: bool,
}

/// Payload of a raw debug event
#[derive(Debug)]
pub enum RawEventInfo
{
    /// `EXCEPTION_DEBUG_EVENT`
    Exception
    {
        /// Exception record
        record: ExceptionRecord,
        /// Delivered before the debuggee's own handlers ran
        first_chance: bool,
    },
    /// `CREATE_THREAD_DEBUG_EVENT`
    CreateThread
    {
        /// Thread handle
        handle: OsHandle,
        /// Start routine (null when the OS did not say)
        start: Address,
        /// Thread-local storage base
        tls: Address,
    },
    /// `CREATE_PROCESS_DEBUG_EVENT`
    CreateProcess
    {
        /// Process handle
        process: OsHandle,
        /// Initial thread handle
        thread: OsHandle,
        /// Main image load address
        image_base: Address,
        /// Slot holding a pointer to the image name (may be null)
        image_name: RemoteString,
        /// Initial thread start routine (null for loader-initialized threads)
        start: Address,
        /// Initial thread TLS base
        tls: Address,
    },
    /// `EXIT_THREAD_DEBUG_EVENT`
    ExitThread
    {
        /// Thread exit code
        exit_code: u32,
    },
    /// `EXIT_PROCESS_DEBUG_EVENT`
    ExitProcess
    {
        /// Process exit code
        exit_code: u32,
    },
    /// `LOAD_DLL_DEBUG_EVENT`
    LoadDll
    {
        /// Module load address
        base: Address,
        /// Slot holding a pointer to the module name (may be null)
        image_name: RemoteString,
    },
    /// `UNLOAD_DLL_DEBUG_EVENT`
    UnloadDll
    {
        /// Module load address
        base: Address,
    },
    /// `OUTPUT_DEBUG_STRING_EVENT`
    DebugString
    {
        /// The string itself
        data: RemoteString,
        /// Length in characters, terminator included
        length: u16,
    },
    /// `RIP_EVENT`
    Rip
    {
        /// Error code
        error: u32,
        /// `SLE_*` severity
        kind: u32,
    },
    /// Any event code this core does not know
    Unknown(u32),
}

/// One OS debug event, as delivered by the backend
#[derive(Debug)]
pub struct RawDebugEvent
{
    /// Process the event belongs to
    pub pid: ProcessId,
    /// Thread that raised the event
    pub tid: ThreadId,
    /// Event payload
    pub info: RawEventInfo,
}

impl RawDebugEvent
{
    /// OS event code of this record.
    pub fn code(&self) -> u32
    {
        match &self.info {
            RawEventInfo::Exception { .. } => constants::EXCEPTION_DEBUG_EVENT,
            RawEventInfo::CreateThread { .. } => constants::CREATE_THREAD_DEBUG_EVENT,
            RawEventInfo::CreateProcess { .. } => constants::CREATE_PROCESS_DEBUG_EVENT,
            RawEventInfo::ExitThread { .. } => constants::EXIT_THREAD_DEBUG_EVENT,
            RawEventInfo::ExitProcess { .. } => constants::EXIT_PROCESS_DEBUG_EVENT,
            RawEventInfo::LoadDll { .. } => constants::LOAD_DLL_DEBUG_EVENT,
            RawEventInfo::UnloadDll { .. } => constants::UNLOAD_DLL_DEBUG_EVENT,
            RawEventInfo::DebugString { .. } => constants::OUTPUT_DEBUG_STRING_EVENT,
            RawEventInfo::Rip { .. } => constants::RIP_EVENT,
            RawEventInfo::Unknown(code) => *code,
        }
    }

    /// Short name for log lines.
    pub fn kind(&self) -> &'static str
    {
        match &self.info {
            RawEventInfo::Exception { .. } => "exception",
            RawEventInfo::CreateThread { .. } => "create thread",
            RawEventInfo::CreateProcess { .. } => "create process",
            RawEventInfo::ExitThread { .. } => "exit thread",
            RawEventInfo::ExitProcess { .. } => "exit process",
            RawEventInfo::LoadDll { .. } => "load dll",
            RawEventInfo::UnloadDll { .. } => "unload dll",
            RawEventInfo::DebugString { .. } => "output debug string",
            RawEventInfo::Rip { .. } => "rip",
            RawEventInfo::Unknown(_) => "unknown",
        }
    }
}

/// A (pid, tid) pair known to be tracked when the event was decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadKey
{
    /// Owning process
    pub pid: ProcessId,
    /// Thread
    pub tid: ThreadId,
}

impl fmt::Display for ThreadKey
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}:{}", self.pid, self.tid)
    }
}

/// Severity of a RIP event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RipKind
{
    /// `SLE_ERROR`
    Error,
    /// `SLE_MINORERROR`
    MinorError,
    /// `SLE_WARNING`
    Warning,
    /// Anything else
    Unknown(u32),
}

impl From<u32> for RipKind
{
    fn from(value: u32) -> Self
    {
        match value {
            1 => RipKind::Error,
            2 => RipKind::MinorError,
            3 => RipKind::Warning,
            other => RipKind::Unknown(other),
        }
    }
}

impl fmt::Display for RipKind
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            RipKind::Error => write!(f, "error"),
            RipKind::MinorError => write!(f, "minor error"),
            RipKind::Warning => write!(f, "warning"),
            RipKind::Unknown(_) => write!(f, "unknown"),
        }
    }
}

/// A decoded debug event with its owner resolved
#[derive(Debug)]
pub enum DebugEvent
{
    /// Hardware or software exception on a tracked thread
    Exception
    {
        /// Raising thread
        thread: ThreadKey,
        /// Exception record
        record: ExceptionRecord,
        /// Delivered before the debuggee's own handlers ran
        first_chance: bool,
    },
    /// New thread in a tracked process
    ThreadCreated
    {
        /// Owning process
        pid: ProcessId,
        /// New thread
        tid: ThreadId,
        /// Thread handle
        handle: OsHandle,
        /// Start routine, if the OS reported one
        start: Option<Address>,
        /// TLS base
        tls: Address,
    },
    /// Tracked thread exited
    ThreadExited
    {
        /// Exiting thread
        thread: ThreadKey,
        /// Exit code
        exit_code: u32,
    },
    /// New process (tracked or not yet)
    ProcessCreated
    {
        /// Process id
        pid: ProcessId,
        /// Process handle
        handle: OsHandle,
        /// Initial thread id
        tid: ThreadId,
        /// Initial thread handle
        thread_handle: OsHandle,
        /// Initial thread start routine, if known
        start: Option<Address>,
        /// Initial thread TLS base
        tls: Address,
        /// Main image name (empty if unreadable)
        image_name: String,
        /// Main image load address
        image_base: Address,
    },
    /// Tracked process exited
    ProcessExited
    {
        /// Process id
        pid: ProcessId,
        /// Exit code
        exit_code: u32,
    },
    /// Module mapped
    ModuleLoaded
    {
        /// Thread that triggered the load
        thread: ThreadKey,
        /// Module name (empty if unreadable)
        name: String,
        /// Load address
        base: Address,
    },
    /// Module unmapped
    ModuleUnloaded
    {
        /// Thread that triggered the unload
        thread: ThreadKey,
        /// Module name from the process's module table (empty if unknown)
        name: String,
        /// Load address
        base: Address,
    },
    /// `OutputDebugString` from the debuggee
    DebugString
    {
        /// Calling thread
        thread: ThreadKey,
        /// Text, trailing terminators trimmed
        text: String,
    },
    /// System debugging error
    Rip
    {
        /// Error code
        error: u32,
        /// Severity
        kind: RipKind,
    },
    /// Event code this core does not know
    Unknown(u32),
}

/// Why a raw event could not be attributed to a tracked entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Miss
{
    /// No tracked process with this id
    UnknownProcess(ProcessId),
    /// The process is tracked but the thread is not
    UnknownThread(ProcessId, ThreadId),
}

impl fmt::Display for Miss
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Miss::UnknownProcess(pid) => write!(f, "unknown process {pid}"),
            Miss::UnknownThread(pid, tid) => write!(f, "unknown thread {pid}:{tid}"),
        }
    }
}

/// Decode one raw event against the registry.
///
/// Resolution order is process first, then thread. Only `CreateProcess` may
/// name a process the registry does not know yet. Display strings are read
/// through `api`; unreadable strings decode as empty, never as a miss.
pub fn decode<A: DebugApi>(raw: RawDebugEvent, registry: &Registry, api: &A) -> Result<DebugEvent, Miss>
{
    let RawDebugEvent { pid, tid, info } = raw;

    let find_process = || registry.find_process(pid).ok_or(Miss::UnknownProcess(pid));
    let resolve_thread = |process: &Process| {
        process
            .find_thread(tid)
            .map(|_| ThreadKey { pid, tid })
            .ok_or(Miss::UnknownThread(pid, tid))
    };

    let event = match info {
        RawEventInfo::CreateProcess {
            process,
            thread,
            image_base,
            image_name,
            start,
            tls,
        } => {
            let image_name = read_indirect_string(api, &process, image_name);
            DebugEvent::ProcessCreated {
                pid,
                handle: process,
                tid,
                thread_handle: thread,
                start: start.non_null(),
                tls,
                image_name,
                image_base,
            }
        }
        RawEventInfo::Unknown(code) => DebugEvent::Unknown(code),
        RawEventInfo::Exception { record, first_chance } => DebugEvent::Exception {
            thread: resolve_thread(find_process()?)?,
            record,
            first_chance,
        },
        RawEventInfo::CreateThread { handle, start, tls } => {
            find_process()?;
            DebugEvent::ThreadCreated {
                pid,
                tid,
                handle,
                start: start.non_null(),
                tls,
            }
        }
        RawEventInfo::ExitThread { exit_code } => DebugEvent::ThreadExited {
            thread: resolve_thread(find_process()?)?,
            exit_code,
        },
        RawEventInfo::ExitProcess { exit_code } => {
            find_process()?;
            DebugEvent::ProcessExited { pid, exit_code }
        }
        RawEventInfo::LoadDll { base, image_name } => {
            let process = find_process()?;
            DebugEvent::ModuleLoaded {
                thread: resolve_thread(process)?,
                name: read_indirect_string(api, process.handle(), image_name),
                base,
            }
        }
        RawEventInfo::UnloadDll { base } => {
            let process = find_process()?;
            DebugEvent::ModuleUnloaded {
                thread: resolve_thread(process)?,
                name: process.module(base).map(|module| module.name.clone()).unwrap_or_default(),
                base,
            }
        }
        RawEventInfo::DebugString { data, length } => {
            let process = find_process()?;
            let thread = resolve_thread(process)?;
            let chars = usize::from(length).min(constants::MAX_DEBUG_STRING);
            let text = read_string(api, process.handle(), data.address, chars, data.unicode);
            DebugEvent::DebugString {
                thread,
                text: text.trim_end_matches(['\0', '\r', '\n']).to_string(),
            }
        }
        RawEventInfo::Rip { error, kind } => {
            find_process()?;
            DebugEvent::Rip {
                error,
                kind: RipKind::from(kind),
            }
        }
    };
    Ok(event)
}

/// Read a string whose address is stored in a pointer-sized slot.
///
/// The loader reports image names this way. A null slot, a null pointer or an
/// unreadable page all yield an empty string.
pub fn read_indirect_string<A: DebugApi>(api: &A, process: &OsHandle, slot: RemoteString) -> String
{
    if slot.address.is_null() {
        return String::new();
    }

    let width = api.architecture().pointer_width();
    let mut raw = [0u8; 8];
    match api.read_memory(process, slot.address, &mut raw[..width]) {
        Ok(read) if read == width => {}
        Ok(read) => {
            debug!(address = %slot.address, read, "short read of image name pointer");
            return String::new();
        }
        Err(err) => {
            debug!(address = %slot.address, "cannot read image name pointer: {err}");
            return String::new();
        }
    }

    let pointer = if width == 4 {
        u64::from(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    } else {
        u64::from_le_bytes(raw)
    };
    read_string(api, process, Address::from(pointer), constants::MAX_PATH, slot.unicode)
}

/// Read at most `max_chars` characters of a NUL-terminated string.
///
/// A read that fails as a whole is retried up to the end of the page, since
/// short strings near the end of a mapping are common and the OS refuses
/// reads that cross into an unmapped page.
pub fn read_string<A: DebugApi>(api: &A, process: &OsHandle, address: Address, max_chars: usize, unicode: bool)
    -> String
{
    const PAGE_SIZE: u64 = 0x1000;

    if address.is_null() || max_chars == 0 {
        return String::new();
    }

    let unit = if unicode { 2 } else { 1 };
    let mut buffer = vec![0u8; max_chars * unit];
    let read = match api.read_memory(process, address, &mut buffer) {
        Ok(read) => read,
        Err(err) => {
            let to_page_end = (PAGE_SIZE - address.value() % PAGE_SIZE) as usize;
            if to_page_end >= buffer.len() {
                debug!(address = %address, "cannot read string: {err}");
                return String::new();
            }
            match api.read_memory(process, address, &mut buffer[..to_page_end]) {
                Ok(read) => read,
                Err(err) => {
                    debug!(address = %address, "cannot read string: {err}");
                    return String::new();
                }
            }
        }
    };
    buffer.truncate(read);
    decode_string(&buffer, unicode)
}

fn decode_string(bytes: &[u8], unicode: bool) -> String
{
    if unicode {
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .take_while(|&unit| unit != 0)
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        let end = bytes.iter().position(|&byte| byte == 0).unwrap_or(bytes.len());
        String::from_utf8_lossy(&bytes[..end]).into_owned()
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_decode_ansi_stops_at_nul()
    {
        assert_eq!(decode_string(b"kernel32.dll\0garbage", false), "kernel32.dll");
        assert_eq!(decode_string(b"no terminator", false), "no terminator");
    }

    #[test]
    fn test_decode_utf16()
    {
        let bytes: Vec<u8> = "ntdll.dll\0x"
            .encode_utf16()
            .flat_map(u16::to_le_bytes)
            .collect();
        assert_eq!(decode_string(&bytes, true), "ntdll.dll");
    }

    #[test]
    fn test_rip_kind_display()
    {
        assert_eq!(RipKind::from(1).to_string(), "error");
        assert_eq!(RipKind::from(2).to_string(), "minor error");
        assert_eq!(RipKind::from(3).to_string(), "warning");
        assert_eq!(RipKind::from(42).to_string(), "unknown");
    }

    #[test]
    fn test_raw_event_codes()
    {
        let raw = RawDebugEvent {
            pid: ProcessId(1),
            tid: ThreadId(1),
            info: RawEventInfo::ExitThread { exit_code: 0 },
        };
        assert_eq!(raw.code(), constants::EXIT_THREAD_DEBUG_EVENT);
        assert_eq!(raw.kind(), "exit thread");

        let unknown = RawDebugEvent {
            pid: ProcessId(1),
            tid: ThreadId(1),
            info: RawEventInfo::Unknown(77),
        };
        assert_eq!(unknown.code(), 77);
    }
}
