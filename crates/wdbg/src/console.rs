//! # Console
//!
//! The stop prompt shown whenever the session enters interactive mode.
//!
//! Commands are read through a line editor while the debuggee is stopped;
//! history carries over from one stop to the next:
//!
//! ```text
//! c | cont            resume
//! pass                hand the exception to the debuggee
//! s | step [n]        single-step n instructions
//! n | next [n]        step over n instructions
//! b | break <addr>    set a breakpoint (tb for a temporary one)
//! d | delete <id>     remove a breakpoint
//! bl                  list breakpoints
//! t | threads         list threads of the stopped process
//! m | modules         list modules of the stopped process
//! r | regs [tid]      show instruction and stack pointer
//! x <addr> [len]      dump memory
//! q | detach          detach and let the debuggee run
//! ```
//!
//! Ctrl-C or Ctrl-D at the prompt detaches. In batch mode no prompt is
//! shown: stops are printed and the session resumes on its own.

use std::io::BufRead;

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use wdbg_core::events::ThreadKey;
use wdbg_core::registry::{ExecMode, Module, Process};
use wdbg_core::{
    Address, Architecture, BreakpointId, DebugApi, ExecutionContext, ProcessId, ResumeDecision, SessionHooks, StopContext,
    StopReason, ThreadId,
};
use wdbg_utils::{debug, warn};

/// Largest memory dump a single `x` command prints
pub const MAX_DUMP: usize = 256;
const DEFAULT_DUMP: usize = 16;

/// One parsed prompt line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command
{
    /// Blank line; prompt again.
    Empty,
    /// Resume the stopped event.
    Resume(ResumeDecision),
    /// Arm a breakpoint.
    Break
    {
        /// Trap address
        address: Address,
        /// Removed after its first hit
        temporary: bool,
    },
    /// Remove a breakpoint by id.
    Delete(BreakpointId),
    /// List breakpoints.
    ListBreakpoints,
    /// List threads of the stopped process.
    Threads,
    /// List modules of the stopped process.
    Modules,
    /// Show registers of a thread, the stopped one by default.
    Registers(Option<ThreadId>),
    /// Dump memory.
    Examine
    {
        /// First byte
        address: Address,
        /// Bytes to print
        len: usize,
    },
    /// Print the command summary.
    Help,
}

/// Errors from parsing a prompt line
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError
{
    /// First word is not a command
    #[error("unknown command '{0}', try 'help'")]
    Unknown(String),

    /// A required argument is missing
    #[error("missing {0}")]
    MissingArgument(&'static str),

    /// Argument is not a number
    #[error("not a number: {0}")]
    InvalidNumber(String),

    /// Argument is outside the accepted range
    #[error("{0}")]
    OutOfRange(String),
}

impl Command
{
    /// Parse one prompt line.
    ///
    /// ## Errors
    ///
    /// See [`CommandError`].
    pub fn parse(line: &str) -> Result<Self, CommandError>
    {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Ok(Command::Empty);
        };

        let command = match verb {
            "c" | "cont" | "continue" => Command::Resume(ResumeDecision::Continue),
            "pass" => Command::Resume(ResumeDecision::PassToApplication),
            "s" | "step" => Command::Resume(ResumeDecision::Step {
                mode: ExecMode::StepInto,
                count: step_count(words.next())?,
            }),
            "n" | "next" => Command::Resume(ResumeDecision::Step {
                mode: ExecMode::StepOver,
                count: step_count(words.next())?,
            }),
            "q" | "quit" | "detach" => Command::Resume(ResumeDecision::Detach),
            "b" | "break" | "tb" => Command::Break {
                address: Address::from(parse_number(words.next().ok_or(CommandError::MissingArgument("address"))?)?),
                temporary: verb == "tb",
            },
            "d" | "delete" => Command::Delete(BreakpointId::from_raw(parse_number(
                words.next().ok_or(CommandError::MissingArgument("breakpoint id"))?,
            )?)),
            "bl" | "breakpoints" => Command::ListBreakpoints,
            "t" | "threads" => Command::Threads,
            "m" | "modules" => Command::Modules,
            "r" | "regs" | "registers" => match words.next() {
                Some(word) => {
                    let tid = parse_number(word)?;
                    let tid = u32::try_from(tid).map_err(|_| CommandError::OutOfRange(format!("thread id {word} too large")))?;
                    Command::Registers(Some(ThreadId(tid)))
                }
                None => Command::Registers(None),
            },
            "x" | "examine" => {
                let address = parse_number(words.next().ok_or(CommandError::MissingArgument("address"))?)?;
                let len = match words.next() {
                    Some(word) => usize::try_from(parse_number(word)?)
                        .map_err(|_| CommandError::OutOfRange(format!("length {word} too large")))?,
                    None => DEFAULT_DUMP,
                };
                if len == 0 || len > MAX_DUMP {
                    return Err(CommandError::OutOfRange(format!("length must be 1..={MAX_DUMP}")));
                }
                Command::Examine {
                    address: Address::from(address),
                    len,
                }
            }
            "h" | "help" | "?" => Command::Help,
            other => return Err(CommandError::Unknown(other.to_string())),
        };
        Ok(command)
    }
}

/// Parse `0x`-prefixed hex or plain decimal.
pub fn parse_number(word: &str) -> Result<u64, CommandError>
{
    let parsed = match word.strip_prefix("0x").or_else(|| word.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => word.parse(),
    };
    parsed.map_err(|_| CommandError::InvalidNumber(word.to_string()))
}

fn step_count(word: Option<&str>) -> Result<u32, CommandError>
{
    let Some(word) = word else {
        return Ok(1);
    };
    let count = parse_number(word)?;
    if count == 0 {
        return Err(CommandError::OutOfRange("step count must be at least 1".to_string()));
    }
    u32::try_from(count).map_err(|_| CommandError::OutOfRange(format!("step count {word} too large")))
}

/// Format a memory dump, sixteen bytes per line with an ASCII column.
pub fn hex_dump(address: Address, bytes: &[u8]) -> String
{
    let mut out = String::new();
    for (row, chunk) in bytes.chunks(16).enumerate() {
        let line_address = address.saturating_add((row * 16) as u64);
        let hex: Vec<String> = chunk.iter().map(|byte| format!("{byte:02x}")).collect();
        let ascii: String = chunk
            .iter()
            .map(|&byte| if byte.is_ascii_graphic() || byte == b' ' { byte as char } else { '.' })
            .collect();
        out.push_str(&format!("{:>18}  {:<47}  {ascii}\n", line_address.to_string(), hex.join(" ")));
    }
    out
}

const PROMPT: &str = "wdbg> ";

/// Where stop commands come from
enum Input
{
    /// Line editor on the terminal. Only the history outlives a stop.
    Terminal(Vec<String>),
    /// Commands piped from a reader
    Reader(Box<dyn BufRead + Send>),
    /// No commands at all
    Batch,
}

/// [`SessionHooks`] implementation driving the stop prompt
pub struct ConsoleHooks
{
    input: Input,
}

impl ConsoleHooks
{
    /// Prompt on the terminal at every stop.
    pub fn interactive() -> Self
    {
        Self {
            input: Input::Terminal(Vec::new()),
        }
    }

    /// Print stops and resume without asking.
    pub fn batch() -> Self
    {
        Self { input: Input::Batch }
    }

    /// Read stop commands from `reader` instead of the terminal, detaching
    /// once it runs dry.
    pub fn scripted(reader: impl BufRead + Send + 'static) -> Self
    {
        Self {
            input: Input::Reader(Box::new(reader)),
        }
    }

    /// Open the command source for one stop, or `None` in batch mode.
    fn prompt(&mut self) -> Option<Result<Prompt<'_>, ReadlineError>>
    {
        match &mut self.input {
            Input::Batch => None,
            Input::Reader(reader) => Some(Ok(Prompt::Reader(reader))),
            Input::Terminal(history) => Some(Prompt::editor(history)),
        }
    }
}

/// Command source of a single stop
enum Prompt<'a>
{
    Editor
    {
        editor: DefaultEditor,
        history: &'a mut Vec<String>,
    },
    Reader(&'a mut Box<dyn BufRead + Send>),
}

impl<'a> Prompt<'a>
{
    // The editor is rebuilt per stop so the hooks stay Send for the
    // monitor thread.
    fn editor(history: &'a mut Vec<String>) -> Result<Self, ReadlineError>
    {
        let mut editor = DefaultEditor::new()?;
        for entry in history.iter() {
            editor.add_history_entry(entry.as_str())?;
        }
        Ok(Prompt::Editor { editor, history })
    }

    /// Next command line; `None` once the user is gone.
    fn read_line(&mut self) -> Option<String>
    {
        match self {
            Prompt::Editor { editor, history } => match editor.readline(PROMPT) {
                Ok(line) => {
                    if let Some(entry) = remember(history, &line) {
                        if let Err(err) = editor.add_history_entry(entry) {
                            debug!("history entry dropped: {err}");
                        }
                    }
                    Some(line)
                }
                Err(ReadlineError::Interrupted) => {
                    println!("^C");
                    None
                }
                Err(ReadlineError::Eof) => {
                    println!("^D");
                    None
                }
                Err(err) => {
                    warn!("failed to read command: {err}");
                    None
                }
            },
            Prompt::Reader(reader) => {
                let mut line = String::new();
                match reader.read_line(&mut line) {
                    Ok(0) => None,
                    Ok(_) => Some(line),
                    Err(err) => {
                        warn!("failed to read command: {err}");
                        None
                    }
                }
            }
        }
    }
}

/// Record `line` in the history unless it is blank or repeats the last entry.
fn remember<'h>(history: &'h mut Vec<String>, line: &str) -> Option<&'h str>
{
    let line = line.trim();
    if line.is_empty() || history.last().is_some_and(|last| last == line) {
        return None;
    }
    history.push(line.to_string());
    history.last().map(String::as_str)
}

/// What batch mode does with a stop
fn batch_decision(reason: &StopReason, first_chance: bool) -> ResumeDecision
{
    match reason {
        StopReason::Exception(_) if first_chance => ResumeDecision::PassToApplication,
        // Resuming a last chance exception would fault again forever.
        StopReason::Exception(_) => ResumeDecision::Detach,
        _ => ResumeDecision::Continue,
    }
}

impl<A: DebugApi> SessionHooks<A> for ConsoleHooks
{
    fn enter_interactive(&mut self, stop: &mut StopContext<'_, A>) -> ResumeDecision
    {
        println!("{}", stop.description());
        if let StopReason::Breakpoint(info) = stop.reason() {
            println!("Breakpoint {} hit at {} ({} hits)", info.id.raw(), info.address, info.hit_count);
        }
        print_registers(stop.architecture(), stop.current(), stop.context());

        let mut prompt = match self.prompt() {
            None => return batch_decision(stop.reason(), stop.first_chance()),
            Some(Ok(prompt)) => prompt,
            Some(Err(err)) => {
                warn!("cannot open the console: {err}");
                return ResumeDecision::Detach;
            }
        };

        loop {
            let Some(line) = prompt.read_line() else {
                println!("Detaching");
                return ResumeDecision::Detach;
            };
            let command = match Command::parse(&line) {
                Ok(command) => command,
                Err(err) => {
                    println!("{err}");
                    continue;
                }
            };
            debug!(?command, "console command");

            match command {
                Command::Empty => {}
                Command::Resume(decision) => return decision,
                Command::Break { address, temporary } => match stop.set_breakpoint(address, temporary) {
                    Ok(id) => println!("Breakpoint {} at {address}", id.raw()),
                    Err(err) => println!("Cannot set breakpoint: {err}"),
                },
                Command::Delete(id) => match stop.remove_breakpoint(id) {
                    Ok(info) => println!("Deleted breakpoint {} at {}", id.raw(), info.address),
                    Err(err) => println!("Cannot delete breakpoint: {err}"),
                },
                Command::ListBreakpoints => {
                    let list = stop.breakpoints().list();
                    if list.is_empty() {
                        println!("No breakpoints");
                    }
                    for info in list {
                        println!(
                            "{:>4}  {}  {}  {:?}{}  hits={}",
                            info.id.raw(),
                            info.pid,
                            info.address,
                            info.state,
                            if info.temporary { " (temporary)" } else { "" },
                            info.hit_count
                        );
                    }
                }
                Command::Threads => match stop.process() {
                    Some(process) => print_threads(process, stop.current()),
                    None => println!("Process {} is gone", stop.current().pid),
                },
                Command::Modules => match stop.process() {
                    Some(process) => print_modules(process),
                    None => println!("Process {} is gone", stop.current().pid),
                },
                Command::Registers(None) => print_registers(stop.architecture(), stop.current(), stop.context()),
                Command::Registers(Some(tid)) => match stop.thread_context(tid) {
                    Ok(context) => {
                        let thread = ThreadKey { pid: stop.current().pid, tid };
                        print_registers(stop.architecture(), thread, &context);
                    }
                    Err(err) => println!("Cannot read registers: {err}"),
                },
                Command::Examine { address, len } => {
                    let mut buffer = vec![0u8; len];
                    match stop.read_memory(address, &mut buffer) {
                        Ok(read) => print!("{}", hex_dump(address, &buffer[..read])),
                        Err(err) => println!("Cannot read memory: {err}"),
                    }
                }
                Command::Help => println!("{HELP}"),
            }
        }
    }

    fn on_process_created(&mut self, process: &Process)
    {
        println!("Process {} created: {}", process.pid(), display_name(process.image_name()));
    }

    fn on_module_loaded(&mut self, pid: ProcessId, module: &Module)
    {
        println!("Process {pid}: loaded {} at {}", display_name(&module.name), module.base);
    }

    fn on_debug_string(&mut self, thread: ThreadKey, text: &str)
    {
        println!("[{thread}] {}", text.trim_end());
    }

    fn on_process_exited(&mut self, pid: ProcessId, exit_code: u32)
    {
        println!("Process {pid} exited with code {exit_code:#x}");
    }
}

fn print_registers(architecture: Architecture, thread: ThreadKey, context: &impl ExecutionContext)
{
    println!(
        "  {} {}  ip={}  sp={}{}",
        architecture,
        thread,
        context.instruction_pointer(),
        context.stack_pointer(),
        if context.single_step() { "  [trace]" } else { "" }
    );
}

fn print_threads(process: &Process, current: ThreadKey)
{
    for thread in process.threads() {
        let marker = if thread.tid() == current.tid { '*' } else { ' ' };
        let start = thread.start().map_or_else(|| "unknown".to_string(), |start| start.to_string());
        println!(
            "{marker} {}  start={start}  {:?}  {}",
            thread.tid(),
            thread.exec_mode(),
            thread.name().unwrap_or("")
        );
    }
}

fn print_modules(process: &Process)
{
    for module in process.modules() {
        println!("  {}  {}", module.base, display_name(&module.name));
    }
}

fn display_name(name: &str) -> &str
{
    if name.is_empty() {
        "<unnamed>"
    } else {
        name
    }
}

const HELP: &str = "\
c | cont            resume
pass                hand the exception to the debuggee
s | step [n]        single-step n instructions
n | next [n]        step over n instructions
b | break <addr>    set a breakpoint (tb for a temporary one)
d | delete <id>     remove a breakpoint
bl                  list breakpoints
t | threads         list threads of the stopped process
m | modules         list modules of the stopped process
r | regs [tid]      show instruction and stack pointer
x <addr> [len]      dump memory
q | detach          detach and let the debuggee run";

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_parse_resume_commands()
    {
        assert_eq!(Command::parse("c\n").unwrap(), Command::Resume(ResumeDecision::Continue));
        assert_eq!(Command::parse("pass").unwrap(), Command::Resume(ResumeDecision::PassToApplication));
        assert_eq!(Command::parse("  detach ").unwrap(), Command::Resume(ResumeDecision::Detach));
        assert_eq!(Command::parse("   ").unwrap(), Command::Empty);
    }

    #[test]
    fn test_parse_step_counts()
    {
        assert_eq!(
            Command::parse("s").unwrap(),
            Command::Resume(ResumeDecision::Step {
                mode: ExecMode::StepInto,
                count: 1
            })
        );
        assert_eq!(
            Command::parse("next 0x10").unwrap(),
            Command::Resume(ResumeDecision::Step {
                mode: ExecMode::StepOver,
                count: 16
            })
        );
        assert!(matches!(Command::parse("s 0"), Err(CommandError::OutOfRange(_))));
        assert!(matches!(Command::parse("s 99999999999"), Err(CommandError::OutOfRange(_))));
    }

    #[test]
    fn test_parse_breakpoint_commands()
    {
        assert_eq!(
            Command::parse("b 0x401000").unwrap(),
            Command::Break {
                address: Address::from(0x40_1000),
                temporary: false
            }
        );
        assert_eq!(
            Command::parse("tb 4096").unwrap(),
            Command::Break {
                address: Address::from(4096),
                temporary: true
            }
        );
        assert_eq!(Command::parse("d 3").unwrap(), Command::Delete(BreakpointId::from_raw(3)));
        assert_eq!(Command::parse("b"), Err(CommandError::MissingArgument("address")));
        assert_eq!(Command::parse("b main"), Err(CommandError::InvalidNumber("main".to_string())));
    }

    #[test]
    fn test_parse_examine_bounds()
    {
        assert_eq!(
            Command::parse("x 0x1000").unwrap(),
            Command::Examine {
                address: Address::from(0x1000),
                len: DEFAULT_DUMP
            }
        );
        assert_eq!(
            Command::parse("x 0x1000 256").unwrap(),
            Command::Examine {
                address: Address::from(0x1000),
                len: MAX_DUMP
            }
        );
        assert!(matches!(Command::parse("x 0x1000 257"), Err(CommandError::OutOfRange(_))));
        assert!(matches!(Command::parse("x 0x1000 0"), Err(CommandError::OutOfRange(_))));
    }

    #[test]
    fn test_parse_registers_of_thread()
    {
        assert_eq!(Command::parse("r").unwrap(), Command::Registers(None));
        assert_eq!(Command::parse("regs 0x1c").unwrap(), Command::Registers(Some(ThreadId(0x1c))));
        assert!(matches!(Command::parse("r 0x100000000"), Err(CommandError::OutOfRange(_))));
    }

    #[test]
    fn test_parse_unknown_command()
    {
        assert_eq!(Command::parse("frobnicate"), Err(CommandError::Unknown("frobnicate".to_string())));
    }

    #[test]
    fn test_hex_dump_layout()
    {
        let bytes: Vec<u8> = (0x41..0x41 + 20).collect();
        let dump = hex_dump(Address::from(0x1000), &bytes);
        let lines: Vec<&str> = dump.lines().collect();

        assert_eq!(lines.len(), 2);
        assert!(lines[0].trim_start().starts_with("0x1000  41 42 43"));
        assert!(lines[0].ends_with("ABCDEFGHIJKLMNOP"));
        assert!(lines[1].trim_start().starts_with("0x1010  51 52 53 54"));
        assert!(lines[1].ends_with("QRST"));
    }

    #[test]
    fn test_hex_dump_masks_control_bytes()
    {
        let dump = hex_dump(Address::from(0x10), &[0x00, b'a', 0x7f]);
        assert!(dump.trim_end().ends_with(".a."));
    }

    #[test]
    fn test_batch_decisions()
    {
        assert_eq!(
            batch_decision(&StopReason::Exception(0xC000_0005), true),
            ResumeDecision::PassToApplication
        );
        assert_eq!(batch_decision(&StopReason::Exception(0xC000_0005), false), ResumeDecision::Detach);
        assert_eq!(batch_decision(&StopReason::ThreadStart(Address::from(0x40_1000)), true), ResumeDecision::Continue);
        assert_eq!(batch_decision(&StopReason::FirstException, true), ResumeDecision::Continue);
    }

    #[test]
    fn test_scripted_console_detaches_when_input_runs_dry()
    {
        let mut hooks = ConsoleHooks::scripted(std::io::Cursor::new("bl\nc\n"));
        let Some(Ok(mut prompt)) = hooks.prompt() else {
            panic!("scripted console has no prompt");
        };

        assert_eq!(prompt.read_line().as_deref(), Some("bl\n"));
        assert_eq!(prompt.read_line().as_deref(), Some("c\n"));
        assert_eq!(prompt.read_line(), None);
    }

    #[test]
    fn test_batch_console_never_prompts()
    {
        assert!(ConsoleHooks::batch().prompt().is_none());
    }

    #[test]
    fn test_history_skips_blank_and_repeated_lines()
    {
        let mut history = Vec::new();

        assert_eq!(remember(&mut history, "s 3\n"), Some("s 3"));
        assert_eq!(remember(&mut history, "s 3"), None);
        assert_eq!(remember(&mut history, "   "), None);
        assert_eq!(remember(&mut history, "c"), Some("c"));
        assert_eq!(remember(&mut history, "s 3"), Some("s 3"));
        assert_eq!(history, ["s 3", "c", "s 3"]);
    }
}
