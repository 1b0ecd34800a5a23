use std::error::Error;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use wdbg_core::{DebugApi, LaunchOptions, Monitor, ProcessId, SessionConfig, SessionEnd, SessionSummary};
use wdbg_utils::{info, init_logging, LogConfig, LogLevel};

mod console;

use console::ConsoleHooks;

/// Debugger for the Windows debug event stream.
#[derive(Parser, Debug)]
#[command(name = "wdbg")]
#[command(version)]
#[command(about = "Attach to or launch a process and debug it from the console", long_about = None)]
struct Cli
{
    #[command(subcommand)]
    command: Commands,

    /// Stop on every first chance exception before the debuggee's handlers run
    #[arg(long, global = true)]
    break_on_first_chance: bool,

    /// Stop when a critical section wait times out
    #[arg(long, global = true)]
    break_on_critsect: bool,

    /// Synchronize new threads on their first exception instead of a start breakpoint
    #[arg(long, global = true)]
    no_startup_breakpoints: bool,

    /// Print stops and keep going instead of prompting
    #[arg(long, global = true)]
    batch: bool,

    /// Read stop commands from a file instead of the terminal
    #[arg(long, global = true, value_name = "FILE", conflicts_with = "batch")]
    commands: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace); overrides RUST_LOG
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,
}

#[derive(Subcommand, Debug)]
enum Commands
{
    /// Attach to a running process by PID
    Attach
    {
        /// Process ID (PID) to attach to
        pid: u32,
    },
    /// Launch a new process under debugger control
    Launch
    {
        /// Show state of the first window (SW_* value)
        #[arg(long, default_value_t = 1)]
        show: u16,
        /// Path to the executable to launch
        program: String,
        /// Arguments to pass to the program
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

fn main()
{
    let cli = Cli::parse();

    // Reads RUST_LOG, WDBG_LOG_FORMAT and WDBG_LOG_FILE; --log-level wins
    let guard = match LogConfig::from_env().and_then(|config| init_logging(&config.with_level(cli.log_level))) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            process::exit(1);
        }
    };

    let code = match tokio::runtime::Runtime::new() {
        Ok(rt) => match rt.block_on(run(cli)) {
            Ok(summary) => report(&summary),
            Err(e) => {
                eprintln!("Error: {e}");
                1
            }
        },
        Err(e) => {
            eprintln!("Error: failed to start runtime: {e}");
            1
        }
    };

    // process::exit skips destructors; flush the log file first.
    drop(guard);
    process::exit(code);
}

async fn run(cli: Cli) -> Result<SessionSummary, Box<dyn Error>>
{
    let config = session_config(&cli, SessionConfig::from_env());
    let hooks = if let Some(path) = &cli.commands {
        ConsoleHooks::scripted(BufReader::new(File::open(path)?))
    } else if cli.batch {
        ConsoleHooks::batch()
    } else {
        ConsoleHooks::interactive()
    };

    let monitor = start_monitor(cli.command, config, hooks)?;
    let detach = monitor.detach_handle();
    let mut session = tokio::task::spawn_blocking(move || monitor.join());

    let joined = tokio::select! {
        joined = &mut session => joined,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            println!("Detach requested; it takes effect at the next debug event");
            detach.request();
            session.await
        }
    };
    Ok(joined??)
}

/// Apply command line switches on top of the environment's configuration.
fn session_config(cli: &Cli, mut config: SessionConfig) -> SessionConfig
{
    if cli.break_on_first_chance {
        config.break_on_first_chance = true;
    }
    if cli.break_on_critsect {
        config.break_on_critical_section_timeout = true;
    }
    if cli.no_startup_breakpoints {
        config.arm_startup_breakpoints = false;
    }
    config
}

#[cfg(windows)]
fn start_monitor(command: Commands, config: SessionConfig, hooks: ConsoleHooks) -> Result<Monitor, Box<dyn Error>>
{
    let api = wdbg_core::platform::create_api()?;
    start_with(api, command, config, hooks)
}

#[cfg(not(windows))]
fn start_monitor(command: Commands, config: SessionConfig, hooks: ConsoleHooks) -> Result<Monitor, Box<dyn Error>>
{
    let _ = (command, config, hooks);
    let api = wdbg_core::platform::create_api()?;
    match api {}
}

#[cfg_attr(not(windows), allow(dead_code))]
fn start_with<A: DebugApi>(
    api: A,
    command: Commands,
    config: SessionConfig,
    hooks: ConsoleHooks,
) -> Result<Monitor, Box<dyn Error>>
{
    match command {
        Commands::Attach { pid } => {
            info!("Attaching to process {pid}");
            let monitor = wdbg_core::attach(api, hooks, config, ProcessId(pid))?;
            println!("Debugging process {pid}");
            Ok(monitor)
        }
        Commands::Launch { show, program, args } => {
            let command_line = command_line(&program, &args);
            info!("Launching: {command_line}");
            let options = LaunchOptions { command_line, show };
            let monitor = wdbg_core::launch(api, hooks, config, options)?;
            println!("Launched {program} (PID: {})", monitor.pid().0);
            Ok(monitor)
        }
    }
}

/// Print the session outcome and pick the exit code.
fn report(summary: &SessionSummary) -> i32
{
    println!("\nSession ended: {}", summary.end);
    println!("  Events: {} ({} dropped)", summary.events, summary.dropped);
    for (pid, code) in &summary.exit_codes {
        println!("  Process {pid} exit code: {code:#x}");
    }

    match summary.end {
        SessionEnd::AttachFailed | SessionEnd::LaunchFailed => 1,
        SessionEnd::AllExited | SessionEnd::Detached | SessionEnd::EventsExhausted => 0,
    }
}

/// Join program and arguments into one command line, quoting where the
/// receiving C runtime would otherwise split or unescape.
fn command_line(program: &str, args: &[String]) -> String
{
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .map(quote_argument)
        .collect::<Vec<_>>()
        .join(" ")
}

fn quote_argument(arg: &str) -> String
{
    if !arg.is_empty() && !arg.contains([' ', '\t', '"']) {
        return arg.to_string();
    }

    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('"');
    let mut backslashes = 0;
    for c in arg.chars() {
        match c {
            '\\' => backslashes += 1,
            '"' => {
                // Backslashes before a quote are doubled, plus one for the quote
                quoted.extend(std::iter::repeat('\\').take(backslashes * 2 + 1));
                quoted.push('"');
                backslashes = 0;
            }
            _ => {
                quoted.extend(std::iter::repeat('\\').take(backslashes));
                quoted.push(c);
                backslashes = 0;
            }
        }
    }
    quoted.extend(std::iter::repeat('\\').take(backslashes * 2));
    quoted.push('"');
    quoted
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_plain_arguments_are_not_quoted()
    {
        assert_eq!(command_line("notepad.exe", &["a.txt".to_string()]), "notepad.exe a.txt");
    }

    #[test]
    fn test_arguments_with_spaces_and_quotes()
    {
        assert_eq!(quote_argument("C:\\Program Files\\app.exe"), "\"C:\\Program Files\\app.exe\"");
        assert_eq!(quote_argument("say \"hi\""), "\"say \\\"hi\\\"\"");
        assert_eq!(quote_argument("dir with\\"), "\"dir with\\\\\"");
        assert_eq!(quote_argument(""), "\"\"");
    }

    #[test]
    fn test_cli_parses_launch_with_trailing_args()
    {
        let cli = Cli::try_parse_from(["wdbg", "--batch", "launch", "--show", "0", "app.exe", "-v", "--x"]).unwrap();
        assert!(cli.batch);
        match cli.command {
            Commands::Launch { show, program, args } => {
                assert_eq!(show, 0);
                assert_eq!(program, "app.exe");
                assert_eq!(args, ["-v", "--x"]);
            }
            Commands::Attach { .. } => panic!("expected launch"),
        }
    }

    #[test]
    fn test_cli_flags_override_config()
    {
        let cli = Cli::try_parse_from([
            "wdbg",
            "attach",
            "42",
            "--break-on-first-chance",
            "--no-startup-breakpoints",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(cli.log_level, Some(LogLevel::Debug));

        let config = session_config(&cli, SessionConfig::default());
        assert!(config.break_on_first_chance);
        assert!(!config.break_on_critical_section_timeout);
        assert!(!config.arm_startup_breakpoints);
    }

    #[test]
    fn test_unset_flags_keep_environment_values()
    {
        let cli = Cli::try_parse_from(["wdbg", "attach", "42"]).unwrap();
        let from_env = SessionConfig {
            break_on_first_chance: true,
            break_on_critical_section_timeout: true,
            arm_startup_breakpoints: false,
        };
        assert_eq!(session_config(&cli, from_env), from_env);
    }

    #[test]
    fn test_command_file_excludes_batch()
    {
        let cli = Cli::try_parse_from(["wdbg", "attach", "42", "--commands", "stops.txt"]).unwrap();
        assert_eq!(cli.commands.as_deref(), Some(std::path::Path::new("stops.txt")));

        assert!(Cli::try_parse_from(["wdbg", "--batch", "--commands", "stops.txt", "attach", "42"]).is_err());
    }

    #[test]
    fn test_failed_sessions_exit_non_zero()
    {
        assert_eq!(report(&SessionSummary::never_started(SessionEnd::LaunchFailed)), 1);
        assert_eq!(report(&SessionSummary::never_started(SessionEnd::Detached)), 0);
    }
}
