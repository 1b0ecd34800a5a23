//! Session configuration.
//!
//! Defaults, overridden by environment variables, overridden by whatever the
//! embedding front end sets explicitly (the CLI's flags).
//!
//! ## Environment Variables
//!
//! - `WDBG_BREAK_ON_FIRST_CHANCE`: stop on first chance exceptions (active-debug mode)
//! - `WDBG_BREAK_ON_CRITSECT`: stop on critical section wait timeouts
//! - `WDBG_STARTUP_BREAKPOINTS`: arm a breakpoint at each new thread's start routine
//!
//! Values are `1`/`0`, `true`/`false`, `yes`/`no` or `on`/`off`. Anything else
//! is ignored with a warning and the default stays.

use std::env;

use tracing::warn;

/// Environment variable enabling active-debug mode
pub const ENV_BREAK_ON_FIRST_CHANCE: &str = "WDBG_BREAK_ON_FIRST_CHANCE";
/// Environment variable enabling stops on critical section timeouts
pub const ENV_BREAK_ON_CRITSECT: &str = "WDBG_BREAK_ON_CRITSECT";
/// Environment variable controlling thread-start breakpoints
pub const ENV_STARTUP_BREAKPOINTS: &str = "WDBG_STARTUP_BREAKPOINTS";

/// Behavior switches of one debugging session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig
{
    /// Stop on every first chance exception instead of passing it to the
    /// debuggee's handlers first.
    pub break_on_first_chance: bool,
    /// Stop when a critical section wait times out. Off by default: such
    /// timeouts are logged and the debuggee decides.
    pub break_on_critical_section_timeout: bool,
    /// Arm a temporary breakpoint at the start routine of each new thread.
    /// When off, every thread is synchronized on its first exception.
    pub arm_startup_breakpoints: bool,
}

impl Default for SessionConfig
{
    fn default() -> Self
    {
        Self {
            break_on_first_chance: false,
            break_on_critical_section_timeout: false,
            arm_startup_breakpoints: true,
        }
    }
}

impl SessionConfig
{
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Self
    {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Defaults overridden by `lookup`, which maps a variable name to its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self
    {
        let mut config = Self::default();
        let apply = |name: &str, slot: &mut bool| {
            let Some(value) = lookup(name) else {
                return;
            };
            match parse_flag(&value) {
                Some(flag) => *slot = flag,
                None => warn!(variable = name, value = %value, "ignoring unrecognized boolean value"),
            }
        };
        apply(ENV_BREAK_ON_FIRST_CHANCE, &mut config.break_on_first_chance);
        apply(ENV_BREAK_ON_CRITSECT, &mut config.break_on_critical_section_timeout);
        apply(ENV_STARTUP_BREAKPOINTS, &mut config.arm_startup_breakpoints);
        config
    }
}

/// Parse a boolean switch value.
pub fn parse_flag(value: &str) -> Option<bool>
{
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_defaults()
    {
        let config = SessionConfig::default();
        assert!(!config.break_on_first_chance);
        assert!(!config.break_on_critical_section_timeout);
        assert!(config.arm_startup_breakpoints);
    }

    #[test]
    fn test_lookup_overrides()
    {
        let config = SessionConfig::from_lookup(|name| match name {
            ENV_BREAK_ON_FIRST_CHANCE => Some("yes".to_string()),
            ENV_STARTUP_BREAKPOINTS => Some("Off".to_string()),
            _ => None,
        });
        assert!(config.break_on_first_chance);
        assert!(!config.break_on_critical_section_timeout);
        assert!(!config.arm_startup_breakpoints);
    }

    #[test]
    fn test_invalid_value_keeps_default()
    {
        let config = SessionConfig::from_lookup(|name| (name == ENV_STARTUP_BREAKPOINTS).then(|| "maybe".to_string()));
        assert!(config.arm_startup_breakpoints);
    }

    #[test]
    fn test_parse_flag()
    {
        assert_eq!(parse_flag(" 1 "), Some(true));
        assert_eq!(parse_flag("FALSE"), Some(false));
        assert_eq!(parse_flag(""), None);
    }
}
