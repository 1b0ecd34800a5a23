//! # Types
//!
//! Identifier and address newtypes shared by every component of the core.
//!
//! Debug events are a stream of raw numbers (pids, tids, handles, pointers);
//! giving each its own type keeps the registry and decoder honest about which
//! one they are holding.

pub mod address;
pub mod process;

pub use address::Address;
pub use process::{Architecture, OsHandle, ProcessId, ThreadId};
