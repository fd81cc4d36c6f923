//! I/O helpers: processes, files, prompts and model calls.

pub mod attempt_log;
pub mod completion;
pub mod config;
pub mod process;
pub mod prompt;
pub mod sandbox;
pub mod session;
pub mod workspace;
