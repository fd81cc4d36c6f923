//! Deck generator: turns a topic into a PowerPoint file by having a language
//! model write a python-pptx program, running it, and repairing it on failure.
//!
//! The crate keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (request types, code extraction,
//!   the bounded loop machine, schema checks). No I/O.
//! - **[`io`]**: Side-effecting operations (child processes, request
//!   workspaces, prompts, model calls, session transcripts).
//! - **[`agents`]**: The synthesizer, repairer and supervisors built on `io`.
//!
//! [`orchestrator`] ties these together into `handle_request`/`get_history`.

pub mod agents;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod orchestrator;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
