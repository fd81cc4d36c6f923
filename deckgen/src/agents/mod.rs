//! Model-backed capabilities and the supervisors that sequence them.

pub mod repairer;
pub mod supervisor;
pub mod synthesizer;
