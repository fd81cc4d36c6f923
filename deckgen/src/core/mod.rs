//! Deterministic, pure logic shared by the deck generator.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod budget;
pub mod extract;
pub mod machine;
pub mod schema;
pub mod types;
