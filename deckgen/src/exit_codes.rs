//! Stable exit codes for deckgen CLI commands.

/// Command succeeded; for `generate`, the deck was produced.
pub const OK: i32 = 0;
/// Command failed due to invalid config, infrastructure errors or schema violations.
pub const INVALID: i32 = 1;
/// `deckgen generate` finished without a deck (question or give-up).
pub const NOT_COMPLETED: i32 = 2;
