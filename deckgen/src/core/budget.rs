//! Shared time budget helpers for bounded orchestration.

use std::time::{Duration, Instant};

/// Return the remaining time budget until the provided deadline, or `None` once it has passed.
pub fn remaining_budget(deadline: Instant) -> Option<Duration> {
    deadline
        .checked_duration_since(Instant::now())
        .filter(|remaining| !remaining.is_zero())
}
