//! Wall-clock helpers. All persisted timestamps are epoch milliseconds.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current time in epoch milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
