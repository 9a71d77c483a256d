//! Wall-clock helpers. Stored timestamps are Unix seconds; cron arithmetic
//! uses milliseconds.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn since_epoch() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
}

pub fn unix_now() -> u64 {
    since_epoch().as_secs()
}

pub fn unix_now_ms() -> u64 {
    u64::try_from(since_epoch().as_millis()).unwrap_or(u64::MAX)
}

/// A missing deadline never passes.
pub fn deadline_passed(deadline: Option<u64>, now: u64) -> bool {
    deadline.is_some_and(|deadline| deadline <= now)
}
