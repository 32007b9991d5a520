//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the core runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::time::{Duration, Instant};

/// Convert a duration into milliseconds, saturating at `u64::MAX`.
pub fn duration_to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Signed lateness of `actual` relative to `scheduled`, in microseconds.
pub fn drift_us(scheduled: Instant, actual: Instant) -> i64 {
    match actual.checked_duration_since(scheduled) {
        Some(late) => i64::try_from(late.as_micros()).unwrap_or(i64::MAX),
        None => {
            let early = scheduled.duration_since(actual);
            -i64::try_from(early.as_micros()).unwrap_or(i64::MAX)
        }
    }
}
