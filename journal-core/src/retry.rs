//! Backoff helpers shared by the sync queue and the asset pipeline.
//!
//! The teacher's `retry_with_backoff` computes its delay as `500ms * attempt`;
//! the journal queue and asset pipeline instead need an exact, named delay
//! table (so a client and a dashboard agree on when the next attempt lands),
//! so this version takes the schedule as a slice rather than a formula.

use std::time::Duration;

/// `delays[i]` is how long to wait before the `(i+1)`th retry (0-indexed into
/// the slice by the current `retry_count`). Once `retry_count` has exhausted
/// the schedule, the caller stops automatically retrying and requires an
/// explicit `retry_failed()`.
pub fn next_delay(schedule: &[u64], retry_count: u32) -> Option<Duration> {
    schedule
        .get(retry_count as usize)
        .map(|ms| Duration::from_millis(*ms))
}

pub fn exhausted(schedule: &[u64], retry_count: u32) -> bool {
    retry_count as usize >= schedule.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUEUE_SCHEDULE: [u64; 5] = [1_000, 5_000, 15_000, 60_000, 300_000];

    #[test]
    fn schedule_matches_attempts() {
        assert_eq!(next_delay(&QUEUE_SCHEDULE, 0), Some(Duration::from_millis(1_000)));
        assert_eq!(next_delay(&QUEUE_SCHEDULE, 4), Some(Duration::from_millis(300_000)));
        assert_eq!(next_delay(&QUEUE_SCHEDULE, 5), None);
    }

    #[test]
    fn exhaustion_flag() {
        assert!(!exhausted(&QUEUE_SCHEDULE, 4));
        assert!(exhausted(&QUEUE_SCHEDULE, 5));
    }
}
