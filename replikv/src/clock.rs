use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of write timestamps on the leader.
///
/// Timestamps are wall-clock milliseconds, bumped past the previous value
/// whenever two writes land in the same tick, so successive calls are
/// strictly increasing.
#[derive(Default)]
pub struct WriteClock {
    last: Mutex<u64>,
}

impl WriteClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock set before the Unix epoch")
            .as_millis() as u64;

        let mut last = self.last.lock().unwrap();
        *last = (*last + 1).max(now);
        *last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_strictly_increase_within_one_tick() {
        let clock = WriteClock::new();
        let mut previous = clock.next();
        // Far more calls than fit in one millisecond of wall clock.
        for _ in 0..10_000 {
            let next = clock.next();
            assert!(next > previous);
            previous = next;
        }
    }

    #[test]
    fn timestamps_track_wall_clock() {
        let clock = WriteClock::new();
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as u64;
        assert!(clock.next() >= now);
    }
}
