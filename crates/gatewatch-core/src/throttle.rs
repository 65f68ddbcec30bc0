//! Per-identity snapshot throttling: a cooldown plus a lifetime cap.

use std::collections::HashMap;
use std::time::{Duration, Instant};

pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_SNAPSHOTS: u32 = 20;

#[derive(Debug, Clone, Copy)]
struct Record {
    last: Instant,
    saved: u32,
}

#[derive(Debug, Clone)]
pub struct SnapshotThrottle {
    cooldown: Duration,
    max_snapshots: u32,
    records: HashMap<String, Record>,
}

impl Default for SnapshotThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN, DEFAULT_MAX_SNAPSHOTS)
    }
}

impl SnapshotThrottle {
    pub fn new(cooldown: Duration, max_snapshots: u32) -> Self {
        Self {
            cooldown,
            max_snapshots,
            records: HashMap::new(),
        }
    }

    /// Whether a snapshot for `label` may be taken at `now`.
    pub fn permits(&self, label: &str, now: Instant) -> bool {
        match self.records.get(label) {
            None => self.max_snapshots > 0,
            Some(r) => r.saved < self.max_snapshots && now.saturating_duration_since(r.last) >= self.cooldown,
        }
    }

    /// Note that a snapshot for `label` was written at `now`.
    pub fn record(&mut self, label: &str, now: Instant) {
        let entry = self.records.entry(label.to_string()).or_insert(Record { last: now, saved: 0 });
        entry.last = now;
        entry.saved += 1;
    }

    pub fn saved(&self, label: &str) -> u32 {
        self.records.get(label).map_or(0, |r| r.saved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cooldown() {
        let mut throttle = SnapshotThrottle::new(Duration::from_secs(10), 20);
        let t0 = Instant::now();

        assert!(throttle.permits("A", t0));
        throttle.record("A", t0);
        assert!(!throttle.permits("A", t0 + Duration::from_secs(3)));
        assert!(throttle.permits("A", t0 + Duration::from_secs(10)));
        // Other labels are independent.
        assert!(throttle.permits("B", t0 + Duration::from_secs(1)));
    }

    #[test]
    fn test_lifetime_cap() {
        let mut throttle = SnapshotThrottle::new(Duration::ZERO, 2);
        let t0 = Instant::now();
        throttle.record("A", t0);
        throttle.record("A", t0);
        assert!(!throttle.permits("A", t0 + Duration::from_secs(3600)));
        assert_eq!(throttle.saved("A"), 2);
    }

    #[test]
    fn test_zero_cap_never_permits() {
        let throttle = SnapshotThrottle::new(Duration::ZERO, 0);
        assert!(!throttle.permits("A", Instant::now()));
    }
}
