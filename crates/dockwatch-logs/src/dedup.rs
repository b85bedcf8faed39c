use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;

use dockwatch_types::DedupRecord;

/// Default suppression window for a repeated fingerprint (1 hour)
pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(60 * 60);

/// Thread-safe fingerprint dedup table.
///
/// A record is active while `now - last_seen < window`. Every lookup for a
/// hash happens under one lock, so concurrent sources observing the same
/// fingerprint are serialized.
#[derive(Clone)]
pub struct DedupWindow {
    records: Arc<Mutex<HashMap<String, DedupRecord>>>,
    window: TimeDelta,
}

impl DedupWindow {
    pub fn new(window: Duration) -> Self {
        Self {
            records: Arc::new(Mutex::new(HashMap::new())),
            window: TimeDelta::from_std(window).unwrap_or(TimeDelta::MAX),
        }
    }

    /// Record an occurrence of `hash`. Returns `true` if it is a duplicate
    /// within the active window.
    pub fn observe(&self, hash: &str) -> bool {
        self.observe_at(hash, Utc::now())
    }

    pub fn observe_at(&self, hash: &str, now: DateTime<Utc>) -> bool {
        let mut records = self.records.lock();
        match records.get_mut(hash) {
            Some(record) if now - record.last_seen < self.window => {
                record.count += 1;
                record.last_seen = now;
                true
            }
            // Stale: tracking restarts as for a first occurrence
            Some(record) => {
                record.count = 1;
                record.first_seen = now;
                record.last_seen = now;
                false
            }
            None => {
                records.insert(
                    hash.to_string(),
                    DedupRecord {
                        hash: hash.to_string(),
                        count: 1,
                        first_seen: now,
                        last_seen: now,
                    },
                );
                false
            }
        }
    }

    /// Drop records not seen for more than twice the window. Returns the
    /// number removed.
    pub fn cleanup(&self) -> usize {
        self.cleanup_at(Utc::now())
    }

    pub fn cleanup_at(&self, now: DateTime<Utc>) -> usize {
        let expiry = self.window.checked_mul(2).unwrap_or(TimeDelta::MAX);
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|_, record| now - record.last_seen <= expiry);
        before - records.len()
    }

    /// Current record for a hash, active or not
    pub fn stats(&self, hash: &str) -> Option<DedupRecord> {
        self.records.lock().get(hash).cloned()
    }

    /// Records still within the window, most recently seen first
    pub fn recent(&self) -> Vec<DedupRecord> {
        self.recent_at(Utc::now())
    }

    pub fn recent_at(&self, now: DateTime<Utc>) -> Vec<DedupRecord> {
        let mut active: Vec<DedupRecord> = self
            .records
            .lock()
            .values()
            .filter(|record| now - record.last_seen < self.window)
            .cloned()
            .collect();
        active.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        active
    }

    /// Total tracked records
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DedupWindow {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn minutes(n: i64) -> TimeDelta {
        TimeDelta::minutes(n)
    }

    #[test]
    fn test_second_observation_is_duplicate() {
        let dedup = DedupWindow::default();
        assert!(!dedup.observe("abc"));
        assert!(dedup.observe("abc"));
        assert_eq!(dedup.stats("abc").unwrap().count, 2);
    }

    #[test]
    fn test_window_elapsed_resets() {
        let dedup = DedupWindow::default();
        assert!(!dedup.observe_at("abc", t0()));
        assert!(!dedup.observe_at("abc", t0() + minutes(61)));

        let record = dedup.stats("abc").unwrap();
        assert_eq!(record.count, 1);
        assert_eq!(record.first_seen, t0() + minutes(61));
    }

    #[test]
    fn test_window_boundary_is_stale() {
        let dedup = DedupWindow::default();
        assert!(!dedup.observe_at("abc", t0()));
        assert!(dedup.observe_at("abc", t0() + minutes(59)));
        // 60 minutes after the last sighting is outside the window
        assert!(!dedup.observe_at("abc", t0() + minutes(119)));
    }

    #[test]
    fn test_duplicates_extend_the_window() {
        let dedup = DedupWindow::default();
        assert!(!dedup.observe_at("abc", t0()));
        assert!(dedup.observe_at("abc", t0() + minutes(50)));
        assert!(dedup.observe_at("abc", t0() + minutes(100)));
        let record = dedup.stats("abc").unwrap();
        assert_eq!(record.count, 3);
        assert_eq!(record.first_seen, t0());
    }

    #[test]
    fn test_cleanup_removes_only_expired() {
        let dedup = DedupWindow::default();
        dedup.observe_at("fresh", t0() + minutes(150));
        dedup.observe_at("stale", t0() + minutes(90));
        dedup.observe_at("expired", t0());

        let now = t0() + minutes(121);
        assert_eq!(dedup.cleanup_at(now), 1);
        assert!(dedup.stats("expired").is_none());
        assert!(dedup.stats("stale").is_some());
        assert!(dedup.stats("fresh").is_some());
    }

    #[test]
    fn test_cleanup_boundary_is_twice_the_window() {
        let dedup = DedupWindow::default();
        dedup.observe_at("edge", t0());
        dedup.observe_at("past", t0() - TimeDelta::seconds(1));

        // Exactly 2x the window is kept, one second more is removed
        assert_eq!(dedup.cleanup_at(t0() + minutes(120)), 1);
        assert!(dedup.stats("edge").is_some());
        assert!(dedup.stats("past").is_none());
    }

    #[test]
    fn test_recent_only_lists_active() {
        let dedup = DedupWindow::default();
        dedup.observe_at("old", t0());
        dedup.observe_at("new", t0() + minutes(70));

        let recent = dedup.recent_at(t0() + minutes(75));
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].hash, "new");
        assert_eq!(dedup.len(), 2);
    }

    #[test]
    fn test_concurrent_observers_see_one_first() {
        let dedup = DedupWindow::default();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let dedup = dedup.clone();
                std::thread::spawn(move || dedup.observe("shared"))
            })
            .collect();
        let firsts = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|duplicate| !duplicate)
            .count();
        assert_eq!(firsts, 1);
        assert_eq!(dedup.stats("shared").unwrap().count, 8);
    }
}
