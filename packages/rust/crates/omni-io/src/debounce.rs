//! Per-key event coalescing.
//!
//! Editors frequently save through a temp file followed by a rename, which
//! produces several events for one logical write. A key becomes ready once it
//! has been quiet for `window`, or once it has been pending for `max_delay`
//! (a file that is written continuously still gets synced).

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
struct Pending {
    first_seen: Instant,
    last_seen: Instant,
    seq: u64,
}

/// Debounce state, driven by explicit timestamps so it is testable without
/// sleeping.
#[derive(Debug)]
pub struct Debouncer<K> {
    window: Duration,
    max_delay: Duration,
    pending: HashMap<K, Pending>,
    next_seq: u64,
}

impl<K: Eq + Hash + Clone> Debouncer<K> {
    /// New debouncer; `max_delay` defaults to ten windows.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            max_delay: window.saturating_mul(10),
            pending: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Override the upper bound on how long a busy key may be held back.
    #[must_use]
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay.max(self.window);
        self
    }

    /// The quiet window.
    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record an event for `key` observed at `now`.
    pub fn push(&mut self, key: K, now: Instant) {
        let seq = self.next_seq;
        let entry = self.pending.entry(key).or_insert_with(|| Pending {
            first_seen: now,
            last_seen: now,
            seq,
        });
        if entry.seq == seq {
            self.next_seq += 1;
        }
        entry.last_seen = entry.last_seen.max(now);
    }

    fn ready_at(&self, pending: &Pending) -> Instant {
        let quiet = pending.last_seen + self.window;
        let forced = pending.first_seen + self.max_delay;
        quiet.min(forced)
    }

    /// Earliest instant at which some key becomes ready.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| self.ready_at(p)).min()
    }

    /// Remove and return every key that is ready at `now`, in the order the
    /// keys were first observed.
    pub fn drain_ready(&mut self, now: Instant) -> Vec<K> {
        let mut ready: Vec<(u64, K)> = self
            .pending
            .iter()
            .filter(|(_, p)| self.ready_at(p) <= now)
            .map(|(k, p)| (p.seq, k.clone()))
            .collect();
        ready.sort_by_key(|(seq, _)| *seq);
        for (_, key) in &ready {
            self.pending.remove(key);
        }
        ready.into_iter().map(|(_, key)| key).collect()
    }

    /// Remove and return all pending keys regardless of timing.
    pub fn drain_all(&mut self) -> Vec<K> {
        let mut all: Vec<(u64, K)> = self.pending.drain().map(|(k, p)| (p.seq, k)).collect();
        all.sort_by_key(|(seq, _)| *seq);
        all.into_iter().map(|(_, key)| key).collect()
    }

    /// Number of pending keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(100);

    #[test]
    fn test_burst_coalesces_into_one_key() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(WINDOW);
        debouncer.push("a.md", start);
        debouncer.push("a.md", start + Duration::from_millis(30));
        debouncer.push("a.md", start + Duration::from_millis(60));
        assert_eq!(debouncer.len(), 1);

        // Still inside the window measured from the last event.
        assert!(
            debouncer
                .drain_ready(start + Duration::from_millis(120))
                .is_empty()
        );
        assert_eq!(
            debouncer.drain_ready(start + Duration::from_millis(160)),
            vec!["a.md"]
        );
        assert!(debouncer.is_empty());
    }

    #[test]
    fn test_ready_keys_keep_first_seen_order() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(WINDOW);
        debouncer.push("b.md", start);
        debouncer.push("a.md", start + Duration::from_millis(10));
        debouncer.push("b.md", start + Duration::from_millis(20));
        let ready = debouncer.drain_ready(start + Duration::from_secs(1));
        assert_eq!(ready, vec!["b.md", "a.md"]);
    }

    #[test]
    fn test_next_deadline_tracks_earliest_key() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(WINDOW);
        assert!(debouncer.next_deadline().is_none());
        debouncer.push("a.md", start);
        debouncer.push("b.md", start + Duration::from_millis(50));
        assert_eq!(debouncer.next_deadline(), Some(start + WINDOW));
    }

    #[test]
    fn test_busy_key_is_forced_out() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(WINDOW).with_max_delay(Duration::from_millis(250));
        for step in 0..10u64 {
            debouncer.push("busy.md", start + Duration::from_millis(step * 50));
        }
        assert_eq!(
            debouncer.drain_ready(start + Duration::from_millis(260)),
            vec!["busy.md"]
        );
    }

    #[test]
    fn test_drain_all() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(WINDOW);
        debouncer.push("x", start);
        debouncer.push("y", start);
        assert_eq!(debouncer.drain_all(), vec!["x", "y"]);
    }
}
