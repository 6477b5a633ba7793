//! Fire queue.
//!
//! Min-heap of pending fires ordered by fire time, then insertion sequence.
//! Entries are never removed eagerly: cancelling a job bumps its epoch and
//! the stale entries are discarded when they reach the top.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use cadence_core::JobKey;
use chrono::{DateTime, Utc};

/// Why an entry was queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireReason {
    /// The job's regular slot. Re-arms the job after it runs.
    Scheduled,
    /// One-shot retry of due signals. Never re-arms the job.
    Retry,
}

/// One queued fire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FireEntry {
    pub fire_at: DateTime<Utc>,
    pub seq: u64,
    pub key: JobKey,
    pub epoch: u64,
    pub reason: FireReason,
}

impl Ord for FireEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.fire_at
            .cmp(&other.fire_at)
            .then(self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for FireEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
pub struct FireQueue {
    heap: BinaryHeap<Reverse<FireEntry>>,
    next_seq: u64,
}

impl FireQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a fire; returns its sequence number.
    pub fn push(
        &mut self,
        key: JobKey,
        fire_at: DateTime<Utc>,
        epoch: u64,
        reason: FireReason,
    ) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(FireEntry {
            fire_at,
            seq,
            key,
            epoch,
            reason,
        }));
        seq
    }

    /// Earliest queued fire time, stale entries included.
    #[must_use]
    pub fn next_fire_at(&self) -> Option<DateTime<Utc>> {
        self.heap.peek().map(|Reverse(e)| e.fire_at)
    }

    /// Remove and return every entry due at `now`, earliest first.
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Vec<FireEntry> {
        let mut due = Vec::new();
        while self.heap.peek().is_some_and(|Reverse(e)| e.fire_at <= now) {
            if let Some(Reverse(entry)) = self.heap.pop() {
                due.push(entry);
            }
        }
        due
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Drop entries rejected by `keep`.
    pub fn retain(&mut self, keep: impl Fn(&FireEntry) -> bool) {
        self.heap.retain(|Reverse(e)| keep(e));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 27, 0, 30, 0).unwrap()
    }

    #[test]
    fn test_pop_due_in_time_order() {
        let mut queue = FireQueue::new();
        queue.push(JobKey::execution("b".into()), t0() + Duration::hours(4), 1, FireReason::Scheduled);
        queue.push(JobKey::generation("a".into()), t0(), 1, FireReason::Scheduled);
        queue.push(JobKey::generation("b".into()), t0() + Duration::hours(1), 1, FireReason::Scheduled);

        assert_eq!(queue.next_fire_at(), Some(t0()));
        let due = queue.pop_due(t0() + Duration::hours(1));
        let keys: Vec<String> = due.iter().map(|e| e.key.to_string()).collect();
        assert_eq!(keys, vec!["a/generation", "b/generation"]);
        assert_eq!(queue.len(), 1);
        assert!(queue.pop_due(t0() + Duration::hours(2)).is_empty());
    }

    #[test]
    fn test_equal_times_keep_insertion_order() {
        let mut queue = FireQueue::new();
        let first = queue.push(JobKey::generation("a".into()), t0(), 1, FireReason::Scheduled);
        let second = queue.push(JobKey::execution("a".into()), t0(), 1, FireReason::Retry);

        let due = queue.pop_due(t0());
        assert_eq!(due.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![first, second]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_retain_drops_entries() {
        let mut queue = FireQueue::new();
        queue.push(JobKey::generation("a".into()), t0(), 1, FireReason::Scheduled);
        queue.push(JobKey::generation("b".into()), t0(), 1, FireReason::Scheduled);
        queue.retain(|e| e.key.strategy.as_str() != "a");
        assert_eq!(queue.len(), 1);
    }
}
