//! Capacity-bounded max-priority queue of [`DispatchJob`]s.
//!
//! Jobs are keyed by `(priority, enqueued_at, seq)` in a `BTreeMap`, so the
//! maximum (next to send) and the minimum (eviction candidate) are both
//! O(log n). Once full, the queue keeps the top-`capacity` jobs it has seen.

use std::collections::BTreeMap;

use ordered_float::OrderedFloat;

use crate::dispatch::types::{DispatchJob, EnqueueOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct JobKey {
    priority: OrderedFloat<f64>,
    enqueued_at_ms: u64,
    // Insertion order; later inserts rank higher on a full tie.
    seq: u64,
}

#[derive(Debug)]
pub struct BoundedPriorityQueue {
    jobs: BTreeMap<JobKey, DispatchJob>,
    capacity: usize,
    next_seq: u64,
}

impl BoundedPriorityQueue {
    pub fn new(capacity: usize) -> Self {
        Self { jobs: BTreeMap::new(), capacity, next_seq: 0 }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    fn key_for(&mut self, job: &DispatchJob) -> JobKey {
        let seq = self.next_seq;
        self.next_seq += 1;
        JobKey {
            priority: OrderedFloat(job.priority_key),
            enqueued_at_ms: job.enqueued_at_ms,
            seq,
        }
    }

    pub fn enqueue(&mut self, job: DispatchJob) -> EnqueueOutcome {
        let key = self.key_for(&job);

        if self.jobs.len() < self.capacity {
            self.jobs.insert(key, job);
            return EnqueueOutcome { added: true, evicted: None };
        }

        match self.jobs.first_key_value().map(|(k, _)| *k) {
            Some(min_key) if key > min_key => {
                let evicted = self.jobs.remove(&min_key);
                self.jobs.insert(key, job);
                EnqueueOutcome { added: true, evicted }
            }
            _ => EnqueueOutcome { added: false, evicted: Some(job) },
        }
    }

    /// Highest priority first; `None` when empty.
    pub fn dequeue(&mut self) -> Option<DispatchJob> {
        self.jobs.pop_last().map(|(_, job)| job)
    }

    pub fn peek(&self) -> Option<&DispatchJob> {
        self.jobs.last_key_value().map(|(_, job)| job)
    }

    /// Drops everything without sending; returns how many jobs were discarded.
    pub fn clear(&mut self) -> usize {
        let n = self.jobs.len();
        self.jobs.clear();
        n
    }

    /// Held jobs from highest to lowest priority.
    pub fn iter_ordered(&self) -> impl Iterator<Item = &DispatchJob> {
        self.jobs.values().rev()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn job(notional: f64, ts: u64) -> DispatchJob {
        DispatchJob::new(format!("job {notional}@{ts}"), notional, ts)
    }

    #[test]
    fn test_keeps_top_capacity_and_drains_in_order() {
        let mut q = BoundedPriorityQueue::new(3);
        let mut outcomes = Vec::new();
        for (i, n) in [5.0, 100.0, 50.0, 1000.0, 1.0].into_iter().enumerate() {
            outcomes.push(q.enqueue(job(n, i as u64)));
        }

        assert!(outcomes[..3].iter().all(|o| o.added && o.evicted.is_none()));
        // 1000 pushes out 5, then 1 is rejected outright.
        assert!(outcomes[3].added);
        assert_eq!(outcomes[3].evicted.as_ref().map(|j| j.priority_key), Some(5.0));
        assert!(!outcomes[4].added);
        assert_eq!(outcomes[4].evicted.as_ref().map(|j| j.priority_key), Some(1.0));

        let held: Vec<f64> = q.iter_ordered().map(|j| j.priority_key).collect();
        assert_eq!(held, vec![1000.0, 100.0, 50.0]);

        assert_eq!(q.dequeue().map(|j| j.priority_key), Some(1000.0));
        assert_eq!(q.dequeue().map(|j| j.priority_key), Some(100.0));
        assert_eq!(q.dequeue().map(|j| j.priority_key), Some(50.0));
        assert_eq!(q.dequeue(), None);
        assert!(q.is_empty());
    }

    #[test]
    fn test_tie_break_prefers_recent() {
        let mut q = BoundedPriorityQueue::new(10);
        q.enqueue(job(10.0, 1));
        q.enqueue(job(10.0, 3));
        q.enqueue(job(10.0, 2));
        let order: Vec<u64> = std::iter::from_fn(|| q.dequeue()).map(|j| j.enqueued_at_ms).collect();
        assert_eq!(order, vec![3, 2, 1]);
    }

    #[test]
    fn test_equal_job_replaces_older_minimum_when_full() {
        let mut q = BoundedPriorityQueue::new(1);
        q.enqueue(job(10.0, 1));
        let out = q.enqueue(job(10.0, 2));
        assert!(out.added);
        assert_eq!(out.evicted.map(|j| j.enqueued_at_ms), Some(1));
        assert_eq!(q.peek().map(|j| j.enqueued_at_ms), Some(2));

        // Older timestamp with the same priority loses.
        let out = q.enqueue(job(10.0, 0));
        assert!(!out.added);
    }

    #[test]
    fn test_zero_capacity_rejects_everything() {
        let mut q = BoundedPriorityQueue::new(0);
        let out = q.enqueue(job(1e9, 1));
        assert!(!out.added);
        assert!(out.evicted.is_some());
        assert_eq!(q.len(), 0);
    }

    #[test]
    fn test_clear() {
        let mut q = BoundedPriorityQueue::new(4);
        q.enqueue(job(1.0, 1));
        q.enqueue(job(2.0, 2));
        assert_eq!(q.clear(), 2);
        assert!(q.is_empty());
        assert!(q.peek().is_none());
        assert_eq!(q.capacity(), 4);
    }

    fn pairs_and_permutation() -> impl Strategy<Value = (Vec<(u32, u64)>, Vec<(u32, u64)>)> {
        // Timestamps are drawn independently of arrival position.
        prop::collection::vec((0u32..500, 0u64..1_000), 0..120)
            .prop_flat_map(|pairs| (Just(pairs.clone()), Just(pairs).prop_shuffle()))
    }

    fn drain_pairs(capacity: usize, arrivals: &[(u32, u64)]) -> Vec<(u32, u64)> {
        let mut q = BoundedPriorityQueue::new(capacity);
        for (n, ts) in arrivals {
            q.enqueue(job(*n as f64, *ts));
        }
        std::iter::from_fn(|| q.dequeue())
            .map(|j| (j.priority_key as u32, j.enqueued_at_ms))
            .collect()
    }

    proptest! {
        #[test]
        fn prop_holds_top_k_regardless_of_arrival_order(
            (pairs, shuffled) in pairs_and_permutation(),
            capacity in 1usize..20,
        ) {
            let mut expected = pairs.clone();
            expected.sort_by(|a, b| b.cmp(a));
            expected.truncate(capacity);

            prop_assert_eq!(drain_pairs(capacity, &pairs), expected.clone());
            prop_assert_eq!(drain_pairs(capacity, &shuffled), expected);
        }
    }
}
