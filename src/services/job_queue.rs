use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use crate::domain::JobId;

/// Heap entry for one pending job.
///
/// Ordering is priority descending, then deadline ascending, then
/// submission order ascending. `BinaryHeap` pops the greatest entry, so
/// "greater" here means "dispatch sooner".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub job_id: JobId,
    pub priority: i32,
    pub deadline: DateTime<Utc>,
    pub seq: u64,
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.deadline.cmp(&self.deadline))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// In-process priority queue. Entries may go stale when a job changes state
/// elsewhere; the scheduler skips those on pop.
#[derive(Default)]
pub struct JobQueue {
    heap: Mutex<BinaryHeap<QueueEntry>>,
    next_seq: AtomicU64,
}

impl JobQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Hands out the insertion sequence number for a new submission.
    pub fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, AtomicOrdering::SeqCst)
    }

    pub fn push(&self, entry: QueueEntry) {
        let mut heap = self.lock();
        heap.push(entry);
        metrics::gauge!("job_queue_depth").set(heap.len() as f64);
    }

    pub fn pop(&self) -> Option<QueueEntry> {
        let mut heap = self.lock();
        let entry = heap.pop();
        metrics::gauge!("job_queue_depth").set(heap.len() as f64);
        entry
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BinaryHeap<QueueEntry>> {
        self.heap
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
