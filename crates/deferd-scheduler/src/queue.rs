use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use deferd_core::JobId;
use tracing::debug;

/// Stale entries are only swept once the heap holds at least this many.
const COMPACT_MIN_ENTRIES: usize = 64;

#[derive(Debug)]
struct Entry {
    run_at: f64,
    /// Insertion sequence; breaks `run_at` ties in FIFO order.
    seq: u64,
    id: JobId,
}

impl Ord for Entry {
    // Reversed so the std max-heap pops the earliest run_at, then the oldest seq.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .run_at
            .total_cmp(&self.run_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

/// Min-heap of job ids keyed by `run_at`, with lazy removal.
///
/// `live` maps each pending id to the sequence number of its one valid heap
/// entry. Removing or re-inserting an id invalidates older entries, which are
/// dropped when they reach the top of the heap. The queue is not internally
/// synchronised: [`crate::registry::JobRegistry`] owns it behind the same lock
/// as the job map.
#[derive(Debug, Default)]
pub struct TimeQueue {
    heap: BinaryHeap<Entry>,
    live: HashMap<JobId, u64>,
    next_seq: u64,
}

impl TimeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or move) the pending entry for `id`.
    pub fn insert(&mut self, id: JobId, run_at: f64) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.live.insert(id.clone(), seq);
        self.heap.push(Entry { run_at, seq, id });
        self.maybe_compact();
    }

    /// Earliest pending id if it is due at `now`, without removing it.
    pub fn peek_due(&mut self, now: f64) -> Option<&JobId> {
        self.prune_head();
        self.heap
            .peek()
            .filter(|entry| entry.run_at <= now)
            .map(|entry| &entry.id)
    }

    /// Remove and return the earliest pending id if it is due at `now`.
    pub fn pop_due(&mut self, now: f64) -> Option<JobId> {
        self.prune_head();
        if self.heap.peek()?.run_at > now {
            return None;
        }
        let entry = self.heap.pop()?;
        self.live.remove(&entry.id);
        Some(entry.id)
    }

    /// Tombstone the pending entry for `id`. Returns false if none existed.
    pub fn remove(&mut self, id: &JobId) -> bool {
        let removed = self.live.remove(id).is_some();
        if removed {
            self.maybe_compact();
        }
        removed
    }

    /// `run_at` of the earliest pending entry, due or not.
    pub fn next_due(&mut self) -> Option<f64> {
        self.prune_head();
        self.heap.peek().map(|entry| entry.run_at)
    }

    pub fn contains(&self, id: &JobId) -> bool {
        self.live.contains_key(id)
    }

    /// Number of pending entries (tombstoned entries excluded).
    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    fn is_live(&self, entry: &Entry) -> bool {
        self.live.get(&entry.id) == Some(&entry.seq)
    }

    /// Drop tombstoned entries sitting at the top of the heap.
    fn prune_head(&mut self) {
        while let Some(top) = self.heap.peek() {
            if self.is_live(top) {
                break;
            }
            self.heap.pop();
        }
    }

    fn maybe_compact(&mut self) {
        if self.heap.len() < COMPACT_MIN_ENTRIES || self.heap.len() <= 2 * self.live.len() {
            return;
        }
        let before = self.heap.len();
        let live = &self.live;
        self.heap
            .retain(|entry| live.get(&entry.id) == Some(&entry.seq));
        debug!(
            before,
            after = self.heap.len(),
            "compacted time queue tombstones"
        );
    }
}
