//! Event queue
//!
//! Thread-safe priority queue between the stream client and the
//! orchestrator. Responsibilities:
//! - dedup by `event_id` against a bounded sliding set (FIFO eviction)
//! - priority ordering (smaller number first, FIFO within a level)
//! - the durable checkpoint: `commit` advances `last_spoken_event_id` and
//!   persists the runtime-state file after every commit
//!
//! `admit` is synchronous and takes only a short lock; `next` parks on a
//! `Notify` until an event or close arrives.

use std::collections::{BinaryHeap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, error, warn};

use super::checkpoint::CheckpointStore;
use super::event::Event;

/// Sliding dedup window size.
const DEDUP_CAPACITY: usize = 10_000;

/// Queue depth at which back-pressure is signalled (logged).
const BACKPRESSURE_WATERMARK: usize = 100;

/// Outcome of [`EventQueue::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmitOutcome {
    Admitted,
    Duplicate,
}

/// Heap entry ordered by (priority, arrival), both ascending. The
/// comparison is inverted so `BinaryHeap` pops the smallest pair first.
struct HeapEntry {
    priority: u8,
    seq: u64,
    event: Event,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // BinaryHeap pops the greatest entry; invert so the smallest
        // (priority, seq) pair is popped first.
        (other.priority, other.seq).cmp(&(self.priority, self.seq))
    }
}

struct QueueState {
    heap: BinaryHeap<HeapEntry>,
    seen: HashSet<String>,
    seen_order: VecDeque<String>,
    seq: u64,
    last_spoken: Option<String>,
    match_id: Option<String>,
}

impl QueueState {
    fn remember(&mut self, event_id: &str) {
        if self.seen.insert(event_id.to_string()) {
            self.seen_order.push_back(event_id.to_string());
            while self.seen_order.len() > DEDUP_CAPACITY {
                if let Some(evicted) = self.seen_order.pop_front() {
                    self.seen.remove(&evicted);
                }
            }
        }
    }
}

struct QueueInner {
    state: Mutex<QueueState>,
    notify: Notify,
    closed: AtomicBool,
    store: CheckpointStore,
}

/// Shared handle on the event queue.
#[derive(Clone)]
pub struct EventQueue {
    inner: Arc<QueueInner>,
}

impl EventQueue {
    /// Create a queue backed by the given checkpoint store, seeding
    /// `last_spoken_event_id` and `match_id` from the persisted state.
    pub async fn load(store: CheckpointStore) -> Self {
        let persisted = match store.load().await {
            Ok(state) => state,
            Err(e) => {
                error!("Failed to load runtime state, starting fresh: {}", e);
                None
            }
        };

        let (last_spoken, match_id) = persisted
            .map(|s| (s.last_spoken_event_id, s.match_id))
            .unwrap_or((None, None));

        if let Some(id) = &last_spoken {
            debug!("Loaded checkpoint: last_spoken_event_id={}", id);
        }

        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState {
                    heap: BinaryHeap::new(),
                    seen: HashSet::new(),
                    seen_order: VecDeque::new(),
                    seq: 0,
                    last_spoken,
                    match_id,
                }),
                notify: Notify::new(),
                closed: AtomicBool::new(false),
                store,
            }),
        }
    }

    /// Admit an event, rejecting duplicates.
    ///
    /// Rejects when the id has been seen in the sliding window or equals the
    /// last committed id. Event ids are opaque, so no ordering relation
    /// beyond equality is assumed here; chronological filtering of catch-up
    /// batches is the stream client's job.
    pub fn admit(&self, event: Event) -> AdmitOutcome {
        if self.inner.closed.load(Ordering::Acquire) {
            return AdmitOutcome::Duplicate;
        }

        let depth = {
            let mut state = self.inner.state.lock();

            if state.seen.contains(&event.event_id)
                || state.last_spoken.as_deref() == Some(event.event_id.as_str())
            {
                return AdmitOutcome::Duplicate;
            }

            state.remember(&event.event_id);
            state.seq += 1;
            let entry = HeapEntry {
                priority: event.priority,
                seq: state.seq,
                event,
            };
            state.heap.push(entry);
            state.heap.len()
        };

        if depth > BACKPRESSURE_WATERMARK {
            warn!("Event queue depth growing: {} pending events", depth);
        }

        self.inner.notify.notify_waiters();
        AdmitOutcome::Admitted
    }

    /// Pop the highest-priority pending event, waiting until one exists.
    ///
    /// Returns `None` once the queue has been closed.
    pub async fn next(&self) -> Option<Event> {
        loop {
            let notified = self.inner.notify.notified();

            if self.inner.closed.load(Ordering::Acquire) {
                return None;
            }

            if let Some(entry) = self.inner.state.lock().heap.pop() {
                return Some(entry.event);
            }

            notified.await;
        }
    }

    /// Wait for a pending event with priority strictly higher (numerically
    /// smaller) than `than_priority` and pop it.
    ///
    /// Never resolves otherwise; intended for use inside `select!` while a
    /// lower-priority submission is playing.
    pub async fn next_preempting(&self, than_priority: u8) -> Option<Event> {
        loop {
            let notified = self.inner.notify.notified();

            if self.inner.closed.load(Ordering::Acquire) {
                return None;
            }

            {
                let mut state = self.inner.state.lock();
                let preempts = state
                    .heap
                    .peek()
                    .map(|head| head.priority < than_priority)
                    .unwrap_or(false);
                if preempts {
                    return state.heap.pop().map(|entry| entry.event);
                }
            }

            notified.await;
        }
    }

    /// Advance the checkpoint to `event_id` and persist the runtime state.
    ///
    /// A persistence failure is logged and otherwise swallowed: the
    /// in-memory checkpoint keeps advancing and the next successful write
    /// recovers. The id also enters the dedup window so late duplicates of
    /// committed events are rejected for the rest of the session.
    pub async fn commit(&self, event_id: &str) {
        let (match_id, last_spoken) = {
            let mut state = self.inner.state.lock();
            state.last_spoken = Some(event_id.to_string());
            state.remember(event_id);
            (state.match_id.clone(), state.last_spoken.clone())
        };

        if let Err(e) = self
            .inner
            .store
            .save(match_id.as_deref(), last_spoken.as_deref())
            .await
        {
            error!("Failed to persist runtime state: {}", e);
        }
    }

    /// Read the current checkpoint.
    pub fn checkpoint(&self) -> Option<String> {
        self.inner.state.lock().last_spoken.clone()
    }

    /// Current match subscription recorded in the runtime state.
    pub fn match_id(&self) -> Option<String> {
        self.inner.state.lock().match_id.clone()
    }

    /// Record a match change. Resets the dedup window (ids are only unique
    /// within a match) and persists the new match id.
    pub async fn set_match_id(&self, match_id: &str) {
        let changed = {
            let mut state = self.inner.state.lock();
            if state.match_id.as_deref() == Some(match_id) {
                false
            } else {
                state.match_id = Some(match_id.to_string());
                state.seen.clear();
                state.seen_order.clear();
                true
            }
        };

        if changed {
            let (match_id, last_spoken) = {
                let state = self.inner.state.lock();
                (state.match_id.clone(), state.last_spoken.clone())
            };
            if let Err(e) = self
                .inner
                .store
                .save(match_id.as_deref(), last_spoken.as_deref())
                .await
            {
                error!("Failed to persist runtime state: {}", e);
            }
        }
    }

    /// Number of pending events.
    pub fn len(&self) -> usize {
        self.inner.state.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close the queue: `next` unblocks with `None` and further admits are
    /// rejected.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event::{Intensity, PRIORITY_NORMAL, PRIORITY_SPECIAL};
    use tempfile::TempDir;

    fn event(id: &str, priority: u8) -> Event {
        Event {
            event_id: id.to_string(),
            match_id: "m1".to_string(),
            text: format!("text for {id}"),
            intensity: Intensity::Normal,
            priority,
        }
    }

    async fn queue(dir: &TempDir) -> EventQueue {
        EventQueue::load(CheckpointStore::new(dir.path().join("runtime_state.json"))).await
    }

    #[tokio::test]
    async fn test_admit_and_next() {
        let dir = TempDir::new().unwrap();
        let q = queue(&dir).await;

        assert_eq!(q.admit(event("e1", PRIORITY_NORMAL)), AdmitOutcome::Admitted);
        let got = q.next().await.unwrap();
        assert_eq!(got.event_id, "e1");
    }

    #[tokio::test]
    async fn test_duplicate_rejected() {
        let dir = TempDir::new().unwrap();
        let q = queue(&dir).await;

        assert_eq!(q.admit(event("e1", PRIORITY_NORMAL)), AdmitOutcome::Admitted);
        assert_eq!(q.admit(event("e1", PRIORITY_NORMAL)), AdmitOutcome::Duplicate);
        assert_eq!(q.len(), 1);
    }

    #[tokio::test]
    async fn test_priority_order_with_fifo_ties() {
        let dir = TempDir::new().unwrap();
        let q = queue(&dir).await;

        q.admit(event("n1", PRIORITY_NORMAL));
        q.admit(event("n2", PRIORITY_NORMAL));
        q.admit(event("s1", PRIORITY_SPECIAL));
        q.admit(event("n3", PRIORITY_NORMAL));

        let order: Vec<String> = [
            q.next().await.unwrap(),
            q.next().await.unwrap(),
            q.next().await.unwrap(),
            q.next().await.unwrap(),
        ]
        .into_iter()
        .map(|e| e.event_id)
        .collect();

        assert_eq!(order, vec!["s1", "n1", "n2", "n3"]);
    }

    #[tokio::test]
    async fn test_commit_rejects_replay() {
        let dir = TempDir::new().unwrap();
        let q = queue(&dir).await;

        q.admit(event("e1", PRIORITY_NORMAL));
        let e = q.next().await.unwrap();
        q.commit(&e.event_id).await;

        assert_eq!(q.admit(event("e1", PRIORITY_NORMAL)), AdmitOutcome::Duplicate);
        assert_eq!(q.checkpoint().as_deref(), Some("e1"));
    }

    #[tokio::test]
    async fn test_checkpoint_survives_restart() {
        let dir = TempDir::new().unwrap();

        {
            let q = queue(&dir).await;
            q.set_match_id("m1").await;
            q.admit(event("e5", PRIORITY_NORMAL));
            let e = q.next().await.unwrap();
            q.commit(&e.event_id).await;
        }

        let q = queue(&dir).await;
        assert_eq!(q.checkpoint().as_deref(), Some("e5"));
        assert_eq!(q.match_id().as_deref(), Some("m1"));
        // The committed id itself is still rejected after restart.
        assert_eq!(q.admit(event("e5", PRIORITY_NORMAL)), AdmitOutcome::Duplicate);
        // Newer events are admitted.
        assert_eq!(q.admit(event("e6", PRIORITY_NORMAL)), AdmitOutcome::Admitted);
    }

    #[tokio::test]
    async fn test_match_change_resets_dedup() {
        let dir = TempDir::new().unwrap();
        let q = queue(&dir).await;

        q.set_match_id("m1").await;
        q.admit(event("e1", PRIORITY_NORMAL));
        assert_eq!(q.admit(event("e1", PRIORITY_NORMAL)), AdmitOutcome::Duplicate);

        q.set_match_id("m2").await;
        assert_eq!(q.admit(event("e1", PRIORITY_NORMAL)), AdmitOutcome::Admitted);
    }

    #[tokio::test]
    async fn test_close_unblocks_next() {
        let dir = TempDir::new().unwrap();
        let q = queue(&dir).await;

        let waiter = {
            let q = q.clone();
            tokio::spawn(async move { q.next().await })
        };
        tokio::task::yield_now().await;
        q.close();

        assert_eq!(waiter.await.unwrap(), None);
        assert_eq!(q.admit(event("e1", PRIORITY_NORMAL)), AdmitOutcome::Duplicate);
    }

    #[tokio::test]
    async fn test_next_preempting_only_fires_for_higher_priority() {
        let dir = TempDir::new().unwrap();
        let q = queue(&dir).await;

        q.admit(event("n1", PRIORITY_NORMAL));

        // A same-priority event must not resolve the preemption wait.
        let result = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            q.next_preempting(PRIORITY_NORMAL),
        )
        .await;
        assert!(result.is_err(), "normal event must not preempt normal");

        q.admit(event("s1", PRIORITY_SPECIAL));
        let got = q.next_preempting(PRIORITY_NORMAL).await.unwrap();
        assert_eq!(got.event_id, "s1");

        // The normal event is still queued.
        assert_eq!(q.next().await.unwrap().event_id, "n1");
    }

    #[tokio::test]
    async fn test_dedup_window_eviction() {
        let dir = TempDir::new().unwrap();
        let q = queue(&dir).await;

        // Overflow the window so the earliest id is evicted.
        for i in 0..(DEDUP_CAPACITY + 1) {
            q.admit(event(&format!("e{i}"), PRIORITY_NORMAL));
        }

        assert_eq!(q.admit(event("e0", PRIORITY_NORMAL)), AdmitOutcome::Admitted);
        assert_eq!(q.admit(event("e1", PRIORITY_NORMAL)), AdmitOutcome::Duplicate);
    }
}
