//! Scheduling queue: three sub-queues (active heap, backoff list, unschedulable
//! set) behind one lock, with a `watch` channel standing in for the
//! condition-variable wakeup.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::time::Duration;

use bitflags::bitflags;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;

use crate::models::SchedulingItem;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

bitflags! {
    /// The cluster event(s) that triggered a `move_all_to_active` wake-up.
    /// `MoveAllToActive` itself stays coarse-grained (every unschedulable
    /// item retries regardless of which bit fired) — these flags exist so a
    /// caller can report *why* it woke the queue, and as the seam a future
    /// per-item "queueing hints" scheme (noted in the source as a planned
    /// improvement) would key off of.
    pub struct WakeReason: u32 {
        const NODE_ADDED = 1;
        const NODE_UPDATED = 1 << 1;
        const POD_DELETED = 1 << 2;
        const UNSCHEDULABLE_TIMEOUT = 1 << 3;
    }
}

impl std::fmt::Display for WakeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
struct ActiveEntry {
    priority: i64,
    seq: u64,
    key: String,
}

impl Ord for ActiveEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for ActiveEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct BackoffEntry {
    key: String,
    ready_at: Instant,
}

struct Inner {
    active: BinaryHeap<ActiveEntry>,
    backoff: Vec<BackoffEntry>,
    unschedulable: HashMap<String, SchedulingItem>,
    items: HashMap<String, SchedulingItem>,
    backoff_durations: HashMap<String, Duration>,
    next_seq: u64,
    shutting_down: bool,
}

impl Inner {
    fn new() -> Self {
        Self {
            active: BinaryHeap::new(),
            backoff: Vec::new(),
            unschedulable: HashMap::new(),
            items: HashMap::new(),
            backoff_durations: HashMap::new(),
            next_seq: 0,
            shutting_down: false,
        }
    }

    fn flush_backoff(&mut self, now: Instant) {
        let (ready, pending): (Vec<_>, Vec<_>) =
            self.backoff.drain(..).partition(|e| e.ready_at <= now);
        self.backoff = pending;
        for entry in ready {
            if let Some(item) = self.items.get(&entry.key) {
                self.active.push(ActiveEntry {
                    priority: item.priority,
                    seq: self.next_seq,
                    key: entry.key,
                });
                self.next_seq += 1;
            }
        }
    }
}

/// In-process priority queue feeding the pod scheduler loop. A single
/// `tokio::sync::Mutex` guards all three sub-queues; a `watch` channel
/// replaces the condition variable a thread-based implementation would use.
pub struct SchedulingQueue {
    inner: Mutex<Inner>,
    notify_tx: watch::Sender<u64>,
    notify_rx: Mutex<watch::Receiver<u64>>,
}

impl Default for SchedulingQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulingQueue {
    pub fn new() -> Self {
        let (notify_tx, notify_rx) = watch::channel(0);
        Self {
            inner: Mutex::new(Inner::new()),
            notify_tx,
            notify_rx: Mutex::new(notify_rx),
        }
    }

    fn wake(&self) {
        self.notify_tx.send_modify(|v| *v += 1);
    }

    /// Enqueues `item` into active. A no-op if the key is already known (in
    /// any sub-queue) or the queue is shutting down.
    pub async fn add(&self, item: SchedulingItem) -> bool {
        let mut guard = self.inner.lock().await;
        if guard.shutting_down || guard.items.contains_key(&item.key()) {
            return false;
        }
        let key = item.key();
        let entry = ActiveEntry {
            priority: item.priority,
            seq: guard.next_seq,
            key: key.clone(),
        };
        guard.next_seq += 1;
        guard.active.push(entry);
        guard.items.insert(key, item);
        drop(guard);
        self.wake();
        true
    }

    /// Blocks until an item is available in active (flushing backoff on
    /// every attempt) or the queue shuts down, in which case `None` is
    /// returned to every waiter.
    ///
    /// The dequeued item stays in the dedup map (it is "known" to the queue
    /// until a matching [`SchedulingQueue::done`]) so that the caller can
    /// still reference it by key in a subsequent `add_backoff`/
    /// `add_unschedulable` without racing a concurrent duplicate `add`.
    pub async fn get(&self) -> Option<SchedulingItem> {
        loop {
            let mut guard = self.inner.lock().await;
            guard.flush_backoff(Instant::now());
            if let Some(entry) = guard.active.pop() {
                let item = guard.items.get(&entry.key).cloned();
                return item;
            }
            if guard.shutting_down {
                return None;
            }
            let mut rx = self.notify_rx.lock().await;
            drop(guard);
            if rx.changed().await.is_err() {
                return None;
            }
        }
    }

    /// Marks an item's lifecycle complete: removes it from the dedup map so
    /// a future `add` with the same key starts a fresh version. Called once
    /// a dequeued item is no longer being retried (bound successfully, or
    /// abandoned).
    pub async fn done(&self, key: &str) {
        let mut guard = self.inner.lock().await;
        guard.items.remove(key);
        guard.backoff_durations.remove(key);
    }

    /// Sets `backoff_duration = next(prev)` (`next(0) = 1s`, else
    /// `min(prev*2, 60s)`) and schedules the item to rejoin active at
    /// `now + backoff_duration`. Returns the computed duration, or `None` if
    /// the key isn't known (it must have come from a prior `get`).
    pub async fn add_backoff(&self, key: &str) -> Option<Duration> {
        let mut guard = self.inner.lock().await;
        let item = guard.items.get(key)?.clone();
        let prev = guard.backoff_durations.get(key).copied();
        let next = match prev {
            None => INITIAL_BACKOFF,
            Some(p) => std::cmp::min(p * 2, MAX_BACKOFF),
        };
        guard.backoff_durations.insert(key.to_string(), next);
        guard.items.insert(key.to_string(), item);
        guard.backoff.push(BackoffEntry {
            key: key.to_string(),
            ready_at: Instant::now() + next,
        });
        Some(next)
    }

    /// Moves a known item into the unschedulable set.
    pub async fn add_unschedulable(&self, key: &str) {
        let mut guard = self.inner.lock().await;
        if let Some(item) = guard.items.get(key).cloned() {
            guard.unschedulable.insert(key.to_string(), item);
        }
    }

    /// Drains unschedulable back into active and wakes every waiter. Coarse
    /// by design: everything unschedulable retries on any relevant event
    /// rather than only items a finer "queueing hint" would select.
    pub async fn move_all_to_active(&self, reason: WakeReason) {
        let mut guard = self.inner.lock().await;
        let keys: Vec<String> = guard.unschedulable.keys().cloned().collect();
        log::debug!("moving {} unschedulable item(s) to active: {reason}", keys.len());
        for key in keys {
            if let Some(item) = guard.unschedulable.remove(&key) {
                let entry = ActiveEntry {
                    priority: item.priority,
                    seq: guard.next_seq,
                    key: key.clone(),
                };
                guard.next_seq += 1;
                guard.active.push(entry);
                guard.items.insert(key, item);
            }
        }
        drop(guard);
        self.wake();
    }

    pub async fn shutdown(&self) {
        let mut guard = self.inner.lock().await;
        guard.shutting_down = true;
        drop(guard);
        self.wake();
    }

    pub async fn len_active(&self) -> usize {
        self.inner.lock().await.active.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ItemKind;
    use serial_test::serial;

    fn item(name: &str, priority: i64) -> SchedulingItem {
        SchedulingItem::new("default", name, ItemKind::Pod, priority)
    }

    #[tokio::test]
    async fn add_dedups_on_key() {
        let queue = SchedulingQueue::new();
        assert!(queue.add(item("a", 1)).await);
        assert!(!queue.add(item("a", 5)).await);
        assert_eq!(queue.len_active().await, 1);
    }

    #[tokio::test]
    async fn get_returns_highest_priority_first() {
        let queue = SchedulingQueue::new();
        queue.add(item("low", 1)).await;
        queue.add(item("high", 9)).await;
        let first = queue.get().await.unwrap();
        assert_eq!(first.name, "high");
    }

    #[tokio::test]
    #[serial]
    async fn backoff_duration_doubles_and_caps() {
        let queue = SchedulingQueue::new();
        queue.add(item("a", 1)).await;
        queue.get().await.unwrap();
        let d1 = queue.add_backoff("default/a").await.unwrap();
        assert_eq!(d1, Duration::from_secs(1));
        let d2 = queue.add_backoff("default/a").await.unwrap();
        assert_eq!(d2, Duration::from_secs(2));
        let d3 = queue.add_backoff("default/a").await.unwrap();
        assert_eq!(d3, Duration::from_secs(4));
    }

    #[tokio::test]
    async fn unschedulable_rejoins_active_on_move_all() {
        let queue = SchedulingQueue::new();
        queue.add(item("a", 1)).await;
        queue.get().await.unwrap();
        queue.add_unschedulable("default/a").await;
        queue.move_all_to_active(WakeReason::NODE_ADDED).await;
        let item = queue.get().await.unwrap();
        assert_eq!(item.name, "a");
    }

    #[tokio::test]
    async fn shutdown_releases_waiters() {
        let queue = std::sync::Arc::new(SchedulingQueue::new());
        let waiter = queue.clone();
        let handle = tokio::spawn(async move { waiter.get().await });
        tokio::task::yield_now().await;
        queue.shutdown().await;
        let result = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("get() should return promptly after shutdown")
            .unwrap();
        assert!(result.is_none());
    }
}
