// ── Bounded producer/consumer queue ──
//
// Single-consumer FIFO with a fixed capacity. When full, either the
// oldest queued item or the incoming item is discarded and counted.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use tokio::sync::Notify;

/// What to discard when a push hits capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Overflow {
    DropOldest,
    DropNewest,
}

pub(crate) struct BoundedQueue<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
    overflow: Overflow,
    notify: Notify,
    dropped: AtomicU64,
    closed: AtomicBool,
}

/// Outcome of a push, so callers can log drops with their own context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Pushed {
    Queued,
    /// Item queued, but the oldest one was evicted.
    EvictedOldest,
    /// Incoming item discarded.
    Rejected,
}

impl<T> BoundedQueue<T> {
    pub(crate) fn new(capacity: usize, overflow: Overflow) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
            overflow,
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn push(&self, item: T) -> Pushed {
        if self.closed.load(Ordering::Acquire) {
            return Pushed::Rejected;
        }

        let outcome = {
            let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
            if items.len() < self.capacity {
                items.push_back(item);
                Pushed::Queued
            } else {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                match self.overflow {
                    Overflow::DropOldest => {
                        items.pop_front();
                        items.push_back(item);
                        Pushed::EvictedOldest
                    }
                    Overflow::DropNewest => Pushed::Rejected,
                }
            }
        };

        if outcome != Pushed::Rejected {
            self.notify.notify_one();
        }
        outcome
    }

    /// Wait for the next item. Returns `None` once closed and drained.
    pub(crate) async fn pop(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            {
                let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(item) = items.pop_front() {
                    return Some(item);
                }
                if self.closed.load(Ordering::Acquire) {
                    return None;
                }
            }
            notified.await;
        }
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fifo_order() {
        let q = BoundedQueue::new(4, Overflow::DropOldest);
        q.push(1);
        q.push(2);
        q.push(3);
        assert_eq!(q.pop().await, Some(1));
        assert_eq!(q.pop().await, Some(2));
        assert_eq!(q.pop().await, Some(3));
    }

    #[tokio::test]
    async fn drop_oldest_evicts_head() {
        let q = BoundedQueue::new(2, Overflow::DropOldest);
        q.push("a");
        q.push("b");
        assert_eq!(q.push("c"), Pushed::EvictedOldest);
        assert_eq!(q.dropped(), 1);
        assert_eq!(q.pop().await, Some("b"));
        assert_eq!(q.pop().await, Some("c"));
    }

    #[tokio::test]
    async fn drop_newest_rejects_incoming() {
        let q = BoundedQueue::new(2, Overflow::DropNewest);
        q.push(1);
        q.push(2);
        assert_eq!(q.push(3), Pushed::Rejected);
        assert_eq!(q.len(), 2);
        assert_eq!(q.pop().await, Some(1));
        assert_eq!(q.pop().await, Some(2));
    }

    #[tokio::test]
    async fn close_drains_then_ends() {
        let q = BoundedQueue::new(2, Overflow::DropOldest);
        q.push(7);
        q.close();
        assert_eq!(q.pop().await, Some(7));
        assert_eq!(q.pop().await, None);
        assert_eq!(q.push(8), Pushed::Rejected);
    }
}
