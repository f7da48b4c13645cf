//! Blocking FIFO handoff between the network thread and the consumer.
//!
//! `BlockingQueue` never applies backpressure: `add()` always succeeds while
//! the queue is open and only logs when the backlog grows past a soft
//! threshold. Items added after `shutdown()` are discarded. `take()` parks the
//! caller until an item arrives or the queue is shut down.
//!
//! Delivery is at-most-once. An item handed out by `take()` is owned by the
//! caller; if the caller fails, the item is gone.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Backlog size above which `add()` starts warning.
pub const DEFAULT_WARN_THRESHOLD: usize = 1000;

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
    /// Set once the backlog has been reported, cleared when it drains back.
    warned: bool,
}

pub struct BlockingQueue<T> {
    state: Mutex<QueueState<T>>,
    available: Condvar,
    /// Mirrors `QueueState::closed` for lock-free checks.
    exit: AtomicBool,
    warn_threshold: usize,
}

impl<T> BlockingQueue<T> {
    pub fn new() -> Self {
        Self::with_warn_threshold(DEFAULT_WARN_THRESHOLD)
    }

    pub fn with_warn_threshold(warn_threshold: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
                warned: false,
            }),
            available: Condvar::new(),
            exit: AtomicBool::new(false),
            warn_threshold,
        }
    }

    /// Append an item and wake one waiting consumer. A no-op after `shutdown()`.
    pub fn add(&self, item: T) {
        {
            let mut state = self.lock();
            if state.closed {
                log::debug!("queue is shut down; discarding item");
                return;
            }
            state.items.push_back(item);
            let len = state.items.len();
            if len > self.warn_threshold && !state.warned {
                state.warned = true;
                log::warn!(
                    "queue backlog is {} items (threshold {}); consumer is not keeping up",
                    len,
                    self.warn_threshold
                );
            }
        }
        self.available.notify_one();
    }

    /// Block until an item is available or the queue is shut down.
    ///
    /// Pending items are still handed out after `shutdown()`; `None` is only
    /// returned once the queue is both shut down and empty.
    pub fn take(&self) -> Option<T> {
        let mut state = self.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                if state.warned && state.items.len() <= self.warn_threshold {
                    state.warned = false;
                }
                return Some(item);
            }
            if state.closed {
                return None;
            }
            state = self
                .available
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Signal exit and wake every waiter. Safe to call repeatedly.
    pub fn shutdown(&self) {
        {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            self.exit.store(true, Ordering::SeqCst);
        }
        self.available.notify_all();
    }

    /// Drop all pending items. Waiters are not woken.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.items.clear();
        state.warned = false;
    }

    pub fn is_shutdown(&self) -> bool {
        self.exit.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn take_returns_items_in_insertion_order() {
        let queue = BlockingQueue::new();
        for i in 0..50 {
            queue.add(i);
        }
        let drained: Vec<_> = (0..50).map(|_| queue.take().unwrap()).collect();
        assert_eq!(drained, (0..50).collect::<Vec<_>>());
        assert!(queue.is_empty());
    }

    #[test]
    fn take_blocks_until_add() {
        let queue = Arc::new(BlockingQueue::new());
        let (tx, rx) = mpsc::channel();
        let consumer = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || {
                tx.send(queue.take()).unwrap();
            })
        };

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        queue.add(7u32);
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), Some(7));
        consumer.join().unwrap();
    }

    #[test]
    fn shutdown_wakes_blocked_take() {
        let queue: Arc<BlockingQueue<u32>> = Arc::new(BlockingQueue::new());
        let (tx, rx) = mpsc::channel();
        let consumer = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || {
                tx.send(queue.take()).unwrap();
            })
        };

        std::thread::sleep(Duration::from_millis(50));
        queue.shutdown();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), None);
        consumer.join().unwrap();
        assert!(queue.is_shutdown());
    }

    #[test]
    fn take_after_shutdown_on_empty_queue_does_not_block() {
        let queue: BlockingQueue<u8> = BlockingQueue::new();
        queue.shutdown();
        assert_eq!(queue.take(), None);
        assert_eq!(queue.take(), None);
    }

    #[test]
    fn pending_items_drain_after_shutdown() {
        let queue = BlockingQueue::new();
        queue.add("a");
        queue.add("b");
        queue.shutdown();
        assert_eq!(queue.take(), Some("a"));
        assert_eq!(queue.take(), Some("b"));
        assert_eq!(queue.take(), None);
    }

    #[test]
    fn add_after_shutdown_is_discarded() {
        let queue = BlockingQueue::new();
        queue.add(1);
        queue.shutdown();
        queue.add(2);
        queue.add(3);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.take(), Some(1));
        assert_eq!(queue.take(), None);
    }

    #[test]
    fn repeated_concurrent_shutdown_is_harmless() {
        let queue: Arc<BlockingQueue<u8>> = Arc::new(BlockingQueue::new());
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || queue.take())
            })
            .collect();
        let stoppers: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || queue.shutdown())
            })
            .collect();

        for handle in stoppers {
            handle.join().unwrap();
        }
        for handle in waiters {
            assert_eq!(handle.join().unwrap(), None);
        }
        queue.shutdown();
    }

    #[test]
    fn add_past_threshold_keeps_every_item() {
        let queue = BlockingQueue::with_warn_threshold(3);
        for i in 0..10 {
            queue.add(i);
        }
        assert_eq!(queue.len(), 10);
        assert_eq!(queue.take(), Some(0));
    }

    #[test]
    fn clear_discards_pending_items() {
        let queue = BlockingQueue::new();
        queue.add(1);
        queue.add(2);
        queue.clear();
        assert!(queue.is_empty());
        queue.add(3);
        assert_eq!(queue.take(), Some(3));
    }
}
