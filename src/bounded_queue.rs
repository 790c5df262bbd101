//! Bounded blocking queue
//!
//! A fixed-capacity FIFO used to transport [`crate::message::Message`]s from the worker
//! thread to the controller thread. `push` blocks while the queue is full; `pop` blocks
//! while the queue is empty. Two condition variables are used instead of one so that a
//! push only wakes waiting poppers and a pop only wakes waiting pushers — avoiding
//! thundering-herd wakeups on the wrong edge.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

/// A thread-safe, fixed-capacity FIFO queue.
pub struct BoundedQueue<T> {
    capacity: usize,
    inner: Mutex<VecDeque<T>>,
    message_available: Condvar,
    slot_available: Condvar,
}

impl<T> BoundedQueue<T> {
    /// Construct a queue able to hold at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            message_available: Condvar::new(),
            slot_available: Condvar::new(),
        }
    }

    /// The maximum number of entries this queue can hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The number of entries currently in the queue.
    pub fn size(&self) -> usize {
        self.inner.lock().expect("queue mutex poisoned").len()
    }

    /// True if the queue currently holds no entries.
    pub fn empty(&self) -> bool {
        self.size() == 0
    }

    /// Append `value` to the back of the queue, blocking while the queue is full.
    pub fn push(&self, value: T) {
        let mut guard = self.inner.lock().expect("queue mutex poisoned");
        while guard.len() >= self.capacity {
            guard = self.slot_available.wait(guard).expect("queue mutex poisoned");
        }
        guard.push_back(value);
        drop(guard);
        self.message_available.notify_one();
    }

    /// Try to append `value` without blocking. Returns `false` (without consuming
    /// `value`) if the queue was full.
    pub fn try_push(&self, value: T) -> Result<(), T> {
        let mut guard = self.inner.lock().expect("queue mutex poisoned");
        if guard.len() >= self.capacity {
            return Err(value);
        }
        guard.push_back(value);
        drop(guard);
        self.message_available.notify_one();
        Ok(())
    }

    /// Remove and return the front of the queue, blocking while the queue is empty.
    pub fn pop(&self) -> T {
        let mut guard = self.inner.lock().expect("queue mutex poisoned");
        while guard.is_empty() {
            guard = self.message_available.wait(guard).expect("queue mutex poisoned");
        }
        let value = guard.pop_front().expect("checked non-empty above");
        drop(guard);
        self.slot_available.notify_one();
        value
    }

    /// Remove and return the front of the queue without blocking, or `None` if empty.
    pub fn try_pop(&self) -> Option<T> {
        let mut guard = self.inner.lock().expect("queue mutex poisoned");
        let value = guard.pop_front();
        drop(guard);
        if value.is_some() {
            self.slot_available.notify_one();
        }
        value
    }
}

impl<T: Clone> BoundedQueue<T> {
    /// Return a copy of the most recently pushed element, blocking while the queue is
    /// empty. The element is not removed.
    pub fn back(&self) -> T {
        let mut guard = self.inner.lock().expect("queue mutex poisoned");
        while guard.is_empty() {
            guard = self.message_available.wait(guard).expect("queue mutex poisoned");
        }
        guard.back().cloned().expect("checked non-empty above")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn push_then_pop_round_trips_in_order() {
        let queue: BoundedQueue<i32> = BoundedQueue::new(4);
        queue.push(1);
        queue.push(2);
        queue.push(3);
        assert_eq!(queue.pop(), 1);
        assert_eq!(queue.pop(), 2);
        assert_eq!(queue.pop(), 3);
    }

    #[test]
    fn try_push_fails_without_blocking_when_full() {
        let queue: BoundedQueue<i32> = BoundedQueue::new(2);
        assert!(queue.try_push(1).is_ok());
        assert!(queue.try_push(2).is_ok());
        assert_eq!(queue.try_push(3), Err(3));
        assert_eq!(queue.size(), 2);
    }

    #[test]
    fn try_pop_returns_none_when_empty() {
        let queue: BoundedQueue<i32> = BoundedQueue::new(2);
        assert_eq!(queue.try_pop(), None);
    }

    #[test]
    fn push_blocks_until_a_slot_is_freed() {
        let queue = Arc::new(BoundedQueue::<i32>::new(1));
        queue.push(1);

        let queue2 = Arc::clone(&queue);
        let handle = thread::spawn(move || {
            queue2.push(2);
        });

        // Give the spawned push a moment to actually block on the full queue.
        thread::sleep(Duration::from_millis(50));
        assert_eq!(queue.size(), 1);

        assert_eq!(queue.pop(), 1);
        handle.join().unwrap();
        assert_eq!(queue.pop(), 2);
    }

    #[test]
    fn fifo_ordering_holds_across_concurrent_producers() {
        let queue = Arc::new(BoundedQueue::<i32>::new(100));
        let q2 = Arc::clone(&queue);
        let producer = thread::spawn(move || {
            for i in 0..100 {
                q2.push(i);
            }
        });
        producer.join().unwrap();

        let mut seen = Vec::new();
        while let Some(v) = queue.try_pop() {
            seen.push(v);
        }
        assert_eq!(seen, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn back_returns_a_copy_without_removing() {
        let queue: BoundedQueue<i32> = BoundedQueue::new(4);
        queue.push(1);
        queue.push(2);
        assert_eq!(queue.back(), 2);
        assert_eq!(queue.size(), 2);
    }
}
