//! Worker→controller communication
//!
//! A [`CommChannel`] bundles the bounded [`Message`] queue with the atomic termination
//! flag that carries cancellation from the controller to the worker. Both sides hold an
//! `Arc` to the same channel; the underlying storage is freed once both drop their
//! handle.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::bounded_queue::BoundedQueue;
use crate::message::Message;

/// Default capacity of a [`CommChannel`]'s message queue, per §5 of the design: large
/// enough that a well-behaved script never blocks on `print`, small enough that a
/// spammy script is throttled rather than allowed to allocate without bound.
pub const DEFAULT_QUEUE_CAPACITY: usize = 32;

/// A bounded message queue plus a shared termination flag.
pub struct CommChannel {
    queue: BoundedQueue<Message>,
    immediate_termination_requested: AtomicBool,
}

impl CommChannel {
    /// Construct a channel whose queue can hold at most `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: BoundedQueue::new(capacity),
            immediate_termination_requested: AtomicBool::new(false),
        }
    }

    /// The message queue.
    pub fn queue(&self) -> &BoundedQueue<Message> {
        &self.queue
    }

    /// True if the controller has requested that the worker terminate immediately.
    pub fn termination_requested(&self) -> bool {
        self.immediate_termination_requested.load(Ordering::SeqCst)
    }

    /// Request that the worker terminate at its next suspension point.
    pub fn request_termination(&self) {
        self.immediate_termination_requested.store(true, Ordering::SeqCst);
    }

    /// Reset the termination flag. Used when an Executor moves back to Idle and might
    /// later be reused for a fresh run.
    pub fn reset(&self) {
        self.immediate_termination_requested.store(false, Ordering::SeqCst);
    }
}

impl Default for CommChannel {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}
