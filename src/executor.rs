//! Asynchronous execution
//!
//! An [`Executor`] runs a [`Sequence`] (or a single [`Step`] of one) on a background
//! worker thread, transporting progress as [`Message`]s through a [`CommChannel`] and
//! reconciling them into a controller-owned `Sequence` via periodic [`Executor::update`]
//! calls. Only one worker is active per Executor at a time.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::comm_channel::CommChannel;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::message::{Message, MessageType};
use crate::sequence::Sequence;
use crate::variable_name::VariableName;
use crate::variable_value::VariableValue;

/// How often the worker-joining drain loop in [`Executor::cancel`]/[`Executor::cancel_into`]
/// polls for worker completion while unblocking a backpressured `print`.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Runs a [`Sequence`] on a background worker thread.
///
/// Idle when no worker is active. `run_asynchronously`/`run_single_step_asynchronously`
/// move it to Running; `update` observes the worker's completion and moves it back to
/// Idle once the message queue has been fully drained (the implicit Draining state
/// between worker completion and the queue emptying has no separate field — it falls
/// out of `channel`/`finished` together).
pub struct Executor {
    channel: Option<Arc<CommChannel>>,
    worker: Option<JoinHandle<()>>,
    finished: Arc<AtomicBool>,
    variables: Arc<Mutex<Option<BTreeMap<VariableName, VariableValue>>>>,
    /// The controller-side copy of the Context kept only so `update` can invoke its
    /// message callback; never handed to the worker.
    context: Option<Context>,
}

impl Executor {
    /// Construct an idle executor.
    pub fn new() -> Self {
        Self {
            channel: None,
            worker: None,
            finished: Arc::new(AtomicBool::new(false)),
            variables: Arc::new(Mutex::new(None)),
            context: None,
        }
    }

    /// True if a worker is currently running (or has run and not yet been fully
    /// drained by `update`).
    pub fn is_busy(&self) -> bool {
        self.worker.is_some()
    }

    /// Run `seq` asynchronously against a deep copy of `ctx`. Fails with [`Error::Busy`]
    /// if a worker is already active. Marks `seq.is_running` immediately so the
    /// controller sees the change without waiting for the first `update`.
    pub fn run_asynchronously(&mut self, seq: &mut Sequence, ctx: &Context) -> Result<()> {
        if self.is_busy() {
            return Err(Error::Busy);
        }
        debug!(sequence = seq.label(), "executor: starting asynchronous run");

        let mut worker_seq = seq.clone();
        let mut worker_ctx = ctx.clone();
        seq.set_running(true);
        self.spawn(move |channel| worker_seq.execute_internal(&mut worker_ctx, Some(channel)).map(|_| worker_ctx));
        self.context = Some(ctx.clone());
        Ok(())
    }

    /// Run a single step of `seq` (by index) asynchronously against a deep copy of
    /// `ctx`. `idx` out of range fails synchronously with [`Error::Structural`].
    pub fn run_single_step_asynchronously(
        &mut self,
        seq: &mut Sequence,
        ctx: &Context,
        idx: usize,
    ) -> Result<()> {
        if self.is_busy() {
            return Err(Error::Busy);
        }
        if idx >= seq.len() {
            return Err(Error::Structural {
                index: None,
                message: format!("step index {idx} out of range (sequence has {} steps)", seq.len()),
            });
        }
        debug!(sequence = seq.label(), step = idx, "executor: starting single-step asynchronous run");

        let mut worker_seq = seq.clone();
        let mut worker_ctx = ctx.clone();
        seq.set_running(true);
        self.spawn(move |channel| {
            worker_seq
                .execute_single_step_internal(idx, &mut worker_ctx, Some(channel))
                .map(|_| worker_ctx)
        });
        self.context = Some(ctx.clone());
        Ok(())
    }

    fn spawn(&mut self, work: impl FnOnce(Arc<CommChannel>) -> Result<Context> + Send + 'static) {
        let channel = Arc::new(CommChannel::default());
        self.channel = Some(Arc::clone(&channel));
        self.finished.store(false, Ordering::SeqCst);
        *self.variables.lock().expect("variables mutex poisoned") = None;

        let finished = Arc::clone(&self.finished);
        let variables = Arc::clone(&self.variables);
        let channel_for_panic = Arc::clone(&channel);

        let handle = thread::spawn(move || {
            // A panicking worker must still flip `finished` and surface a terminal
            // message, or `update`/`join_worker_draining` spin forever against a
            // thread that has already died.
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| work(channel)));
            let result = match outcome {
                Ok(result) => result,
                Err(payload) => {
                    let message = panic_payload_message(payload.as_ref());
                    error!(panic = %message, "executor: worker thread panicked");
                    channel_for_panic.queue().push(Message::new(
                        MessageType::SequenceStoppedWithError,
                        format!("worker thread panicked: {message}"),
                        None,
                    ));
                    Err(Error::Script {
                        index: None,
                        message: format!("worker thread panicked: {message}"),
                    })
                }
            };
            match &result {
                Ok(_) => {}
                Err(e) => error!(error = %e, "executor: worker finished with an error"),
            }
            let vars = result.map(|ctx| ctx.variables).unwrap_or_default();
            *variables.lock().expect("variables mutex poisoned") = Some(vars);
            finished.store(true, Ordering::SeqCst);
        });
        self.worker = Some(handle);
    }

    /// Drain all currently queued messages, applying each to `seq` and invoking the
    /// Context's callback. Returns true iff the worker has not yet joined or a message
    /// is still queued; once both the worker has joined and the queue is empty, this
    /// transitions the executor back to Idle and returns false.
    pub fn update(&mut self, seq: &mut Sequence) -> bool {
        let Some(channel) = self.channel.clone() else {
            return false;
        };

        while let Some(msg) = channel.queue().try_pop() {
            self.apply_message(seq, &msg);
        }

        if self.finished.load(Ordering::SeqCst) && channel.queue().empty() {
            if let Some(handle) = self.worker.take() {
                let _ = handle.join();
            }
            self.channel = None;
            self.context = None;
            debug!(sequence = seq.label(), "executor: worker joined, returning to idle");
            false
        } else {
            true
        }
    }

    fn apply_message(&self, seq: &mut Sequence, msg: &Message) {
        match msg.message_type() {
            MessageType::SequenceStarted => seq.set_running(true),
            MessageType::SequenceStopped | MessageType::SequenceStoppedWithError => seq.set_running(false),
            MessageType::StepStarted => {
                if let Some(idx) = msg.index() {
                    if let Some(step) = seq.step_mut(idx as usize) {
                        step.set_running(true);
                        step.set_last_execution_time(Some(msg.timestamp()));
                    }
                }
            }
            MessageType::StepStopped | MessageType::StepStoppedWithError => {
                if let Some(idx) = msg.index() {
                    if let Some(step) = seq.step_mut(idx as usize) {
                        step.set_running(false);
                    }
                }
            }
            MessageType::Output => {}
        }
        if let Some(ctx) = &self.context {
            ctx.notify(msg);
        }
    }

    /// Request termination, join the worker, and discard any remaining messages.
    pub fn cancel(&mut self) {
        warn!("executor: cancellation requested, discarding remaining messages");
        let _ = self.join_worker_draining();
        self.context = None;
    }

    /// Request termination, join the worker, then apply any remaining messages to
    /// `seq` (rather than discarding them as plain [`Executor::cancel`] does).
    pub fn cancel_into(&mut self, seq: &mut Sequence) {
        warn!("executor: cancellation requested, draining remaining messages into sequence");
        let drained = self.join_worker_draining();
        for msg in &drained {
            self.apply_message(seq, msg);
        }
        self.context = None;
    }

    /// Request termination and join the worker, returning every message observed
    /// (including ones popped solely to unblock a worker backpressured in `print`).
    fn join_worker_draining(&mut self) -> Vec<Message> {
        let mut drained = Vec::new();
        if let Some(channel) = self.channel.clone() {
            channel.request_termination();
            while !self.finished.load(Ordering::SeqCst) {
                while let Some(msg) = channel.queue().try_pop() {
                    drained.push(msg);
                }
                thread::sleep(CANCEL_POLL_INTERVAL);
            }
            while let Some(msg) = channel.queue().try_pop() {
                drained.push(msg);
            }
        }
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
        self.channel = None;
        drained
    }

    /// The worker's final variable map, once available (after `update` has reported
    /// the executor idle). `None` before a run has completed.
    pub fn get_context_variables(&self) -> Option<BTreeMap<VariableName, VariableValue>> {
        self.variables.lock().expect("variables mutex poisoned").clone()
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract a human-readable message from a `catch_unwind` payload, matching the
/// common `&str`/`String` panic argument shapes the standard `panic!` macros produce.
fn panic_payload_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

impl Drop for Executor {
    /// Ensure the worker is joined on destruction. If it has not finished, set the
    /// termination flag first so the join does not wait indefinitely.
    fn drop(&mut self) {
        if self.worker.is_some() {
            let _ = self.join_worker_draining();
        }
    }
}
