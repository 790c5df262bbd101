//! Sequences: structural validation and structured execution
//!
//! A [`Sequence`] turns a flat, ordered list of typed [`Step`]s into a well-formed
//! structured program (see the grammar in the module-level validation code below) and
//! drives it against a [`Context`]. This is the most involved module in the crate: the
//! well-formedness scan, the opener→terminator mapping it produces, and the recursive
//! block-range execution that consumes that mapping.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::comm_channel::CommChannel;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::message::{Message, MessageType};
use crate::script_host::ScriptHost;
use crate::step::{Step, StepType};
use crate::step_index::{OptionalStepIndex, StepIndex};
use crate::time;

/// Opener→terminator bookkeeping produced by [`Sequence::validate`]. Cheap to clone
/// (plain maps of indices), which is how `execute_internal` takes a private snapshot of
/// it before walking the step list, rather than holding a borrow of `self` for the
/// whole recursive walk.
#[derive(Debug, Clone, Default)]
struct StructuralInfo {
    /// Maps every `if`/`while`/`try` opener index to its matching `end` index.
    end_of: BTreeMap<usize, usize>,
    /// Maps every `if` opener index to its ordered chain of `elseif`/`else` indices.
    branches_of: BTreeMap<usize, Vec<usize>>,
    /// Maps every `try` opener index to its `catch` index.
    catch_of: BTreeMap<usize, usize>,
}

type ValidationResult = std::result::Result<StructuralInfo, (OptionalStepIndex, String)>;

struct Frame {
    index: usize,
    kind: StepType,
    branches: Vec<usize>,
    catch: Option<usize>,
    else_seen: bool,
}

/// Scan `steps` against the structured-program grammar:
///
/// ```text
/// sequence := block*
/// block    := action
///           | 'if' sequence ('elseif' sequence)* ('else' sequence)? 'end'
///           | 'while' sequence 'end'
///           | 'try' sequence 'catch' sequence 'end'
/// ```
///
/// A single linear scan with an explicit stack of opener frames: `elseif`/`else`/`catch`
/// validate against the current top-of-stack opener, `end` pops and records the mapping.
fn compute_structural_info(steps: &[Step]) -> ValidationResult {
    let mut stack: Vec<Frame> = Vec::new();
    let mut end_of = BTreeMap::new();
    let mut branches_of = BTreeMap::new();
    let mut catch_of = BTreeMap::new();

    for (i, step) in steps.iter().enumerate() {
        match step.step_type() {
            StepType::Action => {}

            StepType::If | StepType::While | StepType::Try => {
                stack.push(Frame {
                    index: i,
                    kind: step.step_type(),
                    branches: Vec::new(),
                    catch: None,
                    else_seen: false,
                });
            }

            StepType::ElseIf => {
                let frame = stack
                    .last_mut()
                    .ok_or_else(|| (Some(i as StepIndex), format!("'elseif' at step {i} has no matching 'if'")))?;
                if frame.kind != StepType::If {
                    return Err((Some(i as StepIndex), format!("'elseif' at step {i} is not inside an 'if' block")));
                }
                if frame.else_seen {
                    return Err((Some(i as StepIndex), format!("'elseif' at step {i} follows an 'else'")));
                }
                frame.branches.push(i);
            }

            StepType::Else => {
                let frame = stack
                    .last_mut()
                    .ok_or_else(|| (Some(i as StepIndex), format!("'else' at step {i} has no matching 'if'")))?;
                if frame.kind != StepType::If {
                    return Err((Some(i as StepIndex), format!("'else' at step {i} is not inside an 'if' block")));
                }
                if frame.else_seen {
                    return Err((Some(i as StepIndex), format!("'else' at step {i} follows another 'else'")));
                }
                frame.else_seen = true;
                frame.branches.push(i);
            }

            StepType::Catch => {
                let frame = stack
                    .last_mut()
                    .ok_or_else(|| (Some(i as StepIndex), format!("'catch' at step {i} has no matching 'try'")))?;
                if frame.kind != StepType::Try {
                    return Err((Some(i as StepIndex), format!("'catch' at step {i} is not inside a 'try' block")));
                }
                if frame.catch.is_some() {
                    return Err((
                        Some(i as StepIndex),
                        format!("'try' at step {} has more than one 'catch'", frame.index),
                    ));
                }
                frame.catch = Some(i);
            }

            StepType::End => {
                let frame = stack
                    .pop()
                    .ok_or_else(|| (Some(i as StepIndex), format!("unmatched 'end' at step {i}")))?;
                match frame.kind {
                    StepType::Try => {
                        let catch = frame.catch.ok_or_else(|| {
                            (
                                Some(frame.index as StepIndex),
                                format!("'try' at step {} has no matching 'catch'", frame.index),
                            )
                        })?;
                        end_of.insert(frame.index, i);
                        catch_of.insert(frame.index, catch);
                    }
                    StepType::If => {
                        end_of.insert(frame.index, i);
                        branches_of.insert(frame.index, frame.branches);
                    }
                    StepType::While => {
                        end_of.insert(frame.index, i);
                    }
                    _ => unreachable!("only if/while/try are ever pushed as frames"),
                }
            }
        }
    }

    if let Some(frame) = stack.pop() {
        return Err((
            Some(frame.index as StepIndex),
            format!("block opened at step {} is never terminated", frame.index),
        ));
    }

    Ok(StructuralInfo { end_of, branches_of, catch_of })
}

fn emit(context: &Context, channel: &Option<Arc<CommChannel>>, msg: Message) {
    match channel {
        Some(channel) => channel.queue().push(msg),
        None => context.notify(&msg),
    }
}

/// An ordered list of [`Step`]s forming a structured program.
#[derive(Debug, Clone)]
pub struct Sequence {
    label: String,
    steps: Vec<Step>,
    step_setup_script: String,
    timeout: Option<Duration>,
    is_running: bool,
    cached: RefCell<Option<ValidationResult>>,
}

impl Sequence {
    /// Construct an empty sequence with the given display label.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            steps: Vec::new(),
            step_setup_script: String::new(),
            timeout: None,
            is_running: false,
            cached: RefCell::new(None),
        }
    }

    /// The sequence's display label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Replace the sequence's display label.
    pub fn set_label(&mut self, label: impl Into<String>) {
        self.label = label.into();
    }

    /// The script run on a fresh script state before every step in this sequence.
    pub fn step_setup_script(&self) -> &str {
        &self.step_setup_script
    }

    /// Replace the step-setup script.
    pub fn set_step_setup_script(&mut self, script: impl Into<String>) {
        self.step_setup_script = script.into();
    }

    /// This sequence's overall wall-clock timeout, if any. A zero duration is
    /// normalized to "no timeout", matching [`Step::set_timeout`].
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Set this sequence's overall timeout.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = match timeout {
            Some(d) if d.is_zero() => None,
            other => other,
        };
    }

    /// True while an Executor (or a synchronous `execute` call) is currently running
    /// this sequence.
    pub fn is_running(&self) -> bool {
        self.is_running
    }

    /// Set the transient "currently running" flag. Mutated only by the executor (and,
    /// for the synchronous entry point, by this module itself).
    pub(crate) fn set_running(&mut self, running: bool) {
        self.is_running = running;
    }

    /// All steps, in order.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// The step at `index`, if any.
    pub fn step(&self, index: usize) -> Option<&Step> {
        self.steps.get(index)
    }

    /// A mutable reference to the step at `index`, if any. Conservatively invalidates
    /// the structural cache, since a caller could change the step's type through it.
    pub fn step_mut(&mut self, index: usize) -> Option<&mut Step> {
        self.invalidate();
        self.steps.get_mut(index)
    }

    /// The number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// True if this sequence has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Append a step to the end of the list.
    pub fn push_step(&mut self, step: Step) {
        self.steps.push(step);
        self.invalidate();
    }

    /// Insert a step at `index`, shifting subsequent steps up.
    pub fn insert_step(&mut self, index: usize, step: Step) {
        self.steps.insert(index, step);
        self.invalidate();
    }

    /// Remove and return the step at `index`.
    pub fn remove_step(&mut self, index: usize) -> Step {
        let step = self.steps.remove(index);
        self.invalidate();
        step
    }

    /// Replace the entire step list.
    pub fn set_steps(&mut self, steps: Vec<Step>) {
        self.steps = steps;
        self.invalidate();
    }

    fn invalidate(&mut self) {
        *self.cached.get_mut() = None;
    }

    /// Validate the step list against the structured-program grammar, caching the
    /// result until the next mutation. Returns `Ok(())` when well-formed, otherwise the
    /// [`Error::Structural`] identifying the first offending step.
    pub fn validate(&self) -> Result<()> {
        if self.cached.borrow().is_none() {
            let result = compute_structural_info(&self.steps);
            *self.cached.borrow_mut() = Some(result);
        }
        match self.cached.borrow().as_ref().expect("populated above") {
            Ok(_) => Ok(()),
            Err((index, message)) => Err(Error::Structural { index: *index, message: message.clone() }),
        }
    }

    /// True iff [`Sequence::validate`] succeeds.
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// The reason the sequence is malformed, if it is.
    pub fn validity_reason(&self) -> Option<String> {
        match self.validate() {
            Ok(()) => None,
            Err(Error::Structural { message, .. }) => Some(message),
            Err(_) => None,
        }
    }

    fn cloned_structural_info(&self) -> StructuralInfo {
        self.validate().expect("caller validated before requesting structural info");
        match self.cached.borrow().as_ref().expect("populated by validate") {
            Ok(info) => info.clone(),
            Err(_) => unreachable!("validate() would have returned Err above"),
        }
    }

    /// Run this sequence's structured program synchronously against `context`, with no
    /// Executor and no CommChannel: lifecycle and output messages go straight through
    /// the Context's callback. This is the library entry point for running a sequence
    /// without the asynchronous machinery in [`crate::executor::Executor`].
    pub fn execute(&mut self, context: &mut Context) -> Result<()> {
        self.execute_internal(context, None)
    }

    /// As [`Sequence::execute`], but routes lifecycle and output messages through
    /// `channel` instead of the Context's callback. Used by the Executor's worker.
    pub(crate) fn execute_internal(
        &mut self,
        context: &mut Context,
        channel: Option<Arc<CommChannel>>,
    ) -> Result<()> {
        self.validate()?;
        let info = self.cloned_structural_info();

        context.step_setup_script = self.step_setup_script.clone();
        self.is_running = true;
        emit(
            context,
            &channel,
            Message::new(MessageType::SequenceStarted, self.label.clone(), None),
        );

        let start = Instant::now();
        let len = self.steps.len();
        let result = self.run_range(0, len, context, &channel, &info, start);

        self.is_running = false;
        match &result {
            Ok(()) => emit(context, &channel, Message::new(MessageType::SequenceStopped, "", None)),
            Err(e) => emit(
                context,
                &channel,
                Message::new(MessageType::SequenceStoppedWithError, e.to_string(), e.index()),
            ),
        }
        result
    }

    /// Run only the step at `idx`, standalone, bracketed by the same
    /// `sequence_started`/`sequence_stopped*` lifecycle messages a full run would emit.
    /// Used by `Executor::run_single_step_asynchronously`.
    pub(crate) fn execute_single_step_internal(
        &mut self,
        idx: usize,
        context: &mut Context,
        channel: Option<Arc<CommChannel>>,
    ) -> Result<()> {
        context.step_setup_script = self.step_setup_script.clone();
        self.is_running = true;
        emit(
            context,
            &channel,
            Message::new(MessageType::SequenceStarted, self.label.clone(), None),
        );

        let start = Instant::now();
        let result = self.run_step_common(idx, context, &channel, start).map(|_| ());

        self.is_running = false;
        match &result {
            Ok(()) => emit(context, &channel, Message::new(MessageType::SequenceStopped, "", None)),
            Err(e) => emit(
                context,
                &channel,
                Message::new(MessageType::SequenceStoppedWithError, e.to_string(), e.index()),
            ),
        }
        result
    }

    fn check_deadline(&self, i: usize, start: Instant) -> Result<()> {
        if let Some(timeout) = self.timeout {
            if start.elapsed() >= timeout {
                return Err(Error::Timeout { index: Some(i as StepIndex) });
            }
        }
        Ok(())
    }

    fn run_range(
        &mut self,
        lo: usize,
        hi: usize,
        context: &mut Context,
        channel: &Option<Arc<CommChannel>>,
        info: &StructuralInfo,
        start: Instant,
    ) -> Result<()> {
        let mut i = lo;
        while i < hi {
            self.check_deadline(i, start)?;
            if let Some(channel) = channel {
                if channel.termination_requested() {
                    return Err(Error::Cancelled { index: Some(i as StepIndex) });
                }
            }

            match self.steps[i].step_type() {
                StepType::Action => {
                    self.run_step_common(i, context, channel, start)?;
                    i += 1;
                }

                StepType::While => {
                    let end = *info.end_of.get(&i).expect("validated while has an end");
                    loop {
                        self.check_deadline(i, start)?;
                        let cond = self.run_step_common(i, context, channel, start)?.unwrap_or(false);
                        if !cond {
                            break;
                        }
                        self.run_range(i + 1, end, context, channel, info, start)?;
                    }
                    i = end + 1;
                }

                StepType::If => {
                    let end = *info.end_of.get(&i).expect("validated if has an end");
                    let mut headers = vec![i];
                    headers.extend(info.branches_of.get(&i).cloned().unwrap_or_default());

                    let mut taken = false;
                    for (pos, &header) in headers.iter().enumerate() {
                        if taken {
                            break;
                        }
                        let body_end = headers.get(pos + 1).copied().unwrap_or(end);
                        let is_else = self.steps[header].step_type() == StepType::Else;
                        let branch_true = if is_else {
                            true
                        } else {
                            self.run_step_common(header, context, channel, start)?.unwrap_or(false)
                        };
                        if branch_true {
                            self.run_range(header + 1, body_end, context, channel, info, start)?;
                            taken = true;
                        }
                    }
                    i = end + 1;
                }

                StepType::Try => {
                    let end = *info.end_of.get(&i).expect("validated try has an end");
                    let catch = *info.catch_of.get(&i).expect("validated try has a catch");
                    match self.run_range(i + 1, catch, context, channel, info, start) {
                        Ok(()) => {}
                        Err(e) if e.is_catchable() => {
                            self.run_range(catch + 1, end, context, channel, info, start)?;
                        }
                        Err(e) => return Err(e),
                    }
                    i = end + 1;
                }

                StepType::ElseIf | StepType::Else | StepType::Catch | StepType::End => {
                    unreachable!("structural markers are only ever entered through their opener's block range")
                }
            }
        }
        Ok(())
    }

    fn run_step_common(
        &mut self,
        idx: usize,
        context: &mut Context,
        channel: &Option<Arc<CommChannel>>,
        start: Instant,
    ) -> Result<Option<bool>> {
        let label = self.steps[idx].label().to_string();
        self.steps[idx].set_running(true);
        self.steps[idx].set_last_execution_time(Some(time::now()));
        emit(
            context,
            channel,
            Message::new(MessageType::StepStarted, label.clone(), Some(idx as StepIndex)),
        );

        let sequence_deadline = self.timeout.map(|timeout| start + timeout);
        let mut host = ScriptHost::new(channel.clone(), Some(idx as StepIndex), sequence_deadline);
        let result = host.run_step(&self.steps[idx], context);

        self.steps[idx].set_running(false);
        match &result {
            Ok(_) => emit(
                context,
                channel,
                Message::new(MessageType::StepStopped, label, Some(idx as StepIndex)),
            ),
            Err(e) => emit(
                context,
                channel,
                Message::new(MessageType::StepStoppedWithError, e.to_string(), Some(idx as StepIndex)),
            ),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variable_name::VariableName;
    use crate::variable_value::VariableValue;

    fn var(name: &str) -> VariableName {
        VariableName::new(name).unwrap()
    }

    fn action(script: &str, vars: &[&str]) -> Step {
        let mut step = Step::new(StepType::Action);
        step.set_script(script);
        step.set_used_variable_names(vars.iter().map(|v| var(v)).collect());
        step
    }

    fn header(step_type: StepType, script: &str, vars: &[&str]) -> Step {
        let mut step = Step::new(step_type);
        step.set_script(script);
        step.set_used_variable_names(vars.iter().map(|v| var(v)).collect());
        step
    }

    #[test]
    fn empty_sequence_is_valid_and_runs_as_a_no_op() {
        let mut seq = Sequence::new("empty");
        assert!(seq.is_valid());
        let mut ctx = Context::new();
        assert!(seq.execute(&mut ctx).is_ok());
    }

    #[test]
    fn unmatched_end_is_reported_as_structural_error() {
        let mut seq = Sequence::new("bad");
        seq.push_step(Step::new(StepType::End));
        let err = seq.validate().unwrap_err();
        assert!(matches!(err, Error::Structural { index: Some(0), .. }));
    }

    #[test]
    fn try_without_catch_is_structural_error() {
        let mut seq = Sequence::new("bad");
        seq.push_step(Step::new(StepType::Try));
        seq.push_step(Step::new(StepType::End));
        assert!(!seq.is_valid());
    }

    #[test]
    fn conditional_example_takes_the_else_branch() {
        let mut seq = Sequence::new("conditional");
        seq.push_step(header(StepType::If, "return x > 0", &["x"]));
        seq.push_step(action("y = 1", &["y"]));
        seq.push_step(Step::new(StepType::Else));
        seq.push_step(action("y = -1", &["y"]));
        seq.push_step(Step::new(StepType::End));
        assert!(seq.is_valid());

        let mut ctx = Context::new();
        ctx.set(var("x"), VariableValue::Int(-3));
        seq.execute(&mut ctx).unwrap();
        assert_eq!(ctx.get(&var("y")), Some(&VariableValue::Int(-1)));
    }

    #[test]
    fn loop_with_output_runs_three_times_and_updates_i() {
        let mut seq = Sequence::new("loop");
        seq.push_step(header(StepType::While, "return i < 3", &["i"]));
        seq.push_step(action("print(\"i=\"..i); i = i + 1", &["i"]));
        seq.push_step(Step::new(StepType::End));

        let mut ctx = Context::new();
        ctx.set(var("i"), VariableValue::Int(0));
        seq.execute(&mut ctx).unwrap();
        assert_eq!(ctx.get(&var("i")), Some(&VariableValue::Int(3)));
    }

    #[test]
    fn try_catch_recovers_from_a_script_error() {
        let mut seq = Sequence::new("try_catch");
        seq.push_step(Step::new(StepType::Try));
        seq.push_step(action("error(\"boom\")", &[]));
        seq.push_step(Step::new(StepType::Catch));
        seq.push_step(action("recovered = true", &["recovered"]));
        seq.push_step(Step::new(StepType::End));

        let mut ctx = Context::new();
        let result = seq.execute(&mut ctx);
        assert!(result.is_ok());
        assert_eq!(ctx.get(&var("recovered")), Some(&VariableValue::Bool(true)));
    }

    #[test]
    fn try_catch_does_not_intercept_cancellation() {
        use crate::comm_channel::CommChannel;

        let mut seq = Sequence::new("try_catch_cancel");
        seq.push_step(Step::new(StepType::Try));
        seq.push_step(action("while true do end", &[]));
        seq.push_step(Step::new(StepType::Catch));
        seq.push_step(action("recovered = true", &["recovered"]));
        seq.push_step(Step::new(StepType::End));

        let channel = Arc::new(CommChannel::new(4));
        channel.request_termination();
        let mut ctx = Context::new();
        let err = seq.execute_internal(&mut ctx, Some(channel)).unwrap_err();
        assert!(matches!(err, Error::Cancelled { .. }));
        assert_eq!(ctx.get(&var("recovered")), None);
    }

    #[test]
    fn sequence_level_timeout_aborts_a_step_with_no_timeout_of_its_own() {
        let mut seq = Sequence::new("overall_timeout");
        seq.set_timeout(Some(Duration::from_millis(50)));
        seq.push_step(action("while true do end", &[]));

        let mut ctx = Context::new();
        let start = Instant::now();
        let err = seq.execute(&mut ctx).unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn mutating_the_step_list_invalidates_the_structural_cache() {
        let mut seq = Sequence::new("s");
        seq.push_step(Step::new(StepType::If));
        assert!(!seq.is_valid());
        seq.push_step(Step::new(StepType::End));
        assert!(seq.is_valid());
    }
}
