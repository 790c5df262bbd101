//! Steps
//!
//! A [`Step`] is one node of a [`crate::sequence::Sequence`]: either a plain `action` or
//! one of the structural markers (`if`, `elseif`, `else`, `while`, `try`, `catch`, `end`).
//! A Step is an inert value object; no execution happens here except through the
//! standalone [`Step::execute`] entry point, which is the synchronous, no-Executor way to
//! run a single step against a [`crate::context::Context`].

use std::collections::BTreeSet;
use std::time::Duration;

use crate::context::Context;
use crate::error::Result;
use crate::script_host::ScriptHost;
use crate::time::{self, TimePoint};
use crate::variable_name::VariableName;

/// The structural role of a [`Step`] within its owning [`crate::sequence::Sequence`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepType {
    /// A plain script action.
    Action,
    /// The header of an `if` block.
    If,
    /// The header of an `elseif` alternative.
    ElseIf,
    /// An unconditional `else` alternative (no header script).
    Else,
    /// The header of a `while` block.
    While,
    /// The opener of a `try` block.
    Try,
    /// The opener of the `catch` alternative of a `try` block.
    Catch,
    /// The terminator of an `if`, `while`, or `try` block.
    End,
}

impl StepType {
    /// The machine-readable name used in log lines and in the persistence format.
    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::Action => "action",
            StepType::If => "if",
            StepType::ElseIf => "elseif",
            StepType::Else => "else",
            StepType::While => "while",
            StepType::Try => "try",
            StepType::Catch => "catch",
            StepType::End => "end",
        }
    }

    /// Parse a step type from its persistence/log name.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "action" => Some(StepType::Action),
            "if" => Some(StepType::If),
            "elseif" => Some(StepType::ElseIf),
            "else" => Some(StepType::Else),
            "while" => Some(StepType::While),
            "try" => Some(StepType::Try),
            "catch" => Some(StepType::Catch),
            "end" => Some(StepType::End),
            _ => None,
        }
    }

    /// True for the block openers that expect a matching `end` (`if`, `while`, `try`).
    pub fn is_opener(&self) -> bool {
        matches!(self, StepType::If | StepType::While | StepType::Try)
    }

    /// True for steps whose script is a boolean-returning header (`if`, `elseif`, `while`).
    pub fn has_boolean_header(&self) -> bool {
        matches!(self, StepType::If | StepType::ElseIf | StepType::While)
    }
}

/// One node of a [`crate::sequence::Sequence`].
#[derive(Debug, Clone)]
pub struct Step {
    step_type: StepType,
    script: String,
    label: String,
    used_variable_names: BTreeSet<VariableName>,
    last_modification: TimePoint,
    last_execution: Option<TimePoint>,
    timeout: Option<Duration>,
    is_running: bool,
}

impl Step {
    /// Construct a new step of the given type with an empty script.
    pub fn new(step_type: StepType) -> Self {
        Self {
            step_type,
            script: String::new(),
            label: String::new(),
            used_variable_names: BTreeSet::new(),
            last_modification: time::now(),
            last_execution: None,
            timeout: None,
            is_running: false,
        }
    }

    /// The structural type of this step.
    pub fn step_type(&self) -> StepType {
        self.step_type
    }

    /// Change the structural type of this step.
    pub fn set_step_type(&mut self, step_type: StepType) {
        self.step_type = step_type;
    }

    /// The step's script text.
    pub fn script(&self) -> &str {
        &self.script
    }

    /// Replace the step's script text, stamping the last-modification time to now.
    pub fn set_script(&mut self, script: impl Into<String>) {
        self.script = script.into();
        self.last_modification = time::now();
    }

    /// Replace the script text without touching the last-modification timestamp. Used
    /// only by the persistence loader, which must preserve the stored timestamp.
    pub(crate) fn set_script_preserving_timestamp(&mut self, script: impl Into<String>) {
        self.script = script.into();
    }

    /// The step's display label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Replace the step's display label.
    pub fn set_label(&mut self, label: impl Into<String>) {
        self.label = label.into();
    }

    /// The set of variable names this step imports from and exports to the Context.
    pub fn used_variable_names(&self) -> &BTreeSet<VariableName> {
        &self.used_variable_names
    }

    /// Replace the set of variable names this step uses.
    pub fn set_used_variable_names(&mut self, names: BTreeSet<VariableName>) {
        self.used_variable_names = names;
    }

    /// Add a single variable name to the set this step uses.
    pub fn add_used_variable_name(&mut self, name: VariableName) {
        self.used_variable_names.insert(name);
    }

    /// The time this step's script was last modified.
    pub fn last_modification_time(&self) -> TimePoint {
        self.last_modification
    }

    /// Overwrite the last-modification timestamp directly (used by the persistence
    /// loader to restore a stored value).
    pub fn set_last_modification_time(&mut self, t: TimePoint) {
        self.last_modification = t;
    }

    /// The time this step was last executed, if ever.
    pub fn last_execution_time(&self) -> Option<TimePoint> {
        self.last_execution
    }

    /// Overwrite the last-execution timestamp directly.
    pub fn set_last_execution_time(&mut self, t: Option<TimePoint>) {
        self.last_execution = t;
    }

    /// This step's timeout, if any. `None` means "no timeout".
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Set this step's timeout. A zero duration is normalized to "no timeout", per the
    /// boundary case in the design: a step timeout of zero means no timeout rather than
    /// an instantaneous one.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = match timeout {
            Some(d) if d.is_zero() => None,
            other => other,
        };
    }

    /// True while the executor currently has this step running. Never persisted.
    pub fn is_running(&self) -> bool {
        self.is_running
    }

    /// Set the transient "currently running" flag. Mutated only by the executor.
    pub fn set_running(&mut self, running: bool) {
        self.is_running = running;
    }

    /// Run this step's script against `context`, standalone (no Executor, no
    /// CommChannel). Output messages are routed directly through the Context's
    /// callback. Stamps the last-execution time on success or failure alike.
    pub fn execute(&mut self, context: &mut Context) -> Result<Option<bool>> {
        self.last_execution = Some(time::now());
        let mut host = ScriptHost::new(None, None, None);
        host.run_step(self, context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_script_bumps_modification_time() {
        let mut step = Step::new(StepType::Action);
        let before = step.last_modification_time();
        std::thread::sleep(std::time::Duration::from_millis(5));
        step.set_script("x = 1");
        assert!(step.last_modification_time() > before);
    }

    #[test]
    fn zero_timeout_means_no_timeout() {
        let mut step = Step::new(StepType::Action);
        step.set_timeout(Some(Duration::from_millis(0)));
        assert_eq!(step.timeout(), None);
    }

    #[test]
    fn positive_timeout_is_kept() {
        let mut step = Step::new(StepType::Action);
        step.set_timeout(Some(Duration::from_millis(50)));
        assert_eq!(step.timeout(), Some(Duration::from_millis(50)));
    }

    #[test]
    fn step_type_round_trips_through_its_string_form() {
        for t in [
            StepType::Action,
            StepType::If,
            StepType::ElseIf,
            StepType::Else,
            StepType::While,
            StepType::Try,
            StepType::Catch,
            StepType::End,
        ] {
            assert_eq!(StepType::from_str(t.as_str()), Some(t));
        }
    }
}
