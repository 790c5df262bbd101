//! Execution context
//!
//! A [`Context`] bundles everything that parameterizes one run of a
//! [`crate::sequence::Sequence`] or standalone [`crate::step::Step`]: the shared
//! variable table, the step-setup script and hook run before every step, and the
//! message callback. It is a passive struct; nothing in this module executes scripts.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::message::{default_message_callback, Message};
use crate::variable_name::VariableName;
use crate::variable_value::VariableValue;

/// A native function invoked on a fresh script state before every step, typically to
/// register host functions the step-setup script or the step itself can call.
pub type SetupHook = Arc<dyn Fn(&crate::script_host::ScriptEngineHandle) + Send + Sync>;

/// A callback invoked on the controller thread for every [`Message`] an Executor
/// drains. `None` disables reporting: messages are still drained from the queue but
/// never handed anywhere.
pub type MessageCallback = Arc<dyn Fn(&Message) + Send + Sync>;

/// The shared variable table and setup machinery that parameterizes a run.
#[derive(Clone)]
pub struct Context {
    /// The shared variable dictionary.
    pub variables: BTreeMap<VariableName, VariableValue>,
    /// A script executed on a fresh script state before every step. Overwritten by a
    /// Sequence's own step-setup script when that Sequence starts.
    pub step_setup_script: String,
    /// A native hook invoked on a fresh script state before every step, before the
    /// step-setup script runs.
    pub step_setup_hook: Option<SetupHook>,
    /// Invoked once per drained Message. Defaults to printing `output` messages to
    /// stdout and ignoring everything else.
    pub message_callback: Option<MessageCallback>,
}

impl Context {
    /// Construct a Context with the default message callback, an empty variable table,
    /// and no setup script or hook.
    pub fn new() -> Self {
        Self {
            variables: BTreeMap::new(),
            step_setup_script: String::new(),
            step_setup_hook: None,
            message_callback: Some(Arc::new(default_message_callback)),
        }
    }

    /// Construct a Context whose message callback is disabled: messages are drained
    /// silently.
    pub fn silent() -> Self {
        Self {
            message_callback: None,
            ..Self::new()
        }
    }

    /// Look up a variable's current value.
    pub fn get(&self, name: &VariableName) -> Option<&VariableValue> {
        self.variables.get(name)
    }

    /// Set a variable's value, inserting it if absent.
    pub fn set(&mut self, name: VariableName, value: VariableValue) {
        self.variables.insert(name, value);
    }

    /// Invoke the message callback, if any, on `msg`.
    pub fn notify(&self, msg: &Message) {
        if let Some(cb) = &self.message_callback {
            cb(msg);
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("variables", &self.variables)
            .field("step_setup_script", &self.step_setup_script)
            .field("step_setup_hook", &self.step_setup_hook.is_some())
            .field("message_callback", &self.message_callback.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_context_defaults_to_the_console_callback() {
        let ctx = Context::new();
        assert!(ctx.message_callback.is_some());
        assert!(ctx.variables.is_empty());
    }

    #[test]
    fn silent_context_has_no_callback() {
        let ctx = Context::silent();
        assert!(ctx.message_callback.is_none());
    }

    #[test]
    fn set_then_get_round_trips() {
        let mut ctx = Context::new();
        let name = VariableName::new("x").unwrap();
        ctx.set(name.clone(), VariableValue::Int(42));
        assert_eq!(ctx.get(&name), Some(&VariableValue::Int(42)));
    }
}
