//! Embedded script engine
//!
//! [`ScriptHost`] wraps a single use of the embedded Lua interpreter: one fresh `Lua`
//! state per step execution, so that globals leaked by one step's script can never
//! bleed into the next. It is the only module in the crate that imports `mlua`
//! directly; the rest of the crate talks to it through the narrow surface below
//! (pre-step marshalling, execution with a timeout, post-step marshalling, failure
//! translation), so swapping the concrete engine later touches only this file.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use mlua::{Lua, StdLib, Value as LuaValue, VmState};

use crate::comm_channel::CommChannel;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::message::{Message, MessageType};
use crate::step::Step;
use crate::step_index::OptionalStepIndex;
use crate::variable_value::VariableValue;

/// The concrete script engine handle exposed to setup hooks for native-function
/// registration. An implementation detail of [`ScriptHost`] leaking only as far as the
/// hook signature requires.
pub type ScriptEngineHandle = Lua;

/// Which kind of abort the interrupt hook observed, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AbortReason {
    Timeout,
    Cancelled,
}

/// Runs one step's script against one fresh Lua state.
///
/// Constructed fresh for every step; never reused. Optionally bound to a
/// [`CommChannel`] (asynchronous execution under an Executor) and a step index (for
/// stamping Messages); when both are absent, `print` output is routed directly through
/// the Context's callback instead of a shared queue, matching [`Step::execute`]'s
/// standalone, Executor-free mode. Also optionally bound to a wall-clock deadline
/// inherited from the owning Sequence's overall timeout, so a step with no timeout of
/// its own is still cut off once the sequence's total-duration budget runs out.
pub struct ScriptHost {
    channel: Option<Arc<CommChannel>>,
    step_index: OptionalStepIndex,
    sequence_deadline: Option<Instant>,
}

impl ScriptHost {
    /// Construct a host bound to an optional CommChannel, step index, and the absolute
    /// instant (if any) at which the owning Sequence's overall timeout expires.
    pub fn new(
        channel: Option<Arc<CommChannel>>,
        step_index: OptionalStepIndex,
        sequence_deadline: Option<Instant>,
    ) -> Self {
        Self { channel, step_index, sequence_deadline }
    }

    /// Run `step`'s script against `context`. Returns `Some(bool)` for steps with a
    /// boolean header (`if`/`elseif`/`while`), `None` for plain actions.
    pub fn run_step(&mut self, step: &Step, context: &mut Context) -> Result<Option<bool>> {
        let lua = self.fresh_state()?;
        self.install_print(&lua, context);
        self.run_setup(&lua, context)?;
        self.bind_inputs(&lua, step, context)?;

        let abort: Arc<Mutex<Option<AbortReason>>> = Arc::new(Mutex::new(None));
        let timeout = self.effective_timeout(step.timeout());
        self.install_interrupt(&lua, timeout, Arc::clone(&abort));

        let outcome = if step.step_type().has_boolean_header() {
            lua.load(step.script())
                .eval::<LuaValue>()
                .map(|v| Some(is_truthy(&v)))
        } else {
            lua.load(step.script())
                .exec()
                .map(|_| None)
        };

        let outcome = match outcome {
            Ok(value) => value,
            Err(err) => return Err(self.translate_failure(err, abort)),
        };

        self.unbind_outputs(&lua, step, context)?;
        Ok(outcome)
    }

    fn fresh_state(&self) -> Result<Lua> {
        // ALL_SAFE excludes `io` and `os` process primitives, matching the "no file I/O,
        // no unsafe process primitives" subset the design calls for.
        Lua::new_with(StdLib::ALL_SAFE, mlua::LuaOptions::default()).map_err(|e| Error::Script {
            index: self.step_index,
            message: format!("failed to initialize script engine: {e}"),
        })
    }

    fn install_print(&self, lua: &Lua, context: &Context) {
        let channel = self.channel.clone();
        let step_index = self.step_index;
        let callback = context.message_callback.clone();

        let print = lua
            .create_function(move |_, args: mlua::Variadic<LuaValue>| {
                let text = args
                    .iter()
                    .map(lua_display)
                    .collect::<Vec<_>>()
                    .join("\t")
                    + "\n";
                let msg = Message::new(MessageType::Output, text, step_index);
                match &channel {
                    Some(channel) => channel.queue().push(msg),
                    None => {
                        if let Some(cb) = &callback {
                            cb(&msg);
                        }
                    }
                }
                Ok(())
            })
            .expect("creating the print function cannot fail");

        lua.globals()
            .set("print", print)
            .expect("setting a global cannot fail on a fresh state");
    }

    fn run_setup(&self, lua: &Lua, context: &Context) -> Result<()> {
        if let Some(hook) = &context.step_setup_hook {
            hook(lua);
        }
        if !context.step_setup_script.trim().is_empty() {
            lua.load(&context.step_setup_script)
                .exec()
                .map_err(|e| Error::Script {
                    index: self.step_index,
                    message: format!("step setup script failed: {e}"),
                })?;
        }
        Ok(())
    }

    fn bind_inputs(&self, lua: &Lua, step: &Step, context: &Context) -> Result<()> {
        let globals = lua.globals();
        for name in step.used_variable_names() {
            let value = context.get(name);
            let lua_value = match value {
                Some(v) => variable_value_to_lua(lua, v).map_err(|e| Error::Script {
                    index: self.step_index,
                    message: format!("failed to bind variable \"{name}\": {e}"),
                })?,
                None => LuaValue::Nil,
            };
            globals.set(name.as_str(), lua_value).map_err(|e| Error::Script {
                index: self.step_index,
                message: format!("failed to bind variable \"{name}\": {e}"),
            })?;
        }
        Ok(())
    }

    fn unbind_outputs(&self, lua: &Lua, step: &Step, context: &mut Context) -> Result<()> {
        let globals = lua.globals();
        for name in step.used_variable_names() {
            let value: LuaValue = globals.get(name.as_str()).map_err(|e| Error::Script {
                index: self.step_index,
                message: format!("failed to read back variable \"{name}\": {e}"),
            })?;
            if let Some(v) = lua_to_variable_value(&value) {
                context.set(name.clone(), v);
            }
            // A missing (nil) global leaves the Context entry untouched, per spec.
        }
        Ok(())
    }

    /// Combine the step's own timeout with the remaining time before the owning
    /// Sequence's overall deadline, whichever is tighter. `Instant::now()` is read here,
    /// right before the script runs, matching the "wall-clock measured from just before
    /// script invocation" rule for both budgets.
    fn effective_timeout(&self, step_timeout: Option<Duration>) -> Option<Duration> {
        let remaining_for_sequence = self
            .sequence_deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()));
        match (step_timeout, remaining_for_sequence) {
            (None, None) => None,
            (Some(t), None) => Some(t),
            (None, Some(r)) => Some(r),
            (Some(t), Some(r)) => Some(t.min(r)),
        }
    }

    fn install_interrupt(
        &self,
        lua: &Lua,
        timeout: Option<Duration>,
        abort: Arc<Mutex<Option<AbortReason>>>,
    ) {
        let channel = self.channel.clone();
        let started = Instant::now();
        lua.set_interrupt(move |_| {
            if let Some(channel) = &channel {
                if channel.termination_requested() {
                    *abort.lock().expect("abort mutex poisoned") = Some(AbortReason::Cancelled);
                    return Err(mlua::Error::RuntimeError("cancelled".to_string()));
                }
            }
            if let Some(timeout) = timeout {
                if started.elapsed() >= timeout {
                    *abort.lock().expect("abort mutex poisoned") = Some(AbortReason::Timeout);
                    return Err(mlua::Error::RuntimeError("timeout".to_string()));
                }
            }
            Ok(VmState::Continue)
        });
    }

    fn translate_failure(&self, err: mlua::Error, abort: Arc<Mutex<Option<AbortReason>>>) -> Error {
        let reason = *abort.lock().expect("abort mutex poisoned");
        match reason {
            Some(AbortReason::Timeout) => Error::Timeout { index: self.step_index },
            Some(AbortReason::Cancelled) => Error::Cancelled { index: self.step_index },
            None => Error::Script {
                index: self.step_index,
                message: err.to_string(),
            },
        }
    }
}

fn is_truthy(v: &LuaValue) -> bool {
    !matches!(v, LuaValue::Nil | LuaValue::Boolean(false))
}

fn lua_display(v: &LuaValue) -> String {
    match v {
        LuaValue::Nil => "nil".to_string(),
        LuaValue::Boolean(b) => b.to_string(),
        LuaValue::Integer(i) => i.to_string(),
        LuaValue::Number(n) => n.to_string(),
        LuaValue::String(s) => s.to_str().map(|s| s.to_string()).unwrap_or_default(),
        other => format!("{other:?}"),
    }
}

fn variable_value_to_lua(lua: &Lua, value: &VariableValue) -> mlua::Result<LuaValue> {
    Ok(match value {
        VariableValue::Int(i) => LuaValue::Integer(*i),
        VariableValue::Float(f) => LuaValue::Number(*f),
        VariableValue::String(s) => LuaValue::String(lua.create_string(s)?),
        VariableValue::Bool(b) => LuaValue::Boolean(*b),
    })
}

fn lua_to_variable_value(value: &LuaValue) -> Option<VariableValue> {
    match value {
        LuaValue::Nil => None,
        LuaValue::Boolean(b) => Some(VariableValue::Bool(*b)),
        LuaValue::Integer(i) => Some(VariableValue::Int(*i)),
        LuaValue::Number(n) => Some(VariableValue::Float(*n)),
        LuaValue::String(s) => s.to_str().ok().map(|s| VariableValue::from_str(s.to_string())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::StepType;
    use crate::variable_name::VariableName;

    fn var(name: &str) -> crate::variable_name::VariableName {
        VariableName::new(name).unwrap()
    }

    #[test]
    fn sum_example_mixes_int_and_float() {
        let mut step = Step::new(StepType::Action);
        step.set_script("sum = a + b");
        step.set_used_variable_names([var("a"), var("b"), var("sum")].into_iter().collect());

        let mut context = Context::new();
        context.set(var("a"), VariableValue::Int(42));
        context.set(var("b"), VariableValue::Float(-41.5));

        step.execute(&mut context).unwrap();
        assert_eq!(context.get(&var("sum")), Some(&VariableValue::Float(0.5)));
    }

    #[test]
    fn missing_global_on_output_leaves_context_unchanged() {
        let mut step = Step::new(StepType::Action);
        step.set_script("-- no-op");
        step.set_used_variable_names([var("untouched")].into_iter().collect());

        let mut context = Context::new();
        context.set(var("untouched"), VariableValue::Int(7));
        step.execute(&mut context).unwrap();
        assert_eq!(context.get(&var("untouched")), Some(&VariableValue::Int(7)));
    }

    #[test]
    fn boolean_header_uses_lua_truthiness() {
        let mut step = Step::new(StepType::If);
        step.set_script("return x > 0");
        step.set_used_variable_names([var("x")].into_iter().collect());

        let mut context = Context::new();
        context.set(var("x"), VariableValue::Int(-3));

        let result = step.execute(&mut context).unwrap();
        assert_eq!(result, Some(false));
    }

    #[test]
    fn timeout_is_enforced_on_a_busy_loop() {
        let mut step = Step::new(StepType::Action);
        step.set_script("while true do end");
        step.set_timeout(Duration::from_millis(50).into());

        let mut context = Context::new();
        let started = Instant::now();
        let err = step.execute(&mut context).unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn a_thrown_script_error_becomes_a_script_error() {
        let mut step = Step::new(StepType::Action);
        step.set_script("error(\"boom\")");
        let mut context = Context::new();
        let err = step.execute(&mut context).unwrap_err();
        assert!(matches!(err, Error::Script { .. }));
    }
}
