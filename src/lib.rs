//! Taskolib - compose and run structured automation sequences against an embedded
//! scripting engine.
//!
//! A [`Sequence`] is an ordered list of typed [`Step`]s (action / if / elseif / else /
//! while / try / catch / end). The crate validates that list against a
//! structured-program grammar, executes it against a shared [`Context`] using an
//! embedded Lua interpreter, and can run it asynchronously on a worker thread via
//! [`Executor`], reporting progress back to the calling thread through a bounded,
//! cancellable message queue.

pub mod bounded_queue;
pub mod comm_channel;
pub mod context;
pub mod error;
pub mod executor;
pub mod message;
pub mod persistence;
pub mod script_host;
pub mod sequence;
pub mod step;
pub mod step_index;
pub mod time;
pub mod variable_name;
pub mod variable_value;

pub use comm_channel::CommChannel;
pub use context::Context;
pub use error::{Error, Result};
pub use executor::Executor;
pub use message::{Message, MessageType};
pub use sequence::Sequence;
pub use step::{Step, StepType};
pub use step_index::StepIndex;
pub use variable_name::VariableName;
pub use variable_value::VariableValue;
