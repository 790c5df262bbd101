//! Error taxonomy
//!
//! Taskolib distinguishes a handful of error *kinds* rather than a deep hierarchy of
//! exception types. Every fallible path in the crate returns this single [`Error`] enum.

use thiserror::Error;

use crate::step_index::OptionalStepIndex;

/// The taxonomy of things that can go wrong while building or running a sequence.
#[derive(Debug, Error)]
pub enum Error {
    /// A variable name failed the identifier rules in [`crate::variable_name::VariableName`].
    #[error("invalid variable name: {message}")]
    InvalidIdentifier {
        /// Human-readable explanation of what rule was violated.
        message: String,
    },

    /// A sequence's step list does not match the structured-program grammar.
    #[error("malformed sequence at step {index:?}: {message}")]
    Structural {
        /// Index of the first offending step, if one could be identified.
        index: OptionalStepIndex,
        /// Human-readable explanation.
        message: String,
    },

    /// The embedded script raised an error while a step was executing.
    #[error("script error at step {index:?}: {message}")]
    Script {
        /// Index of the step whose script failed.
        index: OptionalStepIndex,
        /// The error text produced by the script engine.
        message: String,
    },

    /// A per-step or whole-sequence wall-clock limit was exceeded.
    #[error("timeout at step {index:?}")]
    Timeout {
        /// Index of the step that was running when the deadline was crossed.
        index: OptionalStepIndex,
    },

    /// The controller requested termination and the worker observed it.
    #[error("cancelled at step {index:?}")]
    Cancelled {
        /// Index of the step that was running when cancellation was observed.
        index: OptionalStepIndex,
    },

    /// An Executor operation was attempted while a worker was still running.
    #[error("executor is busy running another sequence")]
    Busy,

    /// An underlying storage operation failed (the persistence collaborator).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Return the step index carried by this error, if any.
    pub fn index(&self) -> OptionalStepIndex {
        match self {
            Error::Structural { index, .. } => *index,
            Error::Script { index, .. } => *index,
            Error::Timeout { index } => *index,
            Error::Cancelled { index } => *index,
            Error::InvalidIdentifier { .. } | Error::Busy | Error::Io(_) => None,
        }
    }

    /// True if this error represents a cooperative cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled { .. })
    }

    /// True if `try`/`catch` should intercept this error (script errors and timeouts,
    /// never cancellation or structural errors).
    pub fn is_catchable(&self) -> bool {
        matches!(self, Error::Script { .. } | Error::Timeout { .. })
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_extracts_the_step_index_where_one_exists() {
        assert_eq!(Error::Timeout { index: Some(3) }.index(), Some(3));
        assert_eq!(Error::Cancelled { index: Some(1) }.index(), Some(1));
        assert_eq!(Error::Busy.index(), None);
        assert_eq!(Error::InvalidIdentifier { message: "x".into() }.index(), None);
    }

    #[test]
    fn only_script_and_timeout_errors_are_catchable() {
        assert!(Error::Script { index: None, message: "boom".into() }.is_catchable());
        assert!(Error::Timeout { index: None }.is_catchable());
        assert!(!Error::Cancelled { index: None }.is_catchable());
        assert!(!Error::Structural { index: None, message: "bad".into() }.is_catchable());
    }

    #[test]
    fn is_cancelled_is_true_only_for_the_cancelled_variant() {
        assert!(Error::Cancelled { index: None }.is_cancelled());
        assert!(!Error::Timeout { index: None }.is_cancelled());
    }
}
