//! Step indices
//!
//! A step index is just the zero-based position of a [`crate::step::Step`] within its
//! owning [`crate::sequence::Sequence`]. It gets its own tiny type alias because so many
//! error paths and messages need to carry "which step" around.

/// The index of a Step within a Sequence.
pub type StepIndex = u16;

/// An optional step index, used where the step that caused an event may not be known
/// (e.g. errors that occur before any step has started).
pub type OptionalStepIndex = Option<StepIndex>;
