//! Progress messages
//!
//! A [`Message`] is an immutable event record sent from the worker thread to the
//! controller thread over a [`crate::comm_channel::CommChannel`].

use crate::step_index::OptionalStepIndex;
use crate::time::{self, TimePoint};

/// The kind of event a [`Message`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Output produced by a step's `print()` call.
    Output,
    /// A sequence has started executing.
    SequenceStarted,
    /// A sequence finished executing without error.
    SequenceStopped,
    /// A sequence finished executing because of an error.
    SequenceStoppedWithError,
    /// A step inside a sequence has started executing.
    StepStarted,
    /// A step finished executing without error.
    StepStopped,
    /// A step finished executing because of an error.
    StepStoppedWithError,
}

impl MessageType {
    /// The machine-readable name of this message type, as used in log lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Output => "output",
            MessageType::SequenceStarted => "sequence_started",
            MessageType::SequenceStopped => "sequence_stopped",
            MessageType::SequenceStoppedWithError => "sequence_stopped_with_error",
            MessageType::StepStarted => "step_started",
            MessageType::StepStopped => "step_stopped",
            MessageType::StepStoppedWithError => "step_stopped_with_error",
        }
    }
}

/// An event record carrying a kind, some text, a timestamp, and an optional step index.
#[derive(Debug, Clone)]
pub struct Message {
    message_type: MessageType,
    text: String,
    timestamp: TimePoint,
    index: OptionalStepIndex,
}

impl Message {
    /// Construct a new message, stamped with the current time.
    pub fn new(message_type: MessageType, text: impl Into<String>, index: OptionalStepIndex) -> Self {
        Self {
            message_type,
            text: text.into(),
            timestamp: time::now(),
            index,
        }
    }

    /// Construct a message with an explicit timestamp (used by tests that need precise
    /// ordering control).
    pub fn with_timestamp(
        message_type: MessageType,
        text: impl Into<String>,
        timestamp: TimePoint,
        index: OptionalStepIndex,
    ) -> Self {
        Self {
            message_type,
            text: text.into(),
            timestamp,
            index,
        }
    }

    /// The kind of this message.
    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    /// The message text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// The timestamp at which this message was created.
    pub fn timestamp(&self) -> TimePoint {
        self.timestamp
    }

    /// The step index this message pertains to, if any.
    pub fn index(&self) -> OptionalStepIndex {
        self.index
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Message{{ ")?;
        if let Some(index) = self.index {
            write!(f, "{index}: ")?;
        }
        write!(
            f,
            "{} \"{}\" {} }}",
            self.message_type.as_str(),
            self.text.escape_default(),
            time::to_string(self.timestamp)
        )
    }
}

/// The default message callback: print `output` messages to stdout, ignore everything
/// else.
pub fn default_message_callback(msg: &Message) {
    if msg.message_type() == MessageType::Output {
        print!("{}", msg.text());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_index_type_and_text() {
        let msg = Message::with_timestamp(
            MessageType::Output,
            "hello\n",
            time::now(),
            Some(3),
        );
        let rendered = msg.to_string();
        assert!(rendered.contains("3: "));
        assert!(rendered.contains("output"));
        assert!(rendered.contains("hello"));
    }

    #[test]
    fn default_callback_only_prints_output_messages() {
        // Can't easily capture stdout here without extra plumbing; just check it doesn't
        // panic on every message type.
        for mt in [
            MessageType::Output,
            MessageType::SequenceStarted,
            MessageType::SequenceStopped,
            MessageType::SequenceStoppedWithError,
            MessageType::StepStarted,
            MessageType::StepStopped,
            MessageType::StepStoppedWithError,
        ] {
            let msg = Message::new(mt, "x", None);
            default_message_callback(&msg);
        }
    }
}
