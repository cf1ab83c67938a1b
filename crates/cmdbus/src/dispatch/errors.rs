//! Error types for command dispatch.

use thiserror::Error;

/// Failures reported by [`Dispatcher::dispatch`](super::Dispatcher::dispatch).
///
/// None of these stop a command loop; the loop logs them and moves on.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No handler is registered for the verb.
    #[error("unknown command '{verb}'")]
    UnknownCommand {
        /// Case-folded verb.
        verb: String,
    },

    /// The argument was rejected by the verb's validator.
    #[error("invalid argument '{argument}' for '{verb}' ({validator}): {message}")]
    InvalidArgument {
        /// Case-folded verb.
        verb: String,
        /// Name of the validator that rejected the value.
        validator: &'static str,
        /// Raw argument text.
        argument: String,
        /// Reason reported by the validator.
        message: String,
    },

    /// The handler returned an error.
    #[error("handler for '{verb}' failed: {message}")]
    HandlerFailed {
        /// Case-folded verb.
        verb: String,
        /// Rendered error chain.
        message: String,
    },

    /// The handler panicked. The panic was contained.
    #[error("handler for '{verb}' panicked: {message}")]
    HandlerPanicked {
        /// Case-folded verb.
        verb: String,
        /// Panic payload, when it was a string.
        message: String,
    },
}

impl DispatchError {
    pub(crate) fn unknown_command(verb: &str) -> Self {
        Self::UnknownCommand {
            verb: verb.to_owned(),
        }
    }

    /// Case-folded verb the error refers to.
    #[must_use]
    pub fn verb(&self) -> &str {
        match self {
            Self::UnknownCommand { verb }
            | Self::InvalidArgument { verb, .. }
            | Self::HandlerFailed { verb, .. }
            | Self::HandlerPanicked { verb, .. } => verb,
        }
    }
}
