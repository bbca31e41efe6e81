//! Outcome model: the normalized result of running a handler once.
//!
//! Whatever the handler returned (or however it failed), the executor turns it
//! into one of these two variants before anything is reported.

use serde_json::Value;

use super::errors::ErrorRecord;

/// Classification used in log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeKind {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Serialized as the response body.
    Success(Value),

    /// Serialized as the error body.
    Failure(ErrorRecord),
}

impl Outcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Self::Success(_) => OutcomeKind::Success,
            Self::Failure(_) => OutcomeKind::Failure,
        }
    }

    pub fn is_success(&self) -> bool {
        self.kind() == OutcomeKind::Success
    }
}
