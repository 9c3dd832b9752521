//! Error taxonomy for the A2A hub

use thiserror::Error;

/// Errors surfaced by the serializer
#[derive(Debug, Error)]
pub enum SerializationError {
    /// The input was not structurally valid JSON for a message
    #[error("malformed message: {source}")]
    Malformed {
        /// Underlying JSON error
        #[source]
        source: serde_json::Error,
    },

    /// The payload declared a schema major this build cannot read
    #[error("incompatible schema version {found} (supported major: {supported_major})")]
    IncompatibleSchema {
        /// Version string found on the wire
        found: String,
        /// Major version this build understands
        supported_major: u32,
    },

    /// A compressed payload did not carry the expected structure
    #[error("invalid compressed form: {reason}")]
    InvalidCompressedForm {
        /// What was wrong with it
        reason: String,
    },

    /// Validate-on-deserialize was requested and the message failed
    #[error("message failed validation: {errors:?}")]
    ValidationFailed {
        /// Every violation found
        errors: Vec<String>,
    },

    /// A batch envelope declared a count that disagrees with its contents
    #[error("batch declares {declared} messages but contains {actual}")]
    BatchCountMismatch {
        /// Count field from the envelope
        declared: usize,
        /// Actual number of messages present
        actual: usize,
    },
}

/// Top-level error type spanning the hub's subsystems
#[derive(Debug, Error)]
pub enum HubError {
    /// Message structure, size, skew, or pattern violations
    #[error("validation failed: {errors:?}")]
    Validation {
        /// Every violation found
        errors: Vec<String>,
    },

    /// Rule evaluation threw or recipients could not be determined
    #[error("routing error: {message}")]
    Routing {
        /// Description of the failure
        message: String,
    },

    /// Transport write failed or a receipt timed out
    #[error("delivery to {agent_id} failed: {message}")]
    Delivery {
        /// The recipient that could not be reached
        agent_id: String,
        /// Description of the failure
        message: String,
    },

    /// Unknown frame type, malformed stream payload, missing agent id
    #[error("protocol error: {message}")]
    Protocol {
        /// Description of the offence
        message: String,
    },

    /// Register-when-full, duplicate topic, agent-not-found on delete
    #[error("{message}")]
    State {
        /// Description of the conflict
        message: String,
    },

    /// Malformed input or incompatible schema major
    #[error("serialization error: {source}")]
    Serialization {
        /// The serializer's error
        #[from]
        source: SerializationError,
    },
}

impl HubError {
    /// Builds a validation error from the validator's report
    #[must_use]
    pub fn validation(errors: Vec<String>) -> Self {
        Self::Validation { errors }
    }

    /// Builds a state-conflict error
    #[must_use]
    pub fn state(message: impl Into<String>) -> Self {
        Self::State {
            message: message.into(),
        }
    }

    /// Builds a protocol error
    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }
}
