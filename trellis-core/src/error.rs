//! Error Types
//!
//! Trellis separates failures that are contained at their origin from
//! failures that indicate misuse:
//!
//! - Validation failures never surface here. Strategies return a
//!   [`ValidationError`], which the validator converts into a status carried
//!   by its `finished` signal.
//! - Failures inside the submitted computation are captured by the executor
//!   and reported through its `finished` payload.
//! - Everything else (bad configuration, structural misuse, rejected
//!   submissions) is a [`FormError`] returned to the immediate caller.

use std::fmt;
use std::path::PathBuf;

use serde_json::Value;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T, E = FormError> = std::result::Result<T, E>;

/// Errors returned synchronously by element, form and executor operations.
#[derive(Debug, Error)]
pub enum FormError {
    /// The configuration could not be turned into an element tree.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// An operation violated a structural invariant of the element tree.
    #[error("interaction error: {0}")]
    Interaction(String),

    /// A callback was removed from a communicator it was never registered on.
    #[error(transparent)]
    SignalNotFound(#[from] SignalNotFound),

    /// Submission was refused because required elements are unsatisfied.
    #[error("form has {} invalid element(s)", .0.len())]
    InvalidData(Vec<InvalidEntry>),

    /// A dropdown index outside of its option list.
    #[error("option index {index} out of range for {len} option(s)")]
    ValueOutOfRange { index: usize, len: usize },

    /// A value whose JSON shape the element cannot store.
    #[error("element {element} cannot hold value {value}")]
    ValueType { element: String, value: Value },

    /// A multi slot that does not exist (or was already removed).
    #[error("no element in slot {0}")]
    UnknownSlot(usize),

    /// An element id that is not present in the form.
    #[error("unknown element id '{0}'")]
    UnknownElement(String),

    /// A run is already in flight for this form or executor.
    #[error("an execution is already running")]
    AlreadyRunning,

    /// The form's `targetScript` has no registered target.
    #[error("no target registered under '{0}'")]
    MissingTarget(String),

    /// A saved state does not match the shape of the element it is applied to.
    #[error("state mismatch: {0}")]
    State(String),

    /// State snapshot (de)serialization failed.
    #[error("state encoding error: {0}")]
    Encoding(String),

    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FormError {
    /// Whether the caller can recover by correcting user input.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FormError::InvalidData(_)
                | FormError::ValueOutOfRange { .. }
                | FormError::ValueType { .. }
                | FormError::AlreadyRunning
        )
    }

    /// Whether this is a programming or configuration mistake.
    pub fn is_misuse(&self) -> bool {
        matches!(
            self,
            FormError::Config(_)
                | FormError::Interaction(_)
                | FormError::SignalNotFound(_)
                | FormError::MissingTarget(_)
        )
    }
}

/// Errors raised while parsing or assembling configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("duplicate element id '{0}'")]
    DuplicateId(String),

    #[error("malformed signal descriptor '{0}'")]
    MalformedSignal(String),

    #[error("invalid pattern '{pattern}': {reason}")]
    Pattern { pattern: String, reason: String },

    #[error("{0}")]
    Structure(String),
}

/// Raised by [`Communicator::remove`](crate::reactive::Communicator::remove)
/// when the callback is not registered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("callback not registered on communicator {communicator}")]
pub struct SignalNotFound {
    pub communicator: u64,
}

/// The error type validation strategies return.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The input failed the strategy's check. User-correctable.
    #[error("{0}")]
    Invalid(String),

    /// The strategy itself broke. A tooling problem, not a user problem.
    #[error("validator crashed: {0}")]
    Internal(String),
}

impl ValidationError {
    pub fn invalid(message: impl Into<String>) -> Self {
        ValidationError::Invalid(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ValidationError::Internal(message.into())
    }
}

/// One offending element reported by `Form::submit`.
#[derive(Debug, Clone, PartialEq)]
pub struct InvalidEntry {
    /// The element's configured id, or its content hash if it has none.
    pub element: String,
    pub label: Option<String>,
    pub value: Value,
    pub reason: String,
}

impl fmt::Display for InvalidEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.label.as_deref().unwrap_or(&self.element);
        write!(f, "{name} = {}: {}", self.value, self.reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_data_counts_entries() {
        let err = FormError::InvalidData(vec![
            InvalidEntry {
                element: "a".into(),
                label: None,
                value: Value::Null,
                reason: "required".into(),
            },
            InvalidEntry {
                element: "b".into(),
                label: Some("B".into()),
                value: Value::from("x"),
                reason: "bad".into(),
            },
        ]);
        assert_eq!(err.to_string(), "form has 2 invalid element(s)");
        assert!(err.is_recoverable());
        assert!(!err.is_misuse());
    }

    #[test]
    fn interaction_is_misuse() {
        let err = FormError::Interaction("not collapsible".into());
        assert!(err.is_misuse());
        assert!(!err.is_recoverable());
    }

    #[test]
    fn entry_display_prefers_label() {
        let entry = InvalidEntry {
            element: "rate".into(),
            label: Some("Discount rate".into()),
            value: Value::from("abc"),
            reason: "not a number".into(),
        };
        assert_eq!(entry.to_string(), "Discount rate = \"abc\": not a number");
    }
}
