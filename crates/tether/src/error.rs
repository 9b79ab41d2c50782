//! Error types for boundary crossings.
//!
//! Separates failures that the proxy absorbs locally (an unavailable runtime handle,
//! an unresolvable method) from failures it surfaces (a foreign exception, an
//! operation on a closed or disposed proxy, a malformed evaluator descriptor). Callers
//! pattern-match on the variant instead of parsing messages.

use crate::runtime::{Signature, ValueKind};

/// Result alias used throughout the crate.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors that can occur while crossing into the foreign runtime.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    /// The runtime-wide handle could not be derived at construction, so no entry token
    /// can be obtained for this call.
    #[error("foreign runtime handle is unavailable")]
    RuntimeUnavailable,

    /// The runtime refused to attach the calling thread.
    #[error("failed to attach to the foreign runtime: {0}")]
    Attach(String),

    /// A declared field could not be resolved on the object's class.
    #[error("field `{name}: {kind}` not found")]
    FieldNotFound {
        /// Field name.
        name: String,
        /// Declared kind the lookup asked for.
        kind: ValueKind,
    },

    /// A method could not be resolved on the object's class.
    #[error("method `{name}{signature}` not found")]
    MethodNotFound {
        /// Method name.
        name: String,
        /// Signature the lookup asked for.
        signature: Signature,
    },

    /// A foreign value did not have the expected kind.
    #[error("type mismatch: expected {expected}, got {got}")]
    TypeMismatch {
        /// Expected kind.
        expected: ValueKind,
        /// Description of the value that was found.
        got: String,
    },

    /// The foreign side raised an exception while executing a call.
    #[error("foreign exception: {0}")]
    Foreign(String),

    /// The proxy has requested the foreign context to close.
    #[error("invalid state: context `{0}` is closed")]
    Closed(String),

    /// The proxy's retained references have already been released.
    #[error("invalid state: context `{0}` has been disposed")]
    Disposed(String),

    /// The evaluator descriptor returned by the foreign side could not be parsed.
    #[error("invalid evaluator descriptor: {0}")]
    Descriptor(#[from] DescriptorError),

    /// A context binding could not be loaded.
    #[error("invalid context binding: {0}")]
    Binding(String),
}

impl BridgeError {
    /// Returns true for the resolution failures that `submit_task` and `close` absorb.
    #[must_use]
    pub fn is_resolution_failure(&self) -> bool {
        matches!(self, Self::RuntimeUnavailable | Self::Attach(_) | Self::MethodNotFound { .. })
    }
}

/// Errors produced while parsing an evaluator descriptor string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DescriptorError {
    /// A component was not of the form `Key=Value`.
    #[error("invalid component `{0}`, expected `Key=Value`")]
    MalformedComponent(String),

    /// The same key appeared more than once.
    #[error("duplicate key `{0}`")]
    DuplicateKey(String),

    /// A required key was absent.
    #[error("missing required key `{0}`")]
    MissingKey(&'static str),

    /// A value could not be parsed.
    #[error("invalid value `{value}` for key `{key}`")]
    InvalidValue {
        /// Key whose value was rejected.
        key: &'static str,
        /// The rejected value.
        value: String,
    },
}
