//! Error types for the compatibility layer

use thiserror::Error;

use crate::handle::ValueRef;

/// Main error type for every fallible operation.
///
/// Script-level exceptions carry the thrown value as a [`ValueRef`]. Dropping
/// the error releases that handle, so an exception nobody inspects is never
/// leaked.
#[derive(Debug, Error)]
pub enum JscError {
    /// A value was thrown by script code or by a host hook
    #[error("{message}")]
    Exception { value: ValueRef, message: String },

    /// The engine value behind a handle has been reclaimed, or its context is gone
    #[error("handle is defunct: its engine value has been reclaimed")]
    Defunct,

    /// The engine lock is already held by the calling thread
    #[error("engine lock is already held by this thread")]
    Reentrant,

    /// An object operation was applied to a value that is not an object
    #[error("TypeError: value is not an object")]
    NotAnObject,

    /// Engine failure that is not a script exception (allocation, conversion)
    #[error("engine error: {0}")]
    Engine(#[from] rquickjs::Error),

    /// Malformed JSON configuration
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl JscError {
    pub fn exception(value: ValueRef, message: impl Into<String>) -> Self {
        JscError::Exception {
            value,
            message: message.into(),
        }
    }

    /// The thrown value, if this error is a script exception.
    pub fn thrown(&self) -> Option<&ValueRef> {
        match self {
            JscError::Exception { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn is_exception(&self) -> bool {
        matches!(self, JscError::Exception { .. })
    }
}

/// Result type returned by host hooks.
pub type HookResult<T> = Result<T, JscError>;
