//! Error types for the RPC layer.

use crate::codec::ParamType;

use std::time::Duration;

use thiserror::Error;

/// Result type alias for RPC operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for RPC operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Method name contains a topic separator or wildcard character.
    #[error("invalid method name {0:?}: must not contain {1}")]
    InvalidMethodName(String, String),

    /// The same function name was registered twice.
    #[error("function registered more than once: {0}")]
    DuplicateFunction(String),

    /// Codec errors during serialization/deserialization.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The reply data could not be converted to the caller's result type.
    #[error("failed to convert result: {0}")]
    ResultConversion(String),

    /// The remote side reported an error.
    #[error("{0}")]
    RemoteInvocation(String),

    /// The transport failed to publish or subscribe.
    #[error("transport error: {0}")]
    Transport(String),

    /// The call was cancelled before a reply arrived.
    #[error("call cancelled")]
    Cancelled,

    /// No reply arrived within the deadline.
    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    /// The client was used before `start` was called.
    #[error("client not started")]
    NotStarted,

    /// The connection dropped while the call was waiting for its reply.
    #[error("connection lost before the reply arrived")]
    ConnectionLost,

    /// Reply channel closed unexpectedly.
    #[error("reply channel closed")]
    ChannelClosed,
}

impl Error {
    pub(crate) fn transport(error: impl std::error::Error) -> Self {
        Self::Transport(error.to_string())
    }
}

/// Codec-related errors.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// Serialization failed.
    #[error("failed to serialize: {0}")]
    Serialization(String),

    /// Payload is not well-formed JSON of the expected shape.
    #[error("failed to deserialize: {0}")]
    Deserialization(String),

    /// Number of arguments does not match the function signature.
    #[error("expected {expected} arguments, got {actual}")]
    ArityMismatch {
        /// Number of declared parameters.
        expected: usize,
        /// Number of arguments received.
        actual: usize,
    },

    /// An argument cannot be converted to its declared parameter type.
    #[error("argument {index} cannot be converted to {expected}: got {actual}")]
    ParameterConversion {
        /// Position of the offending argument.
        index: usize,
        /// Declared parameter type.
        expected: ParamType,
        /// JSON kind actually received.
        actual: &'static str,
    },
}

/// Failure raised by a handler body.
///
/// Only the message crosses the wire.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    /// Creates a handler error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The message sent back to the caller.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(error: serde_json::Error) -> Self {
        Self::new(error.to_string())
    }
}

/// Failure at the server dispatch boundary.
///
/// Display is the message text that becomes the response envelope's error.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// No function registered under the requested name.
    #[error("function not found: {0}")]
    FunctionNotFound(String),

    /// The request topic does not name a function.
    #[error("invalid request topic: {0}")]
    InvalidTopic(String),

    /// Arguments did not match the function signature.
    #[error(transparent)]
    Conversion(#[from] CodecError),

    /// The handler body failed.
    #[error(transparent)]
    Handler(#[from] HandlerError),

    /// The handler panicked.
    #[error("handler panicked")]
    Panicked,
}
