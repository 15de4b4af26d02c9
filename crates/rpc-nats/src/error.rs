use pubsub_rpc::TransportError;
use thiserror::Error;

/// Errors raised by the NATS transport.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// No connection has been established yet.
    #[error("not connected")]
    NotConnected,

    /// Connecting to the server failed.
    #[error("failed to connect: {0}")]
    Connect(String),

    /// Publishing or flushing failed.
    #[error("failed to publish: {0}")]
    Publish(String),

    /// Subscribing failed.
    #[error("failed to subscribe: {0}")]
    Subscribe(String),
}

impl TransportError for Error {}
