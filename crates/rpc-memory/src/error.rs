use pubsub_rpc::TransportError;
use thiserror::Error;

/// Errors raised by the in-memory transport.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// The endpoint is not connected to the broker.
    #[error("not connected")]
    NotConnected,

    /// The broker is offline.
    #[error("broker unavailable")]
    BrokerUnavailable,

    /// The broker did not accept the connection within the connect timeout.
    #[error("connect timed out")]
    ConnectTimeout,
}

impl TransportError for Error {}
