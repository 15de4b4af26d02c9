use std::error::Error;
use std::fmt::Debug;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;

/// Marker trait for transport errors.
pub trait TransportError: Error + Send + Sync + 'static {}

/// Delivery guarantee requested for a publish or subscription.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum DeliveryGuarantee {
    /// Fire and forget.
    AtMostOnce,

    /// Delivered, possibly more than once.
    AtLeastOnce,

    /// Delivered exactly once. Used for every RPC publish and subscribe.
    #[default]
    ExactlyOnce,
}

/// Username/password passed through to the broker.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Credentials {
    /// Username.
    pub username: String,

    /// Password.
    pub password: String,
}

/// Everything a transport needs to (re)connect.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConnectOptions {
    /// Broker host.
    pub host: String,

    /// Broker port.
    pub port: u16,

    /// Credentials, omitted entirely when no username is configured.
    pub credentials: Option<Credentials>,

    /// Client identifier presented to the broker.
    pub client_id: String,

    /// Upper bound for a single connect attempt.
    pub timeout: Duration,
}

/// A message delivered by the broker.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InboundMessage {
    /// Topic the message was published to.
    pub topic: String,

    /// Topic the publisher expects a reply on, if any.
    pub response_topic: Option<String>,

    /// Raw payload.
    pub payload: Bytes,
}

/// Stream of inbound messages.
pub type MessageStream = Pin<Box<dyn Stream<Item = InboundMessage> + Send>>;

/// A publish/subscribe connection.
///
/// Topics use `/` as the hierarchy separator, `+` as the single-level
/// wildcard and `#` as the multi-level wildcard. Implementations translate
/// to their broker's syntax where it differs. Implementations must be safe
/// for concurrent publish and subscribe calls; the RPC layer adds no locking.
#[async_trait]
pub trait Transport
where
    Self: Clone + Debug + Send + Sync + 'static,
{
    /// The error type for the transport.
    type Error: TransportError;

    /// Characters the broker reserves in topics beyond `/`, `+` and `#`.
    const RESERVED_CHARS: &'static [char] = &[];

    /// Port used when the options do not name one. Defaults to the MQTT port.
    const DEFAULT_PORT: u16 = 1883;

    /// Establishes a connection, replacing any previous one.
    ///
    /// Subscriptions do not survive a reconnect.
    async fn connect(&self, options: &ConnectOptions) -> Result<(), Self::Error>;

    /// Returns whether the connection is alive.
    async fn ping(&self) -> bool;

    /// Publishes a payload, optionally carrying a response topic.
    async fn publish(
        &self,
        topic: &str,
        response_topic: Option<&str>,
        payload: Bytes,
        guarantee: DeliveryGuarantee,
    ) -> Result<(), Self::Error>;

    /// Subscribes to a topic filter. With a group key, each matching message
    /// is delivered to only one member of the group.
    async fn subscribe(
        &self,
        filter: &str,
        guarantee: DeliveryGuarantee,
        group: Option<&str>,
    ) -> Result<(), Self::Error>;

    /// Removes a subscription.
    async fn unsubscribe(&self, filter: &str) -> Result<(), Self::Error>;

    /// Returns a stream of every message received from now on.
    fn messages(&self) -> MessageStream;
}
