use crate::broker::{Endpoint, MemoryBroker};
use crate::error::Error;

use std::fmt::{self, Debug};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use pubsub_rpc::{ConnectOptions, DeliveryGuarantee, InboundMessage, MessageStream, Transport};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{trace, warn};

// Releases the endpoint once the last transport clone is gone.
struct Registration {
    broker: MemoryBroker,
    endpoint: Arc<Endpoint>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.endpoint.disconnect();
        self.broker.release(self.endpoint.id());
    }
}

/// A connection to a [`MemoryBroker`].
///
/// Clones share the same connection.
#[derive(Clone)]
pub struct MemoryTransport {
    registration: Arc<Registration>,
}

impl Debug for MemoryTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("endpoint", &self.registration.endpoint.id())
            .field("client_id", &self.registration.endpoint.client_id())
            .field("connected", &self.registration.endpoint.is_connected())
            .finish()
    }
}

impl MemoryTransport {
    pub(crate) fn new(broker: MemoryBroker, endpoint: Arc<Endpoint>) -> Self {
        Self {
            registration: Arc::new(Registration { broker, endpoint }),
        }
    }

    fn broker(&self) -> &MemoryBroker {
        &self.registration.broker
    }

    fn endpoint(&self) -> &Endpoint {
        &self.registration.endpoint
    }

    /// Drops this connection as if the network failed. The broker stays up.
    pub fn drop_connection(&self) {
        self.endpoint().disconnect();
    }

    /// Whether this endpoint is connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.endpoint().is_connected()
    }

    /// Number of active subscriptions on this connection.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.endpoint().subscription_count()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    type Error = Error;

    async fn connect(&self, options: &ConnectOptions) -> Result<(), Error> {
        self.broker().connect(self.endpoint(), options).await
    }

    async fn ping(&self) -> bool {
        self.broker().is_online() && self.endpoint().is_connected()
    }

    async fn publish(
        &self,
        topic: &str,
        response_topic: Option<&str>,
        payload: Bytes,
        _guarantee: DeliveryGuarantee,
    ) -> Result<(), Error> {
        if !self.endpoint().is_connected() {
            return Err(Error::NotConnected);
        }

        let message = InboundMessage {
            topic: topic.to_string(),
            response_topic: response_topic.map(str::to_string),
            payload,
        };

        let delivered = self.broker().route(&message);
        trace!(topic, delivered, "published");

        Ok(())
    }

    async fn subscribe(
        &self,
        filter: &str,
        _guarantee: DeliveryGuarantee,
        group: Option<&str>,
    ) -> Result<(), Error> {
        self.endpoint().subscribe(filter, group)
    }

    async fn unsubscribe(&self, filter: &str) -> Result<(), Error> {
        self.endpoint().unsubscribe(filter)
    }

    fn messages(&self) -> MessageStream {
        let stream =
            BroadcastStream::new(self.endpoint().inbound()).filter_map(|message| match message {
                Ok(message) => Some(message),
                Err(e) => {
                    warn!(error = %e, "inbound stream lagged");
                    None
                }
            });

        Box::pin(stream)
    }
}
