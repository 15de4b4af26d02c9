use crate::error::Error;
use crate::subject::{from_subject, to_subject};

use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::sync::Arc;
use std::time::Duration;

use async_nats::connection::State;
use async_nats::{Client, Subscriber};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use pubsub_rpc::{ConnectOptions, DeliveryGuarantee, InboundMessage, MessageStream, Transport};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};

const INBOUND_CAPACITY: usize = 1024;
const PING_TIMEOUT: Duration = Duration::from_secs(2);

struct Inner {
    client: RwLock<Option<Client>>,
    subscriptions: Mutex<HashMap<String, JoinHandle<()>>>,
    inbound: broadcast::Sender<InboundMessage>,
}

/// Transport over a NATS server.
///
/// Topic levels map to subject tokens, grouped subscriptions to queue groups
/// and the response topic to the message's reply subject.
#[derive(Clone)]
pub struct NatsTransport {
    inner: Arc<Inner>,
}

impl Debug for NatsTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NatsTransport")
            .field("connected", &self.inner.client.read().is_some())
            .field("subscriptions", &self.inner.subscriptions.lock().len())
            .finish()
    }
}

impl Default for NatsTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl NatsTransport {
    /// Creates an unconnected transport.
    #[must_use]
    pub fn new() -> Self {
        let (inbound, _) = broadcast::channel(INBOUND_CAPACITY);

        Self {
            inner: Arc::new(Inner {
                client: RwLock::new(None),
                subscriptions: Mutex::new(HashMap::new()),
                inbound,
            }),
        }
    }

    fn client(&self) -> Result<Client, Error> {
        self.inner.client.read().clone().ok_or(Error::NotConnected)
    }

    fn clear_subscriptions(&self) {
        for (_, task) in self.inner.subscriptions.lock().drain() {
            task.abort();
        }
    }

    async fn flush(client: &Client, guarantee: DeliveryGuarantee) -> Result<(), Error> {
        if guarantee == DeliveryGuarantee::AtMostOnce {
            return Ok(());
        }

        client
            .flush()
            .await
            .map_err(|e| Error::Publish(e.to_string()))
    }
}

async fn forward(mut subscriber: Subscriber, inbound: broadcast::Sender<InboundMessage>) {
    while let Some(message) = subscriber.next().await {
        let message = InboundMessage {
            topic: from_subject(message.subject.as_str()),
            response_topic: message.reply.map(|reply| from_subject(reply.as_str())),
            payload: message.payload,
        };

        // No live receiver only means nobody is reading yet.
        let _ = inbound.send(message);
    }
}

#[async_trait]
impl Transport for NatsTransport {
    type Error = Error;

    const RESERVED_CHARS: &'static [char] = &['.', '*', '>', ' '];

    const DEFAULT_PORT: u16 = 4222;

    async fn connect(&self, options: &ConnectOptions) -> Result<(), Error> {
        let mut nats_options = async_nats::ConnectOptions::new()
            .name(options.client_id.clone())
            .connection_timeout(options.timeout);

        if let Some(credentials) = &options.credentials {
            nats_options = nats_options
                .user_and_password(credentials.username.clone(), credentials.password.clone());
        }

        let url = format!("nats://{}:{}", options.host, options.port);
        let client = async_nats::connect_with_options(&url, nats_options)
            .await
            .map_err(|e| Error::Connect(e.to_string()))?;

        self.clear_subscriptions();
        *self.inner.client.write() = Some(client);
        info!(%url, client_id = %options.client_id, "connected to nats");

        Ok(())
    }

    async fn ping(&self) -> bool {
        let Ok(client) = self.client() else {
            return false;
        };

        if client.connection_state() != State::Connected {
            return false;
        }

        matches!(timeout(PING_TIMEOUT, client.flush()).await, Ok(Ok(())))
    }

    async fn publish(
        &self,
        topic: &str,
        response_topic: Option<&str>,
        payload: Bytes,
        guarantee: DeliveryGuarantee,
    ) -> Result<(), Error> {
        let client = self.client()?;
        let subject = to_subject(topic);

        match response_topic {
            Some(response_topic) => {
                client
                    .publish_with_reply(subject, to_subject(response_topic), payload)
                    .await
            }
            None => client.publish(subject, payload).await,
        }
        .map_err(|e| Error::Publish(e.to_string()))?;

        Self::flush(&client, guarantee).await
    }

    async fn subscribe(
        &self,
        filter: &str,
        guarantee: DeliveryGuarantee,
        group: Option<&str>,
    ) -> Result<(), Error> {
        let client = self.client()?;
        let subject = to_subject(filter);

        let subscriber = match group {
            Some(group) => client.queue_subscribe(subject, group.to_string()).await,
            None => client.subscribe(subject).await,
        }
        .map_err(|e| Error::Subscribe(e.to_string()))?;

        let task = tokio::spawn(forward(subscriber, self.inner.inbound.clone()));
        if let Some(previous) = self
            .inner
            .subscriptions
            .lock()
            .insert(filter.to_string(), task)
        {
            previous.abort();
        }

        // Make sure the server knows about the subscription before anything
        // is published that it should receive.
        Self::flush(&client, guarantee).await
    }

    async fn unsubscribe(&self, filter: &str) -> Result<(), Error> {
        if let Some(task) = self.inner.subscriptions.lock().remove(filter) {
            task.abort();
            debug!(%filter, "unsubscribed");
        }

        Ok(())
    }

    fn messages(&self) -> MessageStream {
        let stream = tokio_stream::StreamExt::filter_map(
            BroadcastStream::new(self.inner.inbound.subscribe()),
            |message| match message {
                Ok(message) => Some(message),
                Err(e) => {
                    warn!(error = %e, "inbound stream lagged");
                    None
                }
            },
        );

        Box::pin(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pubsub_rpc::RpcOptions;

    #[tokio::test]
    async fn test_operations_require_connection() {
        let transport = NatsTransport::new();

        assert!(!transport.ping().await);
        assert_eq!(
            transport
                .publish("a/b", None, Bytes::new(), DeliveryGuarantee::ExactlyOnce)
                .await,
            Err(Error::NotConnected)
        );
        assert_eq!(
            transport
                .subscribe("+/b", DeliveryGuarantee::ExactlyOnce, None)
                .await,
            Err(Error::NotConnected)
        );
        assert_eq!(transport.unsubscribe("+/b").await, Ok(()));
    }

    #[tokio::test]
    async fn test_connect_to_unreachable_server_fails() {
        let transport = NatsTransport::new();
        let options = ConnectOptions {
            host: "127.0.0.1".to_string(),
            port: 1,
            credentials: None,
            client_id: "unreachable".to_string(),
            timeout: Duration::from_millis(200),
        };

        let result = timeout(Duration::from_secs(5), transport.connect(&options))
            .await
            .unwrap();

        assert!(matches!(result, Err(Error::Connect(_))));
        assert!(!transport.ping().await);
    }

    #[test]
    fn test_reserved_chars_reject_nats_tokens() {
        let topics = pubsub_rpc::TopicGenerator::with_reserved(NatsTransport::RESERVED_CHARS);

        for name in ["a.b", "a*", "a>", "a b"] {
            assert!(topics.create_topics(name).is_err(), "{name:?} was accepted");
        }
        assert!(topics.create_topics("echo").is_ok());
    }

    #[test]
    fn test_default_options_use_nats_port() {
        let options = RpcOptions::new("localhost").connect_options(NatsTransport::DEFAULT_PORT);

        assert_eq!(options.port, 4222);
    }
}
