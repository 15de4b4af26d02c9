//! In-process broker and transport for the RPC layer.
//!
//! Every [`MemoryBroker`] is independent, so tests can run in parallel
//! without shared state.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod broker;
mod error;
mod filter;
mod transport;

pub use broker::MemoryBroker;
pub use error::Error;
pub use filter::matches;
pub use transport::MemoryTransport;

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use bytes::Bytes;
    use pubsub_rpc::{ConnectOptions, DeliveryGuarantee, InboundMessage, Transport};
    use tokio::time::timeout;
    use tokio_stream::StreamExt;

    fn connect_options(client_id: &str) -> ConnectOptions {
        ConnectOptions {
            host: "localhost".to_string(),
            port: 1883,
            credentials: None,
            client_id: client_id.to_string(),
            timeout: Duration::from_millis(200),
        }
    }

    async fn connected(broker: &MemoryBroker, client_id: &str) -> MemoryTransport {
        let transport = broker.transport();
        transport.connect(&connect_options(client_id)).await.unwrap();
        transport
    }

    async fn publish(transport: &MemoryTransport, topic: &str) {
        transport
            .publish(
                topic,
                None,
                Bytes::from_static(b"x"),
                DeliveryGuarantee::ExactlyOnce,
            )
            .await
            .unwrap();
    }

    async fn next(stream: &mut pubsub_rpc::MessageStream) -> Option<InboundMessage> {
        timeout(Duration::from_millis(100), stream.next())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn test_publish_requires_connection() {
        let broker = MemoryBroker::new();
        let transport = broker.transport();

        let result = transport
            .publish("a/b", None, Bytes::new(), DeliveryGuarantee::ExactlyOnce)
            .await;

        assert_eq!(result, Err(Error::NotConnected));
        assert!(!transport.ping().await);
    }

    #[tokio::test]
    async fn test_subscriber_receives_message_with_response_topic() {
        let broker = MemoryBroker::new();
        let publisher = connected(&broker, "publisher").await;
        let subscriber = connected(&broker, "subscriber").await;
        let mut messages = subscriber.messages();

        subscriber
            .subscribe("+/echo", DeliveryGuarantee::ExactlyOnce, None)
            .await
            .unwrap();
        publisher
            .publish(
                "abc/echo",
                Some("abc/echo/response"),
                Bytes::from_static(b"[]"),
                DeliveryGuarantee::ExactlyOnce,
            )
            .await
            .unwrap();

        let message = next(&mut messages).await.unwrap();
        assert_eq!(message.topic, "abc/echo");
        assert_eq!(message.response_topic.as_deref(), Some("abc/echo/response"));
        assert_eq!(&message.payload[..], b"[]");
    }

    #[tokio::test]
    async fn test_overlapping_filters_deliver_once() {
        let broker = MemoryBroker::new();
        let transport = connected(&broker, "solo").await;
        let mut messages = transport.messages();

        transport
            .subscribe("a/+", DeliveryGuarantee::ExactlyOnce, None)
            .await
            .unwrap();
        transport
            .subscribe("a/#", DeliveryGuarantee::ExactlyOnce, None)
            .await
            .unwrap();
        publish(&transport, "a/b").await;

        assert!(next(&mut messages).await.is_some());
        assert!(next(&mut messages).await.is_none());
    }

    #[tokio::test]
    async fn test_group_members_take_turns() {
        let broker = MemoryBroker::new();
        let first = connected(&broker, "first").await;
        let second = connected(&broker, "second").await;
        let mut first_messages = first.messages();
        let mut second_messages = second.messages();

        for member in [&first, &second] {
            member
                .subscribe("+/work", DeliveryGuarantee::ExactlyOnce, Some("workers"))
                .await
                .unwrap();
        }

        publish(&first, "1/work").await;
        publish(&first, "2/work").await;

        assert_eq!(next(&mut first_messages).await.unwrap().topic, "1/work");
        assert_eq!(next(&mut second_messages).await.unwrap().topic, "2/work");
        assert!(next(&mut first_messages).await.is_none());
        assert!(next(&mut second_messages).await.is_none());
    }

    #[tokio::test]
    async fn test_reconnect_starts_clean_session() {
        let broker = MemoryBroker::new();
        let transport = connected(&broker, "client").await;

        transport
            .subscribe("a/b", DeliveryGuarantee::ExactlyOnce, None)
            .await
            .unwrap();
        assert_eq!(transport.subscription_count(), 1);

        transport.connect(&connect_options("client")).await.unwrap();
        assert_eq!(transport.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_offline_broker_drops_connections() {
        let broker = MemoryBroker::new();
        let transport = connected(&broker, "client").await;
        assert_eq!(broker.connected_clients(), vec!["client".to_string()]);

        broker.set_online(false);

        assert!(!transport.ping().await);
        assert_eq!(
            transport.connect(&connect_options("client")).await,
            Err(Error::BrokerUnavailable)
        );

        broker.set_online(true);
        transport.connect(&connect_options("client")).await.unwrap();
        assert!(transport.ping().await);
    }

    #[tokio::test]
    async fn test_drop_connection_affects_one_endpoint() {
        let broker = MemoryBroker::new();
        let first = connected(&broker, "first").await;
        let second = connected(&broker, "second").await;

        first.drop_connection();

        assert!(!first.ping().await);
        assert!(second.ping().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_broker_times_out_connect() {
        let broker = MemoryBroker::new();
        let transport = broker.transport();

        broker.set_connect_delay(Duration::from_secs(5));

        assert_eq!(
            transport.connect(&connect_options("client")).await,
            Err(Error::ConnectTimeout)
        );
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_dropped_transport_leaves_broker() {
        let broker = MemoryBroker::new();
        let transport = connected(&broker, "client").await;
        let clone = transport.clone();

        drop(transport);
        assert_eq!(broker.connected_clients().len(), 1);

        drop(clone);
        assert!(broker.connected_clients().is_empty());
    }
}
