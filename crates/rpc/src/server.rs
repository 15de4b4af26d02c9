use crate::codec::{self, ResponseEnvelope};
use crate::error::{DispatchError, Result};
use crate::options::RpcServerOptions;
use crate::registry::{Args, FunctionRegistry};
use crate::supervisor::{ConnectionState, ConnectionSupervisor};
use crate::topic;
use crate::transport::{DeliveryGuarantee, InboundMessage, Transport};

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::{FutureExt, StreamExt};
use serde_json::Value;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

const FALLBACK_RESPONSE: &[u8] = br#"{"Error":"failed to encode response","Data":null}"#;

/// Subscribes every registered function and answers calls.
#[derive(Clone, Debug)]
pub struct RpcServer<T>
where
    T: Transport,
{
    options: RpcServerOptions,
    registry: Arc<FunctionRegistry>,
    started: Arc<AtomicBool>,
    supervisor: ConnectionSupervisor<T>,
    tracker: TaskTracker,
    transport: T,
}

impl<T> RpcServer<T>
where
    T: Transport,
{
    /// Creates a server for the given function table.
    ///
    /// # Errors
    ///
    /// Returns an error if a function name contains a character the
    /// transport reserves.
    pub fn new(transport: T, registry: FunctionRegistry, options: RpcServerOptions) -> Result<Self> {
        for registration in registry.iter() {
            topic::validate_name(registration.name(), T::RESERVED_CHARS)?;
        }

        Ok(Self {
            supervisor: ConnectionSupervisor::new(transport.clone(), &options.rpc),
            options,
            registry: Arc::new(registry),
            started: Arc::new(AtomicBool::new(false)),
            tracker: TaskTracker::new(),
            transport,
        })
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.supervisor.state()
    }

    /// The function table.
    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    /// Starts dispatching, subscription upkeep and the connection supervisor.
    ///
    /// Calling this more than once has no effect.
    pub fn start(&self, shutdown: CancellationToken) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let server = self.clone();
        let dispatch_shutdown = shutdown.clone();
        let messages = self.transport.messages();
        self.tracker.spawn(async move {
            let mut messages = messages;
            loop {
                let message = tokio::select! {
                    () = dispatch_shutdown.cancelled() => break,
                    message = messages.next() => match message {
                        Some(message) => message,
                        None => break,
                    },
                };

                if topic::is_response_topic(&message.topic) {
                    continue;
                }

                let handler = server.clone();
                server
                    .tracker
                    .spawn(async move { handler.handle_message(message).await });
            }
            debug!("dispatch loop stopped");
        });

        let server = self.clone();
        let subscription_shutdown = shutdown.clone();
        self.tracker
            .spawn(async move { server.maintain_subscriptions(subscription_shutdown).await });

        let supervisor = self.supervisor.clone();
        self.tracker
            .spawn(async move { supervisor.run(shutdown).await });

        info!(
            client_id = %self.supervisor.client_id(),
            functions = self.registry.len(),
            "rpc server started"
        );
    }

    /// Starts the server and returns once `shutdown` fired and in-flight
    /// calls have been answered.
    pub async fn run(&self, shutdown: CancellationToken) {
        self.start(shutdown.clone());
        shutdown.cancelled().await;
        self.wait().await;
    }

    /// Waits for background tasks to finish after shutdown.
    pub async fn wait(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }

    /// Waits until connected or `cancel` fires. Returns `false` on cancellation.
    pub async fn wait_connected(&self, cancel: &CancellationToken) -> bool {
        self.supervisor.wait_connected(cancel).await
    }

    /// Waits until connected or the deadline passes.
    pub async fn wait_connected_timeout(&self, deadline: Duration) -> bool {
        self.supervisor.wait_connected_timeout(deadline).await
    }

    /// Subscribes every registration each time the connection is
    /// (re)established, since subscriptions do not survive a reconnect.
    async fn maintain_subscriptions(&self, shutdown: CancellationToken) {
        let mut state = self.supervisor.subscribe_state();

        loop {
            let connected = *state.borrow_and_update() == ConnectionState::Connected;

            if connected && !self.subscribe_all().await {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    () = sleep(self.options.rpc.reconnect_interval) => continue,
                }
            }

            tokio::select! {
                () = shutdown.cancelled() => break,
                changed = state.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
    }

    async fn subscribe_all(&self) -> bool {
        let mut complete = true;

        for registration in self.registry.iter() {
            let filter = topic::request_filter(registration.name());
            let group = registration
                .is_shared()
                .then_some(self.options.share_group.as_str());

            match self
                .transport
                .subscribe(&filter, DeliveryGuarantee::ExactlyOnce, group)
                .await
            {
                Ok(()) => debug!(%filter, ?group, "subscribed"),
                Err(e) => {
                    warn!(error = %e, %filter, "failed to subscribe");
                    complete = false;
                }
            }
        }

        complete
    }

    async fn handle_message(&self, message: InboundMessage) {
        let payload = dispatch(&self.registry, &message).await;

        let Some(response_topic) = message.response_topic else {
            warn!(topic = %message.topic, "request without response topic, reply dropped");
            return;
        };

        if let Err(e) = self
            .transport
            .publish(
                &response_topic,
                None,
                payload,
                DeliveryGuarantee::ExactlyOnce,
            )
            .await
        {
            error!(error = %e, %response_topic, "failed to publish response");
        }
    }
}

/// Produces the response payload for one inbound request.
///
/// Every failure (unknown function, bad arguments, handler error or panic)
/// becomes the envelope's error message; this never fails.
pub async fn dispatch(registry: &FunctionRegistry, message: &InboundMessage) -> Bytes {
    let envelope = match invoke(registry, message).await {
        Ok(data) => ResponseEnvelope::success(data),
        Err(e) => {
            warn!(topic = %message.topic, error = %e, "call failed");
            ResponseEnvelope::failure(e.to_string())
        }
    };

    codec::encode_response(&envelope).unwrap_or_else(|e| {
        error!(error = %e, "failed to encode response");
        Bytes::from_static(FALLBACK_RESPONSE)
    })
}

async fn invoke(
    registry: &FunctionRegistry,
    message: &InboundMessage,
) -> std::result::Result<Value, DispatchError> {
    let request = topic::parse_request_topic(&message.topic)
        .ok_or_else(|| DispatchError::InvalidTopic(message.topic.clone()))?;

    debug!(function = request.function, caller = ?request.caller, "dispatching call");

    let registration = registry.lookup(request.function)?;
    let args = codec::decode_args(&message.payload, registration.params())?;

    AssertUnwindSafe(registration.invoke(Args::new(args)))
        .catch_unwind()
        .await
        .map_err(|_| DispatchError::Panicked)?
        .map_err(DispatchError::from)
}
