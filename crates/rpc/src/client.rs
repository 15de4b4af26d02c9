use crate::codec::{self, IntoArgs};
use crate::error::{Error, Result};
use crate::options::RpcOptions;
use crate::supervisor::{ConnectionState, ConnectionSupervisor};
use crate::topic::TopicGenerator;
use crate::transport::{DeliveryGuarantee, Transport};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use tokio::runtime::Handle;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::oneshot;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace};

type PendingMap = DashMap<String, oneshot::Sender<Result<Bytes>>>;

/// A registered call. Releases its slot and response subscription when the
/// caller stops waiting, whichever way that happens.
struct PendingCall<T>
where
    T: Transport,
{
    pending: Arc<PendingMap>,
    response_topic: String,
    tracker: TaskTracker,
    transport: T,
    released: bool,
}

impl<T> PendingCall<T>
where
    T: Transport,
{
    fn register(client: &RpcClient<T>, response_topic: &str) -> (Self, oneshot::Receiver<Result<Bytes>>) {
        let (sender, receiver) = oneshot::channel();
        client.pending.insert(response_topic.to_string(), sender);

        (
            Self {
                pending: client.pending.clone(),
                response_topic: response_topic.to_string(),
                tracker: client.tracker.clone(),
                transport: client.transport.clone(),
                released: false,
            },
            receiver,
        )
    }

    async fn release(mut self) {
        self.released = true;
        self.pending.remove(&self.response_topic);
        release_subscription(&self.transport, &self.response_topic).await;
    }
}

impl<T> Drop for PendingCall<T>
where
    T: Transport,
{
    fn drop(&mut self) {
        if self.released {
            return;
        }

        self.pending.remove(&self.response_topic);

        // The call future was dropped mid-wait; unsubscribe in the background.
        let Ok(handle) = Handle::try_current() else {
            return;
        };
        let transport = self.transport.clone();
        let response_topic = std::mem::take(&mut self.response_topic);
        self.tracker.spawn_on(
            async move { release_subscription(&transport, &response_topic).await },
            &handle,
        );
    }
}

async fn release_subscription<T: Transport>(transport: &T, response_topic: &str) {
    if let Err(e) = transport.unsubscribe(response_topic).await {
        debug!(error = %e, topic = %response_topic, "failed to release response subscription");
    }
}

fn fail_pending(pending: &PendingMap) {
    let topics: Vec<String> = pending.iter().map(|entry| entry.key().clone()).collect();

    for topic in topics {
        if let Some((_, sender)) = pending.remove(&topic) {
            let _ = sender.send(Err(Error::ConnectionLost));
        }
    }
}

/// Issues calls and awaits replies correlated by response topic.
#[derive(Clone, Debug)]
pub struct RpcClient<T>
where
    T: Transport,
{
    pending: Arc<PendingMap>,
    started: Arc<AtomicBool>,
    supervisor: ConnectionSupervisor<T>,
    topics: TopicGenerator,
    tracker: TaskTracker,
    transport: T,
}

impl<T> RpcClient<T>
where
    T: Transport,
{
    /// Creates a client. Call [`Self::start`] before issuing calls.
    pub fn new(transport: T, options: RpcOptions) -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            started: Arc::new(AtomicBool::new(false)),
            supervisor: ConnectionSupervisor::new(transport.clone(), &options),
            topics: TopicGenerator::with_reserved(T::RESERVED_CHARS),
            tracker: TaskTracker::new(),
            transport,
        }
    }

    /// Starts the connection supervisor and the reply router.
    ///
    /// Both stop when `shutdown` fires. Calling this more than once has no
    /// effect.
    pub fn start(&self, shutdown: CancellationToken) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let messages = self.transport.messages();
        let pending = self.pending.clone();
        let router_shutdown = shutdown.clone();
        self.tracker.spawn(async move {
            let mut messages = messages;
            loop {
                let message = tokio::select! {
                    () = router_shutdown.cancelled() => break,
                    message = messages.next() => match message {
                        Some(message) => message,
                        None => break,
                    },
                };

                if let Some((_, sender)) = pending.remove(&message.topic) {
                    let _ = sender.send(Ok(message.payload));
                } else {
                    trace!(topic = %message.topic, "no pending call for message");
                }
            }
            debug!("reply router stopped");
        });

        // Replies to in-flight calls cannot arrive once their subscriptions
        // are gone with the connection.
        let pending = self.pending.clone();
        let mut transitions = self.supervisor.subscribe_transitions();
        let transition_shutdown = shutdown.clone();
        self.tracker.spawn(async move {
            loop {
                let transition = tokio::select! {
                    () = transition_shutdown.cancelled() => break,
                    transition = transitions.recv() => transition,
                };

                match transition {
                    Ok(ConnectionState::Disconnected) | Err(RecvError::Lagged(_)) => {
                        fail_pending(&pending);
                    }
                    Ok(_) => {}
                    Err(RecvError::Closed) => break,
                }
            }
        });

        let supervisor = self.supervisor.clone();
        self.tracker
            .spawn(async move { supervisor.run(shutdown).await });
        self.tracker.close();

        info!(client_id = %self.supervisor.client_id(), "rpc client started");
    }

    /// Waits for all background tasks to finish after shutdown.
    pub async fn wait(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.supervisor.state()
    }

    /// Waits until connected or `cancel` fires. Returns `false` on cancellation.
    pub async fn wait_connected(&self, cancel: &CancellationToken) -> bool {
        self.supervisor.wait_connected(cancel).await
    }

    /// Waits until connected or the deadline passes.
    pub async fn wait_connected_timeout(&self, deadline: Duration) -> bool {
        self.supervisor.wait_connected_timeout(deadline).await
    }

    /// Calls `method` and waits for its reply.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMethodName`] before anything is published if
    /// the name is unusable, [`Error::RemoteInvocation`] if the server
    /// reported an error, [`Error::ResultConversion`] if the reply does not
    /// fit `R`, or a transport error.
    pub async fn call<R, A>(&self, method: &str, args: A) -> Result<R>
    where
        R: DeserializeOwned,
        A: IntoArgs,
    {
        self.call_inner(method, args, &CancellationToken::new(), None)
            .await
    }

    /// Like [`Self::call`], abandoning the wait when `cancel` fires.
    ///
    /// The request is not retracted; the server may still run it.
    ///
    /// # Errors
    ///
    /// As [`Self::call`], plus [`Error::Cancelled`].
    pub async fn call_with_cancellation<R, A>(
        &self,
        method: &str,
        args: A,
        cancel: &CancellationToken,
    ) -> Result<R>
    where
        R: DeserializeOwned,
        A: IntoArgs,
    {
        self.call_inner(method, args, cancel, None).await
    }

    /// Like [`Self::call`], abandoning the wait after `deadline`.
    ///
    /// # Errors
    ///
    /// As [`Self::call`], plus [`Error::Timeout`].
    pub async fn call_with_timeout<R, A>(&self, method: &str, args: A, deadline: Duration) -> Result<R>
    where
        R: DeserializeOwned,
        A: IntoArgs,
    {
        self.call_inner(method, args, &CancellationToken::new(), Some(deadline))
            .await
    }

    async fn call_inner<R, A>(
        &self,
        method: &str,
        args: A,
        cancel: &CancellationToken,
        deadline: Option<Duration>,
    ) -> Result<R>
    where
        R: DeserializeOwned,
        A: IntoArgs,
    {
        let topics = self.topics.create_topics(method)?;

        if !self.started.load(Ordering::SeqCst) {
            return Err(Error::NotStarted);
        }

        let payload = codec::encode_args(&args.into_args()?)?;

        let (slot, reply) = PendingCall::register(self, &topics.response_topic);

        let outcome = async {
            self.transport
                .subscribe(
                    &topics.response_topic,
                    DeliveryGuarantee::ExactlyOnce,
                    None,
                )
                .await
                .map_err(Error::transport)?;

            self.transport
                .publish(
                    &topics.request_topic,
                    Some(&topics.response_topic),
                    payload,
                    DeliveryGuarantee::ExactlyOnce,
                )
                .await
                .map_err(Error::transport)?;

            let expired = async {
                match deadline {
                    Some(deadline) => sleep(deadline).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                reply = reply => reply.unwrap_or(Err(Error::ChannelClosed)),
                () = cancel.cancelled() => Err(Error::Cancelled),
                () = expired => Err(Error::Timeout(deadline.unwrap_or_default())),
            }
        }
        .await;

        slot.release().await;

        let payload = outcome.inspect_err(|e| {
            if matches!(e, Error::Cancelled | Error::Timeout(_)) {
                debug!(method, request_topic = %topics.request_topic, "abandoned call: {e}");
            }
        })?;

        codec::decode_result(codec::decode_response(&payload)?)
    }
}
