use crate::options::RpcOptions;
use crate::transport::{ConnectOptions, Transport};

use std::sync::Arc;
use std::time::Duration;

use derive_more::Display;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Poll period of [`ConnectionSupervisor::wait_connected`].
pub const WAIT_CONNECTED_POLL: Duration = Duration::from_millis(100);

const TRANSITION_CAPACITY: usize = 64;

/// Connection lifecycle state. Only the supervisor writes it.
#[derive(Clone, Copy, Debug, Default, Display, Eq, Hash, PartialEq)]
pub enum ConnectionState {
    /// No live connection.
    #[default]
    Disconnected,

    /// A connect attempt is in flight.
    Connecting,

    /// Liveness check or connect succeeded.
    Connected,
}

/// Keeps a transport connected.
///
/// Every `reconnect_interval` the supervisor pings the transport and, if the
/// connection is not alive, attempts a connect bounded by
/// `reconnect_timeout`. Connect and ping failures are logged and retried on
/// the next tick at a fixed interval. The loop only ends on shutdown.
#[derive(Clone, Debug)]
pub struct ConnectionSupervisor<T>
where
    T: Transport,
{
    transport: T,
    connect_options: ConnectOptions,
    reconnect_interval: Duration,
    state: Arc<watch::Sender<ConnectionState>>,
    transitions: broadcast::Sender<ConnectionState>,
}

impl<T> ConnectionSupervisor<T>
where
    T: Transport,
{
    /// Creates a supervisor. Nothing happens until [`Self::start`].
    pub fn new(transport: T, options: &RpcOptions) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (transitions, _) = broadcast::channel(TRANSITION_CAPACITY);

        Self {
            transport,
            connect_options: options.connect_options(T::DEFAULT_PORT),
            reconnect_interval: options.reconnect_interval,
            state: Arc::new(state),
            transitions,
        }
    }

    /// The supervised transport.
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Client id presented to the broker.
    pub fn client_id(&self) -> &str {
        &self.connect_options.client_id
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver of the latest state. Transitions made in quick succession
    /// may be observed only as the last one.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Receiver of every state entered from now on, in order.
    pub fn subscribe_transitions(&self) -> broadcast::Receiver<ConnectionState> {
        self.transitions.subscribe()
    }

    /// Spawns the supervision loop.
    pub fn start(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let supervisor = self.clone();
        tokio::spawn(async move { supervisor.run(shutdown).await })
    }

    /// Runs the supervision loop until `shutdown` fires.
    ///
    /// An in-flight ping or connect is not interrupted; shutdown skips the
    /// next iteration.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(client_id = %self.client_id(), "connection supervisor started");

        while !shutdown.is_cancelled() {
            self.tick().await;

            tokio::select! {
                () = shutdown.cancelled() => break,
                () = sleep(self.reconnect_interval) => {}
            }
        }

        info!(client_id = %self.client_id(), "connection supervisor stopped");
    }

    async fn tick(&self) {
        if self.transport.ping().await {
            self.set_state(ConnectionState::Connected);
            return;
        }

        if self.state() == ConnectionState::Connected {
            self.set_state(ConnectionState::Disconnected);
        }
        self.set_state(ConnectionState::Connecting);

        match timeout(
            self.connect_options.timeout,
            self.transport.connect(&self.connect_options),
        )
        .await
        {
            Ok(Ok(())) => self.set_state(ConnectionState::Connected),
            Ok(Err(e)) => {
                debug!(error = %e, host = %self.connect_options.host, "connect attempt failed");
                self.set_state(ConnectionState::Disconnected);
            }
            Err(_) => {
                debug!(
                    timeout = ?self.connect_options.timeout,
                    host = %self.connect_options.host,
                    "connect attempt timed out"
                );
                self.set_state(ConnectionState::Disconnected);
            }
        }
    }

    fn set_state(&self, next: ConnectionState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }

            info!(from = %current, to = %next, client_id = %self.connect_options.client_id, "connection state changed");
            *current = next;
            true
        });

        if changed {
            // Nobody listening is fine.
            let _ = self.transitions.send(next);
        }
    }

    /// Polls liveness every 100ms until connected or `cancel` fires.
    ///
    /// Does not connect by itself; relies on the running supervision loop.
    /// Returns `false` on cancellation.
    pub async fn wait_connected(&self, cancel: &CancellationToken) -> bool {
        loop {
            if self.transport.ping().await {
                return true;
            }

            tokio::select! {
                () = cancel.cancelled() => return false,
                () = sleep(WAIT_CONNECTED_POLL) => {}
            }
        }
    }

    /// Like [`Self::wait_connected`] with a deadline instead of a token.
    pub async fn wait_connected_timeout(&self, deadline: Duration) -> bool {
        let cancel = CancellationToken::new();

        tokio::select! {
            connected = self.wait_connected(&cancel) => connected,
            () = sleep(deadline) => false,
        }
    }
}
