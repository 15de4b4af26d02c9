use crate::error::Error;
use crate::filter;
use crate::transport::MemoryTransport;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use pubsub_rpc::{ConnectOptions, InboundMessage};
use tokio::sync::broadcast;
use tokio::time::sleep;
use tracing::{debug, info};

const INBOUND_CAPACITY: usize = 1024;

#[derive(Debug)]
struct Subscription {
    filter: String,
    group: Option<String>,
}

/// One connection slot on the broker.
#[derive(Debug)]
pub struct Endpoint {
    id: u64,
    client_id: Mutex<Option<String>>,
    connected: AtomicBool,
    subscriptions: Mutex<Vec<Subscription>>,
    inbound: broadcast::Sender<InboundMessage>,
}

impl Endpoint {
    fn new(id: u64) -> Self {
        let (inbound, _) = broadcast::channel(INBOUND_CAPACITY);

        Self {
            id,
            client_id: Mutex::new(None),
            connected: AtomicBool::new(false),
            subscriptions: Mutex::new(Vec::new()),
            inbound,
        }
    }

    pub const fn id(&self) -> u64 {
        self.id
    }

    pub fn client_id(&self) -> Option<String> {
        self.client_id.lock().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn inbound(&self) -> broadcast::Receiver<InboundMessage> {
        self.inbound.subscribe()
    }

    pub fn subscribe(&self, filter: &str, group: Option<&str>) -> Result<(), Error> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }

        let mut subscriptions = self.subscriptions.lock();
        subscriptions.retain(|subscription| subscription.filter != filter);
        subscriptions.push(Subscription {
            filter: filter.to_string(),
            group: group.map(str::to_string),
        });
        drop(subscriptions);

        Ok(())
    }

    pub fn unsubscribe(&self, filter: &str) -> Result<(), Error> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }

        self.subscriptions
            .lock()
            .retain(|subscription| subscription.filter != filter);

        Ok(())
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    // Clean session: a new connection starts with no subscriptions.
    fn connect(&self, client_id: &str) {
        self.subscriptions.lock().clear();
        *self.client_id.lock() = Some(client_id.to_string());
        self.connected.store(true, Ordering::SeqCst);
    }

    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.subscriptions.lock().clear();
    }
}

#[derive(Debug)]
struct BrokerInner {
    online: AtomicBool,
    connect_delay: Mutex<Duration>,
    endpoints: DashMap<u64, Arc<Endpoint>>,
    next_endpoint_id: AtomicU64,
    group_cursors: DashMap<(String, String), usize>,
}

/// An in-process publish/subscribe broker.
///
/// Topic filters follow MQTT rules. Grouped subscriptions sharing a group key
/// and filter receive each message once between them, round-robin. Faults can
/// be injected with [`MemoryBroker::set_online`],
/// [`MemoryBroker::set_connect_delay`] and [`MemoryTransport::drop_connection`].
#[derive(Clone, Debug)]
pub struct MemoryBroker {
    inner: Arc<BrokerInner>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    /// Creates an online broker with no endpoints.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                online: AtomicBool::new(true),
                connect_delay: Mutex::new(Duration::ZERO),
                endpoints: DashMap::new(),
                next_endpoint_id: AtomicU64::new(0),
                group_cursors: DashMap::new(),
            }),
        }
    }

    /// Creates a transport with its own, initially disconnected, endpoint.
    #[must_use]
    pub fn transport(&self) -> MemoryTransport {
        let id = self.inner.next_endpoint_id.fetch_add(1, Ordering::SeqCst);
        let endpoint = Arc::new(Endpoint::new(id));
        self.inner.endpoints.insert(id, endpoint.clone());

        MemoryTransport::new(self.clone(), endpoint)
    }

    /// Whether the broker accepts connections.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    /// Takes the broker offline or back online. Going offline drops every
    /// connection.
    pub fn set_online(&self, online: bool) {
        self.inner.online.store(online, Ordering::SeqCst);

        if !online {
            for endpoint in &self.inner.endpoints {
                endpoint.disconnect();
            }
        }

        info!(online, "memory broker availability changed");
    }

    /// Delays every subsequent connect by `delay`. A delay longer than the
    /// connect timeout makes the connect fail with [`Error::ConnectTimeout`].
    pub fn set_connect_delay(&self, delay: Duration) {
        *self.inner.connect_delay.lock() = delay;
    }

    /// Client ids of the currently connected endpoints.
    #[must_use]
    pub fn connected_clients(&self) -> Vec<String> {
        self.inner
            .endpoints
            .iter()
            .filter(|endpoint| endpoint.is_connected())
            .filter_map(|endpoint| endpoint.client_id())
            .collect()
    }

    pub(crate) async fn connect(
        &self,
        endpoint: &Endpoint,
        options: &ConnectOptions,
    ) -> Result<(), Error> {
        let delay = *self.inner.connect_delay.lock();

        if delay > options.timeout {
            sleep(options.timeout).await;
            return Err(Error::ConnectTimeout);
        }

        if !delay.is_zero() {
            sleep(delay).await;
        }

        if !self.is_online() {
            return Err(Error::BrokerUnavailable);
        }

        endpoint.connect(&options.client_id);
        debug!(client_id = %options.client_id, "endpoint connected");

        Ok(())
    }

    pub(crate) fn release(&self, id: u64) {
        self.inner.endpoints.remove(&id);
    }

    /// Routes a message to every connected endpoint with a matching
    /// subscription. Returns the number of endpoints it was delivered to.
    pub(crate) fn route(&self, message: &InboundMessage) -> usize {
        let mut endpoints: Vec<Arc<Endpoint>> = self
            .inner
            .endpoints
            .iter()
            .filter(|endpoint| endpoint.is_connected())
            .map(|endpoint| endpoint.value().clone())
            .collect();
        endpoints.sort_by_key(|endpoint| endpoint.id);

        let mut recipients = BTreeSet::new();
        let mut groups: BTreeMap<(String, String), Vec<u64>> = BTreeMap::new();

        for endpoint in &endpoints {
            for subscription in endpoint.subscriptions.lock().iter() {
                if !filter::matches(&subscription.filter, &message.topic) {
                    continue;
                }

                match &subscription.group {
                    None => {
                        recipients.insert(endpoint.id);
                    }
                    Some(group) => groups
                        .entry((group.clone(), subscription.filter.clone()))
                        .or_default()
                        .push(endpoint.id),
                }
            }
        }

        for (key, members) in groups {
            let mut cursor = self.inner.group_cursors.entry(key).or_insert(0);
            if let Some(member) = members.get(*cursor % members.len()) {
                recipients.insert(*member);
            }
            *cursor = cursor.wrapping_add(1);
        }

        for endpoint in endpoints
            .iter()
            .filter(|endpoint| recipients.contains(&endpoint.id))
        {
            // No live receiver only means nobody is reading yet.
            let _ = endpoint.inbound.send(message.clone());
        }

        recipients.len()
    }
}
