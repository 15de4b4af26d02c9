use crate::transport::{ConnectOptions, Credentials};

use std::time::Duration;

use uuid::Uuid;

/// Default group key for grouped (load-balanced) subscriptions.
pub const DEFAULT_SHARE_GROUP: &str = "pubsub-rpc";

/// Connection options shared by client and server.
#[derive(Clone, Debug)]
pub struct RpcOptions {
    /// Broker host.
    pub host: String,

    /// Broker port. Falls back to the transport's default port when `None`.
    pub port: Option<u16>,

    /// Username. Credentials are omitted when empty.
    pub username: String,

    /// Password.
    pub password: String,

    /// Client identifier. Generated from the process name when `None`.
    pub client_id: Option<String>,

    /// Time between liveness checks.
    pub reconnect_interval: Duration,

    /// Upper bound for a single connect attempt.
    pub reconnect_timeout: Duration,
}

impl RpcOptions {
    /// Options for the given host with every other field defaulted.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    /// Builds the transport connect options, using `default_port` when no
    /// port is configured.
    ///
    /// A missing client id is generated here, so call this once per
    /// connection owner.
    #[must_use]
    pub fn connect_options(&self, default_port: u16) -> ConnectOptions {
        let credentials = (!self.username.is_empty()).then(|| Credentials {
            username: self.username.clone(),
            password: self.password.clone(),
        });

        ConnectOptions {
            host: self.host.clone(),
            port: self.port.unwrap_or(default_port),
            credentials,
            client_id: self
                .client_id
                .clone()
                .filter(|id| !id.is_empty())
                .unwrap_or_else(default_client_id),
            timeout: self.reconnect_timeout,
        }
    }
}

impl Default for RpcOptions {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: None,
            username: String::new(),
            password: String::new(),
            client_id: None,
            reconnect_interval: Duration::from_secs(1),
            reconnect_timeout: Duration::from_secs(30),
        }
    }
}

/// Server options.
#[derive(Clone, Debug)]
pub struct RpcServerOptions {
    /// Connection options.
    pub rpc: RpcOptions,

    /// Group key used for functions registered in grouped mode.
    pub share_group: String,
}

impl Default for RpcServerOptions {
    fn default() -> Self {
        Self {
            rpc: RpcOptions::default(),
            share_group: DEFAULT_SHARE_GROUP.to_string(),
        }
    }
}

impl From<RpcOptions> for RpcServerOptions {
    fn from(rpc: RpcOptions) -> Self {
        Self {
            rpc,
            ..Self::default()
        }
    }
}

/// `<process name>-<uuid>`.
#[must_use]
pub fn default_client_id() -> String {
    let process = std::env::current_exe()
        .ok()
        .and_then(|path| {
            path.file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| "pubsub-rpc".to_string());

    format!("{process}-{}", Uuid::new_v4())
}
