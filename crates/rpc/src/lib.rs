//! Request/reply remote procedure calls over a publish/subscribe message bus.
//!
//! Every call gets its own pair of topics: a request topic made of a fresh
//! random segment and the method name, and a response topic derived from it.
//! Topic identity is the correlation key, so any number of calls can be in
//! flight at once without correlation identifiers or shared counters.
//!
//! The broker itself is abstracted behind [`Transport`]. Concrete transports
//! live in sibling crates (an in-process broker for tests and a NATS adapter).
//!
//! # Example
//!
//! ```no_run
//! use pubsub_rpc::{
//!     Args, FunctionRegistration, FunctionRegistry, HandlerError, ParamType, RpcClient,
//!     RpcOptions, RpcServer, RpcServerOptions, Transport,
//! };
//! use serde_json::{Value, json};
//! use tokio_util::sync::CancellationToken;
//!
//! async fn echo(args: Args) -> Result<Value, HandlerError> {
//!     let name: String = args.get(0)?;
//!     let n: i64 = args.get(1)?;
//!     Ok(json!(format!("{name}{n}")))
//! }
//!
//! async fn example<T: Transport>(server_transport: T, client_transport: T) -> pubsub_rpc::Result<()> {
//!     let registry = FunctionRegistry::new([FunctionRegistration::new(
//!         "echo",
//!         [ParamType::String, ParamType::Int],
//!         echo,
//!     )])?;
//!
//!     let shutdown = CancellationToken::new();
//!
//!     let server = RpcServer::new(server_transport, registry, RpcServerOptions::default())?;
//!     server.start(shutdown.clone());
//!
//!     let client = RpcClient::new(client_transport, RpcOptions::default());
//!     client.start(shutdown.clone());
//!     client.wait_connected(&shutdown).await;
//!
//!     let reply: String = client.call("echo", ("a", 2)).await?;
//!     assert_eq!(reply, "a2");
//!
//!     shutdown.cancel();
//!     Ok(())
//! }
//! ```
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

/// Client side: issues calls and awaits the correlated reply.
pub mod client;

/// Encoding of call arguments and response envelopes.
pub mod codec;

/// Error types.
pub mod error;

/// Connection and server options.
pub mod options;

/// Server-side function table and handler capability.
pub mod registry;

/// Server side: subscribes registered functions, dispatches and replies.
pub mod server;

/// Connect/reconnect lifecycle shared by client and server.
pub mod supervisor;

/// Per-call topic generation and request topic parsing.
pub mod topic;

/// The publish/subscribe collaborator the RPC layer runs on.
pub mod transport;

pub use client::RpcClient;
pub use codec::{IntoArgs, ParamType, ResponseEnvelope};
pub use error::{CodecError, DispatchError, Error, HandlerError, Result};
pub use options::{RpcOptions, RpcServerOptions};
pub use registry::{Args, FunctionRegistration, FunctionRegistry, RpcHandler};
pub use server::RpcServer;
pub use supervisor::{ConnectionState, ConnectionSupervisor};
pub use topic::{TopicGenerator, TopicPair};
pub use transport::{
    ConnectOptions, Credentials, DeliveryGuarantee, InboundMessage, MessageStream, Transport,
    TransportError,
};

// Re-export dependencies that are part of our public API
pub use bytes::Bytes;
pub use serde_json::Value;
pub use tokio_util::sync::CancellationToken;
