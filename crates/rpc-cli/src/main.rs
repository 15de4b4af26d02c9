//! Demo binary: serve RPC functions or call them over NATS.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::time::Duration;

use clap::{Parser, Subcommand};
use pubsub_rpc::{
    Args as CallArgs, FunctionRegistration, FunctionRegistry, HandlerError, ParamType, RpcClient,
    RpcOptions, RpcServer, RpcServerOptions, Transport, Value,
};
use pubsub_rpc_nats::NatsTransport;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// CLI-specific error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// RPC library error
    #[error(transparent)]
    Rpc(#[from] pubsub_rpc::Error),

    /// Result could not be printed
    #[error("failed to format result: {0}")]
    Json(#[from] serde_json::Error),

    /// Broker never became reachable
    #[error("could not connect to {0}")]
    NotConnected(String),
}

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Broker host
    #[arg(long, default_value = "localhost", env = "PUBSUB_RPC_HOST")]
    host: String,

    /// Broker port, the NATS default when absent
    #[arg(long, env = "PUBSUB_RPC_PORT")]
    port: Option<u16>,

    /// Broker username
    #[arg(long, default_value = "", env = "PUBSUB_RPC_USERNAME")]
    username: String,

    /// Broker password
    #[arg(long, default_value = "", env = "PUBSUB_RPC_PASSWORD")]
    password: String,

    /// Client id, generated from the process name when absent
    #[arg(long, env = "PUBSUB_RPC_CLIENT_ID")]
    client_id: Option<String>,

    /// Milliseconds between liveness checks
    #[arg(long, default_value_t = 1000, env = "PUBSUB_RPC_RECONNECT_INTERVAL_MS")]
    reconnect_interval_ms: u64,

    /// Milliseconds allowed for a single connect attempt
    #[arg(long, default_value_t = 30_000, env = "PUBSUB_RPC_RECONNECT_TIMEOUT_MS")]
    reconnect_timeout_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Debug, Subcommand)]
enum Command {
    /// Serve the demo functions until interrupted
    Serve {
        /// Group key for grouped functions
        #[arg(long, default_value = pubsub_rpc::options::DEFAULT_SHARE_GROUP, env = "PUBSUB_RPC_SHARE_GROUP")]
        share_group: String,
    },

    /// Call a function and print its JSON result
    Call {
        /// Function name
        method: String,

        /// Arguments, parsed as JSON and falling back to plain strings
        args: Vec<String>,

        /// Milliseconds to wait for the connection and again for the reply
        #[arg(long, default_value_t = 10_000)]
        timeout_ms: u64,
    },
}

impl Args {
    fn rpc_options(&self) -> RpcOptions {
        RpcOptions {
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            password: self.password.clone(),
            client_id: self.client_id.clone(),
            reconnect_interval: Duration::from_millis(self.reconnect_interval_ms),
            reconnect_timeout: Duration::from_millis(self.reconnect_timeout_ms),
        }
    }
}

async fn echo(args: CallArgs) -> Result<Value, HandlerError> {
    let name: String = args.get(0)?;
    let n: i64 = args.get(1)?;
    Ok(json!(format!("{name}{n}")))
}

async fn z1(args: CallArgs) -> Result<Value, HandlerError> {
    let a1: String = args.get(0)?;
    let a2: i64 = args.get(1)?;
    info!(%a1, a2, "z1 called");
    Ok(args.value(2).cloned().unwrap_or(Value::Null))
}

fn demo_registry() -> pubsub_rpc::Result<FunctionRegistry> {
    FunctionRegistry::new([
        FunctionRegistration::new("echo", [ParamType::String, ParamType::Int], echo),
        FunctionRegistration::new(
            "z1",
            [ParamType::String, ParamType::Int, ParamType::Object],
            z1,
        )
        .shared(true),
    ])
}

fn parse_arg(raw: String) -> Value {
    serde_json::from_str(&raw).unwrap_or(Value::String(raw))
}

async fn serve(options: RpcServerOptions, shutdown: CancellationToken) -> Result<(), Error> {
    let server = RpcServer::new(NatsTransport::new(), demo_registry()?, options)?;
    server.run(shutdown).await;
    Ok(())
}

async fn call(
    options: RpcOptions,
    method: &str,
    args: Vec<String>,
    deadline: Duration,
    shutdown: CancellationToken,
) -> Result<(), Error> {
    let host = format!(
        "{}:{}",
        options.host,
        options.port.unwrap_or(NatsTransport::DEFAULT_PORT)
    );
    let client = RpcClient::new(NatsTransport::new(), options);
    client.start(shutdown.clone());

    let outcome = async {
        if !client.wait_connected_timeout(deadline).await {
            return Err(Error::NotConnected(host));
        }

        let args: Vec<Value> = args.into_iter().map(parse_arg).collect();
        let reply: Value = client.call_with_timeout(method, args, deadline).await?;
        println!("{}", serde_json::to_string_pretty(&reply)?);
        Ok::<(), Error>(())
    }
    .await;

    shutdown.cancel();
    client.wait().await;
    outcome
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let options = args.rpc_options();

    let shutdown_token = CancellationToken::new();

    let signal_shutdown_token = shutdown_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received interrupt signal");
        }
        signal_shutdown_token.cancel();
    });

    match args.command {
        Command::Serve { share_group } => {
            serve(
                RpcServerOptions {
                    rpc: options,
                    share_group,
                },
                shutdown_token,
            )
            .await
        }
        Command::Call {
            method,
            args,
            timeout_ms,
        } => {
            call(
                options,
                &method,
                args,
                Duration::from_millis(timeout_ms),
                shutdown_token,
            )
            .await
        }
    }
}
