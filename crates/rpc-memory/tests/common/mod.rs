#![allow(dead_code)]

use std::time::Duration;

use pubsub_rpc::{
    Args, FunctionRegistration, FunctionRegistry, HandlerError, ParamType, RpcClient, RpcOptions,
    RpcServer, RpcServerOptions, Value,
};
use pubsub_rpc_memory::{MemoryBroker, MemoryTransport};
use serde_json::json;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

pub const STEP: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn options(client_id: &str) -> RpcOptions {
    RpcOptions {
        client_id: Some(client_id.to_string()),
        reconnect_interval: Duration::from_millis(50),
        reconnect_timeout: Duration::from_millis(500),
        ..RpcOptions::new("memory")
    }
}

pub async fn echo(args: Args) -> Result<Value, HandlerError> {
    let name: String = args.get(0)?;
    let n: i64 = args.get(1)?;
    Ok(json!(format!("{name}{n}")))
}

pub async fn z1(args: Args) -> Result<Value, HandlerError> {
    Ok(args.value(2).cloned().unwrap_or(Value::Null))
}

pub async fn fail(_: Args) -> Result<Value, HandlerError> {
    Err(HandlerError::new("boom"))
}

/// Replies later the smaller the argument is.
pub async fn slow(args: Args) -> Result<Value, HandlerError> {
    let n: u64 = args.get(0)?;
    sleep(Duration::from_millis(30 * (5 - n.min(5)))).await;
    Ok(json!(n))
}

pub async fn hang(_: Args) -> Result<Value, HandlerError> {
    sleep(Duration::from_secs(60)).await;
    Ok(Value::Null)
}

pub fn demo_registry() -> FunctionRegistry {
    FunctionRegistry::new([
        FunctionRegistration::new("echo", [ParamType::String, ParamType::Int], echo),
        FunctionRegistration::new(
            "z1",
            [ParamType::String, ParamType::Int, ParamType::Object],
            z1,
        )
        .shared(true),
        FunctionRegistration::new("fail", [], fail),
        FunctionRegistration::new("slow", [ParamType::Int], slow),
        FunctionRegistration::new("hang", [], hang),
    ])
    .unwrap()
}

pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(STEP, async {
        while !condition() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

pub async fn start_server(
    broker: &MemoryBroker,
    registry: FunctionRegistry,
    shutdown: &CancellationToken,
) -> (RpcServer<MemoryTransport>, MemoryTransport) {
    let transport = broker.transport();
    let functions = registry.len();
    let server = RpcServer::new(
        transport.clone(),
        registry,
        RpcServerOptions::from(options("server")),
    )
    .unwrap();

    server.start(shutdown.clone());
    wait_until(|| transport.subscription_count() == functions).await;

    (server, transport)
}

pub async fn start_client(
    broker: &MemoryBroker,
    shutdown: &CancellationToken,
) -> RpcClient<MemoryTransport> {
    start_client_with_transport(broker, shutdown).await.0
}

pub async fn start_client_with_transport(
    broker: &MemoryBroker,
    shutdown: &CancellationToken,
) -> (RpcClient<MemoryTransport>, MemoryTransport) {
    let transport = broker.transport();
    let client = RpcClient::new(transport.clone(), options("client"));
    client.start(shutdown.clone());
    assert!(client.wait_connected_timeout(STEP).await);
    (client, transport)
}
