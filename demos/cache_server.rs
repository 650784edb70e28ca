//! Cache-backed MCP server exposing `get`, `set` and `delete`.
//!
//! With `TRANSPORT=stdio` (the default) the server answers JSON-RPC lines on
//! stdin/stdout until stdin closes. With `TRANSPORT=momento` it serves over
//! an in-process topic bus and drives a client against it.
use std::sync::mpsc::channel;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use topic_mcp::cache::MemoryCache;
use topic_mcp::config::{Config, ConfigError, TransportKind, ENV_CACHE_NAME};
use topic_mcp::pubsub::MemoryTopicBus;
use topic_mcp::server::{register_cache_tools, CacheTarget};
use topic_mcp::transport::{StdioTransport, Transport, CLIENT_TOPIC, SERVER_TOPIC};
use topic_mcp::{CancellationToken, McpClient, McpError, McpServer, TopicTransport};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const SERVER_NAME: &str = "cache-server";
const DEMO_CACHE: &str = "mcp-demo";

fn main() -> Result<(), McpError> {
    // stdout carries the protocol, logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(ConfigError::Missing(name)) if name == ENV_CACHE_NAME => {
            warn!("{} not set, using '{}'", ENV_CACHE_NAME, DEMO_CACHE);
            Config::from_lookup(|key| match key {
                ENV_CACHE_NAME => Some(DEMO_CACHE.to_string()),
                _ => std::env::var(key).ok(),
            })?
        }
        Err(e) => return Err(e.into()),
    };

    let target = CacheTarget::new(
        Arc::new(MemoryCache::new(config.default_ttl)),
        config.cache_name.clone(),
    );

    match config.transport {
        TransportKind::Stdio => serve_stdio(target),
        TransportKind::Topic => run_over_topics(&config, target),
    }
}

fn serve_stdio(target: CacheTarget) -> Result<(), McpError> {
    let server = McpServer::new(SERVER_NAME, env!("CARGO_PKG_VERSION"), StdioTransport::new());
    register_cache_tools(&server, target)?;

    let (done_tx, done_rx) = channel();
    server.transport().set_close_handler(Arc::new(move || {
        let _ = done_tx.send(());
    }));

    server.serve(&CancellationToken::new())?;
    info!("Serving over stdio");
    // Wait for stdin to close
    let _ = done_rx.recv();
    Ok(())
}

fn run_over_topics(config: &Config, target: CacheTarget) -> Result<(), McpError> {
    let bus = MemoryTopicBus::new();
    let ctx = CancellationToken::new();

    let server = McpServer::new(
        SERVER_NAME,
        env!("CARGO_PKG_VERSION"),
        TopicTransport::server(bus.client(), config.cache_name.as_str()),
    );
    register_cache_tools(&server, target)?;
    server.serve(&ctx)?;

    let client = McpClient::new(TopicTransport::client(bus.client(), config.cache_name.as_str()))
        .with_timeout(config.request_timeout)
        .with_context(ctx.clone());
    client.connect()?;

    for topic in [SERVER_TOPIC, CLIENT_TOPIC] {
        if !bus.wait_for_subscribers(&config.cache_name, topic, 1, Duration::from_secs(5)) {
            warn!("No subscriber on {} yet", topic);
        }
    }

    let init = client.initialize()?;
    info!(
        "Connected to {} {}",
        init.server_info.name, init.server_info.version
    );

    for tool in client.list_tools()?.tools {
        println!("{}: {}", tool.name, tool.description.unwrap_or_default());
    }

    client.call_tool(
        "set",
        Some(json!({"key": "greeting", "value": "hello world", "ttl": 60})),
    )?;
    let value = client.call_tool("get", Some(json!({"key": "greeting"})))?;
    println!("greeting = {}", value.text_content());

    client.stop()?;
    server.close()?;
    ctx.cancel();
    Ok(())
}
