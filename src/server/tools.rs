//! The cache tools: `get`, `set` and `delete` against one cache.
use crate::cache::CacheClient;
use crate::server::{McpServer, McpTool};
use crate::transport::Transport;
use crate::types::{CallToolResponse, McpError};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Deserialize)]
pub struct GetArgs {
    pub key: String,
}

#[derive(Debug, Deserialize)]
pub struct SetArgs {
    pub key: String,
    pub value: String,
    /// Seconds. Absent or zero means the cache's default.
    #[serde(default)]
    pub ttl: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteArgs {
    pub key: String,
}

fn parse_args<T: DeserializeOwned>(tool: &str, args: Value) -> Result<T, McpError> {
    serde_json::from_value(args)
        .map_err(|e| McpError::InvalidArguments(format!("{}: {}", tool, e)))
}

fn key_schema(description: &str) -> Value {
    json!({
        "type": "string",
        "description": description
    })
}

/// Shared handle on the cache every tool talks to.
#[derive(Clone)]
pub struct CacheTarget {
    client: Arc<dyn CacheClient>,
    cache_name: String,
}

impl CacheTarget {
    pub fn new(client: Arc<dyn CacheClient>, cache_name: impl Into<String>) -> Self {
        Self {
            client,
            cache_name: cache_name.into(),
        }
    }
}

pub struct GetTool(pub CacheTarget);

impl McpTool for GetTool {
    fn name(&self) -> &str {
        "get"
    }

    fn description(&self) -> &str {
        "Get value by key from the cache"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "key": key_schema("Key of item to get")
            },
            "required": ["key"]
        })
    }

    fn execute(&self, args: Value) -> Result<CallToolResponse, McpError> {
        let args: GetArgs = parse_args(self.name(), args)?;
        let value = self.0.client.get(&self.0.cache_name, &args.key)?;
        debug!("get {}: {}", args.key, if value.is_some() { "hit" } else { "miss" });
        Ok(CallToolResponse::text(value.unwrap_or_default()))
    }
}

pub struct SetTool(pub CacheTarget);

impl McpTool for SetTool {
    fn name(&self) -> &str {
        "set"
    }

    fn description(&self) -> &str {
        "Set a key-value pair in the cache with optional TTL for expiration time"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "key": key_schema("Key of item to set"),
                "value": {
                    "type": "string",
                    "description": "value of item to set"
                },
                "ttl": {
                    "type": "integer",
                    "minimum": 0,
                    "description": "TTL or expiry of item to set in seconds"
                }
            },
            "required": ["key", "value"]
        })
    }

    fn execute(&self, args: Value) -> Result<CallToolResponse, McpError> {
        let args: SetArgs = parse_args(self.name(), args)?;
        let ttl = args.ttl.map(Duration::from_secs);
        self.0
            .client
            .set(&self.0.cache_name, &args.key, &args.value, ttl)?;
        Ok(CallToolResponse::text(""))
    }
}

pub struct DeleteTool(pub CacheTarget);

impl McpTool for DeleteTool {
    fn name(&self) -> &str {
        "delete"
    }

    fn description(&self) -> &str {
        "Delete an item from the cache"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "key": key_schema("Key of item to delete")
            },
            "required": ["key"]
        })
    }

    fn execute(&self, args: Value) -> Result<CallToolResponse, McpError> {
        let args: DeleteArgs = parse_args(self.name(), args)?;
        self.0.client.delete(&self.0.cache_name, &args.key)?;
        Ok(CallToolResponse::text(""))
    }
}

/// Register `get`, `set` and `delete` on `server`.
pub fn register_cache_tools<T: Transport + 'static>(
    server: &McpServer<T>,
    target: CacheTarget,
) -> Result<(), McpError> {
    server.add_tool(GetTool(target.clone()))?;
    server.add_tool(SetTool(target.clone()))?;
    server.add_tool(DeleteTool(target))?;
    Ok(())
}
