#![cfg(feature = "server")]
pub mod handlers;
pub mod server;
pub mod tools;

pub use server::{McpServer, McpTool, ServerState};
pub use tools::{register_cache_tools, CacheTarget};
