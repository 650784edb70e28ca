// types is shared between client and server
pub mod types;
pub use types::McpError;

pub mod cache;
pub mod config;
pub mod context;
pub mod pubsub;
pub mod transport;

pub use context::CancellationToken;
pub use transport::{Role, TopicTransport, Transport};

// client only available with client feature
#[cfg(feature = "client")]
pub mod client;
#[cfg(feature = "client")]
pub use client::McpClient;

// server only available with server feature
#[cfg(feature = "server")]
pub mod server;
#[cfg(feature = "server")]
pub use server::{McpServer, McpTool};
