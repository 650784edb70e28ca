use crate::cache::CacheError;
use crate::config::ConfigError;
use crate::pubsub::PubSubError;
use crate::types::{JsonRpcError, RequestId};
use std::error::Error as StdError;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum McpError {
    // Transport Errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Transport already started")]
    AlreadyStarted,
    #[error("Transport closed")]
    TransportClosed,
    #[error("Failed to subscribe to topic '{topic}': {source}")]
    ConnectionSetup {
        topic: String,
        #[source]
        source: PubSubError,
    },
    #[error("read error: {0}")]
    Read(#[source] Box<McpError>),
    #[error(transparent)]
    Publish(PubSubError),
    #[error("Message handler panicked: {message}")]
    HandlerPanicked {
        method: Option<String>,
        message: String,
    },
    #[error(transparent)]
    PubSub(#[from] PubSubError),

    // Codec Errors
    #[error("Failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to unmarshal JSON-RPC message, unrecognized type: {0}")]
    UnrecognizedMessage(String),

    // Protocol Errors
    #[error("JSON-RPC error: {0}")]
    JsonRpc(#[from] JsonRpcError),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    // Client Errors
    #[error("Request timeout for method '{method}': {source}")]
    RequestTimeout {
        method: String,
        #[source]
        source: std::sync::mpsc::RecvTimeoutError,
    },
    #[error("Request {0} was abandoned before a reply arrived")]
    RequestAbandoned(RequestId),

    // Server errors
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("Duplicate tool: {0}")]
    DuplicateTool(String),
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    // Collaborator errors
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

impl StdError for JsonRpcError {}

impl McpError {
    /// True for a payload that matched none of the message shapes, including
    /// when it surfaced from the read side wrapped in [`McpError::Read`].
    pub fn is_unrecognized(&self) -> bool {
        match self {
            McpError::UnrecognizedMessage(_) => true,
            McpError::Read(inner) => inner.is_unrecognized(),
            _ => false,
        }
    }
}
