pub mod codec;
mod lifecycle;
mod stdio;
mod topic;
mod topics;

pub use lifecycle::TransportState;
pub use stdio::*;
pub use topic::*;
pub use topics::*;

use crate::context::CancellationToken;
use crate::types::{JsonRpcMessage, McpError};
use std::sync::Arc;

/// Called on the transport's read thread for every decoded inbound message.
pub type MessageHandlerFn = Arc<dyn Fn(&CancellationToken, JsonRpcMessage) + Send + Sync>;
/// Called for failures that have no synchronous caller to return to.
pub type ErrorHandlerFn = Arc<dyn Fn(McpError) + Send + Sync>;
/// Called once, when the transport closes.
pub type CloseHandlerFn = Arc<dyn Fn() + Send + Sync>;

/// Callback-driven, full-duplex message transport.
///
/// Inbound traffic is pushed to the registered message handler from a
/// background thread started by [`Transport::start`]; outbound traffic goes
/// through [`Transport::send`] on the caller's thread.
///
/// Handlers may be replaced at any time. The handler registered when an event
/// is dispatched is the one that sees it; replacing a handler while the read
/// thread is inside it does not interrupt that call.
pub trait Transport: Send + Sync {
    /// Begin reading. Returns once the read thread is spawned, without waiting
    /// for it to connect. A transport starts at most once.
    fn start(&self, ctx: &CancellationToken) -> Result<(), McpError>;

    /// Send one message to the peer.
    fn send(&self, ctx: &CancellationToken, message: &JsonRpcMessage) -> Result<(), McpError>;

    /// Stop the transport and release its resources. Idempotent.
    fn close(&self) -> Result<(), McpError>;

    fn set_message_handler(&self, handler: MessageHandlerFn);

    fn set_error_handler(&self, handler: ErrorHandlerFn);

    fn set_close_handler(&self, handler: CloseHandlerFn);
}
