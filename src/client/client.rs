//! Client implementation for the Model Context Protocol (MCP).
//!
//! The client runs on top of any [`Transport`]. Each request is published
//! with a fresh numeric id and the calling thread blocks until the matching
//! response or error arrives on the transport's read thread, or the request
//! timeout elapses.
//!
//! # Usage
//!
//! ```no_run
//! use topic_mcp::client::McpClient;
//! use topic_mcp::pubsub::MemoryTopicBus;
//! use topic_mcp::transport::TopicTransport;
//!
//! # fn main() -> Result<(), topic_mcp::McpError> {
//! let bus = MemoryTopicBus::new();
//! let client = McpClient::new(TopicTransport::client(bus.client(), "my-cache"));
//! client.start()?;
//!
//! let tools = client.list_tools()?;
//! println!("Available tools: {}", tools.tools.len());
//!
//! client.stop()?;
//! # Ok(())
//! # }
//! ```
use crate::context::CancellationToken;
use crate::transport::Transport;
use crate::types::*;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

type Reply = Result<Value, JsonRpcError>;
type PendingRequests = Arc<Mutex<HashMap<RequestId, Sender<Reply>>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Receives notifications pushed by the server.
pub trait NotificationHandler: Send + Sync {
    fn handle_notification(&self, notification: &JsonRpcNotification);
}

/// A client implementation of the Model Context Protocol (MCP).
pub struct McpClient<T: Transport + 'static> {
    transport: Arc<T>,
    ctx: CancellationToken,
    request_id: AtomicI64,
    pending_requests: PendingRequests,
    notification_handler: Option<Arc<dyn NotificationHandler>>,
    timeout: Duration,
    server_info: Mutex<Option<InitializeResponse>>,
}

impl<T: Transport + 'static> Drop for McpClient<T> {
    fn drop(&mut self) {
        // We don't want to panic in drop, so we ignore any errors
        let _ = self.transport.close();
    }
}

impl<T: Transport + 'static> McpClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport: Arc::new(transport),
            ctx: CancellationToken::new(),
            request_id: AtomicI64::new(1),
            pending_requests: Arc::new(Mutex::new(HashMap::new())),
            notification_handler: None,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            server_info: Mutex::new(None),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_notification_handler(mut self, handler: impl NotificationHandler + 'static) -> Self {
        self.notification_handler = Some(Arc::new(handler));
        self
    }

    /// Use `ctx` for the transport's lifetime instead of a private token.
    pub fn with_context(mut self, ctx: CancellationToken) -> Self {
        self.ctx = ctx;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Connects and performs the initialize handshake.
    pub fn start(&self) -> Result<(), McpError> {
        self.connect()?;
        self.initialize()?;
        Ok(())
    }

    /// Installs the reply router on the transport and starts it, without
    /// talking to the server yet.
    pub fn connect(&self) -> Result<(), McpError> {
        let pending = self.pending_requests.clone();
        let notifications = self.notification_handler.clone();
        let transport: Weak<T> = Arc::downgrade(&self.transport);
        self.transport.set_message_handler(Arc::new(
            move |ctx: &CancellationToken, message: JsonRpcMessage| {
                route_message(&pending, notifications.as_deref(), &transport, ctx, message)
            },
        ));

        self.transport
            .set_error_handler(Arc::new(|e: McpError| warn!("Transport error: {}", e)));

        // Pending callers see their channel disconnect once the transport is gone.
        let pending = self.pending_requests.clone();
        self.transport.set_close_handler(Arc::new(move || {
            lock(&pending).clear();
        }));

        self.transport.start(&self.ctx)
    }

    /// Phase 1: initialize request/response. Phase 2: initialized notification.
    pub fn initialize(&self) -> Result<InitializeResponse, McpError> {
        let request = InitializeRequest {
            protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
            capabilities: ClientCapabilities::default(),
            client_info: Implementation {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };
        let response = self.execute::<Initialize>(request)?;
        debug!(
            "Connected to {} {}",
            response.server_info.name, response.server_info.version
        );
        *lock(&self.server_info) = Some(response.clone());

        self.transport.send(
            &self.ctx,
            &JsonRpcMessage::Notification(JsonRpcNotification::initialized()),
        )?;
        Ok(response)
    }

    /// Closes the transport. Requests still waiting fail with
    /// [`McpError::RequestAbandoned`].
    pub fn stop(&self) -> Result<(), McpError> {
        self.transport.close()?;
        lock(&self.pending_requests).clear();
        Ok(())
    }

    pub fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let id = RequestId::Number(self.request_id.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = channel();
        lock(&self.pending_requests).insert(id.clone(), tx);

        let request = JsonRpcRequest::new(id.clone(), method, params);
        if let Err(e) = self.transport.send(&self.ctx, &JsonRpcMessage::Request(request)) {
            lock(&self.pending_requests).remove(&id);
            return Err(e);
        }

        let reply = rx.recv_timeout(self.timeout);
        lock(&self.pending_requests).remove(&id);
        match reply {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(error)) => Err(McpError::JsonRpc(error)),
            Err(RecvTimeoutError::Disconnected) => Err(McpError::RequestAbandoned(id)),
            Err(source) => Err(McpError::RequestTimeout {
                method: method.to_string(),
                source,
            }),
        }
    }

    /// Executes a typed MCP command on the server.
    pub fn execute<C: McpCommand>(&self, request: C::Request) -> Result<C::Response, McpError> {
        let params = serde_json::to_value(request)?;
        let result = self.request(C::COMMAND, Some(params))?;
        Ok(serde_json::from_value(result)?)
    }

    pub fn ping(&self) -> Result<(), McpError> {
        self.execute::<Ping>(EmptyResult::default())?;
        Ok(())
    }

    pub fn list_tools(&self) -> Result<ListToolsResponse, McpError> {
        self.execute::<ListTools>(ListToolsRequest::default())
    }

    pub fn call_tool(
        &self,
        name: impl Into<String>,
        arguments: Option<Value>,
    ) -> Result<CallToolResponse, McpError> {
        self.execute::<CallTool>(CallToolRequest {
            name: name.into(),
            arguments,
            meta: None,
        })
    }

    /// Server details from the last successful [`McpClient::initialize`].
    pub fn server_info(&self) -> Option<Implementation> {
        lock(&self.server_info)
            .as_ref()
            .map(|info| info.server_info.clone())
    }
}

fn route_message<T: Transport>(
    pending: &PendingRequests,
    notifications: Option<&dyn NotificationHandler>,
    transport: &Weak<T>,
    ctx: &CancellationToken,
    message: JsonRpcMessage,
) {
    match message {
        JsonRpcMessage::Response(response) => complete(pending, response.id, Ok(response.result)),
        JsonRpcMessage::Error(error) => complete(pending, error.id, Err(error.error)),
        JsonRpcMessage::Notification(notification) => match notifications {
            Some(handler) => handler.handle_notification(&notification),
            None => debug!("Got notification without a handler: {}", notification.method),
        },
        JsonRpcMessage::Request(request) => {
            warn!("Server request '{}' is not supported", request.method);
            let reply = JsonRpcErrorResponse::new(
                request.id,
                ErrorCode::MethodNotFound,
                format!("Method not found: {}", request.method),
            );
            if let Some(transport) = transport.upgrade() {
                if let Err(e) = transport.send(ctx, &reply.into()) {
                    warn!("Failed to reject server request: {}", e);
                }
            }
        }
    }
}

fn complete(pending: &PendingRequests, id: RequestId, reply: Reply) {
    let sender = lock(pending).remove(&id);
    match sender {
        Some(sender) => {
            if sender.send(reply).is_err() {
                debug!("Caller for request {} stopped waiting", id);
            }
        }
        None => warn!("Got reply for unknown request {}", id),
    }
}
