use crate::cache::CacheError;
use crate::context::CancellationToken;
use crate::server::handlers::*;
use crate::transport::Transport;
use crate::types::*;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

/// Core tool interface
pub trait McpTool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn schema(&self) -> Value;
    fn execute(&self, args: Value) -> Result<CallToolResponse, McpError>;
}

/// Everything a command handler can see of the server.
pub struct ServerState {
    name: String,
    version: String,
    tools: RwLock<BTreeMap<String, Box<dyn McpTool>>>,
    handlers: RwLock<HashMap<&'static str, HandlerFn>>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

impl ServerState {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Tool definitions, ordered by name.
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        read(&self.tools)
            .values()
            .map(|tool| ToolDefinition {
                name: tool.name().to_string(),
                description: Some(tool.description().to_string()),
                input_schema: tool.schema(),
            })
            .collect()
    }

    pub fn call_tool(&self, name: &str, args: Value) -> Result<CallToolResponse, McpError> {
        let tools = read(&self.tools);
        let tool = tools
            .get(name)
            .ok_or_else(|| McpError::UnknownTool(name.to_string()))?;
        tool.execute(args)
    }

    /// Turn one inbound message into the reply to send, if any.
    pub fn handle_message(&self, message: JsonRpcMessage) -> Option<JsonRpcMessage> {
        match message {
            JsonRpcMessage::Request(request) => Some(self.handle_request(request)),
            JsonRpcMessage::Notification(notification) => {
                debug!("Received notification: {}", notification.method);
                None
            }
            other => {
                warn!("Unexpected {} from client, ignoring", other.kind());
                None
            }
        }
    }

    fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcMessage {
        let handlers = read(&self.handlers);
        let Some(handler) = handlers.get(request.method.as_str()) else {
            return JsonRpcErrorResponse::new(
                request.id,
                ErrorCode::MethodNotFound,
                format!("Method not found: {}", request.method),
            )
            .into();
        };

        match handler.handle(request.params.unwrap_or(json!({})), self) {
            Ok(result) => JsonRpcResponse::new(request.id, result).into(),
            Err(e) => {
                debug!("{} failed: {}", request.method, e);
                JsonRpcErrorResponse::new(request.id, error_code(&e), e.to_string()).into()
            }
        }
    }
}

fn error_code(error: &McpError) -> ErrorCode {
    match error {
        McpError::SerializationError(_)
        | McpError::InvalidArguments(_)
        | McpError::UnknownTool(_)
        | McpError::Cache(CacheError::InvalidKey(_) | CacheError::InvalidTtl(_)) => {
            ErrorCode::InvalidParams
        }
        _ => ErrorCode::ServerError,
    }
}

/// The MCP Server implementation
///
/// Requests arriving on the transport are answered on the transport's read
/// thread, one at a time.
pub struct McpServer<T: Transport + 'static> {
    transport: Arc<T>,
    state: Arc<ServerState>,
}

impl<T: Transport + 'static> McpServer<T> {
    pub fn new(name: impl Into<String>, version: impl Into<String>, transport: T) -> Self {
        let name = name.into();
        let version = version.into();

        let server = Self {
            transport: Arc::new(transport),
            state: Arc::new(ServerState {
                name: name.clone(),
                version: version.clone(),
                tools: RwLock::new(BTreeMap::new()),
                handlers: RwLock::new(HashMap::new()),
            }),
        };

        // Set up default handlers
        server.set_handler::<Initialize, _>(DefaultInitializeHandler::new(name, version));
        server.set_handler::<Ping, _>(DefaultPingHandler);
        server.set_handler::<ListTools, _>(DefaultListToolsHandler);
        server.set_handler::<CallTool, _>(DefaultCallToolHandler);

        server
    }

    pub fn set_handler<CMD, H>(&self, handler: H)
    where
        CMD: McpCommand,
        CMD::Request: DeserializeOwned,
        CMD::Response: Serialize,
        H: CommandHandler<CMD> + 'static,
    {
        let handler_fn = HandlerFn::new(move |params, state| {
            let request: CMD::Request = serde_json::from_value(params)?;
            let response = handler.handle(request, state)?;
            Ok(serde_json::to_value(response)?)
        });

        write(&self.state.handlers).insert(CMD::COMMAND, handler_fn);
    }

    pub fn add_tool<Tool>(&self, tool: Tool) -> Result<(), McpError>
    where
        Tool: McpTool + 'static,
    {
        let name = tool.name().to_string();
        let mut tools = write(&self.state.tools);
        if tools.contains_key(&name) {
            return Err(McpError::DuplicateTool(name));
        }

        tools.insert(name, Box::new(tool));
        Ok(())
    }

    pub fn state(&self) -> &ServerState {
        &self.state
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Install the request dispatcher on the transport and start it. Returns as
    /// soon as the transport is reading.
    pub fn serve(&self, ctx: &CancellationToken) -> Result<(), McpError> {
        let state = self.state.clone();
        let transport = Arc::downgrade(&self.transport);
        self.transport.set_message_handler(Arc::new(
            move |ctx: &CancellationToken, message: JsonRpcMessage| {
                let Some(reply) = state.handle_message(message) else {
                    return;
                };
                let Some(transport) = transport.upgrade() else {
                    return;
                };
                if let Err(e) = transport.send(ctx, &reply) {
                    warn!("Failed to send reply: {}", e);
                }
            },
        ));
        self.transport
            .set_error_handler(Arc::new(|e: McpError| warn!("Transport error: {}", e)));

        self.transport.start(ctx)?;
        debug!(
            "MCP Server `{}` started, version {}",
            self.state.name, self.state.version
        );
        Ok(())
    }

    pub fn send_notification(
        &self,
        ctx: &CancellationToken,
        notification: JsonRpcNotification,
    ) -> Result<(), McpError> {
        self.transport
            .send(ctx, &JsonRpcMessage::Notification(notification))
    }

    pub fn close(&self) -> Result<(), McpError> {
        self.transport.close()
    }
}

// Handler function type for type-erased command handling
pub(crate) struct HandlerFn {
    handle_fn: Box<dyn Fn(Value, &ServerState) -> Result<Value, McpError> + Send + Sync>,
}

impl HandlerFn {
    fn new<F>(f: F) -> Self
    where
        F: Fn(Value, &ServerState) -> Result<Value, McpError> + Send + Sync + 'static,
    {
        Self {
            handle_fn: Box::new(f),
        }
    }

    fn handle(&self, params: Value, state: &ServerState) -> Result<Value, McpError> {
        (self.handle_fn)(params, state)
    }
}
