use crate::server::server::ServerState;
use crate::types::{
    CallTool, CallToolRequest, CallToolResponse, EmptyResult, Implementation, Initialize,
    InitializeRequest, InitializeResponse, ListTools, ListToolsRequest, ListToolsResponse,
    McpCommand, McpError, Ping, ServerCapabilities, LATEST_PROTOCOL_VERSION,
};
use serde_json::json;
use tracing::debug;

/// Command handler trait
pub trait CommandHandler<CMD: McpCommand>: Send + Sync {
    fn handle(&self, request: CMD::Request, server: &ServerState)
        -> Result<CMD::Response, McpError>;
}

/// Default handlers
pub struct DefaultInitializeHandler {
    name: String,
    version: String,
}

impl DefaultInitializeHandler {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl CommandHandler<Initialize> for DefaultInitializeHandler {
    fn handle(
        &self,
        request: InitializeRequest,
        _server: &ServerState,
    ) -> Result<InitializeResponse, McpError> {
        debug!(
            "Initialize from {} {} (protocol {})",
            request.client_info.name, request.client_info.version, request.protocol_version
        );
        Ok(InitializeResponse {
            protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(json!({})),
                ..Default::default()
            },
            server_info: Implementation {
                name: self.name.clone(),
                version: self.version.clone(),
            },
        })
    }
}

pub struct DefaultPingHandler;
impl CommandHandler<Ping> for DefaultPingHandler {
    fn handle(&self, _request: EmptyResult, _server: &ServerState) -> Result<EmptyResult, McpError> {
        Ok(EmptyResult::default())
    }
}

pub struct DefaultListToolsHandler;
impl CommandHandler<ListTools> for DefaultListToolsHandler {
    fn handle(
        &self,
        _request: ListToolsRequest,
        server: &ServerState,
    ) -> Result<ListToolsResponse, McpError> {
        Ok(ListToolsResponse {
            tools: server.tool_definitions(),
            next_cursor: None,
            meta: None,
        })
    }
}

pub struct DefaultCallToolHandler;
impl CommandHandler<CallTool> for DefaultCallToolHandler {
    fn handle(
        &self,
        request: CallToolRequest,
        server: &ServerState,
    ) -> Result<CallToolResponse, McpError> {
        server.call_tool(&request.name, request.arguments.unwrap_or(json!({})))
    }
}
