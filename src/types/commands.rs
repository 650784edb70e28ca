use crate::types::{
    CallToolRequest, CallToolResponse, EmptyResult, InitializeRequest, InitializeResponse,
    ListToolsRequest, ListToolsResponse,
};
use serde::{Deserialize, Serialize};

pub trait McpCommand {
    const COMMAND: &'static str;
    type Request: Serialize;
    type Response: for<'de> Deserialize<'de>;
}

#[derive(Debug, Clone)]
pub struct Initialize;
impl McpCommand for Initialize {
    const COMMAND: &'static str = "initialize";
    type Request = InitializeRequest;
    type Response = InitializeResponse;
}

#[derive(Debug, Clone)]
pub struct Ping;
impl McpCommand for Ping {
    const COMMAND: &'static str = "ping";
    type Request = EmptyResult;
    type Response = EmptyResult;
}

#[derive(Debug, Clone)]
pub struct ListTools;
impl McpCommand for ListTools {
    const COMMAND: &'static str = "tools/list";
    type Request = ListToolsRequest;
    type Response = ListToolsResponse;
}

#[derive(Debug, Clone)]
pub struct CallTool;
impl McpCommand for CallTool {
    const COMMAND: &'static str = "tools/call";
    type Request = CallToolRequest;
    type Response = CallToolResponse;
}
