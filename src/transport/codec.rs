//! JSON encoding of [`JsonRpcMessage`] for the wire.
//!
//! Messages carry no explicit type tag. Decoding tries each shape in a fixed
//! order and keeps the first one whose required fields are present:
//!
//! 1. Request: `id` and `method`
//! 2. Notification: `method`
//! 3. Response: `id` and `result`
//! 4. Error: `id` and `error`
//!
//! A payload carrying both `id` and `method` is therefore always a request,
//! even if it also has `result` or `error`. Fields that are not part of the
//! chosen shape are ignored.
use crate::types::{
    JsonRpcErrorResponse, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    McpError,
};
use serde::de::DeserializeOwned;
use serde_json::Value;

pub fn encode(message: &JsonRpcMessage) -> Result<String, McpError> {
    serde_json::to_string(message).map_err(McpError::Encode)
}

pub fn decode(payload: &[u8]) -> Result<JsonRpcMessage, McpError> {
    let value: Value = serde_json::from_slice(payload)
        .map_err(|e| McpError::UnrecognizedMessage(format!("invalid JSON: {}", e)))?;
    if !value.is_object() {
        return Err(McpError::UnrecognizedMessage(
            "payload is not a JSON object".into(),
        ));
    }

    if let Some(request) = parse::<JsonRpcRequest>(&value) {
        return Ok(JsonRpcMessage::Request(request));
    }
    if let Some(notification) = parse::<JsonRpcNotification>(&value) {
        return Ok(JsonRpcMessage::Notification(notification));
    }
    if let Some(response) = parse::<JsonRpcResponse>(&value) {
        return Ok(JsonRpcMessage::Response(response));
    }
    if let Some(error) = parse::<JsonRpcErrorResponse>(&value) {
        return Ok(JsonRpcMessage::Error(error));
    }

    Err(McpError::UnrecognizedMessage(
        "no request, notification, response or error fields".into(),
    ))
}

pub fn decode_str(payload: &str) -> Result<JsonRpcMessage, McpError> {
    decode(payload.as_bytes())
}

fn parse<T: DeserializeOwned>(value: &Value) -> Option<T> {
    T::deserialize(value).ok()
}
