//! JSON-RPC 2.0 envelope types and dispatch tables.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::errors::rpc_code;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl JsonRpcRequest {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Value::Null,
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(rpc_code::METHOD_NOT_FOUND, format!("method not found: {method}"))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(rpc_code::INVALID_PARAMS, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(rpc_code::INVALID_REQUEST, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(rpc_code::INTERNAL_ERROR, message)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// One frame of an SSE response: an event name plus its JSON payload,
/// rendered as `event: <name>` / `data: <json>` / blank line.
#[derive(Debug, Clone)]
pub struct SseFrame {
    pub event: String,
    pub data: Value,
}

/// A regular JSON-RPC method handler.
#[async_trait]
pub trait RpcHandler: Send + Sync {
    async fn handle(&self, params: Value) -> Result<Value, JsonRpcError>;
}

/// An SSE method handler: writes frames directly to the given sender
/// instead of returning a single response.
#[async_trait]
pub trait SseHandler: Send + Sync {
    async fn handle(&self, params: Value, tx: mpsc::Sender<SseFrame>);
}

/// The server's two dispatch tables, populated at startup and read-only
/// afterwards.
#[derive(Clone, Default)]
pub struct RpcRouter {
    handlers: HashMap<String, Arc<dyn RpcHandler>>,
    sse_handlers: HashMap<String, Arc<dyn SseHandler>>,
}

impl RpcRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, method: impl Into<String>, handler: Arc<dyn RpcHandler>) {
        self.handlers.insert(method.into(), handler);
    }

    pub fn register_sse(&mut self, method: impl Into<String>, handler: Arc<dyn SseHandler>) {
        self.sse_handlers.insert(method.into(), handler);
    }

    pub fn sse_handler(&self, method: &str) -> Option<Arc<dyn SseHandler>> {
        self.sse_handlers.get(method).cloned()
    }

    pub fn handler(&self, method: &str) -> Option<Arc<dyn RpcHandler>> {
        self.handlers.get(method).cloned()
    }

    pub fn is_known_method(&self, method: &str) -> bool {
        self.handlers.contains_key(method) || self.sse_handlers.contains_key(method)
    }
}
